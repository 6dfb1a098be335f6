//! Rasterizes the step highlight onto a camera frame.
//!
//! Geometry comes from [`crate::geometry::map_highlight`] in frame pixels. Parts
//! of the highlight that fall outside the frame are clipped while drawing; the
//! rect itself is never adjusted.

use crate::geometry::{HighlightRect, Viewport};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, Rgba, RgbaImage};
use std::path::{Path, PathBuf};

const MAX_FRAME_SIDE: u32 = 8192;

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error("viewport {0} has no area to draw on")]
    EmptyViewport(Viewport),
    #[error("viewport {0} exceeds the 8192px frame limit")]
    ViewportTooLarge(Viewport),
    #[error("failed to open frame image: {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to save overlay image: {path}")]
    Save {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub stroke: Rgba<u8>,
    pub stroke_width: u32,
    pub corner_radius: f64,
    /// Inner marker size as a fraction of the highlight.
    pub pulse_fraction: f64,
    pub pulse: Rgba<u8>,
    pub label: bool,
    pub label_color: Rgba<u8>,
    pub label_backdrop: Rgba<u8>,
    pub label_scale: u32,
    pub background: Rgba<u8>,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            stroke: Rgba([0x38, 0xbd, 0xf8, 255]),
            stroke_width: 2,
            corner_radius: 16.0,
            pulse_fraction: 0.6,
            pulse: Rgba([0x38, 0xbd, 0xf8, 153]),
            label: true,
            label_color: Rgba([0xe2, 0xe8, 0xf0, 255]),
            label_backdrop: Rgba([0x0f, 0x17, 0x2a, 200]),
            label_scale: 2,
            background: Rgba([0x02, 0x06, 0x17, 255]),
        }
    }
}

/// A solid frame the size of `viewport`, for when no camera still is at hand.
pub fn blank_frame(viewport: Viewport, background: Rgba<u8>) -> Result<RgbaImage, OverlayError> {
    if viewport.is_empty() || viewport.width < 1.0 || viewport.height < 1.0 {
        return Err(OverlayError::EmptyViewport(viewport));
    }
    let width = viewport.width.round();
    let height = viewport.height.round();
    if width > f64::from(MAX_FRAME_SIDE) || height > f64::from(MAX_FRAME_SIDE) {
        return Err(OverlayError::ViewportTooLarge(viewport));
    }
    Ok(RgbaImage::from_pixel(width as u32, height as u32, background))
}

pub fn open_frame(path: &Path) -> Result<RgbaImage, OverlayError> {
    let frame = image::open(path).map_err(|source| OverlayError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(frame.to_rgba8())
}

pub fn frame_viewport(frame: &RgbaImage) -> Viewport {
    Viewport::new(f64::from(frame.width()), f64::from(frame.height()))
}

/// Writes `frame` as PNG. The parent directory must already exist.
pub fn save_png(frame: RgbaImage, path: &Path) -> Result<(), OverlayError> {
    DynamicImage::ImageRgba8(frame)
        .save(path)
        .map_err(|source| OverlayError::Save {
            path: path.to_path_buf(),
            source,
        })
}

/// Draws the rounded highlight border, the inner pulse marker and, if enabled
/// and given, a text label next to the box.
pub fn draw_highlight(
    img: &mut RgbaImage,
    rect: &HighlightRect,
    label: Option<&str>,
    style: &OverlayStyle,
) {
    if rect.width <= 0.0 || rect.height <= 0.0 {
        return;
    }
    let x0 = rect.left.round() as i32;
    let y0 = rect.top.round() as i32;
    let x1 = rect.right().round() as i32;
    let y1 = rect.bottom().round() as i32;
    draw_rounded_ring(
        img,
        (x0, y0, x1, y1),
        style.corner_radius,
        style.stroke_width,
        style.stroke,
    );

    let pw = rect.width * style.pulse_fraction;
    let ph = rect.height * style.pulse_fraction;
    let px = rect.left + (rect.width - pw) / 2.0;
    let py = rect.top + (rect.height - ph) / 2.0;
    draw_rounded_ring(
        img,
        (
            px.round() as i32,
            py.round() as i32,
            (px + pw).round() as i32,
            (py + ph).round() as i32,
        ),
        f64::MAX,
        style.stroke_width,
        style.pulse,
    );

    if style.label {
        if let Some(text) = label.filter(|t| !t.trim().is_empty()) {
            draw_label(img, (x0, y0, x1, y1), text, style);
        }
    }
}

fn draw_label(img: &mut RgbaImage, target: (i32, i32, i32, i32), text: &str, style: &OverlayStyle) {
    let scale = style.label_scale.max(1) as i32;
    let pad = 2 * scale;
    let glyph = 8 * scale;
    let max_chars = ((img.width() as i32 - pad * 2) / glyph).max(0) as usize;
    if max_chars == 0 {
        return;
    }
    let line: String = text.chars().take(max_chars).collect();
    let (_, _, tw, th) = text_bbox(0, 0, &line, scale as u32);

    let (x0, y0, _, y1) = target;
    let box_w = tw + pad * 2;
    let box_h = th + pad * 2;
    let x = clamp_i32(x0, 0, (img.width() as i32 - box_w).max(0));
    let above = y0.saturating_sub(box_h + pad);
    let y = if above >= 0 {
        above
    } else {
        clamp_i32(y1.saturating_add(pad), 0, (img.height() as i32 - box_h).max(0))
    };

    fill_rect_alpha(img, x, y, x + box_w - 1, y + box_h - 1, style.label_backdrop);
    draw_bitmap_text(img, x + pad, y + pad, &line, style.label_color, scale as u32);
}

/// Parses `#rrggbb` / `#rrggbbaa`.
pub fn parse_hex_color(raw: &str) -> Option<Rgba<u8>> {
    let hex = raw.trim().strip_prefix('#')?;
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    match hex.len() {
        6 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255])),
        8 => Some(Rgba([channel(0)?, channel(2)?, channel(4)?, channel(6)?])),
        _ => None,
    }
}

fn clamp_i32(value: i32, min_value: i32, max_value: i32) -> i32 {
    value.max(min_value).min(max_value)
}

fn blend_pixel(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let a = f64::from(src[3]) / 255.0;
    if a <= 0.0 {
        return dst;
    }
    let inv = 1.0 - a;
    let mix = |d: u8, s: u8| {
        (f64::from(d) * inv + f64::from(s) * a)
            .round()
            .clamp(0.0, 255.0) as u8
    };
    let out_a = (f64::from(dst[3]) + f64::from(src[3]) * inv)
        .round()
        .clamp(0.0, 255.0) as u8;
    Rgba([mix(dst[0], src[0]), mix(dst[1], src[1]), mix(dst[2], src[2]), out_a])
}

/// Blends `color` over the pixel at (x, y); off-frame coordinates are ignored.
fn blend_at(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
        return;
    };
    if let Some(px) = img.get_pixel_mut_checked(x, y) {
        *px = blend_pixel(*px, color);
    }
}

fn point_in_rounded_rect(px: i32, py: i32, bounds: (i32, i32, i32, i32), radius: f64) -> bool {
    let (x0, y0, x1, y1) = bounds;
    if px < x0 || px >= x1 || py < y0 || py >= y1 {
        return false;
    }
    if radius <= 0.1 {
        return true;
    }
    let (left, top, right, bottom) = (
        f64::from(x0),
        f64::from(y0),
        f64::from(x1),
        f64::from(y1),
    );
    let r = radius
        .min((right - left) / 2.0)
        .min((bottom - top) / 2.0);
    // Pixel centers, so a fully rounded box comes out symmetric.
    let fx = f64::from(px) + 0.5;
    let fy = f64::from(py) + 0.5;
    if (fx >= left + r && fx <= right - r) || (fy >= top + r && fy <= bottom - r) {
        return true;
    }
    [
        (left + r, top + r),
        (right - r, top + r),
        (left + r, bottom - r),
        (right - r, bottom - r),
    ]
    .iter()
    .any(|(cx, cy)| {
        let dx = fx - cx;
        let dy = fy - cy;
        dx * dx + dy * dy <= r * r
    })
}

/// Border of a rounded box: pixels inside `bounds` but not inside `bounds`
/// inset by `thickness`. Only the on-frame part is visited.
fn draw_rounded_ring(
    img: &mut RgbaImage,
    bounds: (i32, i32, i32, i32),
    radius: f64,
    thickness: u32,
    color: Rgba<u8>,
) {
    let (x0, y0, x1, y1) = bounds;
    if x1 <= x0 || y1 <= y0 || img.width() == 0 || img.height() == 0 {
        return;
    }
    let t = thickness.max(1) as i32;
    let inner = (
        x0.saturating_add(t),
        y0.saturating_add(t),
        x1.saturating_sub(t),
        y1.saturating_sub(t),
    );
    let inner_radius = (radius - f64::from(t)).max(0.0);

    let min_x = x0.max(0);
    let max_x = x1.min(img.width() as i32);
    let min_y = y0.max(0);
    let max_y = y1.min(img.height() as i32);
    for y in min_y..max_y {
        for x in min_x..max_x {
            if !point_in_rounded_rect(x, y, bounds, radius) {
                continue;
            }
            if inner.2 > inner.0
                && inner.3 > inner.1
                && point_in_rounded_rect(x, y, inner, inner_radius)
            {
                continue;
            }
            blend_at(img, x, y, color);
        }
    }
}

fn draw_bitmap_text(img: &mut RgbaImage, x: i32, y: i32, text: &str, color: Rgba<u8>, scale: u32) {
    let scale_i = scale.max(1) as i32;
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += 8 * scale_i;
            continue;
        };
        for (row_idx, row) in glyph.iter().enumerate() {
            for col_idx in 0..8 {
                if (*row >> col_idx) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col_idx * scale_i;
                let py = y + row_idx as i32 * scale_i;
                for sy in 0..scale_i {
                    for sx in 0..scale_i {
                        blend_at(img, px + sx, py + sy, color);
                    }
                }
            }
        }
        cursor_x += 8 * scale_i;
    }
}

fn text_bbox(x: i32, y: i32, text: &str, scale: u32) -> (i32, i32, i32, i32) {
    let scale_i = scale.max(1) as i32;
    let chars = text.chars().count() as i32;
    (x, y, chars * 8 * scale_i, 8 * scale_i)
}

fn fill_rect_alpha(img: &mut RgbaImage, x0: i32, y0: i32, x1: i32, y1: i32, color: Rgba<u8>) {
    if img.width() == 0 || img.height() == 0 {
        return;
    }
    let min_x = clamp_i32(x0.min(x1), 0, img.width() as i32 - 1);
    let max_x = clamp_i32(x0.max(x1), 0, img.width() as i32 - 1);
    let min_y = clamp_i32(y0.min(y1), 0, img.height() as i32 - 1);
    let max_y = clamp_i32(y0.max(y1), 0, img.height() as i32 - 1);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            blend_at(img, x, y, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn plain_style() -> OverlayStyle {
        OverlayStyle {
            corner_radius: 0.0,
            label: false,
            ..OverlayStyle::default()
        }
    }

    fn black(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([0, 0, 0, 255]))
    }

    #[test]
    fn draws_border_and_leaves_inside_untouched() {
        let mut img = black(100, 100);
        let rect = HighlightRect {
            left: 10.0,
            top: 10.0,
            width: 50.0,
            height: 40.0,
        };
        let style = plain_style();
        draw_highlight(&mut img, &rect, None, &style);

        assert_eq!(*img.get_pixel(10, 10), style.stroke);
        assert_eq!(*img.get_pixel(59, 49), style.stroke);
        assert_eq!(*img.get_pixel(35, 30), Rgba([0, 0, 0, 255]));
        assert_eq!(*img.get_pixel(9, 9), Rgba([0, 0, 0, 255]));
        assert_eq!(*img.get_pixel(60, 50), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn pulse_ring_sits_inside_the_box() {
        let mut img = black(200, 200);
        let rect = HighlightRect {
            left: 0.0,
            top: 0.0,
            width: 100.0,
            height: 100.0,
        };
        draw_highlight(&mut img, &rect, None, &plain_style());
        // 60% marker spans 20..80; its ring crosses the horizontal midline at x=20.
        assert_ne!(*img.get_pixel(20, 50), Rgba([0, 0, 0, 255]));
        assert_eq!(*img.get_pixel(50, 50), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn out_of_frame_rect_is_clipped_not_panicking() {
        let mut img = black(50, 50);
        let rect = HighlightRect {
            left: 40.0,
            top: -20.0,
            width: 100.0,
            height: 100.0,
        };
        draw_highlight(&mut img, &rect, Some("Press Start"), &OverlayStyle::default());
        assert_eq!(*img.get_pixel(40, 10), OverlayStyle::default().stroke);
    }

    #[test]
    fn huge_rect_ending_on_frame_draws_visible_edges() {
        let mut img = black(100, 100);
        let rect = HighlightRect {
            left: -3.0e9,
            top: 0.0,
            width: 6.0e9,
            height: 50.0,
        };
        let style = OverlayStyle::default();
        draw_highlight(&mut img, &rect, None, &style);
        assert_eq!(*img.get_pixel(50, 0), style.stroke);
        assert_eq!(*img.get_pixel(50, 25), Rgba([0, 0, 0, 255]));
        assert_eq!(*img.get_pixel(50, 75), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn tall_rect_far_above_frame_places_label_below() {
        let mut img = black(100, 100);
        let rect = HighlightRect {
            left: 10.0,
            top: -3.0e9,
            width: 30.0,
            height: 6.0e9,
        };
        let style = OverlayStyle::default();
        draw_highlight(&mut img, &rect, Some("Hi"), &style);
        assert_eq!(*img.get_pixel(10, 50), style.stroke);
        assert_ne!(*img.get_pixel(12, 90), Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn label_is_drawn_near_the_box() {
        let mut img = black(300, 200);
        let rect = HighlightRect {
            left: 100.0,
            top: 100.0,
            width: 60.0,
            height: 40.0,
        };
        let style = OverlayStyle::default();
        draw_highlight(&mut img, &rect, Some("Turn dial"), &style);
        let changed_above = (0..img.width())
            .flat_map(|x| (70..100).map(move |y| (x, y)))
            .any(|(x, y)| *img.get_pixel(x, y) != Rgba([0, 0, 0, 255]));
        assert!(changed_above);
    }

    #[test]
    fn blank_frame_matches_viewport() {
        let frame = blank_frame(Viewport::new(390.4, 640.0), Rgba([1, 2, 3, 255])).unwrap();
        assert_eq!(frame.dimensions(), (390, 640));
        assert!(matches!(
            blank_frame(Viewport::ZERO, Rgba([0, 0, 0, 255])),
            Err(OverlayError::EmptyViewport(_))
        ));
        assert!(matches!(
            blank_frame(Viewport::new(100_000.0, 10.0), Rgba([0, 0, 0, 255])),
            Err(OverlayError::ViewportTooLarge(_))
        ));
    }

    #[test]
    fn parses_hex_colors() {
        assert_eq!(parse_hex_color("#38bdf8"), Some(Rgba([0x38, 0xbd, 0xf8, 255])));
        assert_eq!(parse_hex_color("#00000080"), Some(Rgba([0, 0, 0, 0x80])));
        assert_eq!(parse_hex_color("38bdf8"), None);
        assert_eq!(parse_hex_color("#38bd"), None);
    }

    #[test]
    fn saves_png_that_reopens() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("frame.png");
        save_png(black(4, 4), &target).unwrap();
        assert_eq!(open_frame(&target).unwrap().dimensions(), (4, 4));
    }
}
