//! Reference-image to viewport mapping for step highlights.

use crate::catalog::{BoundingBox, ImageSize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// On-screen size of the live camera surface, in device-independent pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub const ZERO: Viewport = Viewport {
        width: 0.0,
        height: 0.0,
    };

    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True when there is nothing to draw onto yet (not measured, collapsed).
    pub fn is_empty(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite())
            || self.width == 0.0
            || self.height == 0.0
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid viewport '{0}': expected <width>x<height>, e.g. 390x640")]
pub struct ViewportParseError(pub String);

impl FromStr for Viewport {
    type Err = ViewportParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let err = || ViewportParseError(raw.to_string());
        let (w, h) = raw
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(err)?;
        let width = w.trim().parse::<f64>().map_err(|_| err())?;
        let height = h.trim().parse::<f64>().map_err(|_| err())?;
        if !(width.is_finite() && height.is_finite()) || width < 0.0 || height < 0.0 {
            return Err(err());
        }
        Ok(Self::new(width, height))
    }
}

/// Highlight geometry in viewport pixels, ready for absolute positioning.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HighlightRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

/// A [`HighlightRect`] expressed as fractions of the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RelativeRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl HighlightRect {
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    /// Whether the rect lies entirely inside the viewport. Boxes authored past
    /// the reference image edge map past the viewport edge and are drawn as is.
    pub fn is_within(&self, viewport: Viewport) -> bool {
        self.left >= 0.0
            && self.top >= 0.0
            && self.right() <= viewport.width
            && self.bottom() <= viewport.height
    }

    pub fn relative_to(&self, viewport: Viewport) -> Option<RelativeRect> {
        if viewport.is_empty() {
            return None;
        }
        Some(RelativeRect {
            x: round_to(self.left / viewport.width, 4),
            y: round_to(self.top / viewport.height, 4),
            w: round_to(self.width / viewport.width, 4),
            h: round_to(self.height / viewport.height, 4),
        })
    }
}

/// Maps a step's bounding box from reference-image pixels onto the viewport.
///
/// Each axis is scaled independently (`viewport / image`); the aspect ratio is
/// not preserved and the result is not clamped to the viewport. Returns `None`
/// instead of dividing by zero: no box, a zero-sized viewport or a zero-sized
/// reference image all mean there is nothing to draw.
pub fn map_highlight(
    bbox: Option<&BoundingBox>,
    viewport: Viewport,
    image_size: ImageSize,
) -> Option<HighlightRect> {
    let bbox = bbox?;
    if viewport.is_empty() {
        return None;
    }
    if !(image_size.width.is_finite() && image_size.height.is_finite())
        || image_size.width == 0.0
        || image_size.height == 0.0
    {
        return None;
    }

    let scale_x = viewport.width / image_size.width;
    let scale_y = viewport.height / image_size.height;
    let rect = HighlightRect {
        left: bbox.x * scale_x,
        top: bbox.y * scale_y,
        width: bbox.width * scale_x,
        height: bbox.height * scale_y,
    };

    let finite = [rect.left, rect.top, rect.width, rect.height]
        .iter()
        .all(|v| v.is_finite());
    finite.then_some(rect)
}

type MemoKey = (Option<BoundingBox>, Viewport, ImageSize);

/// Caches the last [`map_highlight`] result and recomputes only when the box,
/// the viewport or the reference size changes.
#[derive(Debug, Default, Clone)]
pub struct HighlightMemo {
    entry: Option<(MemoKey, Option<HighlightRect>)>,
    computations: u64,
}

impl HighlightMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &mut self,
        bbox: Option<&BoundingBox>,
        viewport: Viewport,
        image_size: ImageSize,
    ) -> Option<HighlightRect> {
        let key: MemoKey = (bbox.copied(), viewport, image_size);
        if let Some((cached_key, value)) = &self.entry {
            if *cached_key == key {
                return *value;
            }
        }
        let value = map_highlight(bbox, viewport, image_size);
        self.computations += 1;
        self.entry = Some((key, value));
        value
    }

    /// Number of times the mapping actually ran.
    pub fn computations(&self) -> u64 {
        self.computations
    }
}

pub(crate) fn round_to(v: f64, digits: u32) -> f64 {
    let factor = 10f64.powi(digits as i32);
    (v * factor).round() / factor
}
