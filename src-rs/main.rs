use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use hintlens::logging::{init_logging, LogConfig};
use hintlens::overlay::{self, OverlayStyle};
use hintlens::{
    ensure_access, CameraPermission, Catalog, Event, FixedPermission, Navigator, Screen, Viewport,
};
use rand::Rng;
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CATALOG_HELP: &str = r##"Catalog JSON schema:
{
  "modelName": "Bosch WAT28400UC",
  "imageSize": {"width": 1000, "height": 750},
  "goals": [
    {
      "id": "quick-wash",
      "name": "Quick wash",
      "steps": [
        {"text": "Turn the program dial to Quick 15'", "bbox": [420, 180, 160, 160]},
        {"text": "Press Start/Pause", "bbox": [760, 200, 90, 60]}
      ]
    }
  ]
}

Notes:
- bbox is [x, y, width, height] in pixels of the reference photo (imageSize).
- boxes are mapped onto the viewport by scaling each axis independently.
- boxes outside imageSize are accepted and render out of frame; run `validate` to list them.
"##;

#[derive(Parser, Debug)]
#[command(
    name = "hintlens",
    version,
    about = "Step-by-step appliance guidance with camera highlight mapping"
)]
struct Cli {
    /// Instruction catalog JSON (or - for stdin)
    #[arg(long, global = true, env = "HINTLENS_CATALOG")]
    catalog: Option<String>,
    /// Output machine-readable JSON
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    json: bool,
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// List the goals in the catalog
    Goals(GoalsArgs),
    /// Audit bounding boxes against the reference image size
    Validate(ValidateArgs),
    /// Map one step's bounding box onto a viewport
    Map(MapArgs),
    /// Drive a guide session with a sequence of events
    Session(SessionArgs),
    /// Render a step highlight onto a camera frame
    Overlay(OverlayArgs),
}

#[derive(Args, Debug)]
struct GoalsArgs {
    /// Print catalog schema and exit
    #[arg(long, action = ArgAction::SetTrue)]
    schema: bool,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Exit non-zero when any issue is found
    #[arg(long, action = ArgAction::SetTrue)]
    strict: bool,
}

#[derive(Args, Debug)]
struct StepTarget {
    /// Goal id (default: first goal in the catalog)
    #[arg(long)]
    goal: Option<String>,
    /// 1-based step number
    #[arg(long, default_value_t = 1)]
    step: usize,
}

#[derive(Args, Debug)]
struct MapArgs {
    #[command(flatten)]
    target: StepTarget,
    /// Viewport size as <width>x<height>
    #[arg(long)]
    viewport: Viewport,
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Events: select:<id>, next, back, helped, wrong, viewport:<w>x<h>
    events: Vec<String>,
    /// Read events from a file (or - for stdin), one per line, # comments allowed
    #[arg(long)]
    script: Option<String>,
    /// Initial viewport size as <width>x<height>
    #[arg(long)]
    viewport: Option<Viewport>,
    /// Camera permission the host reports after asking
    #[arg(long, default_value = "granted")]
    permission: CameraPermission,
    /// Print the in-memory feedback journal at the end
    #[arg(long, action = ArgAction::SetTrue)]
    journal: bool,
}

#[derive(Args, Debug)]
struct OverlayArgs {
    #[command(flatten)]
    target: StepTarget,
    /// Camera still to draw on; its pixel size becomes the viewport
    #[arg(long, conflicts_with = "viewport")]
    frame: Option<PathBuf>,
    /// Blank frame size as <width>x<height> when no --frame is given
    #[arg(long)]
    viewport: Option<Viewport>,
    /// Output PNG path (default: $HINTLENS_OUT_DIR/overlay/...)
    #[arg(long)]
    out: Option<PathBuf>,
    /// Path to write the metadata sidecar (default: <out>.json)
    #[arg(long)]
    meta_out: Option<PathBuf>,
    /// Disable metadata sidecar output
    #[arg(long, action = ArgAction::SetTrue)]
    no_meta: bool,
    /// Do not draw the step text next to the highlight
    #[arg(long, action = ArgAction::SetTrue)]
    no_label: bool,
    /// Highlight color as #rrggbb or #rrggbbaa
    #[arg(long)]
    color: Option<String>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LogConfig::with_verbosity(cli.verbose));

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Goals(args) => {
            if args.schema {
                println!("{}", CATALOG_HELP.trim());
                return Ok(());
            }
            command_goals(&*load_catalog(cli.catalog.as_deref())?, cli.json)
        }
        Commands::Validate(args) => {
            command_validate(&*load_catalog(cli.catalog.as_deref())?, args, cli.json)
        }
        Commands::Map(args) => command_map(load_catalog(cli.catalog.as_deref())?, args),
        Commands::Session(args) => {
            command_session(load_catalog(cli.catalog.as_deref())?, args, cli.json)
        }
        Commands::Overlay(args) => {
            command_overlay(load_catalog(cli.catalog.as_deref())?, args, cli.json)
        }
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "goals",
            "description": "List catalog goals and their step counts."
        }),
        json!({
            "name": "validate",
            "description": "Audit bounding boxes against the reference image size."
        }),
        json!({
            "name": "map",
            "description": "Map a step bounding box onto a viewport."
        }),
        json!({
            "name": "session",
            "description": "Drive goal/step/feedback events and print each resulting screen."
        }),
        json!({
            "name": "overlay",
            "description": "Render the step highlight onto a camera frame PNG with a JSON sidecar."
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn load_catalog(path: Option<&str>) -> Result<Arc<Catalog>> {
    let Some(path) = path else {
        bail!("no catalog given. Pass --catalog <path> or set HINTLENS_CATALOG");
    };
    let catalog = Catalog::load(path).with_context(|| format!("failed to load catalog: {path}"))?;
    for issue in catalog.validate() {
        tracing::warn!(%issue, "catalog issue");
    }
    Ok(Arc::new(catalog))
}

fn command_goals(catalog: &Catalog, as_json: bool) -> Result<()> {
    if as_json {
        let goals: Vec<Value> = catalog
            .goals
            .iter()
            .map(|goal| {
                json!({
                    "id": goal.id,
                    "name": goal.name,
                    "steps": goal.steps.len(),
                })
            })
            .collect();
        let payload = json!({
            "model_name": catalog.model_name,
            "image_size": catalog.image_size,
            "goals": goals,
        });
        println!("{}", serde_json::to_string(&payload)?);
        return Ok(());
    }

    println!("{}", catalog.model_name);
    for goal in &catalog.goals {
        println!("{}\t{}\t{} steps", goal.id, goal.name, goal.steps.len());
    }
    Ok(())
}

fn command_validate(catalog: &Catalog, args: ValidateArgs, as_json: bool) -> Result<()> {
    let issues = catalog.validate();
    if as_json {
        let payload = json!({
            "ok": issues.is_empty(),
            "issue_count": issues.len(),
            "issues": issues,
        });
        println!("{}", serde_json::to_string(&payload)?);
    } else if issues.is_empty() {
        println!("catalog ok: {} goals", catalog.goals.len());
    } else {
        for issue in &issues {
            println!("{issue}");
        }
    }

    if args.strict && !issues.is_empty() {
        bail!("catalog has {} issue(s)", issues.len());
    }
    Ok(())
}

/// Positions a fresh navigator on `target`, rejecting ids and step numbers
/// that are not in the catalog.
fn navigator_at(catalog: Arc<Catalog>, target: &StepTarget) -> Result<Navigator> {
    let goal_id = match &target.goal {
        Some(id) => id.clone(),
        None => catalog
            .first_goal_id()
            .map(ToString::to_string)
            .context("catalog has no goals")?,
    };
    let Some(goal) = catalog.goal(&goal_id) else {
        bail!(
            "unknown goal '{goal_id}'. Known goals: {}",
            known_goal_ids(&catalog)
        );
    };
    let step_count = goal.steps.len();
    if target.step == 0 || target.step > step_count {
        bail!(
            "goal '{goal_id}' has {step_count} step(s); --step must be between 1 and {step_count}"
        );
    }

    let mut nav = Navigator::new(catalog);
    nav.select_goal(&goal_id);
    for _ in 1..target.step {
        nav.advance();
    }
    Ok(nav)
}

fn known_goal_ids(catalog: &Catalog) -> String {
    catalog
        .goals
        .iter()
        .map(|goal| goal.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn step_payload(nav: &Navigator) -> Value {
    let viewport = nav.viewport();
    let highlight = nav.highlight();
    json!({
        "goal": nav.state().selected_goal_id,
        "step": nav.step_index().map(|i| i + 1),
        "step_count": nav.steps().len(),
        "text": nav.current_step().map(|s| s.text.clone()),
        "bbox": nav.current_step().map(|s| s.bbox),
        "image_size": nav.catalog().image_size,
        "viewport": viewport,
        "highlight": highlight,
        "relative": highlight.and_then(|rect| rect.relative_to(viewport)),
        "within_viewport": highlight.map(|rect| rect.is_within(viewport)),
    })
}

fn command_map(catalog: Arc<Catalog>, args: MapArgs) -> Result<()> {
    let mut nav = navigator_at(catalog, &args.target)?;
    nav.update_viewport(args.viewport.width, args.viewport.height);
    println!("{}", serde_json::to_string(&step_payload(&nav))?);
    Ok(())
}

fn command_session(catalog: Arc<Catalog>, args: SessionArgs, as_json: bool) -> Result<()> {
    let mut raw_events = Vec::new();
    if let Some(script) = &args.script {
        raw_events.extend(parse_script(&read_script(script)?));
    }
    raw_events.extend(args.events.iter().cloned());

    let mut events = Vec::with_capacity(raw_events.len());
    for (idx, raw) in raw_events.iter().enumerate() {
        let event = raw
            .parse::<Event>()
            .with_context(|| format!("event #{}: '{raw}'", idx + 1))?;
        if let Event::SelectGoal(id) = &event {
            if !catalog.contains_goal(id) {
                bail!(
                    "event #{}: unknown goal '{id}'. Known goals: {}",
                    idx + 1,
                    known_goal_ids(&catalog)
                );
            }
        }
        events.push(event);
    }

    let mut provider = FixedPermission::prompting(args.permission);
    let permission = ensure_access(&mut provider);

    let mut nav = Navigator::new(Arc::clone(&catalog));
    if let Some(viewport) = args.viewport {
        nav.update_viewport(viewport.width, viewport.height);
    }

    emit_screen("start", permission, &nav, as_json)?;
    for event in &events {
        nav.apply(event);
        emit_screen(&event.to_string(), permission, &nav, as_json)?;
    }

    if args.journal {
        let journal = nav.feedback_journal();
        if as_json {
            println!("{}", serde_json::to_string(&json!({ "journal": journal }))?);
        } else {
            println!("Feedback journal ({} entries)", journal.len());
            for record in journal {
                let step = record
                    .step_index
                    .map(|i| (i + 1).to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {}\t{}\tstep {step}\t{}",
                    record.recorded_at,
                    record.goal_id.as_deref().unwrap_or("-"),
                    record.feedback
                );
            }
        }
    }
    Ok(())
}

fn emit_screen(
    label: &str,
    permission: CameraPermission,
    nav: &Navigator,
    as_json: bool,
) -> Result<()> {
    let snapshot = nav.snapshot();
    let screen = Screen::build(permission, nav.catalog(), &snapshot);
    if as_json {
        let line = json!({
            "event": label,
            "permission": permission,
            "state": snapshot,
            "screen": screen,
        });
        println!("{}", serde_json::to_string(&line)?);
    } else {
        println!("> {label}");
        print!("{}", screen.render_text());
    }
    Ok(())
}

fn read_script(path: &str) -> Result<String> {
    if path == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read script from stdin")?;
        return Ok(buf);
    }
    fs::read_to_string(path).with_context(|| format!("failed to read script file: {path}"))
}

fn parse_script(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .flat_map(|line| line.split_whitespace())
        .map(ToString::to_string)
        .collect()
}

fn command_overlay(catalog: Arc<Catalog>, args: OverlayArgs, as_json: bool) -> Result<()> {
    let mut style = OverlayStyle::default();
    if let Some(raw) = &args.color {
        let Some(color) = overlay::parse_hex_color(raw) else {
            bail!("invalid --color '{raw}': expected #rrggbb or #rrggbbaa");
        };
        style.stroke = color;
        style.pulse = image::Rgba([color[0], color[1], color[2], 153]);
    }
    style.label = !args.no_label;

    let mut frame = match (&args.frame, args.viewport) {
        (Some(path), _) => {
            if !path.exists() {
                bail!("frame not found: {}", path.display());
            }
            overlay::open_frame(path)?
        }
        (None, Some(viewport)) => overlay::blank_frame(viewport, style.background)?,
        (None, None) => bail!("pass --frame <png> or --viewport <width>x<height>"),
    };

    let mut nav = navigator_at(catalog, &args.target)?;
    let viewport = overlay::frame_viewport(&frame);
    nav.update_viewport(viewport.width, viewport.height);

    if let Some(rect) = nav.highlight() {
        let label = nav.current_step().map(|s| s.text.as_str());
        overlay::draw_highlight(&mut frame, &rect, label, &style);
    }

    let out = args.out.clone().unwrap_or_else(|| {
        let slug = slugify(nav.state().selected_goal_id.as_deref().unwrap_or("goal"));
        let ts = timestamp_compact();
        let rand = rand::thread_rng().gen_range(1000..9999);
        out_root().join("overlay").join(format!(
            "overlay-{slug}-step{}-{ts}-{}-{rand}.png",
            args.target.step,
            std::process::id()
        ))
    });
    ensure_parent_dir(&out)?;
    overlay::save_png(frame, &out)?;

    let mut payload = step_payload(&nav);
    if let Some(obj) = payload.as_object_mut() {
        obj.insert("overlay_meta_version".to_string(), json!(1));
        obj.insert(
            "frame_path".to_string(),
            json!(args.frame.as_deref().map(|p| abs_path(p).display().to_string())),
        );
        obj.insert(
            "output_path".to_string(),
            json!(abs_path(&out).display().to_string()),
        );
        obj.insert("generated_at".to_string(), json!(timestamp_iso()));
    }

    if !args.no_meta {
        let meta_path = args
            .meta_out
            .clone()
            .unwrap_or_else(|| default_sidecar_for(&out));
        if let Some(obj) = payload.as_object_mut() {
            obj.insert(
                "meta_path".to_string(),
                json!(abs_path(&meta_path).display().to_string()),
            );
        }
        write_json_pretty(&meta_path, &payload)?;
    }

    if as_json {
        println!("{}", serde_json::to_string(&payload)?);
    } else {
        println!("{}", abs_path(&out).display());
    }
    Ok(())
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn default_sidecar_for(out: &Path) -> PathBuf {
    out.with_extension("json")
}

fn out_root() -> PathBuf {
    env::var("HINTLENS_OUT_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".hintlens"))
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || matches!(lower, '.' | '_' | '-') {
            out.push(lower);
        } else if lower.is_ascii_whitespace() {
            out.push('-');
        }
    }
    if out.is_empty() {
        "goal".to_string()
    } else {
        out
    }
}

fn timestamp_compact() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}
