//! Presentation model: what the guide screen shows for a given permission
//! state and navigation snapshot.

use crate::catalog::Catalog;
use crate::geometry::HighlightRect;
use crate::navigation::{Feedback, Snapshot};
use crate::permission::CameraPermission;
use serde::Serialize;
use std::fmt::Write as _;

pub const REQUESTING_ACCESS: &str = "Requesting camera access…";
pub const ACCESS_NEEDED: &str = "HintLens needs camera access to overlay instructions.";
pub const GRANT_ACCESS: &str = "Grant access";
pub const NO_INSTRUCTIONS: &str = "No instructions available for this goal yet.";
pub const FEEDBACK_PROMPT: &str = "Was this helpful?";
pub const FEEDBACK_THANKS: &str = "Thanks! Your feedback will help improve HintLens instructions.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "screen", rename_all = "snake_case")]
pub enum Screen {
    RequestingAccess { message: String },
    AccessDenied { message: String, action: String },
    Guide(GuideView),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoalPill {
    pub id: String,
    pub name: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Control {
    pub label: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackButton {
    pub value: Feedback,
    pub label: String,
    pub selected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepPanel {
    pub counter: String,
    pub text: String,
    pub back: Control,
    pub primary: Control,
    pub feedback_prompt: String,
    pub feedback_buttons: Vec<FeedbackButton>,
    pub thanks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuideView {
    pub model_name: String,
    pub goals: Vec<GoalPill>,
    pub step: Option<StepPanel>,
    pub fallback: Option<String>,
    /// Present only when there is a step to point at and the camera surface
    /// has been measured.
    pub highlight: Option<HighlightRect>,
}

impl Screen {
    pub fn build(permission: CameraPermission, catalog: &Catalog, snapshot: &Snapshot) -> Self {
        match permission {
            CameraPermission::Pending => Self::RequestingAccess {
                message: REQUESTING_ACCESS.to_string(),
            },
            CameraPermission::Denied => Self::AccessDenied {
                message: ACCESS_NEEDED.to_string(),
                action: GRANT_ACCESS.to_string(),
            },
            CameraPermission::Granted => Self::Guide(GuideView::build(catalog, snapshot)),
        }
    }

    pub fn render_text(&self) -> String {
        match self {
            Self::RequestingAccess { message } => format!("{message}\n"),
            Self::AccessDenied { message, action } => format!("{message}\n[{action}]\n"),
            Self::Guide(view) => view.render_text(),
        }
    }
}

impl GuideView {
    pub fn build(catalog: &Catalog, snapshot: &Snapshot) -> Self {
        let selected = snapshot.selected_goal_id.as_deref();
        let goals = catalog
            .goals
            .iter()
            .map(|goal| GoalPill {
                id: goal.id.clone(),
                name: goal.name.clone(),
                selected: Some(goal.id.as_str()) == selected,
            })
            .collect();

        let step = match (&snapshot.current_step, snapshot.step_index) {
            (Some(step), Some(index)) => Some(step_panel(snapshot, &step.text, index)),
            _ => None,
        };
        let fallback = step.is_none().then(|| NO_INSTRUCTIONS.to_string());
        let highlight = step
            .as_ref()
            .and(snapshot.highlight)
            .filter(|_| !snapshot.viewport.is_empty());

        Self {
            model_name: catalog.model_name.clone(),
            goals,
            step,
            fallback,
            highlight,
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.model_name);
        let pills: Vec<String> = self
            .goals
            .iter()
            .map(|pill| {
                if pill.selected {
                    format!("[{}]", pill.name)
                } else {
                    pill.name.clone()
                }
            })
            .collect();
        let _ = writeln!(out, "Pick a goal: {}", pills.join(" | "));

        match &self.step {
            Some(panel) => {
                let _ = writeln!(out, "{}", panel.counter);
                let _ = writeln!(out, "  {}", panel.text);
                let _ = writeln!(
                    out,
                    "  {} {}",
                    control_text(&panel.back),
                    control_text(&panel.primary)
                );
                let buttons: Vec<String> = panel
                    .feedback_buttons
                    .iter()
                    .map(|button| {
                        if button.selected {
                            format!("(*) {}", button.label)
                        } else {
                            format!("( ) {}", button.label)
                        }
                    })
                    .collect();
                let _ = writeln!(out, "  {} {}", panel.feedback_prompt, buttons.join("  "));
                if let Some(thanks) = &panel.thanks {
                    let _ = writeln!(out, "  {thanks}");
                }
            }
            None => {
                let _ = writeln!(out, "{}", self.fallback.as_deref().unwrap_or(NO_INSTRUCTIONS));
            }
        }

        if let Some(rect) = &self.highlight {
            let _ = writeln!(
                out,
                "Highlight: left={:.1} top={:.1} width={:.1} height={:.1}",
                rect.left, rect.top, rect.width, rect.height
            );
        }
        out
    }
}

fn step_panel(snapshot: &Snapshot, text: &str, index: usize) -> StepPanel {
    let last = snapshot.is_last_step;
    let buttons = [(Feedback::Helped, "This helped"), (Feedback::Wrong, "This was wrong")]
        .into_iter()
        .map(|(value, label)| FeedbackButton {
            value,
            label: label.to_string(),
            selected: snapshot.feedback == Some(value),
        })
        .collect();

    StepPanel {
        counter: format!("Step {} of {}", index + 1, snapshot.step_count),
        text: text.to_string(),
        back: Control {
            label: "Back".to_string(),
            enabled: index > 0,
        },
        primary: Control {
            label: if last { "Done" } else { "Next" }.to_string(),
            enabled: !last,
        },
        feedback_prompt: FEEDBACK_PROMPT.to_string(),
        feedback_buttons: buttons,
        thanks: snapshot.feedback.map(|_| FEEDBACK_THANKS.to_string()),
    }
}

fn control_text(control: &Control) -> String {
    if control.enabled {
        format!("[{}]", control.label)
    } else {
        format!("({})", control.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample;
    use crate::navigation::Navigator;
    use std::sync::Arc;

    fn guide(nav: &Navigator) -> GuideView {
        match Screen::build(CameraPermission::Granted, nav.catalog(), &nav.snapshot()) {
            Screen::Guide(view) => view,
            other => panic!("expected guide screen, got {other:?}"),
        }
    }

    #[test]
    fn permission_gates_the_guide() {
        let nav = Navigator::new(Arc::new(sample()));
        let snap = nav.snapshot();
        assert!(matches!(
            Screen::build(CameraPermission::Pending, nav.catalog(), &snap),
            Screen::RequestingAccess { .. }
        ));
        let denied = Screen::build(CameraPermission::Denied, nav.catalog(), &snap);
        assert_eq!(denied.render_text(), format!("{ACCESS_NEEDED}\n[{GRANT_ACCESS}]\n"));
    }

    #[test]
    fn first_step_disables_back_and_offers_next() {
        let nav = Navigator::new(Arc::new(sample()));
        let view = guide(&nav);
        let panel = view.step.unwrap();
        assert_eq!(panel.counter, "Step 1 of 3");
        assert!(!panel.back.enabled);
        assert_eq!(panel.primary.label, "Next");
        assert!(panel.primary.enabled);
        assert_eq!(panel.thanks, None);
        assert!(view.goals[0].selected);
        assert!(!view.goals[1].selected);
    }

    #[test]
    fn last_step_shows_disabled_done_and_thanks_after_feedback() {
        let mut nav = Navigator::new(Arc::new(sample()));
        nav.advance();
        nav.advance();
        nav.set_feedback(Feedback::Wrong);
        let panel = guide(&nav).step.unwrap();
        assert_eq!(panel.primary.label, "Done");
        assert!(!panel.primary.enabled);
        assert!(panel.back.enabled);
        assert!(panel.feedback_buttons[1].selected);
        assert!(!panel.feedback_buttons[0].selected);
        assert_eq!(panel.thanks.as_deref(), Some(FEEDBACK_THANKS));
    }

    #[test]
    fn empty_goal_falls_back_without_highlight() {
        let mut nav = Navigator::new(Arc::new(sample()));
        nav.update_viewport(400.0, 400.0);
        nav.select_goal("empty");
        let view = guide(&nav);
        assert!(view.step.is_none());
        assert_eq!(view.fallback.as_deref(), Some(NO_INSTRUCTIONS));
        assert_eq!(view.highlight, None);
        assert!(view.render_text().contains(NO_INSTRUCTIONS));
    }

    #[test]
    fn highlight_appears_once_viewport_is_measured() {
        let mut nav = Navigator::new(Arc::new(sample()));
        assert_eq!(guide(&nav).highlight, None);
        nav.update_viewport(500.0, 500.0);
        let view = guide(&nav);
        assert_eq!(view.highlight.map(|r| r.left), Some(50.0));
        let text = view.render_text();
        assert!(text.contains("Step 1 of 3"));
        assert!(text.contains("Highlight: left=50.0 top=100.0 width=25.0 height=30.0"));
        assert!(text.contains("[Quick wash]"));
    }
}
