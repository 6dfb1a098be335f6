//! Goal/step navigation, per-step feedback and the highlight for the current
//! step.
//!
//! [`Navigator`] is the single owner of session state. Every mutation runs to
//! completion before the next one starts; after each one that changes the
//! visible [`Snapshot`], subscribers are called synchronously with the new
//! snapshot. Nothing here fails: out-of-range moves are clamped and unknown
//! goal ids leave the guide with no current goal.

use crate::catalog::{Catalog, Goal, Step};
use crate::geometry::{HighlightMemo, HighlightRect, Viewport, ViewportParseError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feedback {
    Helped,
    Wrong,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helped => "helped",
            Self::Wrong => "wrong",
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NavigationState {
    pub selected_goal_id: Option<String>,
    pub step_index: usize,
    pub feedback: Option<Feedback>,
}

/// One tap on a feedback button. Held in memory for the session only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub goal_id: Option<String>,
    pub step_index: Option<usize>,
    pub feedback: Feedback,
    pub recorded_at: String,
}

/// Everything the presentation layer needs to draw one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub selected_goal_id: Option<String>,
    pub goal_found: bool,
    /// `None` when the selected goal has no steps (or does not exist).
    pub step_index: Option<usize>,
    pub step_count: usize,
    pub current_step: Option<Step>,
    pub is_last_step: bool,
    pub feedback: Option<Feedback>,
    pub viewport: Viewport,
    pub highlight: Option<HighlightRect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&Snapshot)>;

pub struct Navigator {
    catalog: Arc<Catalog>,
    state: NavigationState,
    viewport: Viewport,
    memo: HighlightMemo,
    highlight: Option<HighlightRect>,
    journal: Vec<FeedbackRecord>,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl Navigator {
    /// Starts a session on the catalog's first goal, step 0, no feedback and
    /// an unmeasured viewport.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        let state = NavigationState {
            selected_goal_id: catalog.first_goal_id().map(ToString::to_string),
            step_index: 0,
            feedback: None,
        };
        let mut nav = Self {
            catalog,
            state,
            viewport: Viewport::ZERO,
            memo: HighlightMemo::new(),
            highlight: None,
            journal: Vec::new(),
            observers: Vec::new(),
            next_subscription: 0,
        };
        nav.refresh_highlight();
        nav
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn current_goal(&self) -> Option<&Goal> {
        self.state
            .selected_goal_id
            .as_deref()
            .and_then(|id| self.catalog.goal(id))
    }

    pub fn steps(&self) -> &[Step] {
        self.current_goal()
            .map(|goal| goal.steps.as_slice())
            .unwrap_or(&[])
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps().get(self.state.step_index)
    }

    pub fn step_index(&self) -> Option<usize> {
        self.current_step().map(|_| self.state.step_index)
    }

    /// With zero steps there is nothing left to advance to, so this is
    /// vacuously true and the primary control shows a disabled "Done".
    pub fn is_last_step(&self) -> bool {
        let count = self.steps().len();
        count == 0 || self.state.step_index == count - 1
    }

    pub fn highlight(&self) -> Option<HighlightRect> {
        self.highlight
    }

    pub fn feedback_journal(&self) -> &[FeedbackRecord] {
        &self.journal
    }

    /// Number of times the highlight mapping has actually been recomputed.
    pub fn highlight_computations(&self) -> u64 {
        self.memo.computations()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            selected_goal_id: self.state.selected_goal_id.clone(),
            goal_found: self.current_goal().is_some(),
            step_index: self.step_index(),
            step_count: self.steps().len(),
            current_step: self.current_step().cloned(),
            is_last_step: self.is_last_step(),
            feedback: self.state.feedback,
            viewport: self.viewport,
            highlight: self.highlight,
        }
    }

    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&Snapshot) + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    /// Switches goal and restarts it from the first step. An id missing from
    /// the catalog is kept as the selection but resolves to no goal.
    pub fn select_goal(&mut self, goal_id: &str) {
        let before = self.snapshot();
        if !self.catalog.contains_goal(goal_id) {
            warn!(goal_id, "selected goal is not in the catalog");
        }
        self.state.selected_goal_id = Some(goal_id.to_string());
        self.state.step_index = 0;
        self.state.feedback = None;
        debug!(goal_id, "goal selected");
        self.commit(before);
    }

    pub fn advance(&mut self) {
        let before = self.snapshot();
        let last = self.steps().len().saturating_sub(1);
        self.state.step_index = (self.state.step_index + 1).min(last);
        self.state.feedback = None;
        debug!(step_index = self.state.step_index, "advanced");
        self.commit(before);
    }

    pub fn retreat(&mut self) {
        let before = self.snapshot();
        self.state.step_index = self.state.step_index.saturating_sub(1);
        self.state.feedback = None;
        debug!(step_index = self.state.step_index, "retreated");
        self.commit(before);
    }

    /// Re-selecting the current value keeps it selected; the other value
    /// replaces it.
    pub fn set_feedback(&mut self, feedback: Feedback) {
        let before = self.snapshot();
        self.state.feedback = Some(feedback);
        self.journal.push(FeedbackRecord {
            goal_id: self.state.selected_goal_id.clone(),
            step_index: self.step_index(),
            feedback,
            recorded_at: Utc::now().to_rfc3339(),
        });
        debug!(%feedback, "feedback recorded");
        self.commit(before);
    }

    /// Replaces the viewport after a layout pass. Step and feedback are left
    /// alone; only the highlight is recomputed.
    /// Non-finite sizes are stored as [`Viewport::ZERO`].
    pub fn update_viewport(&mut self, width: f64, height: f64) {
        let before = self.snapshot();
        self.viewport = if width.is_finite() && height.is_finite() {
            Viewport::new(width, height)
        } else {
            Viewport::ZERO
        };
        debug!(viewport = %self.viewport, "viewport updated");
        self.commit(before);
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::SelectGoal(id) => self.select_goal(id),
            Event::Advance => self.advance(),
            Event::Retreat => self.retreat(),
            Event::Feedback(value) => self.set_feedback(*value),
            Event::Viewport(viewport) => self.update_viewport(viewport.width, viewport.height),
        }
    }

    fn refresh_highlight(&mut self) {
        let image_size = self.catalog.image_size;
        let bbox = self.current_step().map(|step| step.bbox);
        self.highlight = self.memo.get(bbox.as_ref(), self.viewport, image_size);
    }

    fn commit(&mut self, before: Snapshot) {
        self.refresh_highlight();
        let after = self.snapshot();
        if after == before {
            return;
        }
        for (_, observer) in &mut self.observers {
            observer(&after);
        }
    }
}

/// A discrete input from the user or the hosting surface.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SelectGoal(String),
    Advance,
    Retreat,
    Feedback(Feedback),
    Viewport(Viewport),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventParseError {
    #[error("unknown event '{0}' (expected select:<id>, next, back, helped, wrong, viewport:<w>x<h>)")]
    Unknown(String),
    #[error("event 'select' needs a goal id")]
    MissingGoal,
    #[error(transparent)]
    Viewport(#[from] ViewportParseError),
}

impl FromStr for Event {
    type Err = EventParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        let (name, arg) = match raw.split_once(':') {
            Some((name, arg)) => (name.trim(), Some(arg.trim())),
            None => (raw, None),
        };
        match (name.to_ascii_lowercase().as_str(), arg) {
            ("select" | "goal", Some(id)) if !id.is_empty() => Ok(Self::SelectGoal(id.to_string())),
            ("select" | "goal", _) => Err(EventParseError::MissingGoal),
            ("next" | "advance", None) => Ok(Self::Advance),
            ("back" | "retreat", None) => Ok(Self::Retreat),
            ("helped", None) => Ok(Self::Feedback(Feedback::Helped)),
            ("wrong", None) => Ok(Self::Feedback(Feedback::Wrong)),
            ("viewport" | "layout", Some(size)) => Ok(Self::Viewport(size.parse()?)),
            _ => Err(EventParseError::Unknown(raw.to_string())),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectGoal(id) => write!(f, "select:{id}"),
            Self::Advance => f.write_str("next"),
            Self::Retreat => f.write_str("back"),
            Self::Feedback(value) => f.write_str(value.as_str()),
            Self::Viewport(viewport) => write!(f, "viewport:{viewport}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::tests::sample;
    use proptest::prelude::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn navigator() -> Navigator {
        Navigator::new(Arc::new(sample()))
    }

    fn single_goal_three_steps() -> Navigator {
        let raw = r#"{"modelName": "m", "imageSize": {"width": 100, "height": 100},
            "goals": [{"id": "G1", "name": "G1", "steps": [
                {"text": "one", "bbox": [0, 0, 10, 10]},
                {"text": "two", "bbox": [10, 10, 10, 10]},
                {"text": "three", "bbox": [20, 20, 10, 10]}
            ]}]}"#;
        Navigator::new(Arc::new(Catalog::from_json_str(raw).unwrap()))
    }

    #[test]
    fn starts_on_first_goal_with_clean_state() {
        let nav = navigator();
        let snap = nav.snapshot();
        assert_eq!(snap.selected_goal_id.as_deref(), Some("quick-wash"));
        assert_eq!(snap.step_index, Some(0));
        assert_eq!(snap.step_count, 3);
        assert_eq!(snap.feedback, None);
        assert_eq!(snap.viewport, Viewport::ZERO);
        assert_eq!(snap.highlight, None);
        assert!(!snap.is_last_step);
    }

    #[test]
    fn walkthrough_clears_feedback_on_moves() {
        let mut nav = single_goal_three_steps();
        nav.advance();
        nav.advance();
        assert_eq!(nav.step_index(), Some(2));
        assert_eq!(nav.state().feedback, None);

        nav.set_feedback(Feedback::Wrong);
        assert_eq!(nav.state().feedback, Some(Feedback::Wrong));

        nav.retreat();
        assert_eq!(nav.step_index(), Some(1));
        assert_eq!(nav.state().feedback, None);
        assert_eq!(nav.state().selected_goal_id.as_deref(), Some("G1"));
    }

    #[test]
    fn advance_is_idempotent_at_last_step() {
        let mut nav = single_goal_three_steps();
        for _ in 0..10 {
            nav.advance();
        }
        assert_eq!(nav.step_index(), Some(2));
        assert!(nav.is_last_step());
        assert_eq!(nav.current_step().map(|s| s.text.as_str()), Some("three"));
    }

    #[test]
    fn retreat_is_idempotent_at_first_step() {
        let mut nav = single_goal_three_steps();
        nav.retreat();
        nav.retreat();
        assert_eq!(nav.step_index(), Some(0));
    }

    #[test]
    fn select_goal_resets_position_and_feedback() {
        let mut nav = navigator();
        nav.advance();
        nav.set_feedback(Feedback::Helped);
        nav.select_goal("quick-wash");
        assert_eq!(nav.step_index(), Some(0));
        assert_eq!(nav.state().feedback, None);

        nav.select_goal("drain");
        assert_eq!(nav.steps().len(), 1);
        assert!(nav.is_last_step());
    }

    #[test]
    fn feedback_reselect_keeps_value_and_other_replaces() {
        let mut nav = navigator();
        nav.set_feedback(Feedback::Helped);
        nav.set_feedback(Feedback::Helped);
        assert_eq!(nav.state().feedback, Some(Feedback::Helped));
        nav.set_feedback(Feedback::Wrong);
        assert_eq!(nav.state().feedback, Some(Feedback::Wrong));
        assert_eq!(nav.feedback_journal().len(), 3);
        assert_eq!(nav.feedback_journal()[2].step_index, Some(0));
    }

    #[test]
    fn unknown_goal_degrades_without_panicking() {
        let mut nav = navigator();
        nav.update_viewport(500.0, 500.0);
        nav.select_goal("does-not-exist");
        let snap = nav.snapshot();
        assert!(!snap.goal_found);
        assert_eq!(snap.step_index, None);
        assert_eq!(snap.current_step, None);
        assert_eq!(snap.highlight, None);
        nav.advance();
        nav.retreat();
        assert_eq!(nav.state().step_index, 0);
    }

    #[test]
    fn zero_step_goal_has_no_step_and_is_vacuously_last() {
        let mut nav = navigator();
        nav.update_viewport(500.0, 500.0);
        nav.select_goal("empty");
        nav.advance();
        let snap = nav.snapshot();
        assert!(snap.goal_found);
        assert_eq!(snap.step_count, 0);
        assert_eq!(snap.step_index, None);
        assert!(snap.is_last_step);
        assert_eq!(snap.highlight, None);
    }

    #[test]
    fn viewport_change_remaps_without_touching_step_state() {
        let mut nav = navigator();
        nav.set_feedback(Feedback::Helped);
        nav.update_viewport(500.0, 500.0);
        assert_eq!(nav.state().feedback, Some(Feedback::Helped));
        assert_eq!(nav.step_index(), Some(0));
        let rect = nav.highlight().unwrap();
        assert_eq!((rect.left, rect.top, rect.width, rect.height), (50.0, 100.0, 25.0, 30.0));

        nav.update_viewport(1000.0, 2000.0);
        let rect = nav.highlight().unwrap();
        assert_eq!((rect.left, rect.top), (100.0, 400.0));

        nav.update_viewport(0.0, 0.0);
        assert_eq!(nav.highlight(), None);
    }

    #[test]
    fn highlight_is_not_recomputed_when_inputs_are_unchanged() {
        let mut nav = navigator();
        nav.update_viewport(500.0, 500.0);
        let computed = nav.highlight_computations();
        nav.set_feedback(Feedback::Helped);
        nav.set_feedback(Feedback::Wrong);
        nav.retreat();
        assert_eq!(nav.highlight_computations(), computed);
        nav.advance();
        assert_eq!(nav.highlight_computations(), computed + 1);
    }

    #[test]
    fn observers_see_changes_only() {
        let mut nav = single_goal_three_steps();
        let seen: Rc<RefCell<Vec<Snapshot>>> = Rc::default();
        let sink = Rc::clone(&seen);
        let id = nav.subscribe(move |snap| sink.borrow_mut().push(snap.clone()));

        nav.advance();
        nav.advance();
        nav.advance();
        nav.retreat();
        assert_eq!(seen.borrow().len(), 3);
        assert_eq!(seen.borrow()[1].step_index, Some(2));

        assert!(nav.unsubscribe(id));
        assert!(!nav.unsubscribe(id));
        nav.retreat();
        assert_eq!(seen.borrow().len(), 3);
    }

    #[test]
    fn non_finite_viewport_is_stored_as_zero() {
        let mut nav = single_goal_three_steps();
        nav.update_viewport(500.0, 500.0);
        let seen: Rc<RefCell<Vec<Snapshot>>> = Rc::default();
        let sink = Rc::clone(&seen);
        nav.subscribe(move |snap| sink.borrow_mut().push(snap.clone()));

        nav.update_viewport(f64::NAN, 500.0);
        assert_eq!(nav.viewport(), Viewport::ZERO);
        assert_eq!(nav.highlight(), None);
        assert_eq!(seen.borrow().len(), 1);

        nav.retreat();
        nav.update_viewport(0.0, f64::INFINITY);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn parses_events() {
        assert_eq!(
            "select:drain".parse::<Event>().unwrap(),
            Event::SelectGoal("drain".to_string())
        );
        assert_eq!("next".parse::<Event>().unwrap(), Event::Advance);
        assert_eq!("BACK".parse::<Event>().unwrap(), Event::Retreat);
        assert_eq!(
            "wrong".parse::<Event>().unwrap(),
            Event::Feedback(Feedback::Wrong)
        );
        assert_eq!(
            "viewport:390x640".parse::<Event>().unwrap(),
            Event::Viewport(Viewport::new(390.0, 640.0))
        );
        assert_eq!("select:".parse::<Event>(), Err(EventParseError::MissingGoal));
        assert!(matches!(
            "jump".parse::<Event>(),
            Err(EventParseError::Unknown(_))
        ));
        assert!(matches!(
            "viewport:big".parse::<Event>(),
            Err(EventParseError::Viewport(_))
        ));
        assert_eq!(Event::Viewport(Viewport::new(390.0, 640.0)).to_string(), "viewport:390x640");
    }

    fn moves() -> impl Strategy<Value = Vec<Event>> {
        prop::collection::vec(
            prop_oneof![
                Just(Event::Advance),
                Just(Event::Retreat),
                Just(Event::Feedback(Feedback::Helped)),
                Just(Event::Feedback(Feedback::Wrong)),
                Just(Event::SelectGoal("quick-wash".to_string())),
                Just(Event::SelectGoal("drain".to_string())),
            ],
            0..64,
        )
    }

    proptest! {
        #[test]
        fn step_index_stays_in_range(events in moves()) {
            let mut nav = navigator();
            for event in &events {
                nav.apply(event);
                let count = nav.steps().len();
                prop_assert!(nav.state().step_index < count.max(1));
                prop_assert!(nav.current_step().is_some());
            }
        }

        #[test]
        fn moves_always_clear_feedback(events in moves()) {
            let mut nav = navigator();
            for event in &events {
                nav.apply(event);
                if !matches!(event, Event::Feedback(_)) {
                    prop_assert_eq!(nav.state().feedback, None);
                } else {
                    prop_assert!(nav.state().feedback.is_some());
                }
            }
        }
    }
}
