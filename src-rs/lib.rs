//! HintLens guidance engine.
//!
//! Loads an instruction catalog (goals made of ordered steps, each with a
//! bounding box authored against a reference photo), tracks which goal and
//! step the user is on, and maps the current step's box onto the live camera
//! viewport so a presentation layer can draw the highlight.

pub mod catalog;
pub mod geometry;
pub mod logging;
pub mod navigation;
pub mod overlay;
pub mod permission;
pub mod view;

pub use catalog::{BoundingBox, Catalog, CatalogError, CatalogIssue, Goal, ImageSize, Step};
pub use geometry::{map_highlight, HighlightMemo, HighlightRect, RelativeRect, Viewport};
pub use navigation::{
    Event, EventParseError, Feedback, FeedbackRecord, NavigationState, Navigator, Snapshot,
    SubscriptionId,
};
pub use permission::{ensure_access, CameraPermission, FixedPermission, PermissionProvider};
pub use view::{GuideView, Screen};
