//! Instruction catalog: the read-only goal/step data the guide walks through.
//!
//! The on-disk format is a single JSON document:
//!
//! ```json
//! {
//!   "modelName": "Bosch WAT28400UC",
//!   "imageSize": {"width": 1000, "height": 750},
//!   "goals": [
//!     {"id": "quick-wash", "name": "Quick wash", "steps": [
//!       {"text": "Turn the dial to Quick 15'", "bbox": [420, 180, 160, 160]}
//!     ]}
//!   ]
//! }
//! ```
//!
//! Loading never checks boxes against `imageSize`; [`Catalog::validate`] is a
//! separate audit pass so callers decide whether out-of-frame boxes matter.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read catalog from stdin")]
    Stdin(#[source] io::Error),
    #[error("invalid catalog JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Pixel dimensions of the photo every bounding box was authored against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: f64,
    pub height: f64,
}

/// `[x, y, width, height]` in reference-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn fits_within(&self, size: ImageSize) -> bool {
        self.x >= 0.0 && self.y >= 0.0 && self.right() <= size.width && self.bottom() <= size.height
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x, y, width, height]: [f64; 4]) -> Self {
        Self::new(x, y, width, height)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x, bbox.y, bbox.width, bbox.height]
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.x, self.y, self.width, self.height
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub text: String,
    pub bbox: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    pub model_name: String,
    pub image_size: ImageSize,
    pub goals: Vec<Goal>,
}

/// Problems found by [`Catalog::validate`]. None of them stop the guide from
/// running; a box outside the reference image just renders out of frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CatalogIssue {
    DuplicateGoalId {
        goal_id: String,
    },
    EmptyImageSize {
        image_size: ImageSize,
    },
    NoSteps {
        goal_id: String,
    },
    NegativeOrigin {
        goal_id: String,
        step_index: usize,
        bbox: BoundingBox,
    },
    EmptyBox {
        goal_id: String,
        step_index: usize,
        bbox: BoundingBox,
    },
    OutOfBounds {
        goal_id: String,
        step_index: usize,
        bbox: BoundingBox,
        image_size: ImageSize,
    },
}

impl fmt::Display for CatalogIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateGoalId { goal_id } => write!(f, "duplicate goal id '{goal_id}'"),
            Self::EmptyImageSize { image_size } => write!(
                f,
                "reference image size {}x{} must be positive",
                image_size.width, image_size.height
            ),
            Self::NoSteps { goal_id } => write!(f, "goal '{goal_id}' has no steps"),
            Self::NegativeOrigin {
                goal_id,
                step_index,
                bbox,
            } => write!(
                f,
                "goal '{goal_id}' step {}: bbox {bbox} has a negative origin",
                step_index + 1
            ),
            Self::EmptyBox {
                goal_id,
                step_index,
                bbox,
            } => write!(
                f,
                "goal '{goal_id}' step {}: bbox {bbox} has no area",
                step_index + 1
            ),
            Self::OutOfBounds {
                goal_id,
                step_index,
                bbox,
                image_size,
            } => write!(
                f,
                "goal '{goal_id}' step {}: bbox {bbox} exceeds reference image {}x{}",
                step_index + 1,
                image_size.width,
                image_size.height
            ),
        }
    }
}

impl Catalog {
    pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Reads a catalog from `path`, or from stdin when `path` is `-`.
    pub fn load(path: &str) -> Result<Self, CatalogError> {
        let raw = if path == "-" {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(CatalogError::Stdin)?;
            buf
        } else {
            fs::read_to_string(path).map_err(|source| CatalogError::Read {
                path: PathBuf::from(path),
                source,
            })?
        };
        let catalog = Self::from_json_str(&raw)?;
        tracing::debug!(
            model = %catalog.model_name,
            goals = catalog.goals.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    pub fn goal(&self, id: &str) -> Option<&Goal> {
        self.goals.iter().find(|goal| goal.id == id)
    }

    pub fn contains_goal(&self, id: &str) -> bool {
        self.goal(id).is_some()
    }

    pub fn first_goal_id(&self) -> Option<&str> {
        self.goals.first().map(|goal| goal.id.as_str())
    }

    pub fn validate(&self) -> Vec<CatalogIssue> {
        let mut issues = Vec::new();
        let size = self.image_size;
        if !(size.width > 0.0 && size.height > 0.0) {
            issues.push(CatalogIssue::EmptyImageSize { image_size: size });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for goal in &self.goals {
            if !seen.insert(goal.id.as_str()) {
                issues.push(CatalogIssue::DuplicateGoalId {
                    goal_id: goal.id.clone(),
                });
            }
            if goal.steps.is_empty() {
                issues.push(CatalogIssue::NoSteps {
                    goal_id: goal.id.clone(),
                });
            }

            for (step_index, step) in goal.steps.iter().enumerate() {
                let bbox = step.bbox;
                let goal_id = goal.id.clone();
                if bbox.x < 0.0 || bbox.y < 0.0 {
                    issues.push(CatalogIssue::NegativeOrigin {
                        goal_id,
                        step_index,
                        bbox,
                    });
                } else if !(bbox.width > 0.0 && bbox.height > 0.0) {
                    issues.push(CatalogIssue::EmptyBox {
                        goal_id,
                        step_index,
                        bbox,
                    });
                } else if !bbox.fits_within(size) {
                    issues.push(CatalogIssue::OutOfBounds {
                        goal_id,
                        step_index,
                        bbox,
                        image_size: size,
                    });
                }
            }
        }
        issues
    }
}
