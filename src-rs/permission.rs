//! Camera access as an explicit input to the presentation boundary.
//!
//! The engine never touches the camera. Hosts report what the platform said
//! through a [`PermissionProvider`] and the view layer gates on it.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPermission {
    /// No answer yet, e.g. the system prompt is still on screen.
    Pending,
    Granted,
    Denied,
}

impl CameraPermission {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for CameraPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown camera permission '{0}' (expected pending, granted or denied)")]
pub struct PermissionParseError(pub String);

impl FromStr for CameraPermission {
    type Err = PermissionParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "granted" => Ok(Self::Granted),
            "denied" => Ok(Self::Denied),
            _ => Err(PermissionParseError(raw.to_string())),
        }
    }
}

pub trait PermissionProvider {
    fn status(&self) -> CameraPermission;

    /// Asks the platform for access and returns the resulting status.
    fn request(&mut self) -> CameraPermission;
}

/// A provider whose answer is known up front: `current` until asked, then
/// `on_request`.
#[derive(Debug, Clone)]
pub struct FixedPermission {
    current: CameraPermission,
    on_request: CameraPermission,
    requests: u32,
}

impl FixedPermission {
    pub fn new(status: CameraPermission) -> Self {
        Self {
            current: status,
            on_request: status,
            requests: 0,
        }
    }

    /// Starts `Pending` and settles on `answer` once access is requested.
    pub fn prompting(answer: CameraPermission) -> Self {
        Self {
            current: CameraPermission::Pending,
            on_request: answer,
            requests: 0,
        }
    }

    pub fn requests(&self) -> u32 {
        self.requests
    }
}

impl PermissionProvider for FixedPermission {
    fn status(&self) -> CameraPermission {
        self.current
    }

    fn request(&mut self) -> CameraPermission {
        self.requests += 1;
        self.current = self.on_request;
        self.current
    }
}

/// Requests access whenever it is not already granted.
pub fn ensure_access<P: PermissionProvider + ?Sized>(provider: &mut P) -> CameraPermission {
    let status = provider.status();
    if status.is_granted() {
        return status;
    }
    let status = provider.request();
    tracing::debug!(%status, "camera permission requested");
    status
}
