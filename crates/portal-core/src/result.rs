//! Result type aliases and the action envelope.

use crate::PortalError;
use serde::{Deserialize, Serialize};

/// A specialized `Result` type for portal operations.
pub type PortalResult<T> = Result<T, PortalError>;

/// Envelope returned by every admin/user facing action.
///
/// Actions never surface errors as panics or transport failures: the UI
/// renders `error` when `success` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ActionResult<T> {
    /// A successful result carrying data.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed result with a message.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

impl ActionResult<()> {
    /// A successful result with no payload.
    #[must_use]
    pub fn done() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }
}

impl<T> From<PortalResult<T>> for ActionResult<T> {
    fn from(result: PortalResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::err(e.to_string()),
        }
    }
}
