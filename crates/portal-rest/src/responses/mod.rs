//! Action response envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use portal_core::{ActionResult, PortalError, PortalResult};
use serde::Serialize;
use tracing::warn;

/// An [`ActionResult`] with the HTTP status derived from the error, if any.
#[derive(Debug)]
pub struct ActionResponse<T> {
    pub status: StatusCode,
    pub body: ActionResult<T>,
}

impl<T> ActionResponse<T> {
    /// A successful response.
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            body: ActionResult::ok(data),
        }
    }

    /// A failed response for `err`.
    pub fn error(err: &PortalError) -> Self {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %err, code = err.error_code(), "Action failed");
        }
        Self {
            status,
            body: ActionResult::err(err.to_string()),
        }
    }
}

impl<T> From<PortalResult<T>> for ActionResponse<T> {
    fn from(result: PortalResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::error(&e),
        }
    }
}

impl<T: Serialize> IntoResponse for ActionResponse<T> {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Wraps a service result.
pub fn action<T>(result: PortalResult<T>) -> ActionResponse<T> {
    result.into()
}

/// A successful action without payload.
pub fn done() -> ActionResponse<()> {
    ActionResponse {
        status: StatusCode::OK,
        body: ActionResult::done(),
    }
}
