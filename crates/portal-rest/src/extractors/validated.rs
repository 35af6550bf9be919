//! Validated JSON extractor.
//!
//! Deserializes the body and runs `validator` rules. Both failures are
//! rendered as a failed action with status 400 and never reach the handler.

use crate::responses::ActionResponse;
use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Request},
    response::{IntoResponse, Response},
    Json,
};
use portal_core::{validation_errors_to_portal_error, PortalError};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

/// Rejection type for validated JSON extraction.
pub enum ValidatedJsonRejection {
    JsonError(JsonRejection),
    ValidationError(ValidationErrors),
}

impl IntoResponse for ValidatedJsonRejection {
    fn into_response(self) -> Response {
        let err = match self {
            Self::JsonError(rejection) => PortalError::invalid_input(format!("Invalid JSON: {}", rejection.body_text())),
            Self::ValidationError(errors) => validation_errors_to_portal_error(errors),
        };
        ActionResponse::<()>::error(&err).into_response()
    }
}

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ValidatedJsonRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(ValidatedJsonRejection::JsonError)?;

        value.validate().map_err(ValidatedJsonRejection::ValidationError)?;

        Ok(ValidatedJson(value))
    }
}
