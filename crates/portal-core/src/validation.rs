//! Validation utilities.

use crate::PortalError;
use validator::{Validate, ValidationErrors};

/// Extension trait for validation.
pub trait ValidateExt: Validate {
    /// Validates the struct and returns a `PortalError` on failure.
    fn validate_request(&self) -> Result<(), PortalError> {
        self.validate().map_err(validation_errors_to_portal_error)
    }
}

impl<T: Validate> ValidateExt for T {}

/// Converts `validator::ValidationErrors` to `PortalError::InvalidInput`.
#[must_use]
pub fn validation_errors_to_portal_error(errors: ValidationErrors) -> PortalError {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| {
                let message = error
                    .message
                    .as_ref()
                    .map_or_else(|| error.code.to_string(), ToString::to_string);
                format!("{field}: {message}")
            })
        })
        .collect();
    messages.sort();

    PortalError::InvalidInput(messages.join("; "))
}
