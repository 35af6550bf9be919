//! Downstream request service configuration.

use serde::{Deserialize, Serialize};

/// Kind of downstream request-management service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestServiceKind {
    Overseerr,
    Jellyseerr,
}

/// Connection details for the active request service, managed through the
/// admin server-configuration screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestServiceConfig {
    pub id: i64,
    pub kind: RequestServiceKind,
    pub name: String,
    pub url: String,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub is_active: bool,
}
