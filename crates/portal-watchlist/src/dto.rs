//! Request and result types of the sync surface.

use portal_core::{GlobalSyncConfig, UserId};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Counts of one single-user sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    /// False only when the run failed as a whole.
    pub success: bool,
    pub items_synced: u32,
    pub items_requested: u32,
    pub items_skipped: u32,
    pub items_failed: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    /// Why the run did nothing, when it was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SyncResult {
    /// A run that could not start, with one explanatory error.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            errors: Some(vec![error.into()]),
            ..Self::default()
        }
    }

    /// A run that did not execute.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Outcome of one sync-all-due-users run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAllResult {
    pub users_due: u32,
    pub users_synced: u32,
    pub users_failed: u32,
    /// Users skipped because a sync for them was already running.
    pub users_skipped: u32,
    pub items_synced: u32,
    pub items_requested: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Admin update of the global sync settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateGlobalSyncSettingsRequest {
    pub enabled: bool,
    #[validate(range(min = 15, max = 1440, message = "must be between 15 and 1440 minutes"))]
    pub interval_minutes: u32,
}

impl From<UpdateGlobalSyncSettingsRequest> for GlobalSyncConfig {
    fn from(request: UpdateGlobalSyncSettingsRequest) -> Self {
        Self {
            sync_enabled: request.enabled,
            interval_minutes: request.interval_minutes,
        }
    }
}

/// A user's own opt-in toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserSyncSettingsRequest {
    pub enabled: bool,
}

/// Admin trigger of a queued sync. Without a user id all due users sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerSyncRequest {
    pub user_id: Option<UserId>,
}
