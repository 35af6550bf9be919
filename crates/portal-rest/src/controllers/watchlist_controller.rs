//! Watchlist sync actions.

use crate::extractors::{Actor, AdminActor, ValidatedJson};
use crate::responses::{action, ActionResponse};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Json, Router,
};
use portal_core::{GlobalSyncConfig, PortalError, UserId, WatchlistSyncSettings, WatchlistSyncStats};
use portal_watchlist::{SyncResult, UpdateGlobalSyncSettingsRequest, UpdateUserSyncSettingsRequest};
use tracing::{info, warn};

/// Create the watchlist router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/watchlist/sync", post(sync_own_watchlist))
        .route("/watchlist/sync/:user_id", post(force_user_sync))
        .route("/watchlist/stats", get(sync_stats))
        .route("/watchlist/settings", put(update_global_settings))
        .route("/watchlist/me/settings", put(update_own_settings))
}

/// Syncs the calling user's watchlist now.
async fn sync_own_watchlist(State(state): State<AppState>, actor: Actor) -> ActionResponse<SyncResult> {
    action(state.watchlist.force_sync_user(actor.user_id).await)
}

/// Admin sync of one user, outside the queue.
async fn force_user_sync(
    State(state): State<AppState>,
    AdminActor(admin): AdminActor,
    Path(user_id): Path<String>,
) -> ActionResponse<SyncResult> {
    let Ok(user_id) = UserId::parse(&user_id) else {
        return ActionResponse::error(&PortalError::invalid_input(format!("malformed user id: {user_id}")));
    };
    info!(user_id = %user_id, admin = %admin.user_id, "Forced watchlist sync");
    action(state.watchlist.force_sync_user(user_id).await)
}

async fn sync_stats(State(state): State<AppState>, _admin: AdminActor) -> ActionResponse<WatchlistSyncStats> {
    action(state.watchlist.stats().await)
}

/// Saves the global toggle and interval, then brings the recurring
/// schedule in line with them.
async fn update_global_settings(
    State(state): State<AppState>,
    _admin: AdminActor,
    ValidatedJson(request): ValidatedJson<UpdateGlobalSyncSettingsRequest>,
) -> ActionResponse<GlobalSyncConfig> {
    let saved = match state.watchlist.update_global_settings(request).await {
        Ok(saved) => saved,
        Err(e) => return ActionResponse::error(&e),
    };

    if let Some(jobs) = &state.jobs {
        if let Err(e) = jobs.apply_schedule(&saved).await {
            warn!(error = %e, "Failed to update the watchlist sync schedule");
        }
    }

    ActionResponse::ok(saved)
}

async fn update_own_settings(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<UpdateUserSyncSettingsRequest>,
) -> ActionResponse<WatchlistSyncSettings> {
    action(state.watchlist.set_user_sync_enabled(actor.user_id, request.enabled).await)
}
