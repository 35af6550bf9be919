//! MySQL watchlist sync repository.

use super::parse_user_id;
use crate::{traits::WatchlistSyncRepository, DatabasePool};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use portal_core::{
    GlobalSyncConfig, HistoryStatus, MediaType, PortalError, PortalResult, SyncRunRecord, UserId,
    WatchlistSyncHistory, WatchlistSyncSettings, WatchlistSyncStats,
};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const SETTINGS_COLUMNS: &str = r#"
    user_id, sync_enabled, last_sync_at, last_sync_status, last_sync_error,
    items_synced_last_run, items_requested_last_run,
    total_items_synced, total_items_requested
"#;

const HISTORY_COLUMNS: &str = r#"
    user_id, item_key, guid, title, year, media_type, tmdb_id, tvdb_id, imdb_id,
    status, requested_at, request_id, error, synced_at
"#;

/// MySQL watchlist sync repository.
#[derive(Clone)]
pub struct MySqlWatchlistSyncRepository {
    pool: Arc<DatabasePool>,
}

impl MySqlWatchlistSyncRepository {
    /// Creates a new repository.
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SettingsRow {
    user_id: String,
    sync_enabled: bool,
    last_sync_at: Option<DateTime<Utc>>,
    last_sync_status: Option<String>,
    last_sync_error: Option<String>,
    items_synced_last_run: u32,
    items_requested_last_run: u32,
    total_items_synced: u64,
    total_items_requested: u64,
}

impl TryFrom<SettingsRow> for WatchlistSyncSettings {
    type Error = PortalError;

    fn try_from(row: SettingsRow) -> Result<Self, Self::Error> {
        Ok(WatchlistSyncSettings {
            user_id: parse_user_id(&row.user_id)?,
            sync_enabled: row.sync_enabled,
            last_sync_at: row.last_sync_at,
            last_sync_status: row
                .last_sync_status
                .map(|s| s.parse().map_err(PortalError::Internal))
                .transpose()?,
            last_sync_error: row.last_sync_error,
            items_synced_last_run: row.items_synced_last_run,
            items_requested_last_run: row.items_requested_last_run,
            total_items_synced: row.total_items_synced,
            total_items_requested: row.total_items_requested,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    user_id: String,
    item_key: String,
    guid: String,
    title: String,
    year: Option<i32>,
    media_type: String,
    tmdb_id: Option<i64>,
    tvdb_id: Option<i64>,
    imdb_id: Option<String>,
    status: String,
    requested_at: Option<DateTime<Utc>>,
    request_id: Option<String>,
    error: Option<String>,
    synced_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for WatchlistSyncHistory {
    type Error = PortalError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        Ok(WatchlistSyncHistory {
            user_id: parse_user_id(&row.user_id)?,
            item_key: row.item_key,
            guid: row.guid,
            title: row.title,
            year: row.year,
            media_type: row
                .media_type
                .parse::<MediaType>()
                .map_err(PortalError::Internal)?,
            tmdb_id: row.tmdb_id,
            tvdb_id: row.tvdb_id,
            imdb_id: row.imdb_id,
            status: row
                .status
                .parse::<HistoryStatus>()
                .map_err(PortalError::Internal)?,
            requested_at: row.requested_at,
            request_id: row.request_id,
            error: row.error,
            synced_at: row.synced_at,
        })
    }
}

impl MySqlWatchlistSyncRepository {
    async fn fetch_settings<'e, E>(executor: E, user_id: UserId) -> PortalResult<Option<WatchlistSyncSettings>>
    where
        E: sqlx::MySqlExecutor<'e>,
    {
        let row = sqlx::query_as::<_, SettingsRow>(&format!(
            "SELECT {SETTINGS_COLUMNS} FROM watchlist_sync_settings WHERE user_id = ?"
        ))
        .bind(user_id.to_string())
        .fetch_optional(executor)
        .await?;

        row.map(WatchlistSyncSettings::try_from).transpose()
    }
}

#[async_trait]
impl WatchlistSyncRepository for MySqlWatchlistSyncRepository {
    async fn get_global_config(&self) -> PortalResult<GlobalSyncConfig> {
        let row = sqlx::query_as::<_, (bool, u32)>(
            "SELECT sync_enabled, interval_minutes FROM watchlist_sync_config WHERE id = 1",
        )
        .fetch_optional(self.pool.inner())
        .await?;

        Ok(row.map_or_else(GlobalSyncConfig::default, |(sync_enabled, interval_minutes)| {
            GlobalSyncConfig {
                sync_enabled,
                interval_minutes,
            }
        }))
    }

    async fn save_global_config(&self, config: GlobalSyncConfig) -> PortalResult<GlobalSyncConfig> {
        sqlx::query(
            r#"
            INSERT INTO watchlist_sync_config (id, sync_enabled, interval_minutes)
            VALUES (1, ?, ?)
            ON DUPLICATE KEY UPDATE
                sync_enabled = VALUES(sync_enabled),
                interval_minutes = VALUES(interval_minutes)
            "#,
        )
        .bind(config.sync_enabled)
        .bind(config.interval_minutes)
        .execute(self.pool.inner())
        .await?;

        Ok(config)
    }

    async fn find_settings(&self, user_id: UserId) -> PortalResult<Option<WatchlistSyncSettings>> {
        Self::fetch_settings(self.pool.inner(), user_id).await
    }

    async fn set_sync_enabled(&self, user_id: UserId, enabled: bool) -> PortalResult<WatchlistSyncSettings> {
        sqlx::query(
            r#"
            INSERT INTO watchlist_sync_settings (user_id, sync_enabled)
            VALUES (?, ?)
            ON DUPLICATE KEY UPDATE
                sync_enabled = VALUES(sync_enabled),
                updated_at = CURRENT_TIMESTAMP(3)
            "#,
        )
        .bind(user_id.to_string())
        .bind(enabled)
        .execute(self.pool.inner())
        .await?;

        Self::fetch_settings(self.pool.inner(), user_id)
            .await?
            .ok_or_else(|| PortalError::not_found("WatchlistSyncSettings", user_id))
    }

    async fn find_history(&self, user_id: UserId) -> PortalResult<Vec<WatchlistSyncHistory>> {
        let rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM watchlist_sync_history WHERE user_id = ?"
        ))
        .bind(user_id.to_string())
        .fetch_all(self.pool.inner())
        .await?;

        rows.into_iter().map(WatchlistSyncHistory::try_from).collect()
    }

    async fn record_run(&self, run: &SyncRunRecord) -> PortalResult<WatchlistSyncSettings> {
        debug!(
            user_id = %run.user_id,
            status = %run.status,
            history_rows = run.history.len(),
            removed = run.removed_keys.len(),
            "Recording sync run"
        );

        let user_id = run.user_id.to_string();
        let mut tx = self.pool.inner().begin().await?;

        for row in &run.history {
            sqlx::query(
                r#"
                INSERT INTO watchlist_sync_history
                    (user_id, item_key, guid, title, year, media_type, tmdb_id, tvdb_id, imdb_id,
                     status, requested_at, request_id, error, synced_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    guid = VALUES(guid),
                    title = VALUES(title),
                    year = VALUES(year),
                    media_type = VALUES(media_type),
                    tmdb_id = VALUES(tmdb_id),
                    tvdb_id = VALUES(tvdb_id),
                    imdb_id = VALUES(imdb_id),
                    status = VALUES(status),
                    requested_at = COALESCE(VALUES(requested_at), requested_at),
                    request_id = COALESCE(VALUES(request_id), request_id),
                    error = VALUES(error),
                    synced_at = VALUES(synced_at)
                "#,
            )
            .bind(&user_id)
            .bind(&row.item_key)
            .bind(&row.guid)
            .bind(&row.title)
            .bind(row.year)
            .bind(row.media_type.as_str())
            .bind(row.tmdb_id)
            .bind(row.tvdb_id)
            .bind(&row.imdb_id)
            .bind(row.status.as_str())
            .bind(row.requested_at)
            .bind(&row.request_id)
            .bind(&row.error)
            .bind(row.synced_at)
            .execute(&mut *tx)
            .await?;
        }

        for key in &run.removed_keys {
            sqlx::query(
                r#"
                UPDATE watchlist_sync_history
                SET status = ?, synced_at = ?
                WHERE user_id = ? AND item_key = ?
                "#,
            )
            .bind(HistoryStatus::RemovedFromWatchlist.as_str())
            .bind(run.finished_at)
            .bind(&user_id)
            .bind(key)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO watchlist_sync_settings
                (user_id, sync_enabled, last_sync_at, last_sync_status, last_sync_error,
                 items_synced_last_run, items_requested_last_run,
                 total_items_synced, total_items_requested, updated_at)
            VALUES (?, FALSE, ?, ?, ?, ?, ?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                last_sync_at = VALUES(last_sync_at),
                last_sync_status = VALUES(last_sync_status),
                last_sync_error = VALUES(last_sync_error),
                items_synced_last_run = VALUES(items_synced_last_run),
                items_requested_last_run = VALUES(items_requested_last_run),
                total_items_synced = total_items_synced + VALUES(items_synced_last_run),
                total_items_requested = total_items_requested + VALUES(items_requested_last_run),
                updated_at = VALUES(updated_at)
            "#,
        )
        .bind(&user_id)
        .bind(run.finished_at)
        .bind(run.status.as_str())
        .bind(&run.error)
        .bind(run.items_synced)
        .bind(run.items_requested)
        .bind(u64::from(run.items_synced))
        .bind(u64::from(run.items_requested))
        .bind(run.finished_at)
        .execute(&mut *tx)
        .await?;

        let settings = Self::fetch_settings(&mut *tx, run.user_id)
            .await?
            .ok_or_else(|| PortalError::not_found("WatchlistSyncSettings", run.user_id))?;

        tx.commit().await?;
        Ok(settings)
    }

    async fn find_due_users(
        &self,
        now: DateTime<Utc>,
        interval: Duration,
        limit: u32,
    ) -> PortalResult<Vec<UserId>> {
        let threshold = now - interval;

        let rows = sqlx::query_as::<_, (String,)>(
            r#"
            SELECT s.user_id
            FROM watchlist_sync_settings s
            JOIN users u ON u.id = s.user_id
            WHERE s.sync_enabled = TRUE
              AND (s.last_sync_at IS NULL OR s.last_sync_at < ?)
            ORDER BY s.last_sync_at IS NOT NULL, s.last_sync_at ASC
            LIMIT ?
            "#,
        )
        .bind(threshold)
        .bind(limit)
        .fetch_all(self.pool.inner())
        .await?;

        rows.iter().map(|(id,)| parse_user_id(id)).collect()
    }

    async fn stats(&self, recent_limit: u32) -> PortalResult<WatchlistSyncStats> {
        let (users_with_sync_enabled, total_items_synced, total_items_requested, users_with_failed_last_sync) =
            sqlx::query_as::<_, (u64, u64, u64, u64)>(
                r#"
                SELECT
                    CAST(COALESCE(SUM(sync_enabled), 0) AS UNSIGNED),
                    CAST(COALESCE(SUM(total_items_synced), 0) AS UNSIGNED),
                    CAST(COALESCE(SUM(total_items_requested), 0) AS UNSIGNED),
                    CAST(COALESCE(SUM(last_sync_status = 'failed'), 0) AS UNSIGNED)
                FROM watchlist_sync_settings
                "#,
            )
            .fetch_one(self.pool.inner())
            .await?;

        let by_status = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM watchlist_sync_history GROUP BY status",
        )
        .fetch_all(self.pool.inner())
        .await?;

        let history_by_status: BTreeMap<String, u64> = by_status
            .into_iter()
            .map(|(status, count)| (status, u64::try_from(count).unwrap_or_default()))
            .collect();

        let recent_rows = sqlx::query_as::<_, HistoryRow>(&format!(
            "SELECT {HISTORY_COLUMNS} FROM watchlist_sync_history ORDER BY synced_at DESC LIMIT ?"
        ))
        .bind(recent_limit)
        .fetch_all(self.pool.inner())
        .await?;

        let recent_history = recent_rows
            .into_iter()
            .map(WatchlistSyncHistory::try_from)
            .collect::<PortalResult<Vec<_>>>()?;

        Ok(WatchlistSyncStats {
            users_with_sync_enabled,
            total_items_synced,
            total_items_requested,
            users_with_failed_last_sync,
            history_by_status,
            recent_history,
        })
    }
}
