//! MySQL request-service configuration lookup.

use crate::{traits::RequestServiceRepository, DatabasePool};
use async_trait::async_trait;
use portal_core::{PortalError, PortalResult, RequestServiceConfig, RequestServiceKind};
use sqlx::FromRow;
use std::sync::Arc;

/// Reads the admin-managed `request_services` table.
#[derive(Clone)]
pub struct MySqlRequestServiceRepository {
    pool: Arc<DatabasePool>,
}

impl MySqlRequestServiceRepository {
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct RequestServiceRow {
    id: i64,
    kind: String,
    name: String,
    url: String,
    api_key: String,
    is_active: bool,
}

impl TryFrom<RequestServiceRow> for RequestServiceConfig {
    type Error = PortalError;

    fn try_from(row: RequestServiceRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.to_ascii_lowercase().as_str() {
            "overseerr" => RequestServiceKind::Overseerr,
            "jellyseerr" => RequestServiceKind::Jellyseerr,
            other => {
                return Err(PortalError::Internal(format!(
                    "Unknown request service kind in database: {}",
                    other
                )))
            }
        };

        Ok(RequestServiceConfig {
            id: row.id,
            kind,
            name: row.name,
            url: row.url,
            api_key: row.api_key,
            is_active: row.is_active,
        })
    }
}

#[async_trait]
impl RequestServiceRepository for MySqlRequestServiceRepository {
    async fn find_active(&self) -> PortalResult<Option<RequestServiceConfig>> {
        let row = sqlx::query_as::<_, RequestServiceRow>(
            r#"
            SELECT id, kind, name, url, api_key, is_active
            FROM request_services
            WHERE is_active = TRUE
            ORDER BY id
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(RequestServiceConfig::try_from).transpose()
    }
}
