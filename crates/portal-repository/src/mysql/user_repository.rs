//! MySQL user repository implementation.

use super::parse_user_id;
use crate::{traits::UserRepository, DatabasePool};
use async_trait::async_trait;
use portal_core::{PortalError, PortalResult, PortalUser, UserId};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::debug;

/// MySQL user repository implementation.
#[derive(Clone)]
pub struct MySqlUserRepository {
    pool: Arc<DatabasePool>,
}

impl MySqlUserRepository {
    /// Creates a new MySQL user repository.
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    username: String,
    email: Option<String>,
    plex_token: Option<String>,
    is_admin: bool,
}

impl TryFrom<UserRow> for PortalUser {
    type Error = PortalError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(PortalUser {
            id: parse_user_id(&row.id)?,
            username: row.username,
            email: row.email,
            plex_token: row.plex_token,
            is_admin: row.is_admin,
        })
    }
}

#[async_trait]
impl UserRepository for MySqlUserRepository {
    async fn find_by_id(&self, id: UserId) -> PortalResult<Option<PortalUser>> {
        debug!(user_id = %id, "Finding user by id");

        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, username, email, plex_token, is_admin
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(self.pool.inner())
        .await?;

        row.map(PortalUser::try_from).transpose()
    }
}
