//! MySQL implementations.

mod lease_store;
mod request_service_repository;
mod user_repository;
mod watchlist_repository;

pub use lease_store::MySqlLeaseStore;
pub use request_service_repository::MySqlRequestServiceRepository;
pub use user_repository::MySqlUserRepository;
pub use watchlist_repository::MySqlWatchlistSyncRepository;

use portal_core::{PortalError, UserId};
use uuid::Uuid;

/// Parses a CHAR(36) user id column.
pub(crate) fn parse_user_id(raw: &str) -> Result<UserId, PortalError> {
    Uuid::parse_str(raw)
        .map(UserId::from_uuid)
        .map_err(|e| PortalError::Internal(format!("Invalid UUID in database: {}", e)))
}
