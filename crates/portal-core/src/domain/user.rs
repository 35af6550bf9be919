//! Portal user entity.

use crate::UserId;
use serde::{Deserialize, Serialize};

/// A portal user as seen by the sync subsystem.
///
/// Only the fields the background jobs need are modelled; profile and
/// credential management live in the web front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalUser {
    pub id: UserId,
    pub username: String,
    pub email: Option<String>,
    /// Stored external auth token used against the watchlist source.
    #[serde(skip_serializing)]
    pub plex_token: Option<String>,
    pub is_admin: bool,
}

impl PortalUser {
    /// Returns the stored token when present and non-blank.
    #[must_use]
    pub fn source_token(&self) -> Option<&str> {
        self.plex_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(token: Option<&str>) -> PortalUser {
        PortalUser {
            id: UserId::new(),
            username: "alice".to_string(),
            email: None,
            plex_token: token.map(ToString::to_string),
            is_admin: false,
        }
    }

    #[test]
    fn test_source_token_blank_is_missing() {
        assert_eq!(user(None).source_token(), None);
        assert_eq!(user(Some("  ")).source_token(), None);
        assert_eq!(user(Some("abc")).source_token(), Some("abc"));
    }

    #[test]
    fn test_token_never_serialized() {
        let json = serde_json::to_value(user(Some("secret"))).unwrap();
        assert!(json.get("plexToken").is_none());
    }
}
