//! Acting identity forwarded by the web front end.

use crate::responses::ActionResponse;
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
    response::{IntoResponse, Response},
};
use portal_core::{PortalError, UserId};

/// Header carrying the acting user's id.
pub const USER_ID_HEADER: &str = "x-portal-user-id";
/// Header carrying the acting user's role (`admin` or `user`).
pub const ROLE_HEADER: &str = "x-portal-role";
/// Shared secret proving the identity headers come from the front end.
pub const INTERNAL_TOKEN_HEADER: &str = "x-portal-internal-token";

/// Role of the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

/// The user an action is performed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    fn from_headers(headers: &HeaderMap, internal_token: Option<&str>) -> Result<Self, PortalError> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        let Some(expected) = internal_token else {
            return Err(PortalError::unauthorized("identity forwarding is not configured"));
        };
        if header(INTERNAL_TOKEN_HEADER) != Some(expected) {
            return Err(PortalError::unauthorized("missing or invalid internal token"));
        }

        let user_id = header(USER_ID_HEADER)
            .ok_or_else(|| PortalError::unauthorized("missing user id"))
            .and_then(|v| UserId::parse(v).map_err(|_| PortalError::unauthorized("malformed user id")))?;
        let role = match header(ROLE_HEADER) {
            Some("admin") => Role::Admin,
            _ => Role::User,
        };

        Ok(Self { user_id, role })
    }
}

/// Rejection of the identity extractors, rendered as a failed action.
pub struct ActorRejection(PortalError);

impl IntoResponse for ActorRejection {
    fn into_response(self) -> Response {
        ActionResponse::<()>::error(&self.0).into_response()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Actor {
    type Rejection = ActorRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers, state.internal_token.as_deref()).map_err(ActorRejection)
    }
}

/// An [`Actor`] with the admin role.
#[derive(Debug, Clone, Copy)]
pub struct AdminActor(pub Actor);

#[async_trait]
impl FromRequestParts<AppState> for AdminActor {
    type Rejection = ActorRejection;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let actor = Actor::from_request_parts(parts, state).await?;
        if !actor.is_admin() {
            return Err(ActorRejection(PortalError::unauthorized("admin access required")));
        }
        Ok(Self(actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(token: Option<&str>, user_id: Option<&str>, role: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in [(INTERNAL_TOKEN_HEADER, token), (USER_ID_HEADER, user_id), (ROLE_HEADER, role)] {
            if let Some(value) = value {
                headers.insert(name, HeaderValue::from_str(value).unwrap());
            }
        }
        headers
    }

    #[test]
    fn test_trusted_admin() {
        let id = UserId::new();
        let actor = Actor::from_headers(
            &headers(Some("secret"), Some(&id.to_string()), Some("admin")),
            Some("secret"),
        )
        .unwrap();
        assert_eq!(actor.user_id, id);
        assert!(actor.is_admin());
    }

    #[test]
    fn test_unknown_role_is_user() {
        let id = UserId::new().to_string();
        let actor = Actor::from_headers(&headers(Some("secret"), Some(&id), Some("owner")), Some("secret")).unwrap();
        assert_eq!(actor.role, Role::User);
    }

    #[test]
    fn test_identity_requires_matching_token() {
        let id = UserId::new().to_string();
        assert!(Actor::from_headers(&headers(Some("wrong"), Some(&id), Some("admin")), Some("secret")).is_err());
        assert!(Actor::from_headers(&headers(None, Some(&id), Some("admin")), Some("secret")).is_err());
        assert!(Actor::from_headers(&headers(Some("secret"), Some(&id), Some("admin")), None).is_err());
    }

    #[test]
    fn test_malformed_user_id() {
        let err = Actor::from_headers(&headers(Some("secret"), Some("42"), None), Some("secret")).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }
}
