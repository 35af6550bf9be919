//! Overseerr / Jellyseerr request client.

use super::{truncate_body, MediaRequest, RequestSubmitter, SubmitOutcome};
use async_trait::async_trait;
use portal_config::WatchlistConfig;
use portal_core::{MediaType, PortalError, PortalResult, RequestServiceConfig};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Overseerr media status codes.
const STATUS_PENDING: u8 = 2;
const STATUS_PROCESSING: u8 = 3;
const STATUS_PARTIALLY_AVAILABLE: u8 = 4;
const STATUS_AVAILABLE: u8 = 5;

/// Submits media requests to an Overseerr-compatible API.
///
/// The service URL and API key come from the active
/// [`RequestServiceConfig`] on every call, so admin changes apply without a
/// restart.
#[derive(Clone)]
pub struct OverseerrClient {
    client: Client,
}

impl OverseerrClient {
    /// Creates a client with the configured timeout.
    pub fn new(config: &WatchlistConfig) -> PortalResult<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| PortalError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Creates a client around an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn url(service: &RequestServiceConfig, path: &str) -> String {
        format!("{}/api/v1{}", service.url.trim_end_matches('/'), path)
    }

    /// Reads the downstream status of a media item. `None` when the service
    /// does not know it yet.
    async fn media_status(&self, service: &RequestServiceConfig, request: &MediaRequest) -> PortalResult<Option<u8>> {
        let path = format!("/{}/{}", request.media_type.as_str(), request.media_id);
        let response = self
            .client
            .get(Self::url(service, &path))
            .header("X-Api-Key", &service.api_key)
            .send()
            .await
            .map_err(|e| upstream(service, format!("media lookup failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = ensure_success(service, response, "media lookup").await?;

        let details: MediaDetails = response
            .json()
            .await
            .map_err(|e| upstream(service, format!("invalid media response: {e}")))?;

        Ok(details.media_info.map(|info| info.status))
    }
}

#[async_trait]
impl RequestSubmitter for OverseerrClient {
    async fn submit_request(
        &self,
        service: &RequestServiceConfig,
        request: &MediaRequest,
    ) -> PortalResult<SubmitOutcome> {
        match self.media_status(service, request).await? {
            Some(STATUS_AVAILABLE | STATUS_PARTIALLY_AVAILABLE) => return Ok(SubmitOutcome::AlreadyAvailable),
            Some(STATUS_PENDING | STATUS_PROCESSING) => return Ok(SubmitOutcome::AlreadyRequested),
            _ => {}
        }

        let body = CreateRequestBody {
            media_type: request.media_type,
            media_id: request.media_id,
            tvdb_id: request.tvdb_id,
            seasons: (request.media_type == MediaType::Tv).then_some("all"),
        };

        let response = self
            .client
            .post(Self::url(service, "/request"))
            .header("X-Api-Key", &service.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| upstream(service, format!("request submission failed: {e}")))?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(SubmitOutcome::AlreadyRequested);
        }
        let response = ensure_success(service, response, "request submission").await?;

        let created: CreatedRequest = response
            .json()
            .await
            .map_err(|e| upstream(service, format!("invalid request response: {e}")))?;

        debug!(
            service = %service.name,
            media_id = request.media_id,
            request_id = created.id,
            "Created downstream request"
        );

        Ok(SubmitOutcome::Created {
            request_id: Some(created.id.to_string()),
        })
    }
}

fn upstream(service: &RequestServiceConfig, message: String) -> PortalError {
    PortalError::upstream(service.name.clone(), message)
}

async fn ensure_success(service: &RequestServiceConfig, response: Response, what: &str) -> PortalResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(upstream(
        service,
        format!("{what} returned HTTP {status}: {}", truncate_body(&body)),
    ))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequestBody {
    media_type: MediaType,
    media_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tvdb_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seasons: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaDetails {
    media_info: Option<MediaInfo>,
}

#[derive(Debug, Deserialize)]
struct MediaInfo {
    status: u8,
}

#[derive(Debug, Deserialize)]
struct CreatedRequest {
    id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::RequestServiceKind;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn service(server: &MockServer) -> RequestServiceConfig {
        RequestServiceConfig {
            id: 1,
            kind: RequestServiceKind::Overseerr,
            name: "Overseerr".to_string(),
            url: format!("{}/", server.uri()),
            api_key: "api-key".to_string(),
            is_active: true,
        }
    }

    fn movie(id: i64) -> MediaRequest {
        MediaRequest {
            media_type: MediaType::Movie,
            media_id: id,
            tvdb_id: None,
        }
    }

    async fn mount_status(server: &MockServer, media_path: &str, status: u8) {
        Mock::given(method("GET"))
            .and(path(media_path))
            .and(header("X-Api-Key", "api-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "mediaInfo": { "status": status } })),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_creates_request_for_unknown_media() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/949"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": 949 })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/request"))
            .and(body_json(serde_json::json!({ "mediaType": "movie", "mediaId": 949 })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": 77 })))
            .expect(1)
            .mount(&server)
            .await;

        let client = OverseerrClient::new(&WatchlistConfig::default()).unwrap();
        let outcome = client.submit_request(&service(&server), &movie(949)).await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Created {
                request_id: Some("77".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_tv_request_asks_for_all_seasons() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tv/95396"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/request"))
            .and(body_json(serde_json::json!({
                "mediaType": "tv",
                "mediaId": 95396,
                "tvdbId": 371980,
                "seasons": "all"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({ "id": 5 })))
            .expect(1)
            .mount(&server)
            .await;

        let request = MediaRequest {
            media_type: MediaType::Tv,
            media_id: 95_396,
            tvdb_id: Some(371_980),
        };
        let client = OverseerrClient::new(&WatchlistConfig::default()).unwrap();
        assert!(matches!(
            client.submit_request(&service(&server), &request).await.unwrap(),
            SubmitOutcome::Created { .. }
        ));
    }

    #[tokio::test]
    async fn test_available_media_is_not_requested() {
        let server = MockServer::start().await;
        mount_status(&server, "/api/v1/movie/1", STATUS_AVAILABLE).await;
        mount_status(&server, "/api/v1/movie/2", STATUS_PROCESSING).await;
        Mock::given(method("POST"))
            .and(path("/api/v1/request"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let client = OverseerrClient::new(&WatchlistConfig::default()).unwrap();
        let service = service(&server);
        assert_eq!(
            client.submit_request(&service, &movie(1)).await.unwrap(),
            SubmitOutcome::AlreadyAvailable
        );
        assert_eq!(
            client.submit_request(&service, &movie(2)).await.unwrap(),
            SubmitOutcome::AlreadyRequested
        );
    }

    #[tokio::test]
    async fn test_conflict_means_already_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/request"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = OverseerrClient::new(&WatchlistConfig::default()).unwrap();
        assert_eq!(
            client.submit_request(&service(&server), &movie(3)).await.unwrap(),
            SubmitOutcome::AlreadyRequested
        );
    }

    #[tokio::test]
    async fn test_server_error_is_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/movie/4"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/request"))
            .respond_with(ResponseTemplate::new(500).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let client = OverseerrClient::new(&WatchlistConfig::default()).unwrap();
        let err = client.submit_request(&service(&server), &movie(4)).await.unwrap_err();
        assert_eq!(err.error_code(), "UPSTREAM_UNAVAILABLE");
        assert!(err.to_string().contains("quota exceeded"));
    }
}
