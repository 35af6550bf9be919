//! Plex watchlist client.

use super::{truncate_body, WatchlistSource};
use async_trait::async_trait;
use portal_config::WatchlistConfig;
use portal_core::{MediaType, PortalError, PortalResult, WatchlistItem};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

const SERVICE: &str = "Plex";
const PAGE_SIZE: usize = 100;

/// Reads watchlists from the Plex discover API.
#[derive(Clone)]
pub struct PlexWatchlistClient {
    client: Client,
    discover_url: String,
    account_url: String,
    client_identifier: String,
}

impl PlexWatchlistClient {
    /// Creates a client with the configured base URLs and timeout.
    pub fn new(config: &WatchlistConfig) -> PortalResult<Self> {
        let client = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|e| PortalError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self::with_client(client, config))
    }

    /// Creates a client around an existing reqwest client.
    pub fn with_client(client: Client, config: &WatchlistConfig) -> Self {
        Self {
            client,
            discover_url: config.plex_discover_url.trim_end_matches('/').to_string(),
            account_url: config.plex_account_url.trim_end_matches('/').to_string(),
            client_identifier: config.client_identifier.clone(),
        }
    }

    fn authorized(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder
            .header("Accept", "application/json")
            .header("X-Plex-Token", token)
            .header("X-Plex-Client-Identifier", &self.client_identifier)
    }

    async fn fetch_page(&self, token: &str, start: usize) -> PortalResult<MediaContainer> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/library/sections/watchlist/all", self.discover_url)),
                token,
            )
            .query(&[
                ("includeGuids", "1".to_string()),
                ("X-Plex-Container-Start", start.to_string()),
                ("X-Plex-Container-Size", PAGE_SIZE.to_string()),
            ])
            .send()
            .await
            .map_err(|e| PortalError::upstream(SERVICE, format!("watchlist request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortalError::upstream(
                SERVICE,
                format!("watchlist returned HTTP {status}: {}", truncate_body(&body)),
            ));
        }

        let envelope: WatchlistEnvelope = response
            .json()
            .await
            .map_err(|e| PortalError::upstream(SERVICE, format!("invalid watchlist response: {e}")))?;

        Ok(envelope.media_container)
    }
}

#[async_trait]
impl WatchlistSource for PlexWatchlistClient {
    async fn validate_token(&self, token: &str) -> PortalResult<bool> {
        let response = self
            .authorized(self.client.get(format!("{}/api/v2/user", self.account_url)), token)
            .send()
            .await
            .map_err(|e| PortalError::upstream(SERVICE, format!("token validation failed: {e}")))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            status => Err(PortalError::upstream(
                SERVICE,
                format!("token validation returned HTTP {status}"),
            )),
        }
    }

    async fn get_watchlist(&self, token: &str) -> PortalResult<Vec<WatchlistItem>> {
        let mut items = Vec::new();
        let mut start = 0;

        loop {
            let page = self.fetch_page(token, start).await?;
            let fetched = page.metadata.len();
            let total = page.total_size;

            items.extend(page.metadata.into_iter().filter_map(PlexMetadata::into_item));
            start += fetched;

            // Without totalSize only a short page marks the end.
            if fetched < PAGE_SIZE || total.is_some_and(|total| start >= total) {
                break;
            }
        }

        debug!(items = items.len(), "Fetched Plex watchlist");
        Ok(items)
    }
}

#[derive(Debug, Deserialize)]
struct WatchlistEnvelope {
    #[serde(rename = "MediaContainer")]
    media_container: MediaContainer,
}

#[derive(Debug, Deserialize)]
struct MediaContainer {
    #[serde(rename = "totalSize")]
    total_size: Option<usize>,
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
struct PlexMetadata {
    #[serde(rename = "ratingKey")]
    rating_key: Option<String>,
    guid: String,
    title: String,
    year: Option<i32>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "Guid", default)]
    guids: Vec<PlexGuid>,
}

#[derive(Debug, Deserialize)]
struct PlexGuid {
    id: String,
}

impl PlexMetadata {
    /// Maps a Plex entry to a watchlist item. Entries that are neither
    /// movies nor shows are dropped.
    fn into_item(self) -> Option<WatchlistItem> {
        let Ok(media_type) = self.kind.parse::<MediaType>() else {
            warn!(guid = %self.guid, kind = %self.kind, "Skipping unsupported watchlist entry");
            return None;
        };

        let mut tmdb_id = None;
        let mut tvdb_id = None;
        let mut imdb_id = None;
        for guid in &self.guids {
            match guid.id.split_once("://") {
                Some(("tmdb", id)) => tmdb_id = id.parse().ok(),
                Some(("tvdb", id)) => tvdb_id = id.parse().ok(),
                Some(("imdb", id)) => imdb_id = Some(id.to_string()),
                _ => {}
            }
        }

        Some(WatchlistItem {
            key: self.rating_key.unwrap_or_else(|| self.guid.clone()),
            guid: self.guid,
            title: self.title,
            year: self.year,
            media_type,
            tmdb_id,
            tvdb_id,
            imdb_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> PlexWatchlistClient {
        let config = WatchlistConfig {
            plex_discover_url: server.uri(),
            plex_account_url: format!("{}/", server.uri()),
            ..WatchlistConfig::default()
        };
        PlexWatchlistClient::new(&config).unwrap()
    }

    fn entry(key: usize) -> serde_json::Value {
        serde_json::json!({
            "ratingKey": format!("key-{key}"),
            "guid": format!("plex://movie/{key}"),
            "title": format!("Movie {key}"),
            "year": 2020,
            "type": "movie",
            "Guid": [{ "id": format!("tmdb://{}", 1000 + key) }, { "id": "imdb://tt0113277" }]
        })
    }

    fn page(entries: Vec<serde_json::Value>, total: usize) -> serde_json::Value {
        serde_json::json!({ "MediaContainer": { "totalSize": total, "Metadata": entries } })
    }

    #[tokio::test]
    async fn test_validate_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/user"))
            .and(header("X-Plex-Token", "good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v2/user"))
            .and(header("X-Plex-Token", "bad"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(client.validate_token("good").await.unwrap());
        assert!(!client.validate_token("bad").await.unwrap());
    }

    #[tokio::test]
    async fn test_validate_token_server_error_is_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v2/user"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).validate_token("t").await.unwrap_err();
        assert_eq!(err.error_code(), "UPSTREAM_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_get_watchlist_parses_provider_ids() {
        let server = MockServer::start().await;
        let show = serde_json::json!({
            "ratingKey": "show-1",
            "guid": "plex://show/1",
            "title": "Severance",
            "type": "show",
            "Guid": [{ "id": "tvdb://371980" }]
        });
        let clip = serde_json::json!({ "guid": "plex://clip/9", "title": "Trailer", "type": "clip" });

        Mock::given(method("GET"))
            .and(path("/library/sections/watchlist/all"))
            .and(query_param("X-Plex-Container-Start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(vec![entry(1), show, clip], 3)))
            .mount(&server)
            .await;

        let items = client(&server).get_watchlist("t").await.unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(items[0].key, "key-1");
        assert_eq!(items[0].media_type, MediaType::Movie);
        assert_eq!(items[0].tmdb_id, Some(1001));
        assert_eq!(items[0].imdb_id.as_deref(), Some("tt0113277"));

        assert_eq!(items[1].media_type, MediaType::Tv);
        assert_eq!(items[1].tmdb_id, None);
        assert_eq!(items[1].tvdb_id, Some(371_980));
    }

    #[tokio::test]
    async fn test_get_watchlist_follows_pages() {
        let server = MockServer::start().await;
        let first: Vec<_> = (0..PAGE_SIZE).map(entry).collect();

        Mock::given(method("GET"))
            .and(path("/library/sections/watchlist/all"))
            .and(query_param("X-Plex-Container-Start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(first, PAGE_SIZE + 2)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/library/sections/watchlist/all"))
            .and(query_param("X-Plex-Container-Start", PAGE_SIZE.to_string()))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(page(vec![entry(500), entry(501)], PAGE_SIZE + 2)),
            )
            .mount(&server)
            .await;

        let items = client(&server).get_watchlist("t").await.unwrap();
        assert_eq!(items.len(), PAGE_SIZE + 2);
        assert_eq!(items.last().unwrap().key, "key-501");
    }

    #[tokio::test]
    async fn test_get_watchlist_pages_without_total_size() {
        let server = MockServer::start().await;
        let first: Vec<_> = (0..PAGE_SIZE).map(entry).collect();

        Mock::given(method("GET"))
            .and(path("/library/sections/watchlist/all"))
            .and(query_param("X-Plex-Container-Start", "0"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "MediaContainer": { "Metadata": first } })),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/library/sections/watchlist/all"))
            .and(query_param("X-Plex-Container-Start", PAGE_SIZE.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "MediaContainer": { "Metadata": [entry(700)] } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let items = client(&server).get_watchlist("t").await.unwrap();
        assert_eq!(items.len(), PAGE_SIZE + 1);
        assert_eq!(items.last().unwrap().key, "key-700");
    }

    #[tokio::test]
    async fn test_empty_watchlist() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/sections/watchlist/all"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "MediaContainer": { "size": 0 } })),
            )
            .mount(&server)
            .await;

        assert!(client(&server).get_watchlist("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_watchlist_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/library/sections/watchlist/all"))
            .respond_with(ResponseTemplate::new(500).set_body_string("plex is down"))
            .mount(&server)
            .await;

        let err = client(&server).get_watchlist("t").await.unwrap_err();
        assert!(err.to_string().contains("plex is down"));
    }
}
