//! Twitch Helix live-status source.
//!
//! Uses an app access token from the client-credentials grant. The token is
//! cached until shortly before expiry; a 401 drops it and surfaces
//! [`SourceError::AuthExpired`] so the caller can refresh and retry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::source::{LiveStatusSource, SourceError, StreamSnapshot};
use crate::domain::ChannelName;

const HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
const TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

/// Logins accepted by `/streams` and ids by `/users` per call.
pub const HELIX_MAX_BATCH: usize = 100;

/// Tokens are treated as expired this long before Twitch says so.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const THUMBNAIL_WIDTH: &str = "440";
const THUMBNAIL_HEIGHT: &str = "248";

/// Longest error body kept in [`SourceError::Http`].
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_EXPIRY_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct HelixPage<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct HelixStream {
    user_id: String,
    user_login: String,
    user_name: String,
    #[serde(default)]
    game_name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    viewer_count: u64,
    started_at: DateTime<Utc>,
    #[serde(default)]
    thumbnail_url: String,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    id: String,
    #[serde(default)]
    profile_image_url: String,
}

/// Helix client implementing [`LiveStatusSource`].
pub struct TwitchClient {
    client: Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    token_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl TwitchClient {
    pub fn new(client: Client, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: HELIX_BASE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            token: Mutex::new(None),
        }
    }

    /// Point the client at different endpoints (proxies, local mocks).
    pub fn with_endpoints(mut self, api_base: impl Into<String>, token_url: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.token_url = token_url.into();
        self
    }

    /// Cached token, fetching a new one when missing or about to expire.
    async fn access_token(&self) -> Result<String, SourceError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref()
            && token.is_fresh()
        {
            return Ok(token.access_token.clone());
        }

        let fresh = self.fetch_token().await?;
        let access_token = fresh.access_token.clone();
        *guard = Some(fresh);
        Ok(access_token)
    }

    async fn fetch_token(&self) -> Result<CachedToken, SourceError> {
        info!("Fetching new Twitch app access token");
        let response = self
            .client
            .post(&self.token_url)
            .query(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?;

        let token: TokenResponse = decode_response(response).await?;
        debug!(expires_in = token.expires_in, "Obtained Twitch app access token");
        Ok(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn authorized_get(&self, path: &str) -> Result<RequestBuilder, SourceError> {
        let token = self.access_token().await?;
        Ok(self
            .client
            .get(format!("{}/{}", self.api_base, path))
            .header("Client-Id", &self.client_id)
            .bearer_auth(token))
    }

    async fn helix_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<HelixPage<T>, SourceError> {
        let response = self.authorized_get(path).await?.query(params).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Twitch rejected the app access token");
            self.invalidate_token().await;
            return Err(SourceError::AuthExpired);
        }

        decode_response(response).await
    }

    /// `user_id -> profile_image_url` for the given ids.
    async fn profile_images(&self, user_ids: &[&str]) -> Result<HashMap<String, String>, SourceError> {
        let params: Vec<(&str, &str)> = user_ids.iter().map(|id| ("id", *id)).collect();
        let page: HelixPage<HelixUser> = self.helix_get("users", &params).await?;
        Ok(page
            .data
            .into_iter()
            .filter(|u| !u.profile_image_url.is_empty())
            .map(|u| (u.id, u.profile_image_url))
            .collect())
    }
}

#[async_trait]
impl LiveStatusSource for TwitchClient {
    fn max_batch_size(&self) -> usize {
        HELIX_MAX_BATCH
    }

    async fn get_live_status(
        &self,
        names: &[ChannelName],
    ) -> Result<Vec<StreamSnapshot>, SourceError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        if names.len() > HELIX_MAX_BATCH {
            return Err(SourceError::BatchTooLarge {
                len: names.len(),
                max: HELIX_MAX_BATCH,
            });
        }

        let mut params: Vec<(&str, &str)> =
            names.iter().map(|n| ("user_login", n.as_str())).collect();
        params.push(("first", "100"));

        let page: HelixPage<HelixStream> = self.helix_get("streams", &params).await?;
        let streams = page.data;

        let mut profiles = HashMap::new();
        if !streams.is_empty() {
            let ids: Vec<&str> = streams.iter().map(|s| s.user_id.as_str()).collect();
            match self.profile_images(&ids).await {
                Ok(found) => profiles = found,
                Err(e) => warn!(error = %e, "Failed to fetch profile images, continuing without"),
            }
        }

        debug!(requested = names.len(), live = streams.len(), "Checked Twitch live status");

        Ok(streams
            .into_iter()
            .map(|s| {
                let profile = profiles.remove(&s.user_id);
                into_snapshot(s, profile)
            })
            .collect())
    }

    async fn refresh_auth(&self) -> Result<(), SourceError> {
        let fresh = self.fetch_token().await?;
        *self.token.lock().await = Some(fresh);
        Ok(())
    }
}

fn into_snapshot(stream: HelixStream, profile_image_url: Option<String>) -> StreamSnapshot {
    StreamSnapshot {
        channel: ChannelName::from_trusted(stream.user_login),
        display_name: stream.user_name,
        title: stream.title,
        category: Some(stream.game_name).filter(|g| !g.is_empty()),
        viewer_count: stream.viewer_count,
        started_at: stream.started_at,
        thumbnail_url: sized_thumbnail(&stream.thumbnail_url),
        profile_image_url,
    }
}

/// Fill the `{width}`/`{height}` template in a Helix thumbnail URL.
pub fn sized_thumbnail(template: &str) -> Option<String> {
    if template.is_empty() {
        return None;
    }
    Some(
        template
            .replace("{width}", THUMBNAIL_WIDTH)
            .replace("{height}", THUMBNAIL_HEIGHT),
    )
}

/// Seconds until the `Ratelimit-Reset` epoch timestamp.
fn parse_rate_limit_reset(value: Option<&str>, now: DateTime<Utc>) -> Option<Duration> {
    let reset: i64 = value?.trim().parse().ok()?;
    let secs = reset.saturating_sub(now.timestamp());
    Some(Duration::from_secs(secs.max(0) as u64))
}

async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, SourceError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let reset = response
            .headers()
            .get("Ratelimit-Reset")
            .and_then(|v| v.to_str().ok());
        return Err(SourceError::RateLimited {
            retry_after: parse_rate_limit_reset(reset, Utc::now()),
        });
    }

    let body = response.text().await?;
    if !status.is_success() {
        let mut body = body;
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        return Err(SourceError::Http {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sized_thumbnail() {
        let url = "https://static-cdn.jtvnw.net/previews-ttv/live_user_alpha-{width}x{height}.jpg";
        assert_eq!(
            sized_thumbnail(url).unwrap(),
            "https://static-cdn.jtvnw.net/previews-ttv/live_user_alpha-440x248.jpg"
        );
        assert_eq!(sized_thumbnail(""), None);
    }

    #[test]
    fn test_parse_streams_page() {
        let body = r#"{
            "data": [{
                "id": "1", "user_id": "42", "user_login": "alpha", "user_name": "Alpha",
                "game_id": "", "game_name": "", "type": "live", "title": "hello",
                "viewer_count": 12, "started_at": "2025-03-01T10:00:00Z",
                "language": "en", "thumbnail_url": "https://x/{width}x{height}.jpg",
                "tags": []
            }],
            "pagination": {}
        }"#;
        let page: HelixPage<HelixStream> = serde_json::from_str(body).unwrap();
        let snapshot = into_snapshot(page.data.into_iter().next().unwrap(), Some("p.png".into()));

        assert_eq!(snapshot.channel.as_str(), "alpha");
        assert_eq!(snapshot.display_name, "Alpha");
        assert_eq!(snapshot.category, None);
        assert_eq!(snapshot.viewer_count, 12);
        assert_eq!(
            snapshot.started_at,
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
        );
        assert_eq!(snapshot.thumbnail_url.as_deref(), Some("https://x/440x248.jpg"));
        assert_eq!(snapshot.profile_image_url.as_deref(), Some("p.png"));
    }

    #[test]
    fn test_parse_rate_limit_reset() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let reset = (now.timestamp() + 30).to_string();
        assert_eq!(
            parse_rate_limit_reset(Some(&reset), now),
            Some(Duration::from_secs(30))
        );
        let past = (now.timestamp() - 30).to_string();
        assert_eq!(parse_rate_limit_reset(Some(&past), now), Some(Duration::ZERO));
        assert_eq!(parse_rate_limit_reset(Some("soon"), now), None);
        assert_eq!(parse_rate_limit_reset(None, now), None);
    }

    #[test]
    fn test_token_freshness() {
        let fresh = CachedToken {
            access_token: "t".into(),
            expires_at: Instant::now() + Duration::from_secs(3600),
        };
        assert!(fresh.is_fresh());
        let stale = CachedToken {
            access_token: "t".into(),
            expires_at: Instant::now() + Duration::from_secs(30),
        };
        assert!(!stale.is_fresh());
    }

    fn http() -> Client {
        crate::utils::http_client::build_http_client(Duration::from_secs(1)).unwrap()
    }

    #[tokio::test]
    async fn test_oversized_batch_is_rejected() {
        let client = TwitchClient::new(http(), "id", "secret");
        let names: Vec<ChannelName> = (0..101)
            .map(|i| ChannelName::from_trusted(format!("user{i:04}")))
            .collect();
        let err = client.get_live_status(&names).await.unwrap_err();
        assert!(matches!(err, SourceError::BatchTooLarge { len: 101, max: 100 }));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_network() {
        let client = TwitchClient::new(http(), "id", "secret")
            .with_endpoints("http://127.0.0.1:9", "http://127.0.0.1:9/token");
        assert!(client.get_live_status(&[]).await.unwrap().is_empty());
    }
}
