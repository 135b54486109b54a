//! Discord bot delivery transport.
//!
//! Implements Discord's recommended rate limit handling:
//! - No hardcoded rate limits
//! - Retries on 429 responses respecting Retry-After
//! - Gives up after a few attempts, or at once when the wait is long;
//!   the engine never re-dispatches

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::{DeliveryTarget, DisplayPreferences};
use crate::monitor::StreamSnapshot;
use crate::notification::transport::{DeliveryError, DeliveryTransport, MessageRef};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Maximum number of attempts for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Longest 429 wait slept inside a delivery; longer limits fail the attempt.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(5);

const TWITCH_FAVICON: &str = "https://static.twitchcdn.net/assets/favicon-32-e29e246c157142c94346.png";

/// Discord rejects embed titles longer than this.
const MAX_TITLE_CHARS: usize = 256;

#[derive(Debug, Deserialize)]
struct CreatedMessage {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// Posts notifications through the Discord REST API with a bot token.
pub struct DiscordTransport {
    client: Client,
    token: String,
    api_base: String,
}

impl DiscordTransport {
    pub fn new(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
            api_base: DISCORD_API_BASE.to_string(),
        }
    }

    /// Point the transport at another API root.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Build the message payload for a go-live notification.
    pub fn build_payload(
        session: &StreamSnapshot,
        preferences: &DisplayPreferences,
    ) -> serde_json::Value {
        let url = session.channel.url();
        let title = if session.title.trim().is_empty() {
            format!("{} is live", session.display_name)
        } else {
            truncate_chars(&session.title, MAX_TITLE_CHARS)
        };

        let mut author = json!({
            "name": session.display_name,
            "url": url,
        });
        if let Some(icon) = &session.profile_image_url {
            author["icon_url"] = json!(icon);
        }

        let mut embed = json!({
            "title": title,
            "url": url,
            "description": format!("**{}** is now live!", session.display_name),
            "color": preferences.embed_color,
            "timestamp": Utc::now().to_rfc3339(),
            "author": author,
            "fields": [
                {
                    "name": "Game",
                    "value": session.category.as_deref().unwrap_or("No category"),
                    "inline": true
                },
                {
                    "name": "Viewers",
                    "value": session.viewer_count.to_string(),
                    "inline": true
                }
            ],
            "footer": {
                "text": "Twitch",
                "icon_url": TWITCH_FAVICON
            }
        });
        if let Some(thumbnail) = &session.thumbnail_url {
            embed["image"] = json!({ "url": thumbnail });
        }

        json!({
            "embeds": [embed],
            "components": [{
                "type": 1,
                "components": [{
                    "type": 2,
                    "style": 5,
                    "label": "Watch Stream",
                    "url": url
                }]
            }]
        })
    }

    fn messages_url(&self, channel_id: i64) -> String {
        format!("{}/channels/{}/messages", self.api_base, channel_id)
    }

    /// Send request with rate limit handling.
    async fn send_with_retry<F>(
        &self,
        target: DeliveryTarget,
        build: F,
    ) -> Result<Response, DeliveryError>
    where
        F: Fn(&Client) -> reqwest::RequestBuilder,
    {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = build(&self.client)
                .header("Authorization", format!("Bot {}", self.token))
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(response).await;

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Discord rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(DeliveryError::RateLimited { retry_after });
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                if wait_duration > MAX_RATE_LIMIT_WAIT {
                    warn!(
                        channel_id = target.channel_id,
                        "Discord rate limit of {:?} is too long to wait out, giving up",
                        wait_duration
                    );
                    return Err(DeliveryError::RateLimited { retry_after });
                }
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            if matches!(status, StatusCode::NOT_FOUND | StatusCode::FORBIDDEN) {
                return Err(DeliveryError::MissingTarget {
                    channel_id: target.channel_id,
                });
            }

            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Http {
                status: status.as_u16(),
                body,
            });
        }
    }
}

#[async_trait]
impl DeliveryTransport for DiscordTransport {
    async fn send_notification(
        &self,
        target: DeliveryTarget,
        session: &StreamSnapshot,
        preferences: &DisplayPreferences,
    ) -> Result<MessageRef, DeliveryError> {
        let payload = Self::build_payload(session, preferences);
        let url = self.messages_url(target.channel_id);

        let response = self
            .send_with_retry(target, |client| client.post(&url).json(&payload))
            .await?;

        let created: CreatedMessage = response
            .json()
            .await
            .map_err(|e| DeliveryError::Decode(e.to_string()))?;
        let id = created
            .id
            .parse::<i64>()
            .map_err(|_| DeliveryError::Decode(format!("invalid message id `{}`", created.id)))?;

        debug!(
            guild_id = target.guild_id,
            channel_id = target.channel_id,
            channel = %session.channel,
            "Discord notification sent"
        );
        Ok(MessageRef(id))
    }

    async fn delete_notification(
        &self,
        target: DeliveryTarget,
        message: MessageRef,
    ) -> Result<(), DeliveryError> {
        let url = format!("{}/{}", self.messages_url(target.channel_id), message.0);
        match self
            .send_with_retry(target, |client| client.delete(&url))
            .await
        {
            Ok(_) => Ok(()),
            // Already gone, or the channel with it.
            Err(DeliveryError::MissingTarget { .. }) => {
                debug!(message_id = message.0, "Notification already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Parse the wait from a 429 response: headers first, then the JSON body.
async fn parse_retry_after(response: Response) -> Option<Duration> {
    let header_secs = ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .find_map(|name| {
            response
                .headers()
                .get(*name)?
                .to_str()
                .ok()?
                .parse::<f64>()
                .ok()
        });
    if let Some(secs) = header_secs {
        return duration_from_secs(secs);
    }

    let body: RateLimitBody = response.json().await.ok()?;
    duration_from_secs(body.retry_after)
}

fn duration_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChannelName;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn session() -> StreamSnapshot {
        StreamSnapshot {
            channel: ChannelName::from_trusted("alpha"),
            display_name: "Alpha".to_string(),
            title: "Any% attempts".to_string(),
            category: None,
            viewer_count: 1234,
            started_at: Utc::now(),
            thumbnail_url: Some("https://x/440x248.jpg".to_string()),
            profile_image_url: None,
        }
    }

    #[test]
    fn test_payload_shape() {
        let prefs = DisplayPreferences {
            embed_color: 0x00FF00,
            auto_delete: false,
        };
        let payload = DiscordTransport::build_payload(&session(), &prefs);
        let embed = &payload["embeds"][0];

        assert_eq!(embed["title"], "Any% attempts");
        assert_eq!(embed["url"], "https://twitch.tv/alpha");
        assert_eq!(embed["description"], "**Alpha** is now live!");
        assert_eq!(embed["color"], 0x00FF00);
        assert_eq!(embed["fields"][0]["value"], "No category");
        assert_eq!(embed["fields"][1]["value"], "1234");
        assert_eq!(embed["image"]["url"], "https://x/440x248.jpg");
        assert_eq!(embed["footer"]["text"], "Twitch");
        assert!(embed["author"].get("icon_url").is_none());

        let button = &payload["components"][0]["components"][0];
        assert_eq!(button["label"], "Watch Stream");
        assert_eq!(button["url"], "https://twitch.tv/alpha");
    }

    #[test]
    fn test_blank_title_falls_back() {
        let mut s = session();
        s.title = "  ".to_string();
        let payload = DiscordTransport::build_payload(&s, &DisplayPreferences::default());
        assert_eq!(payload["embeds"][0]["title"], "Alpha is live");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        let long = "é".repeat(300);
        let cut = truncate_chars(&long, MAX_TITLE_CHARS);
        assert_eq!(cut.chars().count(), MAX_TITLE_CHARS);
        assert!(cut.ends_with('…'));
    }

    #[test]
    fn test_duration_from_secs() {
        assert_eq!(duration_from_secs(1.5), Some(Duration::from_millis(1500)));
        assert_eq!(duration_from_secs(-1.0), None);
        assert_eq!(duration_from_secs(f64::NAN), None);
        assert_eq!(duration_from_secs(f64::INFINITY), None);
        assert_eq!(duration_from_secs(1e20), None);
    }

    #[tokio::test]
    async fn test_unreachable_api_is_network_error() {
        let client = crate::utils::http_client::build_http_client(Duration::from_secs(1)).unwrap();
        let transport = DiscordTransport::new(client, "token").with_api_base("http://127.0.0.1:9");
        let target = DeliveryTarget {
            guild_id: 1,
            channel_id: 2,
        };
        let err = transport
            .send_notification(target, &session(), &DisplayPreferences::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Network(_)));
    }

    /// Serve canned responses to successive requests on a local port.
    async fn serve(responses: Vec<String>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            for response in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (base, hits)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let Ok(n) = socket.read(&mut chunk).await else {
                return;
            };
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + content_length {
                    return;
                }
            }
        }
    }

    fn http_response(status: &str, headers: &[(&str, &str)], body: &str) -> String {
        let mut out = format!("HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: {}\r\n", body.len());
        for (name, value) in headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str("\r\n");
        out.push_str(body);
        out
    }

    fn transport(base: &str) -> DiscordTransport {
        let client = crate::utils::http_client::build_http_client(Duration::from_secs(5)).unwrap();
        DiscordTransport::new(client, "token").with_api_base(format!("{base}/"))
    }

    const TARGET: DeliveryTarget = DeliveryTarget {
        guild_id: 1,
        channel_id: 2,
    };

    #[tokio::test]
    async fn test_send_returns_created_message_id() {
        let (base, hits) = serve(vec![http_response(
            "200 OK",
            &[("Content-Type", "application/json")],
            r#"{"id":"987654321"}"#,
        )])
        .await;

        let message = transport(&base)
            .send_notification(TARGET, &session(), &DisplayPreferences::default())
            .await
            .unwrap();

        assert_eq!(message, MessageRef(987654321));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_rate_limit_is_retried() {
        let (base, hits) = serve(vec![
            http_response("429 Too Many Requests", &[("Retry-After", "0.05")], "{}"),
            http_response(
                "200 OK",
                &[("Content-Type", "application/json")],
                r#"{"id":"7"}"#,
            ),
        ])
        .await;

        let message = transport(&base)
            .send_notification(TARGET, &session(), &DisplayPreferences::default())
            .await
            .unwrap();

        assert_eq!(message, MessageRef(7));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_long_rate_limit_fails_without_waiting() {
        let (base, hits) = serve(vec![http_response(
            "429 Too Many Requests",
            &[("Retry-After", "3600")],
            "{}",
        )])
        .await;

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            transport(&base).send_notification(TARGET, &session(), &DisplayPreferences::default()),
        )
        .await
        .expect("long rate limit must not be slept");

        match result {
            Err(DeliveryError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(3600)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrepresentable_retry_after_uses_default_wait() {
        let limited = http_response("429 Too Many Requests", &[("Retry-After", "1e20")], "{}");
        let (base, hits) = serve(vec![limited.clone(), limited.clone(), limited]).await;

        let result = tokio::time::timeout(
            Duration::from_secs(10),
            transport(&base).send_notification(TARGET, &session(), &DisplayPreferences::default()),
        )
        .await
        .unwrap();

        assert!(matches!(
            result,
            Err(DeliveryError::RateLimited { retry_after: None })
        ));
        assert_eq!(hits.load(Ordering::SeqCst), MAX_RATE_LIMIT_RETRIES as usize);
    }

    #[tokio::test]
    async fn test_delete_of_missing_message_is_ok() {
        let (base, _) = serve(vec![http_response("404 Not Found", &[], "{}")]).await;
        transport(&base)
            .delete_notification(TARGET, MessageRef(5))
            .await
            .unwrap();
    }
}
