//! HTTP client for the Discord REST API.
//!
//! All outbound HTTP calls go through [`DiscordHttpClient`] so that auth
//! headers, status handling, and error mapping live in one place. The
//! `reqwest` types are an implementation detail of this module.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::community::Community;
use crate::error::HttpError;
use crate::platform::Platform;
use crate::types::*;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const BASE_URL: &str = "https://discord.com/api/v10";
const USER_AGENT: &str = "DiscordBot (https://github.com/daily-poll-bot, 0.1)";

/// Discord's maximum page size for `GET /users/@me/guilds`.
const GUILD_PAGE_LIMIT: usize = 200;

// ---------------------------------------------------------------------------
// Parse rate-limit headers from a response
// ---------------------------------------------------------------------------

fn parse_rate_limit_headers(headers: &HeaderMap) -> RateLimitInfo {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    RateLimitInfo {
        remaining: header("x-ratelimit-remaining").and_then(|s| s.parse::<u32>().ok()),
        reset_after: header("x-ratelimit-reset-after").and_then(|s| s.parse::<f64>().ok()),
        bucket: header("x-ratelimit-bucket").map(str::to_string),
        is_global: header("x-ratelimit-global") == Some("true"),
    }
}

// ---------------------------------------------------------------------------
// DiscordHttpClient
// ---------------------------------------------------------------------------

/// A thin HTTP client for the Discord REST API.
///
/// Cheap to clone (`reqwest::Client` is reference counted).
#[derive(Clone)]
pub struct DiscordHttpClient {
    token: String,
    base_url: String,
    client: reqwest::Client,
}

impl DiscordHttpClient {
    /// Create a new client with the given bot token.
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    /// Create a client that talks to `base_url` instead of discord.com.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    // ------------------------------------------------------------------
    // Low-level: the single request method everything funnels through
    // ------------------------------------------------------------------

    /// Send a request to `{base_url}/{path}`.
    ///
    /// `route_key` names the route in logs and errors, e.g.
    /// `POST /channels/{channel_id}/polls`.
    ///
    /// Returns the raw response body on success.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, HttpError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));

        let mut req = self
            .client
            .request(method, &url)
            .header("authorization", format!("Bot {}", self.token));
        if let Some(json) = body {
            req = req.json(json);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = resp.status();
        let rl_info = parse_rate_limit_headers(resp.headers());

        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!(
                route = route_key,
                retry_after_s = rl_info.reset_after.unwrap_or_default(),
                global = rl_info.is_global,
                bucket = rl_info.bucket.as_deref().unwrap_or("-"),
                "rate-limited by Discord"
            );
        } else {
            debug!(
                route = route_key,
                status = status.as_u16(),
                remaining = rl_info.remaining,
                "request complete"
            );
        }

        let resp_bytes = resp
            .bytes()
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        if status.is_success() {
            return Ok(resp_bytes.to_vec());
        }

        Err(HttpError::Api {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&resp_bytes).to_string(),
            route: route_key.to_string(),
        })
    }

    /// Like [`request`](Self::request) but deserialises the response body as JSON.
    pub async fn request_json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        route_key: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, HttpError> {
        let bytes = self.request(method, path, route_key, body).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            let raw: String = String::from_utf8_lossy(&bytes).chars().take(200).collect();
            HttpError::Serde(format!("{}: {}", e, raw))
        })
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// The bot's own user. Fails with a 401 when the token is rejected.
    pub async fn get_current_user(&self) -> Result<User, HttpError> {
        self.request_json(Method::GET, "users/@me", "GET /users/@me", None)
            .await
    }

    /// Every guild the bot belongs to, following pagination.
    pub async fn get_current_user_guilds(&self) -> Result<Vec<PartialGuild>, HttpError> {
        let mut guilds: Vec<PartialGuild> = Vec::new();

        loop {
            let path = match guilds.last() {
                Some(last) => format!("users/@me/guilds?limit={}&after={}", GUILD_PAGE_LIMIT, last.id),
                None => format!("users/@me/guilds?limit={}", GUILD_PAGE_LIMIT),
            };

            let page: Vec<PartialGuild> = self
                .request_json(Method::GET, &path, "GET /users/@me/guilds", None)
                .await?;

            let done = page.len() < GUILD_PAGE_LIMIT;
            guilds.extend(page);
            if done {
                break;
            }
        }

        Ok(guilds)
    }

    // ------------------------------------------------------------------
    // Guilds / channels
    // ------------------------------------------------------------------

    /// All channels of a guild, sorted into display order.
    pub async fn get_guild_channels(&self, guild_id: &str) -> Result<Vec<Channel>, HttpError> {
        let path = format!("guilds/{}/channels", guild_id);
        let route_key = format!("GET /guilds/{}/channels", guild_id);
        let mut channels: Vec<Channel> = self
            .request_json(Method::GET, &path, &route_key, None)
            .await?;
        sort_by_position(&mut channels);
        Ok(channels)
    }

    // ------------------------------------------------------------------
    // Polls
    // ------------------------------------------------------------------

    /// Create a native poll in a channel.
    pub async fn create_poll(&self, channel_id: &str, poll: &PollRequest) -> Result<(), HttpError> {
        let path = format!("channels/{}/polls", channel_id);
        let route_key = format!("POST /channels/{}/polls", channel_id);
        let body = serde_json::to_value(poll).map_err(|e| HttpError::Serde(e.to_string()))?;
        self.request(Method::POST, &path, &route_key, Some(&body))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for DiscordHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordHttpClient")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
impl Platform for DiscordHttpClient {
    async fn communities(&self) -> Result<Vec<Community>, HttpError> {
        let guilds = self.get_current_user_guilds().await?;
        Ok(guilds
            .into_iter()
            .map(|g| Community {
                id: g.id,
                name: g.name,
                channels: Vec::new(),
            })
            .collect())
    }

    async fn channels(&self, community: &Community) -> Result<Community, HttpError> {
        let channels = self.get_guild_channels(&community.id).await?;
        Ok(Community::from_channels(
            community.id.clone(),
            community.name.clone(),
            channels,
        ))
    }

    async fn create_poll(&self, channel_id: &Snowflake, poll: &PollRequest) -> Result<(), HttpError> {
        DiscordHttpClient::create_poll(self, channel_id, poll).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Discord returns guild channels unordered; clients sort by `position`,
/// breaking ties by snowflake.
fn sort_by_position(channels: &mut [Channel]) {
    channels.sort_by_key(|c| {
        (
            c.position.unwrap_or(i32::MAX),
            c.id.parse::<u64>().unwrap_or(u64::MAX),
        )
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    assert_impl_all!(DiscordHttpClient: Send, Sync, Clone);

    /// Serve one canned response per entry in `responses`, reporting each
    /// raw request on the returned channel.
    pub(crate) async fn serve(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                tx.send(request).unwrap();
                let response = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });

        (format!("http://{}", addr), rx)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            if let Some(end) = text.find("\r\n\r\n") {
                let content_length = text[..end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn sample_poll() -> PollRequest {
        PollRequest {
            question: PollMedia {
                text: "01/03/2026".into(),
            },
            answers: vec![PollAnswer {
                poll_media: PollMedia { text: "7".into() },
            }],
            duration: 86400,
            allow_multiselect: true,
        }
    }

    #[test]
    fn rate_limit_headers_are_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-remaining", "0".parse().unwrap());
        headers.insert("x-ratelimit-reset-after", "1.5".parse().unwrap());
        headers.insert("x-ratelimit-bucket", "abc".parse().unwrap());
        headers.insert("x-ratelimit-global", "true".parse().unwrap());

        let info = parse_rate_limit_headers(&headers);
        assert_eq!(info.remaining, Some(0));
        assert_eq!(info.reset_after, Some(1.5));
        assert_eq!(info.bucket.as_deref(), Some("abc"));
        assert!(info.is_global);

        let empty = parse_rate_limit_headers(&HeaderMap::new());
        assert_eq!(empty.remaining, None);
        assert!(!empty.is_global);
    }

    #[test]
    fn debug_redacts_token() {
        let client = DiscordHttpClient::new("super-secret-token-value");
        let dbg = format!("{client:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn channels_sort_into_display_order() {
        let mut channels: Vec<Channel> = serde_json::from_str(
            r#"[
                {"id": "30", "type": 0, "name": "c", "position": 2},
                {"id": "10", "type": 0, "name": "a", "position": 0},
                {"id": "25", "type": 0, "name": "b2", "position": 1},
                {"id": "20", "type": 0, "name": "b1", "position": 1}
            ]"#,
        )
        .unwrap();
        sort_by_position(&mut channels);
        let names: Vec<&str> = channels.iter().filter_map(|c| c.name.as_deref()).collect();
        assert_eq!(names, vec!["a", "b1", "b2", "c"]);
    }

    #[tokio::test]
    async fn create_poll_posts_the_poll_body() {
        let (base, mut requests) = serve(vec![(200, "{}")]).await;
        let client = DiscordHttpClient::with_base_url("token-abcdefghijklmnopqrstuvwxyz", base);

        client.create_poll("123", &sample_poll()).await.unwrap();

        let raw = requests.recv().await.unwrap();
        assert!(raw.starts_with("POST /channels/123/polls HTTP/1.1"), "{raw}");
        assert!(raw
            .to_ascii_lowercase()
            .contains("authorization: bot token-abcdefghijklmnopqrstuvwxyz"));
        let body = raw.split("\r\n\r\n").nth(1).unwrap();
        let json: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json, serde_json::to_value(sample_poll()).unwrap());
    }

    #[tokio::test]
    async fn forbidden_maps_to_api_error() {
        let (base, _requests) = serve(vec![(403, r#"{"message":"Missing Permissions"}"#)]).await;
        let client = DiscordHttpClient::with_base_url("t", base);

        let err = client.create_poll("9", &sample_poll()).await.unwrap_err();
        match err {
            HttpError::Api {
                status,
                body,
                route,
            } => {
                assert_eq!(status, 403);
                assert!(body.contains("Missing Permissions"));
                assert_eq!(route, "POST /channels/9/polls");
            }
            other => panic!("expected API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = DiscordHttpClient::with_base_url("t", format!("http://{}", addr));
        let err = client.get_current_user().await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn communities_then_channels_through_the_platform_trait() {
        let (base, mut requests) = serve(vec![
            (200, r#"[{"id": "1", "name": "Lega"}]"#),
            (
                200,
                r#"[
                    {"id": "11", "type": 0, "name": "votazioni-b", "position": 1},
                    {"id": "12", "type": 2, "name": "votazioni-voice", "position": 0},
                    {"id": "10", "type": 0, "name": "votazioni-a", "position": 0}
                ]"#,
            ),
        ])
        .await;
        let client = DiscordHttpClient::with_base_url("t", base);

        let communities = Platform::communities(&client).await.unwrap();
        assert_eq!(communities.len(), 1);
        assert_eq!(communities[0].name, "Lega");

        let full = Platform::channels(&client, &communities[0]).await.unwrap();
        let names: Vec<&str> = full.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["votazioni-a", "votazioni-b"]);

        assert!(requests
            .recv()
            .await
            .unwrap()
            .starts_with("GET /users/@me/guilds?limit=200 HTTP/1.1"));
        assert!(requests
            .recv()
            .await
            .unwrap()
            .starts_with("GET /guilds/1/channels HTTP/1.1"));
    }

    #[tokio::test]
    async fn unknown_channel_kind_does_not_lose_the_listing() {
        let (base, _requests) = serve(vec![(
            200,
            r#"[
                {"id": "10", "type": 0, "name": "votazioni-a", "position": 0},
                {"id": "11", "type": 99, "name": "votazioni-new", "position": 1}
            ]"#,
        )])
        .await;
        let client = DiscordHttpClient::with_base_url("t", base);
        let lega = Community {
            id: "1".into(),
            name: "Lega".into(),
            channels: Vec::new(),
        };

        let full = Platform::channels(&client, &lega).await.unwrap();
        let names: Vec<&str> = full.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["votazioni-a"]);
    }

    #[tokio::test]
    async fn malformed_json_is_a_serde_error() {
        let (base, _requests) = serve(vec![(200, "not json")]).await;
        let client = DiscordHttpClient::with_base_url("t", base);
        let err = client.get_current_user().await.unwrap_err();
        assert!(matches!(err, HttpError::Serde(_)), "{err:?}");
    }
}
