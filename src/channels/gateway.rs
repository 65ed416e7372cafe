//! HTTP bridge to the messaging network
//!
//! The service does not hold a messaging session itself. A bridge process
//! owns the account and exposes a small JSON API:
//!
//! | Method | Path                 | Body / Query                      | Used for               |
//! |--------|----------------------|-----------------------------------|------------------------|
//! | GET    | `/messages?limit=N`  |                                   | [`MessageSource`]      |
//! | POST   | `/forward`           | `{destination, message_id}`       | [`Transport::deliver`] |
//! | GET    | `/groups`            |                                   | broadcast-all targets  |
//! | POST   | `/send`              | `{to, text}` or `{to, name, document}` | [`Outbound`]      |
//!
//! Requests are paced by a governor rate limiter so a burst of control
//! traffic cannot trip the network's flood protection.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;
use url::Url;

use super::{ChannelError, ChannelResult, MessageSource, Outbound, Transport};
use crate::models::{ContentItem, PeerId};

/// Gateway client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Base URL of the bridge API
    pub url: String,

    /// Optional bearer token
    #[serde(default)]
    pub auth_token: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum bridge requests per second
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

fn default_timeout() -> u64 {
    30
}

fn default_requests_per_second() -> u32 {
    5
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new("http://localhost:8081")
    }
}

impl GatewayConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            timeout_secs: default_timeout(),
            requests_per_second: default_requests_per_second(),
        }
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        let url = Url::parse(&self.url).map_err(|e| format!("Invalid gateway URL: {e}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err("Gateway URL must use http or https".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }
        if self.requests_per_second == 0 {
            return Err("requests_per_second must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ForwardRequest {
    destination: PeerId,
    message_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SendRequest<'a> {
    Text {
        to: PeerId,
        text: &'a str,
    },
    Document {
        to: PeerId,
        name: &'a str,
        document: String,
    },
}

/// Client for the messaging bridge
pub struct GatewayClient {
    client: Client,
    base: Url,
    auth_token: Option<String>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl GatewayClient {
    /// Create a new gateway client
    pub fn new(config: GatewayConfig) -> ChannelResult<Self> {
        config.validate().map_err(ChannelError::InvalidConfig)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        // A trailing slash keeps `join` from dropping the last path segment
        let mut base = Url::parse(&config.url)
            .map_err(|e| ChannelError::InvalidConfig(format!("Invalid gateway URL: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            base,
            auth_token: config.auth_token,
            rate_limiter,
        })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> ChannelResult<Url> {
        self.base
            .join(path)
            .map_err(|e| ChannelError::InvalidConfig(format!("Invalid endpoint '{path}': {e}")))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder) -> ChannelResult<Response> {
        self.rate_limiter.until_ready().await;

        let response = self.authorize(request).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ChannelError::Unavailable(e.to_string())
            } else {
                ChannelError::HttpError(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(ChannelError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl MessageSource for GatewayClient {
    async fn fetch(&self, limit: usize) -> ChannelResult<Vec<ContentItem>> {
        let url = self.endpoint("messages")?;
        let request = self
            .client
            .get(url)
            .query(&[("limit", limit.to_string())]);

        let items: Vec<ContentItem> = self.execute(request).await?.json().await?;
        let total = items.len();
        let items: Vec<ContentItem> = items
            .into_iter()
            .filter(ContentItem::is_forwardable)
            .take(limit)
            .collect();

        tracing::debug!(fetched = total, usable = items.len(), "Fetched content pool");
        Ok(items)
    }
}

#[async_trait]
impl Transport for GatewayClient {
    async fn deliver(&self, destination: PeerId, item: &ContentItem) -> ChannelResult<()> {
        let url = self.endpoint("forward")?;
        let body = ForwardRequest {
            destination,
            message_id: item.id,
        };
        self.execute(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn enumerate_groups(&self) -> ChannelResult<Vec<PeerId>> {
        let url = self.endpoint("groups")?;
        let groups: Vec<PeerId> = self.execute(self.client.get(url)).await?.json().await?;
        Ok(groups)
    }
}

#[async_trait]
impl Outbound for GatewayClient {
    async fn send_text(&self, to: PeerId, text: &str) -> ChannelResult<()> {
        let url = self.endpoint("send")?;
        let body = SendRequest::Text { to, text };
        self.execute(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn send_document(&self, to: PeerId, name: &str, contents: &[u8]) -> ChannelResult<()> {
        let url = self.endpoint("send")?;
        let body = SendRequest::Document {
            to,
            name,
            document: String::from_utf8_lossy(contents).into_owned(),
        };
        self.execute(self.client.post(url).json(&body)).await?;
        Ok(())
    }
}
