// Graph API transport: one GET, one JSON document, no retries.
//
// Retrying and credential health live one layer up in `query.rs`. This
// layer only turns an HTTP exchange into either a JSON value or a
// `FetchError` that says which kind of failure happened.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex_lite::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Default Graph API host.
pub const DEFAULT_GRAPH_URL: &str = "https://graph.facebook.com";

/// Default Graph API version path segment.
pub const DEFAULT_GRAPH_VERSION: &str = "v2.7";

/// Error text the Graph API uses when a token can never work again.
static IRRECOVERABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)session has been invalidated|changed (their|the) password|has not authorized application|user logged out",
    )
    .expect("irrecoverable-credential pattern compiles")
});

/// Why a single request failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Network(String),

    #[error("graph returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {body}")]
    Malformed { body: String },
}

impl FetchError {
    /// True when the error body says the token was revoked for good.
    pub fn is_irrecoverable(&self) -> bool {
        match self {
            FetchError::Status { body, .. } => IRRECOVERABLE.is_match(body),
            FetchError::Network(_) | FetchError::Malformed { .. } => false,
        }
    }
}

/// Single-attempt access to the Graph API.
///
/// `uri` is relative to `{base}/{version}/` and may carry its own query
/// string. The access token is appended by the implementation.
#[async_trait]
pub trait GraphApi: Send + Sync {
    async fn get_json(&self, uri: &str, token: &str) -> Result<Value, FetchError>;
}

/// Build the full request URL for `uri`.
///
/// `access_token=` is appended with `?` or `&` unless the uri already
/// carries one (the `debug_token` call signs with the app token instead).
pub fn build_url(base_url: &str, version: &str, uri: &str, token: &str) -> String {
    let mut url = format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        version.trim_matches('/'),
        uri.trim_start_matches('/')
    );

    if !uri.contains("access_token=") {
        url.push(if uri.contains('?') { '&' } else { '?' });
        url.push_str("access_token=");
        url.push_str(token);
    }

    url
}

/// reqwest-backed `GraphApi`.
pub struct HttpGraphApi {
    client: reqwest::Client,
    base_url: String,
    version: String,
}

impl HttpGraphApi {
    /// Create a client for `base_url` / `version`. Every request is bounded
    /// by `timeout` so a stalled call surfaces as a network error.
    pub fn new(base_url: &str, version: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("crowdstats/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            version: version.to_string(),
        })
    }
}

#[async_trait]
impl GraphApi for HttpGraphApi {
    async fn get_json(&self, uri: &str, token: &str) -> Result<Value, FetchError> {
        let url = build_url(&self.base_url, &self.version, uri, token);

        debug!(uri = uri, "Graph GET request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Network(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|_| FetchError::Malformed { body })
    }
}
