//! Lobaro platform client.
//!
//! Uses reqwest to call the platform's wireless M-Bus parse endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use tracing::debug;

use super::{DecodeError, Decoder, ParsedReading};

pub const DEFAULT_LOBARO_BASE_URL: &str = "https://platform.lobaro.com";

/// Configuration for the Lobaro parse service.
#[derive(Debug, Clone)]
pub struct LobaroConfig {
    /// Platform URL (e.g., "<https://platform.lobaro.com>").
    pub base_url: String,
    /// Bearer token. Empty means "no credential".
    pub token: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for LobaroConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LOBARO_BASE_URL.to_string(),
            token: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Lobaro parse service client.
#[derive(Debug)]
pub struct LobaroClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl LobaroClient {
    pub fn new(config: &LobaroConfig) -> Result<Self, DecodeError> {
        // reqwest is built with rustls-no-provider; Err means already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DecodeError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    pub(crate) fn parse_url(&self) -> String {
        format!("{}/api/mbus", self.base_url)
    }
}

#[async_trait]
impl Decoder for LobaroClient {
    fn has_credential(&self) -> bool {
        !self.token.is_empty()
    }

    async fn decode(&self, raw_hex: &str, key_hex: &str) -> Result<ParsedReading, DecodeError> {
        let response = self
            .http
            .post(self.parse_url())
            .query(&[("raw", raw_hex), ("key", key_hex)])
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| DecodeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<failed to read body>".to_string());
            return Err(DecodeError::Http {
                status_code: status.as_u16(),
                body,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| DecodeError::Transport(format!("malformed decoder response: {e}")))?;
        debug!(status = status.as_u16(), "Decoder response received");

        ParsedReading::try_from(value)
    }
}
