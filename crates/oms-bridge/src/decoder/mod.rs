//! Telegram decoding through the external parse service.
//!
//! The pipeline only needs two things from a decoder: whether it holds a
//! credential at all, and `decode(raw, key)`. [`LobaroClient`] is the
//! production implementation.

mod client;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use client::{LobaroClient, LobaroConfig, DEFAULT_LOBARO_BASE_URL};

/// A decoded reading. Opaque apart from the optional `meterId` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParsedReading(Map<String, Value>);

impl ParsedReading {
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Meter id resolved by the decoder, if it reported a non-empty one.
    pub fn meter_id(&self) -> Option<&str> {
        self.0
            .get("meterId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl TryFrom<Value> for ParsedReading {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(DecodeError::Transport(format!(
                "decoder returned a non-object body: {other}"
            ))),
        }
    }
}

/// Errors from a decode attempt.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The service answered with a status >= 400.
    #[error("decoder HTTP error (status {status_code})")]
    Http { status_code: u16, body: String },

    /// Timeout, connection failure or malformed response.
    #[error("decoder transport error: {0}")]
    Transport(String),
}

/// Capability: turn an encrypted telegram plus its key into a reading.
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Whether an auth credential is configured. Without one every decode
    /// call would fail, so the pipeline does not attempt it.
    fn has_credential(&self) -> bool;

    async fn decode(&self, raw_hex: &str, key_hex: &str) -> Result<ParsedReading, DecodeError>;
}
