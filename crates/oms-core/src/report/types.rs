//! Telegram report types and field validation.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Gateway id used when a report does not name its gateway.
pub const UNKNOWN_GATEWAY: &str = "unknown";

/// One wireless M-Bus telegram as reported by a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelegramReport {
    #[serde(default)]
    pub gateway: String,
    pub status: i64,
    pub rssi: f64,
    pub lqi: i64,
    pub manuf: i64,
    /// Meter identifier, exactly 8 hex characters.
    pub id: String,
    pub dev_type: i64,
    pub version: i64,
    pub ci: i64,
    pub payload_len: i64,
    /// Encrypted application payload, even-length hex.
    pub logical_hex: String,
    #[serde(default, deserialize_with = "deserialize_rx_time")]
    pub rx_time: Option<DateTime<Utc>>,
}

impl TelegramReport {
    /// Check the field constraints the pipeline relies on.
    pub fn validate(&self) -> Result<(), ReportError> {
        if !is_hex(&self.id) {
            return Err(ReportError::MeterIdNotHex);
        }
        if self.id.len() != 8 {
            return Err(ReportError::MeterIdLength);
        }
        if self.logical_hex.len() < 2 {
            return Err(ReportError::LogicalHexTooShort);
        }
        if !is_hex(&self.logical_hex) {
            return Err(ReportError::LogicalHexNotHex);
        }
        if self.logical_hex.len() % 2 != 0 {
            return Err(ReportError::LogicalHexOddLength);
        }
        Ok(())
    }

    /// Gateway id with the `unknown` fallback applied.
    pub fn gateway_id(&self) -> &str {
        if self.gateway.is_empty() {
            UNKNOWN_GATEWAY
        } else {
            &self.gateway
        }
    }

    /// The report as a JSON object, as stored in the telegram log.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Whether `value` is a non-empty string of ASCII hex digits.
pub fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Report validation failures. The display strings are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ReportError {
    #[error("meter_id_must_be_hex")]
    MeterIdNotHex,

    #[error("meter_id_must_be_8_hex")]
    MeterIdLength,

    #[error("logical_hex_must_be_hex")]
    LogicalHexNotHex,

    #[error("logical_hex_must_be_even_length")]
    LogicalHexOddLength,

    #[error("logical_hex_too_short")]
    LogicalHexTooShort,
}

/// Accept RFC 3339 timestamps, and naive ISO-8601 timestamps as UTC.
fn deserialize_rx_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| serde::de::Error::custom(format!("invalid rx_time {raw:?}: {e}")))
}
