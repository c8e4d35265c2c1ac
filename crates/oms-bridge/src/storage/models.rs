//! Data models for OMS bridge storage.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MeterKey {
    pub meter_id: String,
    pub key_hex: String,
    pub updated_at: i64,
}

/// A meter seen on air without a registered key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PendingMeter {
    pub meter_id: String,
    pub manuf: Option<i64>,
    pub dev_type: Option<i64>,
    pub version: Option<i64>,
    pub ci: Option<i64>,
    pub first_seen: i64,
    pub last_seen: i64,
}

/// A keyed meter with its forwarding statistics.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct KnownMeter {
    pub meter_id: String,
    pub updated_at: i64,
    pub forwarded_count: i64,
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TelegramSummary {
    pub id: i64,
    pub received_at: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramDetail {
    pub id: i64,
    pub meter_id: String,
    pub received_at: i64,
    pub status: String,
    pub gateway: Option<String>,
    pub payload: serde_json::Value,
    pub parsed: Option<serde_json::Value>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct TelegramRow {
    pub id: i64,
    pub meter_id: String,
    pub received_at: i64,
    pub status: String,
    pub gateway: Option<String>,
    pub payload_json: String,
    pub parsed_json: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct MqttConfigRow {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_template: String,
    pub qos: i64,
    pub retain: i64,
}

/// Outcome tag recorded with every telegram log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelegramStatus {
    Published,
    PendingKey,
    #[serde(rename = "lobaro_token_missing")]
    CredentialMissing,
    #[serde(rename = "lobaro_error")]
    DecodeError,
    MqttNotConfigured,
    MqttError,
    StoreError,
    IngestError,
}

impl TelegramStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Published => "published",
            Self::PendingKey => "pending_key",
            Self::CredentialMissing => "lobaro_token_missing",
            Self::DecodeError => "lobaro_error",
            Self::MqttNotConfigured => "mqtt_not_configured",
            Self::MqttError => "mqtt_error",
            Self::StoreError => "store_error",
            Self::IngestError => "ingest_error",
        }
    }
}

impl std::fmt::Display for TelegramStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
