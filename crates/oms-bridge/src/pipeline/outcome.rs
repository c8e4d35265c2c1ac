//! Terminal outcomes of one ingestion.

use serde::{Deserialize, Serialize};

use crate::storage::TelegramStatus;

/// What to do with a report while the publisher has no config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnconfiguredPolicy {
    /// Stop before the key lookup; nothing but the audit row is written.
    #[default]
    Reject,
    /// Look up, mark pending and decode as usual; stop right before publishing.
    SoftAccept,
}

/// Every way an ingestion can end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    #[serde(rename = "ok")]
    Published,
    PendingKey,
    #[serde(rename = "lobaro_token_missing")]
    CredentialMissing,
    #[serde(rename = "lobaro_error")]
    DecodeError,
    MqttNotConfigured,
    #[serde(rename = "mqtt_error")]
    PublishError,
    StoreError,
    IngestError,
}

/// How a transport should treat an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Published.
    Delivered,
    /// Taken in but not forwarded; the submitter may resend later.
    Accepted,
    /// The submitter should see a failure.
    Rejected,
}

impl IngestOutcome {
    /// Status string returned to the submitter.
    pub const fn status(self) -> &'static str {
        match self {
            Self::Published => "ok",
            other => other.telegram_status().as_str(),
        }
    }

    /// Tag recorded in the telegram log.
    pub const fn telegram_status(self) -> TelegramStatus {
        match self {
            Self::Published => TelegramStatus::Published,
            Self::PendingKey => TelegramStatus::PendingKey,
            Self::CredentialMissing => TelegramStatus::CredentialMissing,
            Self::DecodeError => TelegramStatus::DecodeError,
            Self::MqttNotConfigured => TelegramStatus::MqttNotConfigured,
            Self::PublishError => TelegramStatus::MqttError,
            Self::StoreError => TelegramStatus::StoreError,
            Self::IngestError => TelegramStatus::IngestError,
        }
    }

    pub const fn disposition(self, policy: UnconfiguredPolicy) -> Disposition {
        match self {
            Self::Published => Disposition::Delivered,
            Self::PublishError => Disposition::Rejected,
            Self::MqttNotConfigured if matches!(policy, UnconfiguredPolicy::Reject) => {
                Disposition::Rejected
            }
            _ => Disposition::Accepted,
        }
    }
}

impl std::fmt::Display for IngestOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status())
    }
}

/// Reply to the submitter of one report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: IngestOutcome,
    pub meter_id: String,
    /// Only set when the reading was published.
    pub mqtt_topic: Option<String>,
}

impl IngestResponse {
    pub(crate) fn published(meter_id: String, topic: String) -> Self {
        Self {
            status: IngestOutcome::Published,
            meter_id,
            mqtt_topic: Some(topic),
        }
    }

    pub(crate) fn failed(status: IngestOutcome, meter_id: impl Into<String>) -> Self {
        Self {
            status,
            meter_id: meter_id.into(),
            mqtt_topic: None,
        }
    }
}
