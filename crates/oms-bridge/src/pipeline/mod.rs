//! Telegram ingestion.
//!
//! Each validated report walks one path through key lookup, decoding and
//! publishing and ends in exactly one [`IngestOutcome`]. Every outcome is
//! also appended to the meter's telegram log on a best-effort basis; a
//! failed append never changes the response.
//!
//! There are no retries here. A report is attempted at most once and the
//! submitter decides whether to resend.

mod envelope;
mod outcome;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::expect_used)]
mod tests;

use std::sync::Arc;

use chrono::Utc;
use oms_core::TelegramReport;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use crate::decoder::{DecodeError, Decoder, ParsedReading};
use crate::publisher::{Publisher, PublisherError};
use crate::storage::{BridgeDatabase, NewTelegram};

pub use envelope::{
    Envelope, TestMessage, ENVELOPE_SCHEMA, TEST_GATEWAY_ID, TEST_MESSAGE_SCHEMA, TEST_METER_ID,
};
pub use outcome::{Disposition, IngestOutcome, IngestResponse, UnconfiguredPolicy};

/// Meter id used when neither the decoder nor the report names one.
pub const UNKNOWN_METER: &str = "unknown";

/// Longest decoder error body kept in logs.
const BODY_PREVIEW_CHARS: usize = 500;

/// Process health as reported to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub mqtt_connected: bool,
    pub mqtt_configured: bool,
    pub lobaro_token_set: bool,
}

pub struct IngestPipeline {
    db: BridgeDatabase,
    decoder: Arc<dyn Decoder>,
    publisher: Arc<Publisher>,
    policy: UnconfiguredPolicy,
}

impl IngestPipeline {
    pub fn new(
        db: BridgeDatabase,
        decoder: Arc<dyn Decoder>,
        publisher: Arc<Publisher>,
        policy: UnconfiguredPolicy,
    ) -> Self {
        Self {
            db,
            decoder,
            publisher,
            policy,
        }
    }

    pub const fn policy(&self) -> UnconfiguredPolicy {
        self.policy
    }

    pub fn health(&self) -> HealthSnapshot {
        let state = self.publisher.snapshot();
        HealthSnapshot {
            mqtt_connected: state.connected,
            mqtt_configured: state.configured,
            lobaro_token_set: self.decoder.has_credential(),
        }
    }

    /// Run one validated report through the pipeline.
    #[instrument(skip_all, fields(gateway_id = %report.gateway_id(), meter_id = %report.id))]
    pub async fn ingest(&self, report: &TelegramReport) -> IngestResponse {
        info!(
            status = report.status,
            rssi_dbm = report.rssi,
            lqi = report.lqi,
            manuf = report.manuf,
            payload_len = report.payload_len,
            "Telegram received"
        );
        let payload = report.to_json();
        let audit = Audit {
            db: &self.db,
            report,
            payload: &payload,
        };

        if self.policy == UnconfiguredPolicy::Reject && !self.publisher.configured() {
            warn!("MQTT not configured, rejecting telegram");
            audit.record(IngestOutcome::MqttNotConfigured, None).await;
            return IngestResponse::failed(IngestOutcome::MqttNotConfigured, &report.id);
        }

        let key_hex = match self.db.get_key(&report.id).await {
            Ok(Some(key)) => key,
            Ok(None) => {
                if let Err(e) = self
                    .db
                    .mark_pending_meter(
                        &report.id,
                        Some(report.manuf),
                        Some(report.dev_type),
                        Some(report.version),
                        Some(report.ci),
                    )
                    .await
                {
                    warn!(error = %e, "Failed to mark meter as pending");
                }
                audit.record(IngestOutcome::PendingKey, None).await;
                info!("No key for meter, telegram parked as pending");
                return IngestResponse::failed(IngestOutcome::PendingKey, &report.id);
            }
            Err(e) => {
                error!(error = %e, "Key lookup failed");
                audit.record(IngestOutcome::StoreError, None).await;
                return IngestResponse::failed(IngestOutcome::StoreError, &report.id);
            }
        };

        if !self.decoder.has_credential() {
            warn!("Lobaro token missing, telegram not decoded");
            audit.record(IngestOutcome::CredentialMissing, None).await;
            return IngestResponse::failed(IngestOutcome::CredentialMissing, &report.id);
        }

        let reading = match self.decoder.decode(&report.logical_hex, &key_hex).await {
            Ok(reading) => reading,
            Err(e) => {
                log_decode_failure(&e);
                audit.record(IngestOutcome::DecodeError, None).await;
                return IngestResponse::failed(IngestOutcome::DecodeError, &report.id);
            }
        };
        let meter_id = resolve_meter_id(&reading, &report.id).to_string();
        let parsed = reading.to_value();

        let state = self.publisher.snapshot();
        if !state.configured {
            warn!(resolved_meter_id = %meter_id, "MQTT not configured, decoded reading not published");
            audit
                .record(IngestOutcome::MqttNotConfigured, Some(&parsed))
                .await;
            return IngestResponse::failed(IngestOutcome::MqttNotConfigured, meter_id);
        }

        let topic = state.config.render_topic(report.gateway_id(), &meter_id);
        let envelope = Envelope::new(report, &meter_id, &reading, Utc::now());

        match self.publisher.publish_json(&topic, &envelope).await {
            Ok(()) => {
                audit.record(IngestOutcome::Published, Some(&parsed)).await;
                info!(topic = %topic, "Telegram published");
                IngestResponse::published(meter_id, topic)
            }
            Err(PublisherError::Encode(e)) => {
                error!(error = %e, "Failed to encode envelope");
                audit.record(IngestOutcome::IngestError, None).await;
                IngestResponse::failed(IngestOutcome::IngestError, meter_id)
            }
            Err(e) => {
                warn!(error = %e, topic = %topic, "MQTT publish failed");
                audit.record(IngestOutcome::PublishError, None).await;
                IngestResponse::failed(IngestOutcome::PublishError, meter_id)
            }
        }
    }
}

/// The decoder's `meterId` wins over the id the gateway reported.
fn resolve_meter_id<'a>(reading: &'a ParsedReading, reported: &'a str) -> &'a str {
    match reading.meter_id() {
        Some(id) => id,
        None if !reported.is_empty() => reported,
        None => UNKNOWN_METER,
    }
}

fn log_decode_failure(err: &DecodeError) {
    match err {
        DecodeError::Http { status_code, body } => {
            let body_preview: String = body.chars().take(BODY_PREVIEW_CHARS).collect();
            warn!(status_code, body_preview = %body_preview, "Lobaro decode failed");
        }
        DecodeError::Transport(message) => {
            warn!(error = %message, "Lobaro decode failed");
        }
    }
}

/// Best-effort telegram log writer for one report.
struct Audit<'a> {
    db: &'a BridgeDatabase,
    report: &'a TelegramReport,
    payload: &'a Value,
}

impl Audit<'_> {
    async fn record(&self, outcome: IngestOutcome, parsed: Option<&Value>) {
        let telegram = NewTelegram {
            meter_id: &self.report.id,
            gateway: self.report.gateway_id(),
            status: outcome.telegram_status(),
            payload: self.payload,
            parsed,
        };
        if let Err(e) = self.db.add_telegram(&telegram).await {
            warn!(error = %e, status = %outcome, "Failed to record telegram");
        }
    }
}

/// Publish the fixed test message to the topic rendered for the test ids.
///
/// Returns the topic on success.
pub async fn send_test_message(publisher: &Publisher) -> Result<String, PublisherError> {
    if !publisher.configured() {
        return Err(PublisherError::NotConfigured);
    }
    let topic = publisher
        .config()
        .render_topic(TEST_GATEWAY_ID, TEST_METER_ID);
    publisher
        .publish_json(&topic, &TestMessage::default())
        .await?;
    info!(topic = %topic, "MQTT test message published");
    Ok(topic)
}
