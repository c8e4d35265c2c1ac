//! Ingestion pipeline tests against fake decoder and broker.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use oms_core::{MqttRuntimeConfig, TelegramReport};
use serde_json::{json, Value};

use super::*;
use crate::storage::TelegramStatus;
use crate::test_helpers::{DecodeBehavior, FakeDecoder, FakeTransport};

const METER: &str = "1234abcd";
const KEY: &str = "00112233445566778899aabbccddeeff";

fn report() -> TelegramReport {
    TelegramReport {
        gateway: "gw-7".into(),
        status: 0,
        rssi: -71.5,
        lqi: 12,
        manuf: 5317,
        id: METER.into(),
        dev_type: 7,
        version: 3,
        ci: 122,
        payload_len: 4,
        logical_hex: "a1b2c3d4".into(),
        rx_time: Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()),
    }
}

fn broker_config() -> MqttRuntimeConfig {
    MqttRuntimeConfig {
        url: "mqtt://broker:1883".into(),
        topic_template: "meters/{gateway_id}/{meter_id}".into(),
        ..MqttRuntimeConfig::default()
    }
}

struct Harness {
    db: BridgeDatabase,
    transport: Arc<FakeTransport>,
    publisher: Arc<Publisher>,
}

impl Harness {
    async fn new(configured: bool) -> Self {
        let db = BridgeDatabase::open_in_memory().await.unwrap();
        let transport = FakeTransport::new();
        let publisher = Arc::new(Publisher::new(transport.clone()));
        if configured {
            publisher.update_config(broker_config()).await;
        }
        Self {
            db,
            transport,
            publisher,
        }
    }

    fn pipeline(&self, decoder: Arc<dyn Decoder>, policy: UnconfiguredPolicy) -> IngestPipeline {
        IngestPipeline::new(self.db.clone(), decoder, Arc::clone(&self.publisher), policy)
    }

    async fn statuses(&self, meter_id: &str) -> Vec<String> {
        self.db
            .list_telegrams(meter_id, 20)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.status)
            .collect()
    }
}

fn reading() -> Value {
    json!({ "meterId": "87654321", "volume_m3": 12.5 })
}

#[tokio::test]
async fn keyed_meter_is_decoded_and_published() {
    let h = Harness::new(true).await;
    h.db.set_key(METER, KEY).await.unwrap();
    let decoder = FakeDecoder::returning(reading());
    let pipeline = h.pipeline(decoder.clone(), UnconfiguredPolicy::Reject);

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::Published);
    assert_eq!(response.meter_id, "87654321");
    assert_eq!(response.mqtt_topic.as_deref(), Some("meters/gw-7/87654321"));
    assert_eq!(
        decoder.last_args.lock().unwrap().clone(),
        Some(("a1b2c3d4".to_string(), KEY.to_string()))
    );

    let messages = h.transport.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].topic, "meters/gw-7/87654321");
    let envelope = messages[0].json();
    assert_eq!(envelope["schema"], ENVELOPE_SCHEMA);
    assert_eq!(envelope["gateway_id"], "gw-7");
    assert_eq!(envelope["meter_id"], "87654321");
    assert_eq!(envelope["rx_time"], "2024-05-01T12:30:00+00:00");
    assert_eq!(envelope["rssi_dbm"], -71.5);
    assert_eq!(envelope["manufacturer"], 5317);
    assert_eq!(envelope["device_type"], 7);
    assert_eq!(envelope["logical_hex"], "a1b2c3d4");
    assert_eq!(envelope["lobaro"], reading());

    // Logged under the reported id, with the decoded reading attached.
    let rows = h.db.list_telegrams(METER, 20).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "published");
    let detail = h.db.get_telegram_detail(METER, rows[0].id).await.unwrap().unwrap();
    assert_eq!(detail.parsed, Some(reading()));
    assert_eq!(detail.gateway.as_deref(), Some("gw-7"));
    assert_eq!(detail.payload["logical_hex"], "a1b2c3d4");
}

#[tokio::test]
async fn unknown_meter_is_marked_pending() {
    let h = Harness::new(true).await;
    let decoder = FakeDecoder::returning(reading());
    let pipeline = h.pipeline(decoder.clone(), UnconfiguredPolicy::Reject);

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::PendingKey);
    assert_eq!(response.meter_id, METER);
    assert_eq!(response.mqtt_topic, None);
    assert_eq!(decoder.calls(), 0);
    assert!(h.transport.messages().is_empty());

    let pending = h.db.get_pending_meter(METER).await.unwrap().unwrap();
    assert_eq!(pending.manuf, Some(5317));
    assert_eq!(pending.ci, Some(122));
    assert_eq!(h.statuses(METER).await, vec!["pending_key"]);
}

#[tokio::test]
async fn missing_credential_skips_decoder() {
    let h = Harness::new(true).await;
    h.db.set_key(METER, KEY).await.unwrap();
    let decoder = Arc::new(FakeDecoder::with(false, DecodeBehavior::Reading(reading())));
    let pipeline = h.pipeline(decoder.clone(), UnconfiguredPolicy::Reject);

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::CredentialMissing);
    assert_eq!(response.status.status(), "lobaro_token_missing");
    assert_eq!(decoder.calls(), 0);
    assert_eq!(h.statuses(METER).await, vec!["lobaro_token_missing"]);
}

#[tokio::test]
async fn decoder_failures_are_decode_errors() {
    for behavior in [DecodeBehavior::HttpError(422), DecodeBehavior::TransportError] {
        let h = Harness::new(true).await;
        h.db.set_key(METER, KEY).await.unwrap();
        let decoder = Arc::new(FakeDecoder::with(true, behavior));
        let pipeline = h.pipeline(decoder, UnconfiguredPolicy::Reject);

        let response = pipeline.ingest(&report()).await;

        assert_eq!(response.status, IngestOutcome::DecodeError);
        assert_eq!(response.meter_id, METER);
        assert!(h.transport.messages().is_empty());
        let rows = h.db.list_telegrams(METER, 20).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, "lobaro_error");
        let detail = h.db.get_telegram_detail(METER, rows[0].id).await.unwrap().unwrap();
        assert!(detail.parsed.is_none());
    }
}

#[tokio::test]
async fn unconfigured_publisher_rejects_before_lookup() {
    let h = Harness::new(false).await;
    let decoder = FakeDecoder::returning(reading());
    let pipeline = h.pipeline(decoder.clone(), UnconfiguredPolicy::Reject);

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::MqttNotConfigured);
    assert_eq!(
        response.status.disposition(pipeline.policy()),
        Disposition::Rejected
    );
    assert_eq!(decoder.calls(), 0);
    assert!(h.db.get_pending_meter(METER).await.unwrap().is_none());
    assert_eq!(h.transport.connects(), 0);
    assert_eq!(h.statuses(METER).await, vec!["mqtt_not_configured"]);
}

#[tokio::test]
async fn soft_accept_decodes_then_stops_before_publish() {
    let h = Harness::new(false).await;
    h.db.set_key(METER, KEY).await.unwrap();
    let decoder = FakeDecoder::returning(reading());
    let pipeline = h.pipeline(decoder.clone(), UnconfiguredPolicy::SoftAccept);

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::MqttNotConfigured);
    assert_eq!(response.meter_id, "87654321");
    assert_eq!(
        response.status.disposition(pipeline.policy()),
        Disposition::Accepted
    );
    assert_eq!(decoder.calls(), 1);
    assert_eq!(h.transport.connects(), 0);

    let rows = h.db.list_telegrams(METER, 20).await.unwrap();
    let detail = h.db.get_telegram_detail(METER, rows[0].id).await.unwrap().unwrap();
    assert_eq!(detail.status, "mqtt_not_configured");
    assert_eq!(detail.parsed, Some(reading()));
}

#[tokio::test]
async fn soft_accept_still_marks_unknown_meters_pending() {
    let h = Harness::new(false).await;
    let pipeline = h.pipeline(FakeDecoder::returning(reading()), UnconfiguredPolicy::SoftAccept);

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::PendingKey);
    assert!(h.db.get_pending_meter(METER).await.unwrap().is_some());
}

#[tokio::test]
async fn publish_failure_is_reported() {
    let h = Harness::new(true).await;
    h.db.set_key(METER, KEY).await.unwrap();
    h.transport.set_fail_publish(true);
    let pipeline = h.pipeline(FakeDecoder::returning(reading()), UnconfiguredPolicy::Reject);

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::PublishError);
    assert_eq!(response.meter_id, "87654321");
    assert_eq!(response.mqtt_topic, None);
    assert!(!h.publisher.connected());

    let rows = h.db.list_telegrams(METER, 20).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "mqtt_error");
    let detail = h.db.get_telegram_detail(METER, rows[0].id).await.unwrap().unwrap();
    assert!(detail.parsed.is_none());
}

#[tokio::test]
async fn failed_log_write_keeps_published_outcome() {
    let h = Harness::new(true).await;
    h.db.set_key(METER, KEY).await.unwrap();
    sqlx::raw_sql(
        "CREATE TRIGGER telegrams_unwritable BEFORE INSERT ON telegrams \
         BEGIN SELECT RAISE(ABORT, 'telegram log unavailable'); END;",
    )
    .execute(h.db.pool())
    .await
    .unwrap();
    let pipeline = h.pipeline(FakeDecoder::returning(reading()), UnconfiguredPolicy::Reject);

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::Published);
    assert_eq!(response.mqtt_topic.as_deref(), Some("meters/gw-7/87654321"));
    let messages = h.transport.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].json()["meter_id"], "87654321");
    assert!(h.statuses(METER).await.is_empty());
}

#[tokio::test]
async fn store_failure_during_lookup_is_store_error() {
    let h = Harness::new(true).await;
    let decoder = FakeDecoder::returning(reading());
    let pipeline = h.pipeline(decoder.clone(), UnconfiguredPolicy::Reject);
    h.db.close().await;

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::StoreError);
    assert_eq!(response.meter_id, METER);
    assert_eq!(decoder.calls(), 0);
}

#[tokio::test]
async fn reported_id_is_used_without_decoder_meter_id() {
    let h = Harness::new(true).await;
    h.db.set_key(METER, KEY).await.unwrap();
    let pipeline = h.pipeline(
        FakeDecoder::returning(json!({ "meterId": "", "energy_kwh": 3 })),
        UnconfiguredPolicy::Reject,
    );

    let response = pipeline.ingest(&report()).await;

    assert_eq!(response.status, IngestOutcome::Published);
    assert_eq!(response.meter_id, METER);
    assert_eq!(response.mqtt_topic.as_deref(), Some("meters/gw-7/1234abcd"));
}

#[tokio::test]
async fn missing_gateway_and_rx_time_get_defaults() {
    let h = Harness::new(true).await;
    h.db.set_key(METER, KEY).await.unwrap();
    let pipeline = h.pipeline(FakeDecoder::returning(json!({})), UnconfiguredPolicy::Reject);
    let mut report = report();
    report.gateway = String::new();
    report.rx_time = None;

    let before = Utc::now();
    let response = pipeline.ingest(&report).await;

    assert_eq!(response.mqtt_topic.as_deref(), Some("meters/unknown/1234abcd"));
    let envelope = h.transport.messages()[0].json();
    assert_eq!(envelope["gateway_id"], "unknown");
    let rx_time = chrono::DateTime::parse_from_rfc3339(envelope["rx_time"].as_str().unwrap())
        .unwrap()
        .with_timezone(&Utc);
    assert!(rx_time >= before - chrono::Duration::seconds(1));
    assert!(rx_time <= Utc::now());
}

#[tokio::test]
async fn concurrent_ingests_respect_retention() {
    let h = Harness::new(true).await;
    h.db.set_key(METER, KEY).await.unwrap();
    let pipeline = Arc::new(h.pipeline(FakeDecoder::returning(reading()), UnconfiguredPolicy::Reject));

    let mut handles = Vec::new();
    for _ in 0..30 {
        let pipeline = Arc::clone(&pipeline);
        handles.push(tokio::spawn(async move { pipeline.ingest(&report()).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().status, IngestOutcome::Published);
    }

    assert_eq!(h.transport.messages().len(), 30);
    assert_eq!(h.transport.max_in_flight(), 1);
    assert_eq!(h.db.count_telegrams(METER).await.unwrap(), 20);
}

#[test]
fn response_serializes_with_wire_status() {
    let response = IngestResponse::published("1234abcd".into(), "a/b".into());
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "status": "ok", "meter_id": "1234abcd", "mqtt_topic": "a/b" })
    );
    let response = IngestResponse::failed(IngestOutcome::PendingKey, METER);
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({ "status": "pending_key", "meter_id": METER, "mqtt_topic": null })
    );
}

#[tokio::test]
async fn health_reflects_publisher_and_decoder() {
    let h = Harness::new(true).await;
    let pipeline = h.pipeline(
        Arc::new(FakeDecoder::with(false, DecodeBehavior::TransportError)),
        UnconfiguredPolicy::Reject,
    );
    assert_eq!(
        pipeline.health(),
        HealthSnapshot {
            mqtt_connected: false,
            mqtt_configured: true,
            lobaro_token_set: false,
        }
    );

    h.publisher.test_connection().await.unwrap();
    assert!(pipeline.health().mqtt_connected);
}

#[tokio::test]
async fn test_message_uses_rendered_test_topic() {
    let h = Harness::new(false).await;
    assert!(matches!(
        send_test_message(&h.publisher).await,
        Err(PublisherError::NotConfigured)
    ));

    h.publisher.update_config(broker_config()).await;
    let topic = send_test_message(&h.publisher).await.unwrap();
    assert_eq!(topic, "meters/test-gateway/test-meter");

    let message = h.transport.messages()[0].json();
    assert_eq!(
        message,
        json!({
            "schema": TEST_MESSAGE_SCHEMA,
            "message": "mqtt_test",
            "gateway_id": "test-gateway",
            "meter_id": "test-meter",
        })
    );
}

#[test]
fn telegram_status_tags_match_outcomes() {
    assert_eq!(
        IngestOutcome::PublishError.telegram_status(),
        TelegramStatus::MqttError
    );
}
