//! JSON documents published to the broker.

use chrono::{DateTime, Utc};
use oms_core::TelegramReport;
use serde::Serialize;

use crate::decoder::ParsedReading;

pub const ENVELOPE_SCHEMA: &str = "oms.bridge.v1";
pub const TEST_MESSAGE_SCHEMA: &str = "oms.bridge.test.v1";

pub const TEST_GATEWAY_ID: &str = "test-gateway";
pub const TEST_METER_ID: &str = "test-meter";

/// A decoded reading together with the radio metadata of its telegram.
#[derive(Debug, Serialize)]
pub struct Envelope<'a> {
    pub schema: &'static str,
    pub gateway_id: &'a str,
    pub meter_id: &'a str,
    pub rx_time: String,
    pub status: i64,
    pub rssi_dbm: f64,
    pub lqi: i64,
    pub manufacturer: i64,
    pub device_type: i64,
    pub version: i64,
    pub ci: i64,
    pub payload_len: i64,
    pub logical_hex: &'a str,
    pub lobaro: &'a ParsedReading,
}

impl<'a> Envelope<'a> {
    /// `received` is used when the report carries no receive time.
    pub fn new(
        report: &'a TelegramReport,
        meter_id: &'a str,
        reading: &'a ParsedReading,
        received: DateTime<Utc>,
    ) -> Self {
        Self {
            schema: ENVELOPE_SCHEMA,
            gateway_id: report.gateway_id(),
            meter_id,
            rx_time: report.rx_time.unwrap_or(received).to_rfc3339(),
            status: report.status,
            rssi_dbm: report.rssi,
            lqi: report.lqi,
            manufacturer: report.manuf,
            device_type: report.dev_type,
            version: report.version,
            ci: report.ci,
            payload_len: report.payload_len,
            logical_hex: &report.logical_hex,
            lobaro: reading,
        }
    }
}

/// Payload of the operator's broker test message.
#[derive(Debug, Serialize)]
pub struct TestMessage {
    pub schema: &'static str,
    pub message: &'static str,
    pub gateway_id: &'static str,
    pub meter_id: &'static str,
}

impl Default for TestMessage {
    fn default() -> Self {
        Self {
            schema: TEST_MESSAGE_SCHEMA,
            message: "mqtt_test",
            gateway_id: TEST_GATEWAY_ID,
            meter_id: TEST_METER_ID,
        }
    }
}
