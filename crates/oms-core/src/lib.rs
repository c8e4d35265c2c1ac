//! OMS Bridge Core Library
//!
//! Shared functionality for the OMS bridge:
//! - Inbound telegram report model and NDJSON report parsing
//! - MQTT runtime configuration model, URL normalization and env locks
//! - `SQLite` pool helpers and database errors
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod report;
pub mod tracing_init;

pub use config::{EnvLocks, MqttEnvOverrides, MqttRuntimeConfig};
pub use error::{Error, Result};
pub use report::TelegramReport;
