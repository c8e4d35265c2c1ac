//! OMS Bridge Library
//!
//! Core functionality for the bridge:
//! - `SQLite` storage for meter keys, pending meters, telegram history and the MQTT config
//! - Lobaro decoder client
//! - MQTT publisher with connection-health tracking
//! - Startup config reconciliation and operator config updates
//! - Telegram ingestion pipeline
//! - Operator command line

pub mod bridge;
pub mod cli;
pub mod decoder;
pub mod pipeline;
pub mod publisher;
pub mod reconcile;
pub mod settings;
pub mod storage;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_helpers;
