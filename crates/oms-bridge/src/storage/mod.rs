//! `SQLite` storage for the OMS bridge.
//!
//! Provides persistence for meter keys, pending meters, the bounded
//! per-meter telegram log and the single-row MQTT runtime config.

mod db;
mod models;
mod queries_config;
mod queries_keys;
mod queries_telegrams;


pub use db::BridgeDatabase;
pub use models::*;
pub use oms_core::db::DatabaseError;
pub use queries_keys::KEY_HEX_LEN;
pub use queries_telegrams::{NewTelegram, MAX_TELEGRAMS_PER_METER};
