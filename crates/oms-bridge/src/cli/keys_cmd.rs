//! Key and meter subcommands.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};

use anyhow::bail;
use chrono::DateTime;
use oms_core::report::is_hex;

use crate::storage::{BridgeDatabase, KEY_HEX_LEN};

#[derive(clap::Subcommand, Debug)]
pub enum KeyAction {
    /// Store or replace the AES key of a meter.
    Set {
        /// Meter id (8 hex characters).
        meter_id: String,
        /// AES-128 key (32 hex characters).
        key_hex: String,
    },
    /// Show a meter's key and when it was last set.
    Show { meter_id: String },
    /// Delete a meter's key together with its pending record and telegram history.
    Delete { meter_id: String },
    /// List all stored keys.
    List,
}

#[derive(clap::Subcommand, Debug)]
pub enum MeterAction {
    /// Meters seen on air without a key.
    Pending,
    /// Keyed meters with their forwarding counts.
    Known,
}

pub async fn run_keys(action: KeyAction, db: &BridgeDatabase) -> anyhow::Result<()> {
    let mut out = io::stdout();
    match action {
        KeyAction::Set { meter_id, key_hex } => {
            validate_key(&key_hex)?;
            db.set_key(&meter_id, &key_hex).await?;
            writeln!(out, "Key stored for meter {meter_id}")?;
        }
        KeyAction::Show { meter_id } => {
            let record = db.get_meter_key(&meter_id).await?;
            writeln!(
                out,
                "{}  {}  updated {}",
                record.meter_id,
                record.key_hex,
                format_ts(record.updated_at)
            )?;
        }
        KeyAction::Delete { meter_id } => {
            if db.delete_key(&meter_id).await? {
                writeln!(out, "Key deleted for meter {meter_id}")?;
            } else {
                writeln!(out, "No key stored for meter {meter_id}")?;
            }
        }
        KeyAction::List => {
            let keys = db.list_keys().await?;
            if keys.is_empty() {
                writeln!(out, "No keys stored")?;
            }
            for (meter_id, key_hex) in keys {
                writeln!(out, "{meter_id}  {key_hex}")?;
            }
        }
    }
    Ok(())
}

pub async fn run_meters(action: MeterAction, db: &BridgeDatabase) -> anyhow::Result<()> {
    let mut out = io::stdout();
    match action {
        MeterAction::Pending => {
            let meters = db.list_pending_meters().await?;
            if meters.is_empty() {
                writeln!(out, "No pending meters")?;
                return Ok(());
            }
            writeln!(
                out,
                "{:<10} {:>6} {:>4} {:>4} {:>4}  {:<20} {:<20}",
                "METER", "MANUF", "TYPE", "VER", "CI", "FIRST SEEN", "LAST SEEN"
            )?;
            for m in meters {
                writeln!(
                    out,
                    "{:<10} {:>6} {:>4} {:>4} {:>4}  {:<20} {:<20}",
                    m.meter_id,
                    opt(m.manuf),
                    opt(m.dev_type),
                    opt(m.version),
                    opt(m.ci),
                    format_ts(m.first_seen),
                    format_ts(m.last_seen),
                )?;
            }
        }
        MeterAction::Known => {
            let meters = db.list_known_meters().await?;
            if meters.is_empty() {
                writeln!(out, "No known meters")?;
                return Ok(());
            }
            writeln!(
                out,
                "{:<10} {:>9}  {:<20} {:<20}",
                "METER", "FORWARDED", "KEY UPDATED", "LAST SEEN"
            )?;
            for m in meters {
                writeln!(
                    out,
                    "{:<10} {:>9}  {:<20} {:<20}",
                    m.meter_id,
                    m.forwarded_count,
                    format_ts(m.updated_at),
                    m.last_seen.map_or_else(|| "-".to_string(), format_ts),
                )?;
            }
        }
    }
    Ok(())
}

/// Error strings match the key codes used by the ingest API.
fn validate_key(key_hex: &str) -> anyhow::Result<()> {
    if !is_hex(key_hex) {
        bail!("key_hex_must_be_hex");
    }
    if key_hex.len() != KEY_HEX_LEN {
        bail!("key_hex_must_be_32");
    }
    Ok(())
}

fn opt(value: Option<i64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub(super) fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0).map_or_else(
        || ts.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation_codes() {
        assert!(validate_key("00112233445566778899aabbccddeeff").is_ok());
        let err = validate_key("zz112233445566778899aabbccddeeff").err();
        assert_eq!(err.map(|e| e.to_string()).as_deref(), Some("key_hex_must_be_hex"));
        let err = validate_key("0011").err();
        assert_eq!(err.map(|e| e.to_string()).as_deref(), Some("key_hex_must_be_32"));
    }

    #[test]
    fn timestamps_render_as_utc() {
        assert_eq!(format_ts(0), "1970-01-01 00:00:00");
        assert_eq!(opt(None), "-");
    }
}
