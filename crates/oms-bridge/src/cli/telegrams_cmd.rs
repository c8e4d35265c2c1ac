//! Telegram history subcommands.

use std::io::{self, Write};

use anyhow::Context;

use super::keys_cmd::format_ts;
use crate::storage::{BridgeDatabase, MAX_TELEGRAMS_PER_METER};

#[derive(clap::Subcommand, Debug)]
pub enum TelegramAction {
    /// Recent telegrams of a meter, newest first.
    List {
        meter_id: String,
        #[arg(long, default_value_t = MAX_TELEGRAMS_PER_METER)]
        limit: u32,
    },
    /// Full stored telegram, including the raw report and decoded reading.
    Show { meter_id: String, telegram_id: i64 },
}

pub async fn run(action: TelegramAction, db: &BridgeDatabase) -> anyhow::Result<()> {
    let mut out = io::stdout();
    match action {
        TelegramAction::List { meter_id, limit } => {
            let telegrams = db.list_telegrams(&meter_id, limit).await?;
            if telegrams.is_empty() {
                writeln!(out, "No telegrams for meter {meter_id}")?;
                return Ok(());
            }
            writeln!(out, "{:<8} {:<20} {}", "ID", "RECEIVED", "STATUS")?;
            for t in telegrams {
                writeln!(out, "{:<8} {:<20} {}", t.id, format_ts(t.received_at), t.status)?;
            }
        }
        TelegramAction::Show {
            meter_id,
            telegram_id,
        } => {
            let detail = db
                .get_telegram_detail(&meter_id, telegram_id)
                .await?
                .context("telegram_not_found")?;
            writeln!(out, "{}", serde_json::to_string_pretty(&detail)?)?;
        }
    }
    Ok(())
}
