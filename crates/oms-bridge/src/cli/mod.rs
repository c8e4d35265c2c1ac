//! Operator command line.

pub mod keys_cmd;
pub mod mqtt_cmd;
pub mod serve;
pub mod telegrams_cmd;

use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::settings::BridgeSettings;

pub use keys_cmd::{KeyAction, MeterAction};
pub use mqtt_cmd::MqttAction;
pub use serve::{serve_lines, ServeStats};
pub use telegrams_cmd::TelegramAction;

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Ingest newline-delimited JSON telegram reports from stdin.
    ServeStdin {
        /// Reports processed concurrently.
        #[arg(long, default_value_t = 16)]
        max_in_flight: usize,
    },
    /// Manage meter keys.
    Keys {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// List pending or known meters.
    Meters {
        #[command(subcommand)]
        action: MeterAction,
    },
    /// Inspect a meter's telegram history.
    Telegrams {
        #[command(subcommand)]
        action: TelegramAction,
    },
    /// Show, update or test the MQTT runtime config.
    Mqtt {
        #[command(subcommand)]
        action: MqttAction,
    },
    /// Probe the broker and print a health snapshot.
    Status,
}

/// Execute one command against a started bridge.
pub async fn run(command: Command, bridge: &Bridge, settings: &BridgeSettings) -> anyhow::Result<()> {
    match command {
        Command::ServeStdin { max_in_flight } => {
            let pipeline = Arc::new(bridge.pipeline(settings));
            let stdin = BufReader::new(tokio::io::stdin());
            tokio::select! {
                result = serve_lines(pipeline, stdin, tokio::io::stdout(), max_in_flight) => {
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                }
            }
            Ok(())
        }
        Command::Keys { action } => keys_cmd::run_keys(action, &bridge.db).await,
        Command::Meters { action } => keys_cmd::run_meters(action, &bridge.db).await,
        Command::Telegrams { action } => telegrams_cmd::run(action, &bridge.db).await,
        Command::Mqtt { action } => mqtt_cmd::run(action, bridge).await,
        Command::Status => {
            if bridge.publisher.configured() {
                if let Err(e) = bridge.publisher.test_connection().await {
                    warn!(error = %e, "MQTT connection test failed");
                }
            }
            let health = bridge.pipeline(settings).health();
            let mut out = io::stdout();
            writeln!(out, "{}", serde_json::to_string_pretty(&health)?)?;
            Ok(())
        }
    }
}
