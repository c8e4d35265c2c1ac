//! MQTT runtime config subcommands.

use std::io::{self, Write};

use crate::bridge::Bridge;
use crate::pipeline::send_test_message;
use crate::reconcile::{update_runtime_config, MqttConfigUpdate, MqttConfigView};

#[derive(clap::Subcommand, Debug)]
pub enum MqttAction {
    /// Show the active config and which fields the environment locks.
    Show,
    /// Update the config. Omitted options keep their current value.
    Set {
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        username: Option<String>,
        /// New password. Omit or pass an empty value to keep the current one.
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        topic_template: Option<String>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2))]
        qos: Option<u8>,
        #[arg(long)]
        retain: Option<bool>,
    },
    /// Open and close a broker connection with the active config.
    Test,
    /// Publish a fixed test message to the test topic.
    TestMessage,
}

pub async fn run(action: MqttAction, bridge: &Bridge) -> anyhow::Result<()> {
    let mut out = io::stdout();
    match action {
        MqttAction::Show => {
            let view = MqttConfigView::load(&bridge.db, &bridge.publisher, bridge.locks).await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&view)?)?;
            writeln!(out, "source: {}", bridge.config_source)?;
        }
        MqttAction::Set {
            url,
            username,
            password,
            topic_template,
            qos,
            retain,
        } => {
            let current = bridge.publisher.config();
            let update = MqttConfigUpdate {
                url: url.unwrap_or(current.url),
                username: username.or(current.username),
                password,
                topic_template: topic_template.unwrap_or(current.topic_template),
                qos: qos.unwrap_or(current.qos),
                retain: retain.unwrap_or(current.retain),
            };
            let view =
                update_runtime_config(&bridge.db, &bridge.publisher, bridge.locks, update).await?;
            writeln!(out, "{}", serde_json::to_string_pretty(&view)?)?;
        }
        MqttAction::Test => {
            bridge.publisher.test_connection().await?;
            writeln!(out, "Connected to {}", bridge.publisher.config().url)?;
        }
        MqttAction::TestMessage => {
            let topic = send_test_message(&bridge.publisher).await?;
            writeln!(out, "Test message published to {topic}")?;
        }
    }
    Ok(())
}
