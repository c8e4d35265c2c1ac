//! OMS Bridge
//!
//! Forwards wireless M-Bus telegrams from field gateways to an MQTT broker,
//! decoding them through the Lobaro platform on the way.

use clap::Parser;
use tracing::info;

use oms_bridge::bridge::Bridge;
use oms_bridge::cli::{self, Command};
use oms_bridge::settings::BridgeSettings;
use oms_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "oms-bridge")]
#[command(version, about = "OMS bridge - wM-Bus telegram decoding and MQTT republishing")]
struct Args {
    #[command(flatten)]
    settings: BridgeSettings,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_tracing("oms_bridge=info", args.settings.log_json);
    info!(version = env!("CARGO_PKG_VERSION"), "Starting oms-bridge");

    let bridge = Bridge::start(&args.settings).await?;
    info!(mqtt_source = %bridge.config_source, "Bridge ready");

    let result = cli::run(args.command, &bridge, &args.settings).await;
    bridge.shutdown().await;

    info!("oms-bridge stopped");
    result
}
