//! Process settings, read once from flags and the environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use oms_core::{EnvLocks, MqttEnvOverrides};

use crate::decoder::{LobaroConfig, DEFAULT_LOBARO_BASE_URL};
use crate::pipeline::UnconfiguredPolicy;

#[derive(Args, Debug, Clone)]
pub struct BridgeSettings {
    /// Path to the `SQLite` database file.
    #[arg(long, env = "KEYS_DB_PATH", default_value = "./keys.db")]
    pub db_path: PathBuf,

    /// Lobaro platform base URL.
    #[arg(long, env = "LOBARO_BASE_URL", default_value = DEFAULT_LOBARO_BASE_URL)]
    pub lobaro_base_url: String,

    /// Lobaro API token. Without it telegrams are not decoded.
    #[arg(long, env = "LOBARO_TOKEN", default_value = "", hide_env_values = true)]
    pub lobaro_token: String,

    /// Lobaro request timeout in seconds.
    #[arg(long, env = "LOBARO_TIMEOUT_S", default_value_t = 10)]
    pub lobaro_timeout_s: u64,

    /// Broker URL. When set, it overrides and locks the stored value.
    #[arg(long, env = "MQTT_URL", default_value = "")]
    pub mqtt_url: String,

    /// Broker username. When set, it overrides and locks the stored value.
    #[arg(long, env = "MQTT_USERNAME", default_value = "")]
    pub mqtt_username: String,

    /// Broker password. When set, it overrides and locks the stored value.
    #[arg(long, env = "MQTT_PASSWORD", default_value = "", hide_env_values = true)]
    pub mqtt_password: String,

    /// Topic template with `{gateway_id}` and `{meter_id}` placeholders.
    #[arg(long, env = "MQTT_TOPIC_TEMPLATE", default_value = "")]
    pub mqtt_topic_template: String,

    /// QoS for a config built from the environment.
    #[arg(long, env = "MQTT_QOS", default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub mqtt_qos: u8,

    /// Retain flag for a config built from the environment.
    #[arg(long, env = "MQTT_RETAIN", default_value_t = false)]
    pub mqtt_retain: bool,

    /// Broker connect/publish timeout in seconds.
    #[arg(long, env = "MQTT_TIMEOUT_S", default_value_t = 10)]
    pub mqtt_timeout_s: u64,

    /// What to do with telegrams while no broker is configured.
    #[arg(long, env = "ON_UNCONFIGURED", value_enum, default_value_t = PolicyArg::Reject)]
    pub on_unconfigured: PolicyArg,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyArg {
    Reject,
    SoftAccept,
}

impl From<PolicyArg> for UnconfiguredPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Reject => Self::Reject,
            PolicyArg::SoftAccept => Self::SoftAccept,
        }
    }
}

fn supplied(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

impl BridgeSettings {
    pub fn mqtt_overrides(&self) -> MqttEnvOverrides {
        MqttEnvOverrides {
            url: supplied(&self.mqtt_url),
            username: supplied(&self.mqtt_username),
            password: supplied(&self.mqtt_password),
            topic_template: supplied(&self.mqtt_topic_template),
            qos: self.mqtt_qos,
            retain: self.mqtt_retain,
        }
    }

    pub fn env_locks(&self) -> EnvLocks {
        EnvLocks::from_overrides(&self.mqtt_overrides())
    }

    pub fn lobaro(&self) -> LobaroConfig {
        LobaroConfig {
            base_url: self.lobaro_base_url.clone(),
            token: self.lobaro_token.trim().to_string(),
            timeout: Duration::from_secs(self.lobaro_timeout_s),
        }
    }

    pub const fn mqtt_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt_timeout_s)
    }

    pub fn policy(&self) -> UnconfiguredPolicy {
        self.on_unconfigured.into()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        settings: BridgeSettings,
    }

    fn parse(args: &[&str]) -> BridgeSettings {
        let mut argv = vec!["oms-bridge"];
        argv.extend_from_slice(args);
        Harness::try_parse_from(argv)
            .map(|h| h.settings)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn blank_values_do_not_lock() {
        let settings = parse(&["--mqtt-url", "  ", "--mqtt-topic-template", "t/{meter_id}"]);
        let locks = settings.env_locks();
        assert!(!locks.url);
        assert!(locks.topic);
        assert!(!locks.username);
        assert_eq!(settings.mqtt_overrides().url, None);
    }

    #[test]
    fn policy_and_timeouts_parse() {
        let settings = parse(&[
            "--on-unconfigured",
            "soft-accept",
            "--mqtt-timeout-s",
            "3",
            "--lobaro-token",
            " tok ",
        ]);
        assert_eq!(settings.policy(), UnconfiguredPolicy::SoftAccept);
        assert_eq!(settings.mqtt_timeout(), Duration::from_secs(3));
        assert_eq!(settings.lobaro().token, "tok");
    }

    #[test]
    fn qos_out_of_range_is_rejected() {
        assert!(Harness::try_parse_from(["oms-bridge", "--mqtt-qos", "3"]).is_err());
    }
}
