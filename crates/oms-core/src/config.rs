//! MQTT runtime configuration model.
//!
//! Resolution happens at startup, highest priority first:
//! 1. Environment values for locked fields (url, username, password, topic)
//! 2. The persisted runtime config row
//! 3. Environment values for a fresh config when nothing is persisted
//! 4. Built-in defaults
//!
//! This module only holds the data model and the pure helpers; the merge
//! itself lives in the bridge's reconciler.

use serde::{Deserialize, Serialize};

/// Broker URL used when a fresh config is built without an explicit URL.
pub const DEFAULT_MQTT_URL: &str = "mqtt://localhost:1883";

/// Topic template used when none is configured.
pub const DEFAULT_MQTT_TOPIC: &str = "oms/v1/gw/{gateway_id}/meter/{meter_id}/reading";

pub const DEFAULT_MQTT_QOS: u8 = 1;
pub const DEFAULT_MQTT_RETAIN: bool = false;

/// The single active MQTT publish configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttRuntimeConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Contains `{gateway_id}` and `{meter_id}` placeholders.
    pub topic_template: String,
    pub qos: u8,
    pub retain: bool,
}

impl Default for MqttRuntimeConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_MQTT_URL.to_string(),
            username: None,
            password: None,
            topic_template: DEFAULT_MQTT_TOPIC.to_string(),
            qos: DEFAULT_MQTT_QOS,
            retain: DEFAULT_MQTT_RETAIN,
        }
    }
}

impl MqttRuntimeConfig {
    /// Substitute the gateway and meter ids into the topic template.
    pub fn render_topic(&self, gateway_id: &str, meter_id: &str) -> String {
        self.topic_template
            .replace("{gateway_id}", gateway_id)
            .replace("{meter_id}", meter_id)
    }

    pub fn password_set(&self) -> bool {
        self.password.as_deref().is_some_and(|p| !p.is_empty())
    }
}

/// Normalize an operator-supplied broker URL.
///
/// Trims whitespace and prefixes `mqtt://` when no scheme is present. An
/// empty input stays empty: it is never replaced by the default URL.
pub fn normalize_mqtt_url(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        return Some(String::new());
    }
    if trimmed.contains("://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("mqtt://{trimmed}"))
    }
}

/// MQTT values supplied through the process environment.
///
/// Empty strings are treated as "not supplied".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttEnvOverrides {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_template: Option<String>,
    /// Only used when a fresh config is built from the environment.
    pub qos: u8,
    /// Only used when a fresh config is built from the environment.
    pub retain: bool,
}

impl Default for MqttEnvOverrides {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            topic_template: None,
            qos: DEFAULT_MQTT_QOS,
            retain: DEFAULT_MQTT_RETAIN,
        }
    }
}

impl MqttEnvOverrides {
    /// Normalized broker URL, empty when not supplied.
    pub fn normalized_url(&self) -> String {
        normalize_mqtt_url(self.url.as_deref()).unwrap_or_default()
    }

    pub fn username(&self) -> Option<String> {
        non_empty(self.username.as_deref())
    }

    pub fn password(&self) -> Option<String> {
        non_empty(self.password.as_deref())
    }

    pub fn topic_template(&self) -> Option<String> {
        non_empty(self.topic_template.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Fields whose value was pinned by the operator through the environment.
///
/// Computed once at startup and never re-read from the environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnvLocks {
    pub url: bool,
    pub username: bool,
    pub password: bool,
    pub topic: bool,
}

impl EnvLocks {
    pub fn from_overrides(overrides: &MqttEnvOverrides) -> Self {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        Self {
            url: set(&overrides.url),
            username: set(&overrides.username),
            password: set(&overrides.password),
            topic: set(&overrides.topic_template),
        }
    }

    pub const fn any(&self) -> bool {
        self.url || self.username || self.password || self.topic
    }
}

/// Where the active runtime config came from at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// Nothing persisted and no environment URL: publisher stays unconfigured.
    None,
    /// Persisted row used as-is.
    Storage,
    /// Fresh config built from the environment and persisted.
    Environment,
    /// Persisted row with locked fields replaced from the environment.
    Merged,
}

impl ConfigSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Storage => "db",
            Self::Environment => "env",
            Self::Merged => "db+env",
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
