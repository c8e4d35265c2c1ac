//! MQTT runtime config reconciliation.
//!
//! At startup the persisted row, the environment and the built-in defaults
//! are merged once into the publisher's config. Afterwards operators may
//! update the config, except for the fields the environment pinned.

use oms_core::config::{ConfigSource, DEFAULT_MQTT_TOPIC, normalize_mqtt_url};
use oms_core::{EnvLocks, MqttEnvOverrides, MqttRuntimeConfig};
use serde::Serialize;
use tracing::info;

use crate::publisher::Publisher;
use crate::storage::{BridgeDatabase, DatabaseError};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("failed to load or persist MQTT config: {0}")]
    Storage(#[from] DatabaseError),
}

/// Rejections of an operator config update.
#[derive(Debug, thiserror::Error)]
pub enum ConfigUpdateError {
    /// Display string is the wire code, e.g. `mqtt_url_locked`.
    #[error("mqtt_{field}_locked")]
    FieldLocked { field: &'static str },

    #[error("invalid qos {0}: must be 0, 1 or 2")]
    InvalidQos(u8),

    #[error("invalid MQTT config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// A complete replacement config as submitted by an operator.
///
/// An absent or empty password keeps the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfigUpdate {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_template: String,
    pub qos: u8,
    pub retain: bool,
}

/// Merge the persisted config with the environment and apply the result.
pub async fn reconcile_on_startup(
    db: &BridgeDatabase,
    publisher: &Publisher,
    overrides: &MqttEnvOverrides,
    locks: EnvLocks,
) -> Result<ConfigSource, ReconcileError> {
    let env_url = overrides.normalized_url();

    let (config, source) = match db.get_mqtt_config().await? {
        Some(stored) => {
            let merged = merge_locked(stored, overrides, locks);
            if locks.any() {
                db.set_mqtt_config(&merged).await?;
                (Some(merged), ConfigSource::Merged)
            } else {
                (Some(merged), ConfigSource::Storage)
            }
        }
        None if !env_url.is_empty() => {
            let fresh = MqttRuntimeConfig {
                url: env_url,
                username: overrides.username(),
                password: overrides.password(),
                topic_template: overrides
                    .topic_template()
                    .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                qos: overrides.qos,
                retain: overrides.retain,
            };
            db.set_mqtt_config(&fresh).await?;
            (Some(fresh), ConfigSource::Environment)
        }
        None => (None, ConfigSource::None),
    };

    match config {
        Some(config) => {
            info!(
                source = %source,
                url = %config.url,
                topic_template = %config.topic_template,
                qos = config.qos,
                retain = config.retain,
                "MQTT config loaded"
            );
            publisher.update_config(config).await;
        }
        None => info!("MQTT not configured; set MQTT_URL or configure it at runtime"),
    }

    Ok(source)
}

/// Locked fields come from the environment; qos and retain never do.
fn merge_locked(
    stored: MqttRuntimeConfig,
    overrides: &MqttEnvOverrides,
    locks: EnvLocks,
) -> MqttRuntimeConfig {
    MqttRuntimeConfig {
        url: if locks.url {
            overrides.normalized_url()
        } else {
            stored.url
        },
        username: if locks.username {
            overrides.username()
        } else {
            stored.username
        },
        password: if locks.password {
            overrides.password()
        } else {
            stored.password
        },
        topic_template: match overrides.topic_template() {
            Some(topic) if locks.topic => topic,
            _ => stored.topic_template,
        },
        qos: stored.qos,
        retain: stored.retain,
    }
}

/// Validate an operator update against the current config and the locks.
pub fn apply_user_update(
    current: &MqttRuntimeConfig,
    locks: EnvLocks,
    update: MqttConfigUpdate,
) -> Result<MqttRuntimeConfig, ConfigUpdateError> {
    let url = normalize_mqtt_url(Some(&update.url)).unwrap_or_default();
    let username = update
        .username
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());
    let topic_template = update.topic_template.trim().to_string();

    if locks.url && url != current.url {
        return Err(ConfigUpdateError::FieldLocked { field: "url" });
    }
    if locks.username && username != current.username {
        return Err(ConfigUpdateError::FieldLocked { field: "username" });
    }
    if locks.topic && topic_template != current.topic_template {
        return Err(ConfigUpdateError::FieldLocked { field: "topic" });
    }

    let password = match update.password.filter(|p| !p.is_empty()) {
        Some(p) if locks.password && current.password.as_deref() != Some(p.as_str()) => {
            return Err(ConfigUpdateError::FieldLocked { field: "password" });
        }
        Some(p) => Some(p),
        None => current.password.clone(),
    };

    if update.qos > 2 {
        return Err(ConfigUpdateError::InvalidQos(update.qos));
    }
    if url.is_empty() {
        return Err(ConfigUpdateError::Invalid("url must not be empty".into()));
    }
    if topic_template.is_empty() {
        return Err(ConfigUpdateError::Invalid(
            "topic_template must not be empty".into(),
        ));
    }

    Ok(MqttRuntimeConfig {
        url,
        username,
        password,
        topic_template,
        qos: update.qos,
        retain: update.retain,
    })
}

/// Validate, persist, then apply an operator update.
pub async fn update_runtime_config(
    db: &BridgeDatabase,
    publisher: &Publisher,
    locks: EnvLocks,
    update: MqttConfigUpdate,
) -> Result<MqttConfigView, ConfigUpdateError> {
    let config = apply_user_update(&publisher.config(), locks, update)?;
    db.set_mqtt_config(&config).await?;
    publisher.update_config(config.clone()).await;
    info!(url = %config.url, topic_template = %config.topic_template, "MQTT config updated");
    Ok(MqttConfigView::new(&config, true, locks))
}

/// What an operator sees of the runtime config. The password is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MqttConfigView {
    pub url: String,
    pub username: Option<String>,
    pub topic_template: String,
    pub qos: u8,
    pub retain: bool,
    pub password_set: bool,
    pub configured: bool,
    pub locked_url: bool,
    pub locked_username: bool,
    pub locked_password: bool,
    pub locked_topic: bool,
}

impl MqttConfigView {
    fn new(config: &MqttRuntimeConfig, configured: bool, locks: EnvLocks) -> Self {
        Self {
            url: config.url.clone(),
            username: config.username.clone(),
            topic_template: config.topic_template.clone(),
            qos: config.qos,
            retain: config.retain,
            password_set: configured && config.password_set(),
            configured,
            locked_url: locks.url,
            locked_username: locks.username,
            locked_password: locks.password,
            locked_topic: locks.topic,
        }
    }

    /// The stored row wins; otherwise the publisher's in-memory config.
    pub async fn load(
        db: &BridgeDatabase,
        publisher: &Publisher,
        locks: EnvLocks,
    ) -> Result<Self, DatabaseError> {
        let view = match db.get_mqtt_config().await? {
            Some(stored) => Self::new(&stored, true, locks),
            None => {
                let state = publisher.snapshot();
                Self::new(&state.config, state.configured, locks)
            }
        };
        Ok(view)
    }
}
