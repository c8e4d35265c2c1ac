//! MQTT publisher with connection-health tracking.
//!
//! One [`Publisher`] is shared by the whole process. Every operation
//! (`update_config`, `test_connection`, `publish`) runs under the same
//! mutex, so config and health are always mutated together and concurrent
//! callers queue instead of interleaving. Readers get consistent snapshots
//! through a watch channel without waiting for an in-flight publish.

mod rumqtt;
mod transport;


use std::sync::Arc;

use oms_core::MqttRuntimeConfig;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

pub use rumqtt::RumqttTransport;
pub use transport::{BrokerConnection, BrokerTransport, TransportError};

/// Errors surfaced by publisher operations.
#[derive(Debug, thiserror::Error)]
pub enum PublisherError {
    #[error("mqtt_not_configured")]
    NotConfigured,

    #[error("{message} (url={url})")]
    Connect { message: String, url: String },

    #[error("{message} (url={url})")]
    Publish { message: String, url: String },

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publisher state, always read and written as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherState {
    pub config: MqttRuntimeConfig,
    /// False until the first `update_config`.
    pub configured: bool,
    /// Outcome of the last connect or publish attempt.
    pub connected: bool,
}

pub struct Publisher {
    transport: Arc<dyn BrokerTransport>,
    state: Mutex<PublisherState>,
    snapshot: watch::Sender<PublisherState>,
}

impl Publisher {
    /// Create an unconfigured publisher holding the default config.
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        let initial = PublisherState {
            config: MqttRuntimeConfig::default(),
            configured: false,
            connected: false,
        };
        let (snapshot, _) = watch::channel(initial.clone());
        Self {
            transport,
            state: Mutex::new(initial),
            snapshot,
        }
    }

    pub fn snapshot(&self) -> PublisherState {
        self.snapshot.borrow().clone()
    }

    pub fn configured(&self) -> bool {
        self.snapshot.borrow().configured
    }

    pub fn connected(&self) -> bool {
        self.snapshot.borrow().connected
    }

    pub fn config(&self) -> MqttRuntimeConfig {
        self.snapshot.borrow().config.clone()
    }

    /// Replace the config wholesale. Health resets until the next attempt.
    pub async fn update_config(&self, config: MqttRuntimeConfig) {
        let mut state = self.state.lock().await;
        state.config = config;
        state.connected = false;
        state.configured = true;
        self.snapshot.send_replace(state.clone());
    }

    /// Open and immediately close a connection with the current config.
    pub async fn test_connection(&self) -> Result<(), PublisherError> {
        let mut state = self.state.lock().await;
        if !state.configured {
            return Err(PublisherError::NotConfigured);
        }

        let result = match self.transport.connect(&state.config).await {
            Ok(conn) => {
                close_quietly(conn).await;
                Ok(())
            }
            Err(e) => Err(PublisherError::Connect {
                message: e.to_string(),
                url: state.config.url.clone(),
            }),
        };

        state.connected = result.is_ok();
        self.snapshot.send_replace(state.clone());
        result
    }

    /// Deliver one message at the configured QoS and retain flag.
    pub async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublisherError> {
        let mut state = self.state.lock().await;
        if !state.configured {
            return Err(PublisherError::NotConfigured);
        }

        let result = self
            .send_once(&state.config, topic, payload)
            .await
            .map_err(|e| PublisherError::Publish {
                message: e.to_string(),
                url: state.config.url.clone(),
            });

        state.connected = result.is_ok();
        self.snapshot.send_replace(state.clone());
        if result.is_ok() {
            debug!(topic, bytes = payload.len(), "MQTT message published");
        }
        result
    }

    /// Serialize `payload` as compact JSON and publish it.
    pub async fn publish_json<T: Serialize + Sync + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
    ) -> Result<(), PublisherError> {
        let data = serde_json::to_vec(payload)?;
        self.publish(topic, &data).await
    }

    /// Forget connection health on shutdown.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.connected = false;
        self.snapshot.send_replace(state.clone());
    }

    async fn send_once(
        &self,
        config: &MqttRuntimeConfig,
        topic: &str,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let mut conn = self.transport.connect(config).await?;
        conn.publish(topic, payload, config.qos, config.retain)
            .await?;
        close_quietly(conn).await;
        Ok(())
    }
}

/// Closing after a successful exchange; a failed disconnect is only logged.
async fn close_quietly(conn: Box<dyn BrokerConnection>) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "MQTT disconnect failed");
    }
}
