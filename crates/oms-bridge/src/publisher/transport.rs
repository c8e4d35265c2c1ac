//! Broker transport seam.
//!
//! The publisher opens one short-lived connection per operation through a
//! [`BrokerTransport`]; [`super::RumqttTransport`] is the MQTT implementation.

use async_trait::async_trait;
use oms_core::MqttRuntimeConfig;

/// Errors raised by a broker transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid broker URL: {0}")]
    InvalidUrl(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("timed out during {0}")]
    Timeout(&'static str),
}

/// Capability: open a connection to the broker described by `config`.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn connect(
        &self,
        config: &MqttRuntimeConfig,
    ) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// An open broker connection.
#[async_trait]
pub trait BrokerConnection: Send {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError>;

    async fn close(self: Box<Self>) -> Result<(), TransportError>;
}
