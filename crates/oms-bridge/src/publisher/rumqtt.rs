//! MQTT transport backed by `rumqttc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use oms_core::MqttRuntimeConfig;
use reqwest::Url;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport,
};
use tracing::debug;

use super::transport::{BrokerConnection, BrokerTransport, TransportError};

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

static CONNECTION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Opens plain or TLS MQTT connections from `mqtt://`, `tcp://`, `mqtts://`
/// and `ssl://` URLs.
#[derive(Debug, Clone)]
pub struct RumqttTransport {
    /// Bound on every connect, publish and disconnect wait.
    timeout: Duration,
}

impl RumqttTransport {
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// Translate the runtime config into client options.
pub(crate) fn mqtt_options(config: &MqttRuntimeConfig) -> Result<MqttOptions, TransportError> {
    let url = Url::parse(&config.url)
        .map_err(|e| TransportError::InvalidUrl(format!("{}: {e}", config.url)))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme {other:?} in {}",
                config.url
            )));
        }
    };
    let host = url.host_str().filter(|h| !h.is_empty()).unwrap_or("localhost");
    let port = url
        .port()
        .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

    let client_id = format!(
        "oms-bridge-{}-{}",
        std::process::id(),
        CONNECTION_SEQ.fetch_add(1, Ordering::Relaxed)
    );
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(30));
    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }
    if tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    Ok(options)
}

pub(crate) fn to_qos(qos: u8) -> Result<QoS, TransportError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransportError::Publish(format!("invalid qos {other}"))),
    }
}

#[async_trait]
impl BrokerTransport for RumqttTransport {
    async fn connect(
        &self,
        config: &MqttRuntimeConfig,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let options = mqtt_options(config)?;
        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let handshake = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        return if ack.code == ConnectReturnCode::Success {
                            Ok(())
                        } else {
                            Err(TransportError::Connect(format!(
                                "broker refused connection: {:?}",
                                ack.code
                            )))
                        };
                    }
                    Ok(_) => {}
                    Err(e) => return Err(TransportError::Connect(e.to_string())),
                }
            }
        };
        tokio::time::timeout(self.timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout("connect"))??;

        debug!(url = %config.url, "MQTT connection established");
        Ok(Box::new(RumqttConnection {
            client,
            eventloop,
            timeout: self.timeout,
        }))
    }
}

struct RumqttConnection {
    client: AsyncClient,
    eventloop: EventLoop,
    timeout: Duration,
}

#[async_trait]
impl BrokerConnection for RumqttConnection {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError> {
        let qos = to_qos(qos)?;
        self.client
            .publish(topic, qos, retain, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        // QoS 0 completes once the packet is flushed, QoS 1 on PUBACK and
        // QoS 2 on PUBCOMP.
        let eventloop = &mut self.eventloop;
        let delivered = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(_))) if qos == QoS::AtMostOnce => {
                        return Ok(());
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) if qos == QoS::AtLeastOnce => {
                        return Ok(());
                    }
                    Ok(Event::Incoming(Packet::PubComp(_))) if qos == QoS::ExactlyOnce => {
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => return Err(TransportError::Publish(e.to_string())),
                }
            }
        };
        tokio::time::timeout(self.timeout, delivered)
            .await
            .map_err(|_| TransportError::Timeout("publish"))?
    }

    async fn close(mut self: Box<Self>) -> Result<(), TransportError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let eventloop = &mut self.eventloop;
        let flushed = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        };
        tokio::time::timeout(self.timeout, flushed)
            .await
            .map_err(|_| TransportError::Timeout("disconnect"))
    }
}
