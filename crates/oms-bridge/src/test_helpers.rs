//! Shared fakes for decoder and broker transport tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use oms_core::MqttRuntimeConfig;
use serde_json::Value;

use crate::decoder::{DecodeError, Decoder, ParsedReading};
use crate::publisher::{BrokerConnection, BrokerTransport, TransportError};

/// A message captured by [`FakeTransport`].
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub url: String,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

/// In-memory broker that records every published message.
#[derive(Default)]
pub struct FakeTransport {
    pub fail_connect: AtomicBool,
    pub fail_publish: AtomicBool,
    pub connects: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub messages: Arc<Mutex<Vec<PublishedMessage>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerTransport for FakeTransport {
    async fn connect(
        &self,
        config: &MqttRuntimeConfig,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        // Yield so unguarded concurrent callers would interleave here.
        tokio::task::yield_now().await;
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }
        let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            url: config.url.clone(),
            fail_publish: self.fail_publish.load(Ordering::SeqCst),
            closes: Arc::clone(&self.closes),
            messages: Arc::clone(&self.messages),
            in_flight: Arc::clone(&self.in_flight),
        }))
    }
}

struct FakeConnection {
    url: String,
    fail_publish: bool,
    closes: Arc<AtomicUsize>,
    messages: Arc<Mutex<Vec<PublishedMessage>>>,
    in_flight: Arc<AtomicUsize>,
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retain: bool,
    ) -> Result<(), TransportError> {
        tokio::task::yield_now().await;
        if self.fail_publish {
            return Err(TransportError::Publish("broker went away".into()));
        }
        self.messages.lock().unwrap().push(PublishedMessage {
            url: self.url.clone(),
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// What [`FakeDecoder`] answers with.
pub enum DecodeBehavior {
    Reading(Value),
    HttpError(u16),
    TransportError,
}

pub struct FakeDecoder {
    pub credential: bool,
    pub behavior: DecodeBehavior,
    pub calls: AtomicUsize,
    pub last_args: Mutex<Option<(String, String)>>,
}

impl FakeDecoder {
    pub fn returning(reading: Value) -> Arc<Self> {
        Arc::new(Self::with(true, DecodeBehavior::Reading(reading)))
    }

    pub fn with(credential: bool, behavior: DecodeBehavior) -> Self {
        Self {
            credential,
            behavior,
            calls: AtomicUsize::new(0),
            last_args: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Decoder for FakeDecoder {
    fn has_credential(&self) -> bool {
        self.credential
    }

    async fn decode(&self, raw_hex: &str, key_hex: &str) -> Result<ParsedReading, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock().unwrap() = Some((raw_hex.to_string(), key_hex.to_string()));
        match &self.behavior {
            DecodeBehavior::Reading(value) => ParsedReading::try_from(value.clone()),
            DecodeBehavior::HttpError(status_code) => Err(DecodeError::Http {
                status_code: *status_code,
                body: "upstream said no".into(),
            }),
            DecodeBehavior::TransportError => {
                Err(DecodeError::Transport("connection reset".into()))
            }
        }
    }
}
