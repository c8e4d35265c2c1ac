//! Process wiring: storage, decoder, publisher and the startup reconcile.

use std::sync::Arc;

use oms_core::config::ConfigSource;
use oms_core::EnvLocks;
use tracing::{info, warn};

use crate::decoder::{Decoder, LobaroClient};
use crate::pipeline::IngestPipeline;
use crate::publisher::{Publisher, RumqttTransport};
use crate::reconcile::reconcile_on_startup;
use crate::settings::BridgeSettings;
use crate::storage::BridgeDatabase;

/// Everything a command needs, built once per process.
pub struct Bridge {
    pub db: BridgeDatabase,
    pub decoder: Arc<dyn Decoder>,
    pub publisher: Arc<Publisher>,
    pub locks: EnvLocks,
    pub config_source: ConfigSource,
}

impl Bridge {
    pub async fn start(settings: &BridgeSettings) -> anyhow::Result<Self> {
        info!(path = %settings.db_path.display(), "Opening key database");
        let db = BridgeDatabase::open(&settings.db_path).await?;

        let lobaro = settings.lobaro();
        let decoder: Arc<dyn Decoder> = Arc::new(LobaroClient::new(&lobaro)?);
        if !decoder.has_credential() {
            warn!("LOBARO_TOKEN is not set; telegrams will not be decoded");
        }

        let publisher = Arc::new(Publisher::new(Arc::new(RumqttTransport::new(
            settings.mqtt_timeout(),
        ))));

        let overrides = settings.mqtt_overrides();
        let locks = settings.env_locks();
        let config_source = reconcile_on_startup(&db, &publisher, &overrides, locks).await?;

        Ok(Self {
            db,
            decoder,
            publisher,
            locks,
            config_source,
        })
    }

    pub fn pipeline(&self, settings: &BridgeSettings) -> IngestPipeline {
        IngestPipeline::new(
            self.db.clone(),
            Arc::clone(&self.decoder),
            Arc::clone(&self.publisher),
            settings.policy(),
        )
    }

    pub async fn shutdown(&self) {
        self.publisher.close().await;
        self.db.close().await;
    }
}
