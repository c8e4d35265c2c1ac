//! Runtime MQTT config queries (single row, `id = 1`).

use oms_core::db::{unix_timestamp, DatabaseError};
use oms_core::MqttRuntimeConfig;

use super::db::BridgeDatabase;
use super::models::MqttConfigRow;

impl BridgeDatabase {
    /// Load the persisted runtime config, if one was ever saved.
    pub async fn get_mqtt_config(&self) -> Result<Option<MqttRuntimeConfig>, DatabaseError> {
        let row = sqlx::query_as::<_, MqttConfigRow>(
            "SELECT url, username, password, topic_template, qos, retain FROM mqtt_config WHERE id = 1",
        )
        .fetch_optional(self.pool())
        .await?;

        row.map(MqttRuntimeConfig::try_from).transpose()
    }

    /// Replace the persisted runtime config wholesale.
    pub async fn set_mqtt_config(&self, config: &MqttRuntimeConfig) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO mqtt_config (id, url, username, password, topic_template, qos, retain, updated_at) \
             VALUES (1, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET url = excluded.url, username = excluded.username, \
             password = excluded.password, topic_template = excluded.topic_template, \
             qos = excluded.qos, retain = excluded.retain, updated_at = excluded.updated_at",
        )
        .bind(&config.url)
        .bind(config.username.as_deref())
        .bind(config.password.as_deref())
        .bind(&config.topic_template)
        .bind(i64::from(config.qos))
        .bind(config.retain)
        .bind(unix_timestamp())
        .execute(self.pool())
        .await?;

        Ok(())
    }
}

impl TryFrom<MqttConfigRow> for MqttRuntimeConfig {
    type Error = DatabaseError;

    fn try_from(row: MqttConfigRow) -> Result<Self, Self::Error> {
        let qos = u8::try_from(row.qos)
            .map_err(|_| DatabaseError::Query(format!("stored qos out of range: {}", row.qos)))?;

        Ok(Self {
            url: row.url,
            username: row.username,
            password: row.password,
            topic_template: row.topic_template,
            qos,
            retain: row.retain != 0,
        })
    }
}
