//! Meter key and pending meter queries.

use std::collections::BTreeMap;

use oms_core::db::{is_missing_table, unix_timestamp, DatabaseError};
use oms_core::report::is_hex;

use super::db::BridgeDatabase;
use super::models::{KnownMeter, MeterKey, PendingMeter};

/// Length of a hex-encoded 16-byte meter key.
pub const KEY_HEX_LEN: usize = 32;

const KNOWN_METERS_SQL: &str = "SELECT k.meter_id, k.updated_at, \
     COALESCE(SUM(CASE WHEN t.status = 'published' THEN 1 ELSE 0 END), 0) AS forwarded_count, \
     MAX(t.received_at) AS last_seen \
     FROM meter_keys k \
     LEFT JOIN telegrams t ON t.meter_id = k.meter_id \
     GROUP BY k.meter_id, k.updated_at \
     ORDER BY k.meter_id";

impl BridgeDatabase {
    // =========================================================================
    // Meter key queries
    // =========================================================================

    /// Get the decryption key for a meter.
    pub async fn get_key(&self, meter_id: &str) -> Result<Option<String>, DatabaseError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT key_hex FROM meter_keys WHERE meter_id = ?")
                .bind(meter_id)
                .fetch_optional(self.pool())
                .await?;

        Ok(row.map(|r| r.0))
    }

    /// Get the full key record for a meter.
    pub async fn get_meter_key(&self, meter_id: &str) -> Result<MeterKey, DatabaseError> {
        sqlx::query_as::<_, MeterKey>("SELECT * FROM meter_keys WHERE meter_id = ?")
            .bind(meter_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("Meter key {meter_id}")))
    }

    /// Set (or replace) a meter's key and clear its pending record.
    ///
    /// `key_hex` must already be validated by the caller; anything other
    /// than 32 hex characters is rejected as a logic error.
    pub async fn set_key(&self, meter_id: &str, key_hex: &str) -> Result<(), DatabaseError> {
        if key_hex.len() != KEY_HEX_LEN || !is_hex(key_hex) {
            return Err(DatabaseError::InvalidInput(format!(
                "key for meter {meter_id} must be {KEY_HEX_LEN} hex characters"
            )));
        }

        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO meter_keys (meter_id, key_hex, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(meter_id) DO UPDATE SET key_hex = excluded.key_hex, updated_at = excluded.updated_at",
        )
        .bind(meter_id)
        .bind(key_hex)
        .bind(unix_timestamp())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM pending_meters WHERE meter_id = ?")
            .bind(meter_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }

    /// Remove a meter's key, pending record and telegram history.
    ///
    /// Returns whether a key existed.
    pub async fn delete_key(&self, meter_id: &str) -> Result<bool, DatabaseError> {
        let mut tx = self.pool().begin().await?;
        let removed = sqlx::query("DELETE FROM meter_keys WHERE meter_id = ?")
            .bind(meter_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM pending_meters WHERE meter_id = ?")
            .bind(meter_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM telegrams WHERE meter_id = ?")
            .bind(meter_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(removed > 0)
    }

    /// All keys, ordered by meter id.
    pub async fn list_keys(&self) -> Result<BTreeMap<String, String>, DatabaseError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT meter_id, key_hex FROM meter_keys ORDER BY meter_id")
                .fetch_all(self.pool())
                .await?;

        Ok(rows.into_iter().collect())
    }

    /// Keyed meters with their published-telegram count and last telegram time.
    pub async fn list_known_meters(&self) -> Result<Vec<KnownMeter>, DatabaseError> {
        match sqlx::query_as::<_, KnownMeter>(KNOWN_METERS_SQL)
            .fetch_all(self.pool())
            .await
        {
            Ok(meters) => Ok(meters),
            Err(e) if is_missing_table(&e) => {
                self.heal_schema("meter_keys/telegrams").await?;
                Ok(sqlx::query_as::<_, KnownMeter>(KNOWN_METERS_SQL)
                    .fetch_all(self.pool())
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Pending meter queries
    // =========================================================================

    /// Record a sighting of a meter without a key.
    ///
    /// `first_seen` is only set on the first sighting; every other field is
    /// overwritten.
    pub async fn mark_pending_meter(
        &self,
        meter_id: &str,
        manuf: Option<i64>,
        dev_type: Option<i64>,
        version: Option<i64>,
        ci: Option<i64>,
    ) -> Result<(), DatabaseError> {
        let now = unix_timestamp();

        sqlx::query(
            "INSERT INTO pending_meters (meter_id, manuf, dev_type, version, ci, first_seen, last_seen) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(meter_id) DO UPDATE SET manuf = excluded.manuf, dev_type = excluded.dev_type, \
             version = excluded.version, ci = excluded.ci, last_seen = excluded.last_seen",
        )
        .bind(meter_id)
        .bind(manuf)
        .bind(dev_type)
        .bind(version)
        .bind(ci)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Remove a meter's pending record.
    pub async fn clear_pending_meter(&self, meter_id: &str) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM pending_meters WHERE meter_id = ?")
            .bind(meter_id)
            .execute(self.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Get a single pending meter.
    pub async fn get_pending_meter(
        &self,
        meter_id: &str,
    ) -> Result<Option<PendingMeter>, DatabaseError> {
        let meter =
            sqlx::query_as::<_, PendingMeter>("SELECT * FROM pending_meters WHERE meter_id = ?")
                .bind(meter_id)
                .fetch_optional(self.pool())
                .await?;

        Ok(meter)
    }

    /// Pending meters, most recently seen first.
    pub async fn list_pending_meters(&self) -> Result<Vec<PendingMeter>, DatabaseError> {
        match sqlx::query_as::<_, PendingMeter>(
            "SELECT * FROM pending_meters ORDER BY last_seen DESC, meter_id",
        )
        .fetch_all(self.pool())
        .await
        {
            Ok(meters) => Ok(meters),
            Err(e) if is_missing_table(&e) => {
                self.heal_schema("pending_meters").await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}
