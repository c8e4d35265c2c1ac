//! Telegram log queries.
//!
//! The log is append-only and bounded: after every insert the meter's rows
//! beyond [`MAX_TELEGRAMS_PER_METER`] are trimmed, oldest first, inside the
//! same transaction.

use oms_core::db::{is_missing_table, unix_timestamp, DatabaseError};
use serde_json::Value;

use super::db::BridgeDatabase;
use super::models::{TelegramDetail, TelegramRow, TelegramStatus, TelegramSummary};

/// Maximum number of telegrams retained per meter.
pub const MAX_TELEGRAMS_PER_METER: u32 = 20;

/// Parameters for appending a telegram to the log.
pub struct NewTelegram<'a> {
    pub meter_id: &'a str,
    pub gateway: &'a str,
    pub status: TelegramStatus,
    pub payload: &'a Value,
    pub parsed: Option<&'a Value>,
}

impl BridgeDatabase {
    /// Append a telegram and trim the meter's history to the retention bound.
    ///
    /// Returns the new row id.
    pub async fn add_telegram(&self, telegram: &NewTelegram<'_>) -> Result<i64, DatabaseError> {
        let payload_json = serde_json::to_string(telegram.payload)
            .map_err(|e| DatabaseError::InvalidInput(e.to_string()))?;
        let parsed_json = telegram
            .parsed
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::InvalidInput(e.to_string()))?;

        match self
            .insert_and_trim(telegram, &payload_json, parsed_json.as_deref())
            .await
        {
            Ok(id) => Ok(id),
            Err(e) if is_missing_table(&e) => {
                self.heal_schema("telegrams").await?;
                Ok(self
                    .insert_and_trim(telegram, &payload_json, parsed_json.as_deref())
                    .await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_and_trim(
        &self,
        telegram: &NewTelegram<'_>,
        payload_json: &str,
        parsed_json: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        // The insert takes the write lock first, so concurrent appends for
        // the same meter serialize on this transaction.
        let mut tx = self.pool().begin().await?;

        let id = sqlx::query(
            "INSERT INTO telegrams (meter_id, received_at, status, gateway, payload_json, parsed_json) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(telegram.meter_id)
        .bind(unix_timestamp())
        .bind(telegram.status.as_str())
        .bind(telegram.gateway)
        .bind(payload_json)
        .bind(parsed_json)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "DELETE FROM telegrams WHERE meter_id = ? AND id NOT IN ( \
                 SELECT id FROM telegrams WHERE meter_id = ? \
                 ORDER BY received_at DESC, id DESC LIMIT ? \
             )",
        )
        .bind(telegram.meter_id)
        .bind(telegram.meter_id)
        .bind(MAX_TELEGRAMS_PER_METER)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    /// Most recent telegrams for a meter, newest first.
    pub async fn list_telegrams(
        &self,
        meter_id: &str,
        limit: u32,
    ) -> Result<Vec<TelegramSummary>, DatabaseError> {
        match sqlx::query_as::<_, TelegramSummary>(
            "SELECT id, received_at, status FROM telegrams WHERE meter_id = ? \
             ORDER BY received_at DESC, id DESC LIMIT ?",
        )
        .bind(meter_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        {
            Ok(rows) => Ok(rows),
            Err(e) if is_missing_table(&e) => {
                self.heal_schema("telegrams").await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full telegram row including the stored payload and decoded reading.
    pub async fn get_telegram_detail(
        &self,
        meter_id: &str,
        id: i64,
    ) -> Result<Option<TelegramDetail>, DatabaseError> {
        let row = match sqlx::query_as::<_, TelegramRow>(
            "SELECT * FROM telegrams WHERE meter_id = ? AND id = ?",
        )
        .bind(meter_id)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        {
            Ok(row) => row,
            Err(e) if is_missing_table(&e) => {
                self.heal_schema("telegrams").await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        row.map(TelegramDetail::try_from).transpose()
    }

    /// Number of telegrams stored for a meter.
    #[cfg(test)]
    pub(crate) async fn count_telegrams(&self, meter_id: &str) -> Result<i64, DatabaseError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM telegrams WHERE meter_id = ?")
            .bind(meter_id)
            .fetch_one(self.pool())
            .await?;

        Ok(row.0)
    }
}

impl TryFrom<TelegramRow> for TelegramDetail {
    type Error = DatabaseError;

    fn try_from(row: TelegramRow) -> Result<Self, Self::Error> {
        let payload = serde_json::from_str(&row.payload_json)
            .map_err(|e| DatabaseError::Query(format!("telegram {} payload: {e}", row.id)))?;
        let parsed = row
            .parsed_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| DatabaseError::Query(format!("telegram {} parsed: {e}", row.id)))?;

        Ok(Self {
            id: row.id,
            meter_id: row.meter_id,
            received_at: row.received_at,
            status: row.status,
            gateway: row.gateway,
            payload,
            parsed,
        })
    }
}
