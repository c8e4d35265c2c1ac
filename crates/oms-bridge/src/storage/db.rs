//! `SQLite` database for the OMS bridge.

use std::path::Path;

use oms_core::db::{open_pool, open_pool_in_memory, DatabaseError};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

/// Idempotent schema script. Safe to re-run at any time.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS meter_keys (
    meter_id TEXT PRIMARY KEY,
    key_hex TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS mqtt_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    url TEXT NOT NULL,
    username TEXT,
    password TEXT,
    topic_template TEXT NOT NULL,
    qos INTEGER NOT NULL,
    retain INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_meters (
    meter_id TEXT PRIMARY KEY,
    manuf INTEGER,
    dev_type INTEGER,
    version INTEGER,
    ci INTEGER,
    first_seen INTEGER NOT NULL,
    last_seen INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS telegrams (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    meter_id TEXT NOT NULL,
    received_at INTEGER NOT NULL,
    status TEXT NOT NULL,
    gateway TEXT,
    payload_json TEXT NOT NULL,
    parsed_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_telegrams_meter ON telegrams (meter_id, received_at DESC);
";

#[derive(Clone)]
pub struct BridgeDatabase {
    pool: Pool<Sqlite>,
}

impl BridgeDatabase {
    /// Open or create a database at the given path.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        let pool = open_pool(path).await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        info!(path = %path.display(), "Bridge database ready");
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let pool = open_pool_in_memory().await?;
        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    /// Create any missing tables and indexes.
    pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Schema(e.to_string()))?;
        Ok(())
    }

    /// Recreate the schema after a query found a table missing.
    pub(super) async fn heal_schema(&self, table: &str) -> Result<(), DatabaseError> {
        warn!(table, "Table missing, recreating schema");
        self.ensure_schema().await
    }

    /// Get a reference to the connection pool.
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the pool; later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
