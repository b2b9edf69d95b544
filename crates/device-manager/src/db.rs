//! Device directory lookup, matching `original_source/src/internal/db/db.go`'s
//! `devices` table, backing the stub `dbGetDevice` with a real row lookup.

use async_trait::async_trait;
use ocpp_proto::OcppError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub network_id: String,
    pub server_node: String,
}

/// Resolves a `networkId` to its owning front-end node. Behind a trait so
/// tests can stand in a fixed device directory without a live Postgres.
#[async_trait]
pub trait DeviceLookup: Send + Sync {
    async fn get_device(&self, network_id: &str) -> Result<Device, OcppError>;
}

#[derive(Clone)]
pub struct DeviceStore {
    pool: PgPool,
}

impl DeviceStore {
    pub async fn connect(connection_string: &str) -> Result<Self, OcppError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await
            .map_err(|e| OcppError::fatal(format!("db connect failed: {e}")))?;
        let store = Self { pool };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), OcppError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS devices (
                id                 BIGSERIAL PRIMARY KEY,
                tenant             TEXT NOT NULL,
                guid               TEXT NOT NULL,
                network_id         TEXT NOT NULL,
                device_template_id BIGINT NOT NULL,
                server_node        TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OcppError::fatal(format!("create devices table failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS devices_tenant_network_id_idx ON devices (tenant, network_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OcppError::fatal(format!("create devices index failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl DeviceLookup for DeviceStore {
    /// Resolves a `networkId` to the front-end node that owns its socket.
    /// A device with more than one row keeps the most recently inserted —
    /// callers only ever need the current owning node.
    async fn get_device(&self, network_id: &str) -> Result<Device, OcppError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT server_node FROM devices WHERE network_id = $1 ORDER BY id DESC LIMIT 1",
        )
        .bind(network_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| OcppError::fatal(format!("device lookup failed: {e}")))?;

        match row {
            Some((server_node,)) => Ok(Device {
                network_id: network_id.to_string(),
                server_node,
            }),
            None => Err(OcppError::not_found(format!("device {network_id}"))),
        }
    }
}
