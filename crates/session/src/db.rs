//! Transaction persistence, matching `original_source/src/internal/db/db.go`'s
//! `transactions` table and `InsertNextTransaction`.

use async_trait::async_trait;
use ocpp_proto::OcppError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

/// Persists a `StartTransaction` and assigns it an id. Behind a trait so
/// tests can exercise the consumer without a live Postgres.
#[async_trait]
pub trait TransactionSink: Send + Sync {
    async fn insert_next_transaction(
        &self,
        client_id: &str,
        time_started_ms: i64,
    ) -> Result<i64, OcppError>;
}

#[derive(Clone)]
pub struct TransactionStore {
    pool: PgPool,
}

impl TransactionStore {
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
            "CREATE TABLE IF NOT EXISTS transactions (
                id           BIGSERIAL PRIMARY KEY,
                guid         TEXT NOT NULL,
                client_id    TEXT NOT NULL,
                time_started BIGINT NOT NULL,
                time_ended   BIGINT,
                meter_stop   DOUBLE PRECISION
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OcppError::fatal(format!("create transactions table failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS transactions_client_id_idx ON transactions (client_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OcppError::fatal(format!("create transactions index failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl TransactionSink for TransactionStore {
    /// Inserts a new transaction row keyed by a fresh guid and returns its id.
    async fn insert_next_transaction(
        &self,
        client_id: &str,
        time_started_ms: i64,
    ) -> Result<i64, OcppError> {
        let guid = Uuid::new_v4().to_string();
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO transactions (guid, client_id, time_started) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&guid)
        .bind(client_id)
        .bind(time_started_ms)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OcppError::fatal(format!("insert transaction failed: {e}")))?;

        Ok(row.0)
    }
}
