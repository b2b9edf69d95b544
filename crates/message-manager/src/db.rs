//! Raw-message archive, the SQL-native replacement for the original's
//! Azure Table "Messages" store (`original_source/src/message-manager/`'s
//! `table.AddEntity`) — same key shape, one row per envelope.

use async_trait::async_trait;
use ocpp_proto::OcppError;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Archives one received envelope. Behind a trait so tests can verify the
/// consumer's filtering/mapping logic without a live Postgres.
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn insert_message(
        &self,
        client: &str,
        received_at_ms: i64,
        server_node: &str,
        direction: &str,
        message_time: &str,
        body: Value,
    ) -> Result<(), OcppError>;
}

#[derive(Clone)]
pub struct MessageArchive {
    pool: PgPool,
}

impl MessageArchive {
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
            "CREATE TABLE IF NOT EXISTS raw_messages (
                client       TEXT NOT NULL,
                received_at  BIGINT NOT NULL,
                server_node  TEXT NOT NULL,
                direction    TEXT NOT NULL,
                message_time TEXT NOT NULL,
                body         JSONB NOT NULL,
                PRIMARY KEY (client, received_at)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| OcppError::fatal(format!("create raw_messages table failed: {e}")))?;

        Ok(())
    }
}

#[async_trait]
impl ArchiveSink for MessageArchive {
    async fn insert_message(
        &self,
        client: &str,
        received_at_ms: i64,
        server_node: &str,
        direction: &str,
        message_time: &str,
        body: Value,
    ) -> Result<(), OcppError> {
        sqlx::query(
            "INSERT INTO raw_messages (client, received_at, server_node, direction, message_time, body)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(client)
        .bind(received_at_ms)
        .bind(server_node)
        .bind(direction)
        .bind(message_time)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| OcppError::fatal(format!("insert raw_message failed: {e}")))?;

        Ok(())
    }
}
