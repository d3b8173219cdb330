//! PostgreSQL history store

use super::{ExecutionRecord, HistoryStore};
use crate::config::DatabaseConfig;
use crate::error::{EngineError, EngineResult};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

pub struct PgHistoryStore {
    pool: PgPool,
}

impl PgHistoryStore {
    pub async fn new(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(EngineError::Database)?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS execution_history (
                id VARCHAR(128) PRIMARY KEY,
                kind VARCHAR(20) NOT NULL,
                user_address VARCHAR(64) NOT NULL,
                from_chain_id BIGINT NOT NULL,
                to_chain_id BIGINT NOT NULL,
                from_token VARCHAR(64) NOT NULL,
                to_token VARCHAR(64) NOT NULL,
                from_amount VARCHAR(80) NOT NULL,
                to_amount VARCHAR(80) NOT NULL,
                tool VARCHAR(64) NOT NULL,
                status VARCHAR(32) NOT NULL,
                tx_hash VARCHAR(66),
                block_number BIGINT,
                error TEXT,
                details JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_execution_history_user
            ON execution_history (user_address, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Database migrations complete");
        Ok(())
    }

    pub async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(EngineError::Database)?;
        Ok(())
    }

    /// Current status of a record, if it exists
    pub async fn get_status(&self, id: &str) -> EngineResult<Option<String>> {
        let row = sqlx::query("SELECT status FROM execution_history WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("status")))
    }
}

#[async_trait]
impl HistoryStore for PgHistoryStore {
    async fn save(&self, record: &ExecutionRecord) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_history (
                id, kind, user_address, from_chain_id, to_chain_id, from_token, to_token,
                from_amount, to_amount, tool, status, tx_hash, block_number, error, details,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (id)
            DO UPDATE SET from_token = $6, to_token = $7, to_amount = $9, tool = $10,
                status = $11, tx_hash = $12, block_number = $13, error = $14,
                details = execution_history.details || $15, updated_at = $17
            "#,
        )
        .bind(&record.id)
        .bind(record.kind.as_str())
        .bind(&record.user_address)
        .bind(record.from_chain_id as i64)
        .bind(record.to_chain_id as i64)
        .bind(&record.from_token)
        .bind(&record.to_token)
        .bind(&record.from_amount)
        .bind(&record.to_amount)
        .bind(&record.tool)
        .bind(&record.status)
        .bind(&record.tx_hash)
        .bind(record.block_number.map(|b| b as i64))
        .bind(&record.error)
        .bind(&record.details)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Saved execution {} ({})", record.id, record.status);
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: &str,
        error: Option<String>,
        fields: serde_json::Value,
    ) -> EngineResult<()> {
        // jsonb || shallow-merges objects, matching the in-memory store
        let fields = if fields.is_null() { serde_json::json!({}) } else { fields };

        sqlx::query(
            r#"
            UPDATE execution_history
            SET status = $2, error = COALESCE($3, error), details = details || $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .bind(fields)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_hash(&self, id: &str, tx_hash: &str, block_number: Option<u64>) -> EngineResult<()> {
        sqlx::query(
            r#"
            UPDATE execution_history
            SET tx_hash = $2, block_number = COALESCE($3, block_number), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(tx_hash)
        .bind(block_number.map(|b| b as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn prune(&self, max_age: Duration) -> EngineResult<u64> {
        let result = sqlx::query(
            "DELETE FROM execution_history WHERE updated_at < NOW() - make_interval(secs => $1)",
        )
        .bind(max_age.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
