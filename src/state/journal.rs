//! PostgreSQL audit journal of order transitions
//!
//! Write-only: snapshots are never read back into the store.

use crate::config::DatabaseConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::events::OrderEvent;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct OrderJournal {
    pool: PgPool,
}

impl OrderJournal {
    pub async fn new(config: &DatabaseConfig) -> RelayerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await
            .map_err(RelayerError::Database)?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> RelayerResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_hash VARCHAR(66) PRIMARY KEY,
                status VARCHAR(32) NOT NULL,
                failure_kind VARCHAR(32),
                failure_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_stages (
                order_hash VARCHAR(66) NOT NULL,
                stage VARCHAR(32) NOT NULL,
                proof VARCHAR(130),
                recorded_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (order_hash, stage)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Journal migrations complete");
        Ok(())
    }

    pub async fn health_check(&self) -> RelayerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Upsert the order snapshot and append any stages not yet journaled
    pub async fn record(&self, event: &OrderEvent) -> RelayerResult<()> {
        let order_hash = event.order_hash.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (order_hash, status, failure_kind, failure_message, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (order_hash)
            DO UPDATE SET status = $2, failure_kind = $3, failure_message = $4, updated_at = $5
            "#,
        )
        .bind(&order_hash)
        .bind(event.status.as_str())
        .bind(event.error.as_ref().map(|f| f.kind.as_str()))
        .bind(event.error.as_ref().map(|f| f.message.clone()))
        .bind(event.timestamp)
        .execute(&mut *tx)
        .await?;

        for (stage, record) in &event.stages {
            sqlx::query(
                r#"
                INSERT INTO order_stages (order_hash, stage, proof, recorded_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (order_hash, stage) DO NOTHING
                "#,
            )
            .bind(&order_hash)
            .bind(stage.as_str())
            .bind(record.proof.as_deref())
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Journaled order {} at {}", order_hash, event.status);
        Ok(())
    }

    /// Drain the event bus into the journal until the bus closes
    pub async fn run(self, mut events: broadcast::Receiver<OrderEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = self.record(&event).await {
                        error!("Failed to journal order {}: {}", event.order_hash, e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Journal lagged, {} events not recorded", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        info!("Journal stopped");
    }
}
