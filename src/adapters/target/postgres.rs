//! PostgreSQL target databases owned by users

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::TargetConfig;
use crate::core::{
    DatabaseConnection, IndexerError, IndexerResult, StorageError, TargetDatabase,
    TargetDatabaseFactory,
};
use crate::domain::models::{TargetRow, WriteBatch, WriteSummary};

/// Category tables, created on first connect
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS transactions (
        signature TEXT PRIMARY KEY,
        slot BIGINT NOT NULL,
        block_time TIMESTAMPTZ NOT NULL,
        fee BIGINT NOT NULL,
        fee_payer TEXT NOT NULL,
        tx_type TEXT NOT NULL,
        source TEXT,
        description TEXT,
        raw JSONB NOT NULL,
        indexed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_transactions_slot ON transactions (slot DESC)",
    "CREATE INDEX IF NOT EXISTS idx_transactions_fee_payer ON transactions (fee_payer)",
    r#"CREATE TABLE IF NOT EXISTS program_interactions (
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        program_id TEXT NOT NULL,
        account_count INTEGER NOT NULL,
        slot BIGINT NOT NULL,
        block_time TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (signature, instruction_index)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_program_interactions_program ON program_interactions (program_id, slot DESC)",
    r#"CREATE TABLE IF NOT EXISTS nft_events (
        signature TEXT NOT NULL,
        mint TEXT NOT NULL,
        event_type TEXT NOT NULL,
        buyer TEXT,
        seller TEXT,
        amount_lamports BIGINT NOT NULL,
        marketplace TEXT,
        slot BIGINT NOT NULL,
        block_time TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (signature, mint, event_type)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_nft_events_mint ON nft_events (mint, slot DESC)",
    r#"CREATE TABLE IF NOT EXISTS token_transfers (
        signature TEXT NOT NULL,
        transfer_index INTEGER NOT NULL,
        mint TEXT NOT NULL,
        from_account TEXT,
        to_account TEXT,
        amount NUMERIC NOT NULL,
        slot BIGINT NOT NULL,
        block_time TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (signature, transfer_index)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_token_transfers_mint ON token_transfers (mint, slot DESC)",
    r#"CREATE TABLE IF NOT EXISTS account_activity (
        signature TEXT NOT NULL,
        account TEXT NOT NULL,
        role TEXT NOT NULL,
        category TEXT NOT NULL,
        slot BIGINT NOT NULL,
        block_time TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (signature, account, role, category)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_account_activity_account ON account_activity (account, slot DESC)",
];

fn target_err(err: sqlx::Error) -> IndexerError {
    match err {
        sqlx::Error::PoolTimedOut => IndexerError::Storage(StorageError::PoolExhausted),
        other => IndexerError::Storage(StorageError::Target(other.to_string())),
    }
}

pub struct PgTarget {
    pool: PgPool,
}

impl PgTarget {
    async fn insert_row(conn: &mut PgConnection, row: &TargetRow) -> Result<u64, sqlx::Error> {
        let result = match row {
            TargetRow::Transaction(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO transactions (
                        signature, slot, block_time, fee, fee_payer, tx_type, source, description, raw
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&r.signature)
                .bind(r.slot)
                .bind(r.block_time)
                .bind(r.fee)
                .bind(&r.fee_payer)
                .bind(&r.tx_type)
                .bind(&r.source)
                .bind(&r.description)
                .bind(&r.raw)
                .execute(&mut *conn)
                .await?
            }
            TargetRow::ProgramInteraction(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO program_interactions (
                        signature, instruction_index, program_id, account_count, slot, block_time
                    ) VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&r.signature)
                .bind(r.instruction_index)
                .bind(&r.program_id)
                .bind(r.account_count)
                .bind(r.slot)
                .bind(r.block_time)
                .execute(&mut *conn)
                .await?
            }
            TargetRow::NftEvent(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO nft_events (
                        signature, mint, event_type, buyer, seller, amount_lamports, marketplace,
                        slot, block_time
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&r.signature)
                .bind(&r.mint)
                .bind(&r.event_type)
                .bind(&r.buyer)
                .bind(&r.seller)
                .bind(r.amount_lamports)
                .bind(&r.marketplace)
                .bind(r.slot)
                .bind(r.block_time)
                .execute(&mut *conn)
                .await?
            }
            TargetRow::TokenTransfer(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO token_transfers (
                        signature, transfer_index, mint, from_account, to_account, amount,
                        slot, block_time
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&r.signature)
                .bind(r.transfer_index)
                .bind(&r.mint)
                .bind(&r.from_account)
                .bind(&r.to_account)
                .bind(r.amount)
                .bind(r.slot)
                .bind(r.block_time)
                .execute(&mut *conn)
                .await?
            }
            TargetRow::AccountActivity(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO account_activity (signature, account, role, category, slot, block_time)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(&r.signature)
                .bind(&r.account)
                .bind(&r.role)
                .bind(&r.category)
                .bind(r.slot)
                .bind(r.block_time)
                .execute(&mut *conn)
                .await?
            }
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl TargetDatabase for PgTarget {
    async fn ensure_schema(&self) -> IndexerResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(target_err)?;
        }
        Ok(())
    }

    async fn write_batch(&self, batch: &WriteBatch) -> IndexerResult<WriteSummary> {
        let mut tx = self.pool.begin().await.map_err(target_err)?;
        let mut summary = WriteSummary::default();

        for row in &batch.rows {
            // Dropping `tx` on error rolls the whole batch back
            if Self::insert_row(&mut *tx, row).await.map_err(target_err)? > 0 {
                summary.inserted += 1;
            } else {
                summary.skipped += 1;
            }
        }

        tx.commit().await.map_err(target_err)?;
        Ok(summary)
    }
}

/// Pool cache keyed by connection, rebuilt when the connection row changes
pub struct PgTargetFactory {
    config: TargetConfig,
    pools: TargetCache<Arc<PgTarget>>,
}

impl PgTargetFactory {
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            pools: TargetCache::new(),
        }
    }

    fn connect_options(connection: &DatabaseConnection) -> IndexerResult<PgConnectOptions> {
        let port = u16::try_from(connection.port).map_err(|_| {
            IndexerError::validation(format!("connection {} has invalid port {}", connection.id, connection.port))
        })?;
        Ok(PgConnectOptions::new()
            .host(&connection.host)
            .port(port)
            .database(&connection.database)
            .username(&connection.username)
            .password(&connection.password)
            .ssl_mode(if connection.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            }))
    }
}

#[async_trait]
impl TargetDatabaseFactory for PgTargetFactory {
    async fn connect(&self, connection: &DatabaseConnection) -> IndexerResult<Arc<dyn TargetDatabase>> {
        let target = self
            .pools
            .get_or_try_insert(connection.id, connection.updated_at, || self.open(connection))
            .await?;
        Ok(target)
    }
}

impl PgTargetFactory {
    async fn open(&self, connection: &DatabaseConnection) -> IndexerResult<Arc<PgTarget>> {
        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(Duration::from_secs(self.config.acquire_timeout_secs))
            .connect_with(Self::connect_options(connection)?)
            .await
            .map_err(target_err)?;
        let target = Arc::new(PgTarget { pool });

        if self.config.create_schema {
            target.ensure_schema().await?;
            debug!(connection_id = %connection.id, "Target schema ensured");
        }

        info!(connection_id = %connection.id, host = %connection.host, "Opened target database pool");
        Ok(target)
    }
}

/// Opened targets keyed by connection id, valid for one connection version
///
/// Targets are built outside the lock, so a slow or unreachable database only
/// holds up callers of that connection.
struct TargetCache<T> {
    entries: RwLock<HashMap<Uuid, (DateTime<Utc>, T)>>,
}

impl<T: Clone> TargetCache<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, id: Uuid, version: DateTime<Utc>) -> Option<T> {
        match self.entries.read().await.get(&id) {
            Some((cached, target)) if *cached == version => Some(target.clone()),
            _ => None,
        }
    }

    async fn get_or_try_insert<F, Fut>(&self, id: Uuid, version: DateTime<Utc>, build: F) -> IndexerResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = IndexerResult<T>>,
    {
        if let Some(target) = self.get(id, version).await {
            return Ok(target);
        }

        let built = build().await?;

        let mut entries = self.entries.write().await;
        if let Some((cached, target)) = entries.get(&id) {
            // Another caller opened the same version first; ours is dropped
            if *cached == version {
                return Ok(target.clone());
            }
        }
        entries.insert(id, (version, built.clone()));
        Ok(built)
    }
}
