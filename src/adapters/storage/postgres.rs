//! PostgreSQL job store with runtime queries (no compile-time checking)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::core::{
    DatabaseConnection, IndexerError, IndexerResult, IndexingJob, JobChanges, JobConfig, JobFilters, JobStatus,
    JobStore, JobUpdate, Webhook, WebhookInsert, WebhookLog, WebhookStatus,
};

const JOB_COLUMNS: &str = "id, user_id, connection_id, job_type, status, progress, config, \
     error_message, retry_count, next_retry_at, created_at, updated_at";

const WEBHOOK_COLUMNS: &str =
    "id, user_id, job_id, subscription_id, url, secret, status, filters, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub async fn new(config: &DatabaseConfig) -> IndexerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.postgres_url)
            .await?;

        let store = Self { pool };
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub async fn migrate(&self) -> IndexerResult<()> {
        info!("Running job store migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Status names as stored, plus the legacy spellings older rows may carry
fn status_names(statuses: &[JobStatus]) -> Vec<String> {
    let mut names = Vec::new();
    for status in statuses {
        names.push(status.as_str().to_string());
        names.push(status.as_str().to_ascii_uppercase());
        if *status == JobStatus::Running {
            names.push("active".to_string());
            names.push("ACTIVE".to_string());
        }
    }
    names
}

fn job_from_row(row: &PgRow) -> IndexerResult<IndexingJob> {
    let status: String = row.try_get("status")?;
    let config: Json<JobConfig> = row.try_get("config")?;
    Ok(IndexingJob {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        connection_id: row.try_get("connection_id")?,
        job_type: row.try_get("job_type")?,
        status: status.parse()?,
        progress: row.try_get("progress")?,
        config: config.0,
        error_message: row.try_get("error_message")?,
        retry_count: row.try_get("retry_count")?,
        next_retry_at: row.try_get("next_retry_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn webhook_from_row(row: &PgRow) -> IndexerResult<Webhook> {
    let status: String = row.try_get("status")?;
    let filters: Json<JobFilters> = row.try_get("filters")?;
    Ok(Webhook {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        job_id: row.try_get("job_id")?,
        subscription_id: row.try_get("subscription_id")?,
        url: row.try_get("url")?,
        secret: row.try_get("secret")?,
        status: status.parse()?,
        filters: filters.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn log_from_row(row: &PgRow) -> IndexerResult<WebhookLog> {
    let status: String = row.try_get("status")?;
    Ok(WebhookLog {
        id: row.try_get("id")?,
        webhook_id: row.try_get("webhook_id")?,
        status: status.parse()?,
        attempt: row.try_get("attempt")?,
        payload: row.try_get("payload")?,
        events_processed: row.try_get("events_processed")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
    })
}

fn connection_from_row(row: &PgRow) -> IndexerResult<DatabaseConnection> {
    let status: String = row.try_get("status")?;
    Ok(DatabaseConnection {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        name: row.try_get("name")?,
        host: row.try_get("host")?,
        port: row.try_get("port")?,
        database: row.try_get("database")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        ssl: row.try_get("ssl")?,
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert_job(&self, job: &IndexingJob) -> IndexerResult<()> {
        let query = r#"
            INSERT INTO indexing_jobs (
                id, user_id, connection_id, job_type, status, progress, config,
                error_message, retry_count, next_retry_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#;

        sqlx::query(query)
            .bind(job.id)
            .bind(&job.user_id)
            .bind(job.connection_id)
            .bind(&job.job_type)
            .bind(job.status.as_str())
            .bind(job.progress)
            .bind(Json(&job.config))
            .bind(&job.error_message)
            .bind(job.retry_count)
            .bind(job.next_retry_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> IndexerResult<Option<IndexingJob>> {
        let query = format!("SELECT {} FROM indexing_jobs WHERE id = $1", JOB_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list_jobs_for_user(&self, user_id: &str) -> IndexerResult<Vec<IndexingJob>> {
        let query = format!(
            "SELECT {} FROM indexing_jobs WHERE user_id = $1 ORDER BY created_at DESC",
            JOB_COLUMNS
        );
        let rows = sqlx::query(&query).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn update_job(
        &self,
        id: Uuid,
        expected: &[JobStatus],
        changes: JobChanges,
    ) -> IndexerResult<JobUpdate> {
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT {} FROM indexing_jobs WHERE id = $1 FOR UPDATE", JOB_COLUMNS);
        let Some(row) = sqlx::query(&select).bind(id).fetch_optional(&mut *tx).await? else {
            return Ok(JobUpdate::Missing);
        };
        let mut job = job_from_row(&row)?;
        if !expected.contains(&job.status) {
            return Ok(JobUpdate::StatusMismatch(job.status));
        }

        changes.apply(&mut job, Utc::now());

        let update = r#"
            UPDATE indexing_jobs SET
                status = $2,
                progress = $3,
                config = $4,
                error_message = $5,
                retry_count = $6,
                next_retry_at = $7,
                updated_at = $8
            WHERE id = $1
        "#;
        sqlx::query(update)
            .bind(job.id)
            .bind(job.status.as_str())
            .bind(job.progress)
            .bind(Json(&job.config))
            .bind(&job.error_message)
            .bind(job.retry_count)
            .bind(job.next_retry_at)
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(JobUpdate::Updated(job))
    }

    async fn delete_job(&self, id: Uuid, keep_webhooks: &[Uuid]) -> IndexerResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM webhook_logs WHERE webhook_id IN (SELECT id FROM webhooks WHERE job_id = $1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM webhooks WHERE job_id = $1 AND NOT (id = ANY($2))")
            .bind(id)
            .bind(keep_webhooks)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM indexing_jobs WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn due_pending_jobs(&self, now: DateTime<Utc>, limit: usize) -> IndexerResult<Vec<IndexingJob>> {
        let query = format!(
            r#"
            SELECT {} FROM indexing_jobs
            WHERE status = ANY($1)
              AND (next_retry_at IS NULL OR next_retry_at <= $2)
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(status_names(&[JobStatus::Pending]))
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn reset_stale_jobs(
        &self,
        statuses: &[JobStatus],
        stale_before: DateTime<Utc>,
    ) -> IndexerResult<Vec<IndexingJob>> {
        let query = format!(
            r#"
            UPDATE indexing_jobs
            SET status = 'pending', updated_at = NOW()
            WHERE status = ANY($1) AND updated_at < $2
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(status_names(statuses))
            .bind(stale_before)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn insert_active_webhook(&self, webhook: &Webhook) -> IndexerResult<WebhookInsert> {
        let query = r#"
            INSERT INTO webhooks (
                id, user_id, job_id, subscription_id, url, secret, status, filters,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, $8, $9)
            ON CONFLICT (job_id) WHERE status = 'active' DO NOTHING
            RETURNING id
        "#;
        let inserted = sqlx::query(query)
            .bind(webhook.id)
            .bind(&webhook.user_id)
            .bind(webhook.job_id)
            .bind(&webhook.subscription_id)
            .bind(&webhook.url)
            .bind(&webhook.secret)
            .bind(Json(&webhook.filters))
            .bind(webhook.created_at)
            .bind(webhook.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        if inserted.is_some() {
            let mut inserted = webhook.clone();
            inserted.status = WebhookStatus::Active;
            return Ok(WebhookInsert::Inserted(inserted));
        }

        self.active_webhook_for_job(webhook.job_id)
            .await?
            .map(WebhookInsert::Existing)
            .ok_or_else(|| {
                IndexerError::Conflict(format!("active webhook for job {} changed concurrently", webhook.job_id))
            })
    }

    async fn get_webhook(&self, id: Uuid) -> IndexerResult<Option<Webhook>> {
        let query = format!("SELECT {} FROM webhooks WHERE id = $1", WEBHOOK_COLUMNS);
        let row = sqlx::query(&query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(webhook_from_row).transpose()
    }

    async fn active_webhook_for_job(&self, job_id: Uuid) -> IndexerResult<Option<Webhook>> {
        let query = format!(
            "SELECT {} FROM webhooks WHERE job_id = $1 AND status = 'active'",
            WEBHOOK_COLUMNS
        );
        let row = sqlx::query(&query).bind(job_id).fetch_optional(&self.pool).await?;
        row.as_ref().map(webhook_from_row).transpose()
    }

    async fn webhooks_for_job(&self, job_id: Uuid) -> IndexerResult<Vec<Webhook>> {
        let query = format!(
            "SELECT {} FROM webhooks WHERE job_id = $1 ORDER BY created_at DESC",
            WEBHOOK_COLUMNS
        );
        let rows = sqlx::query(&query).bind(job_id).fetch_all(&self.pool).await?;
        rows.iter().map(webhook_from_row).collect()
    }

    async fn webhooks_for_user(&self, user_id: &str) -> IndexerResult<Vec<Webhook>> {
        let query = format!(
            "SELECT {} FROM webhooks WHERE user_id = $1 ORDER BY created_at DESC",
            WEBHOOK_COLUMNS
        );
        let rows = sqlx::query(&query).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(webhook_from_row).collect()
    }

    async fn set_webhook_status(&self, id: Uuid, status: WebhookStatus) -> IndexerResult<bool> {
        let result = sqlx::query("UPDATE webhooks SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_delivery(&self, log: &WebhookLog) -> IndexerResult<()> {
        let mut tx = self.pool.begin().await?;

        let insert = r#"
            INSERT INTO webhook_logs (
                id, webhook_id, status, attempt, payload, events_processed, error, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#;
        sqlx::query(insert)
            .bind(log.id)
            .bind(log.webhook_id)
            .bind(log.status.as_str())
            .bind(log.attempt)
            .bind(&log.payload)
            .bind(log.events_processed)
            .bind(&log.error)
            .bind(log.created_at)
            .execute(&mut *tx)
            .await?;

        sqlx::query("UPDATE webhooks SET updated_at = $2 WHERE id = $1")
            .bind(log.webhook_id)
            .bind(log.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn webhook_logs(&self, webhook_id: Uuid, limit: i64) -> IndexerResult<Vec<WebhookLog>> {
        let query = r#"
            SELECT id, webhook_id, status, attempt, payload, events_processed, error, created_at
            FROM webhook_logs
            WHERE webhook_id = $1
            ORDER BY created_at DESC
            LIMIT $2
        "#;
        let rows = sqlx::query(query)
            .bind(webhook_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(log_from_row).collect()
    }

    async fn get_connection(&self, id: Uuid) -> IndexerResult<Option<DatabaseConnection>> {
        let query = r#"
            SELECT id, user_id, name, host, port, database, username, password, ssl, status,
                   created_at, updated_at
            FROM database_connections
            WHERE id = $1
        "#;
        let row = sqlx::query(query).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(connection_from_row).transpose()
    }

    async fn health_check(&self) -> IndexerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
