//! Postgres-backed store.
//!
//! Plain queries with explicit column lists; bot profiles live in a JSONB
//! `config` column and decode through serde. Item uniqueness is enforced by
//! the table constraint, with `ON CONFLICT DO NOTHING` absorbing races.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::jobs::JobSnapshot;
use crate::types::{Action, Bot, Classification, Item, JobStatus, Run, SourceGroup};

use super::Store;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn bot(&self, bot_id: &str) -> Result<Option<Bot>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT config FROM bots WHERE bot_id = $1")
                .bind(bot_id)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some((config,)) => {
                let bot = serde_json::from_value(config)
                    .with_context(|| format!("decoding config for bot {bot_id}"))?;
                Ok(Some(bot))
            }
            None => Ok(None),
        }
    }

    async fn groups_for_bot(&self, bot_id: &str) -> Result<Vec<SourceGroup>> {
        let groups = sqlx::query_as::<_, SourceGroup>(
            "SELECT group_id, bot_id, last_sync_watermark, last_run_failed, last_error
             FROM source_groups
             WHERE bot_id = $1
             ORDER BY group_id",
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }

    async fn ensure_group(&self, bot_id: &str, group_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO source_groups (group_id, bot_id, last_run_failed)
             VALUES ($1, $2, false)
             ON CONFLICT (group_id, bot_id) DO NOTHING",
        )
        .bind(group_id)
        .bind(bot_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_group_success(
        &self,
        bot_id: &str,
        group_id: &str,
        watermark: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE source_groups
             SET last_sync_watermark = $3, last_run_failed = false, last_error = NULL
             WHERE bot_id = $1 AND group_id = $2",
        )
        .bind(bot_id)
        .bind(group_id)
        .bind(watermark)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_group_failure(&self, bot_id: &str, group_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE source_groups
             SET last_run_failed = true, last_error = $3
             WHERE bot_id = $1 AND group_id = $2",
        )
        .bind(bot_id)
        .bind(group_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_item(&self, item: &Item) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO items (
                id, bot_id, source_group_id, external_id, author_id, author_name,
                content, content_hash, posted_at, classification, processed, collected_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (bot_id, source_group_id, external_id) DO NOTHING",
        )
        .bind(item.id)
        .bind(&item.bot_id)
        .bind(&item.source_group_id)
        .bind(&item.external_id)
        .bind(&item.author_id)
        .bind(&item.author_name)
        .bind(&item.content)
        .bind(&item.content_hash)
        .bind(item.posted_at)
        .bind(item.classification)
        .bind(item.processed)
        .bind(item.collected_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn exact_duplicate_exists(
        &self,
        bot_id: &str,
        author_id: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let row: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM items
             WHERE bot_id = $1 AND author_id = $2 AND content_hash = $3
             LIMIT 1",
        )
        .bind(bot_id)
        .bind(author_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn unclassified_items(&self, bot_id: &str) -> Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            "SELECT id, bot_id, source_group_id, external_id, author_id, author_name,
                    content, content_hash, posted_at, classification, processed, collected_at
             FROM items
             WHERE bot_id = $1 AND classification = 'unclassified'
             ORDER BY collected_at",
        )
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn set_classification(
        &self,
        item_id: Uuid,
        classification: Classification,
    ) -> Result<()> {
        sqlx::query("UPDATE items SET classification = $2 WHERE id = $1")
            .bind(item_id)
            .bind(classification)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn included_contents_for_author(
        &self,
        bot_id: &str,
        author_id: &str,
    ) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT content FROM items
             WHERE bot_id = $1 AND author_id = $2 AND classification = 'included'",
        )
        .bind(bot_id)
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(content,)| content).collect())
    }

    async fn actionable_items(&self, bot_id: &str, limit: usize) -> Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            "SELECT id, bot_id, source_group_id, external_id, author_id, author_name,
                    content, content_hash, posted_at, classification, processed, collected_at
             FROM items
             WHERE bot_id = $1 AND classification = 'included' AND processed = false
             ORDER BY collected_at
             LIMIT $2",
        )
        .bind(bot_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn mark_processed(&self, item_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE items SET processed = true WHERE id = $1")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_action(&self, action: &Action) -> Result<()> {
        sqlx::query(
            "INSERT INTO actions (id, bot_id, item_id, summary, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(action.id)
        .bind(&action.bot_id)
        .bind(action.item_id)
        .bind(&action.summary)
        .bind(action.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_run(&self, run: &Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (
                id, bot_id, kind, status, started_at, finished_at,
                total_items, processed_items, error, triggered_by
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(run.id)
        .bind(&run.bot_id)
        .bind(run.kind)
        .bind(run.status)
        .bind(run.started_at)
        .bind(run.finished_at)
        .bind(run.total_items)
        .bind(run.processed_items)
        .bind(&run.error)
        .bind(&run.triggered_by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_run_running(&self, run_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE runs SET status = 'running' WHERE id = $1")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: JobStatus,
        total_items: i64,
        processed_items: i64,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE runs
             SET status = $2, total_items = $3, processed_items = $4,
                 error = $5, finished_at = NOW()
             WHERE id = $1",
        )
        .bind(run_id)
        .bind(status)
        .bind(total_items)
        .bind(processed_items)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn run_history(&self, bot_id: Option<&str>, limit: i64) -> Result<Vec<Run>> {
        let runs = sqlx::query_as::<_, Run>(
            "SELECT id, bot_id, kind, status, started_at, finished_at,
                    total_items, processed_items, error, triggered_by
             FROM runs
             WHERE ($1::text IS NULL OR bot_id = $1)
             ORDER BY started_at DESC
             LIMIT $2",
        )
        .bind(bot_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(runs)
    }

    async fn insert_job_row(&self, snapshot: &JobSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO jobs (
                job_id, run_id, bot_id, kind, status, progress,
                current_step, log, started_at, finished_at, updated_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, NOW())",
        )
        .bind(snapshot.job_id)
        .bind(snapshot.run_id)
        .bind(&snapshot.bot_id)
        .bind(snapshot.kind)
        .bind(snapshot.status)
        .bind(i32::from(snapshot.progress))
        .bind(&snapshot.current_step)
        .bind(serde_json::to_value(&snapshot.log)?)
        .bind(snapshot.started_at)
        .bind(snapshot.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_job_row(&self, snapshot: &JobSnapshot) -> Result<()> {
        sqlx::query(
            "UPDATE jobs
             SET status = $2, progress = $3, current_step = $4, log = $5,
                 finished_at = $6, updated_at = NOW()
             WHERE job_id = $1",
        )
        .bind(snapshot.job_id)
        .bind(snapshot.status)
        .bind(i32::from(snapshot.progress))
        .bind(&snapshot.current_step)
        .bind(serde_json::to_value(&snapshot.log)?)
        .bind(snapshot.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn job_row(&self, job_id: Uuid) -> Result<Option<JobSnapshot>> {
        type JobRow = (
            Uuid,
            Uuid,
            String,
            crate::types::JobKind,
            JobStatus,
            i32,
            String,
            serde_json::Value,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
        );

        let row: Option<JobRow> = sqlx::query_as(
            "SELECT job_id, run_id, bot_id, kind, status, progress,
                    current_step, log, started_at, finished_at
             FROM jobs
             WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((job_id, run_id, bot_id, kind, status, progress, current_step, log, started_at, finished_at)) = row
        else {
            return Ok(None);
        };

        Ok(Some(JobSnapshot {
            job_id,
            run_id,
            bot_id,
            kind,
            status,
            progress: progress.clamp(0, 100) as u8,
            current_step,
            log: serde_json::from_value(log)
                .with_context(|| format!("decoding log for job {job_id}"))?,
            started_at,
            finished_at,
        }))
    }

    async fn fail_interrupted(&self, error: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE runs
             SET status = 'failed', error = $1, finished_at = NOW()
             WHERE status IN ('pending', 'running')",
        )
        .bind(error)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE jobs
             SET status = 'failed', updated_at = NOW()
             WHERE status IN ('pending', 'running')",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
