//! Persistence boundary.
//!
//! The pipeline and scheduler only see the `Store` trait. `PgStore` is the
//! production implementation; `MemoryStore` backs tests and local dev.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::jobs::JobSnapshot;
use crate::types::{Action, Bot, Classification, Item, Run, SourceGroup};

#[async_trait]
pub trait Store: Send + Sync {
    // Bots
    async fn bot(&self, bot_id: &str) -> Result<Option<Bot>>;

    // Source groups
    async fn groups_for_bot(&self, bot_id: &str) -> Result<Vec<SourceGroup>>;
    /// Creates the `(group_id, bot_id)` row if missing; no-op otherwise.
    async fn ensure_group(&self, bot_id: &str, group_id: &str) -> Result<()>;
    async fn record_group_success(
        &self,
        bot_id: &str,
        group_id: &str,
        watermark: DateTime<Utc>,
    ) -> Result<()>;
    async fn record_group_failure(&self, bot_id: &str, group_id: &str, error: &str) -> Result<()>;

    // Items
    /// Inserts the item; returns false when `(bot_id, source_group_id,
    /// external_id)` already exists.
    async fn insert_item(&self, item: &Item) -> Result<bool>;
    async fn exact_duplicate_exists(
        &self,
        bot_id: &str,
        author_id: &str,
        content_hash: &str,
    ) -> Result<bool>;
    async fn unclassified_items(&self, bot_id: &str) -> Result<Vec<Item>>;
    async fn set_classification(&self, item_id: Uuid, classification: Classification)
        -> Result<()>;
    /// Content of every already-included item by this author, for repost
    /// scoring.
    async fn included_contents_for_author(
        &self,
        bot_id: &str,
        author_id: &str,
    ) -> Result<Vec<String>>;
    /// Included, unprocessed items, oldest collected first, capped at `limit`.
    async fn actionable_items(&self, bot_id: &str, limit: usize) -> Result<Vec<Item>>;
    async fn mark_processed(&self, item_id: Uuid) -> Result<()>;

    // Actions
    async fn record_action(&self, action: &Action) -> Result<()>;

    // Runs
    async fn insert_run(&self, run: &Run) -> Result<()>;
    async fn mark_run_running(&self, run_id: Uuid) -> Result<()>;
    /// Terminal update: sets status, counts, error and `finished_at`.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: crate::types::JobStatus,
        total_items: i64,
        processed_items: i64,
        error: Option<&str>,
    ) -> Result<()>;
    async fn run_history(&self, bot_id: Option<&str>, limit: i64) -> Result<Vec<Run>>;

    // Job rows (durable mirror of the live registry)
    async fn insert_job_row(&self, snapshot: &JobSnapshot) -> Result<()>;
    async fn update_job_row(&self, snapshot: &JobSnapshot) -> Result<()>;
    /// Persisted snapshot, outliving the live registry's retention window.
    async fn job_row(&self, job_id: Uuid) -> Result<Option<JobSnapshot>>;

    /// Startup sweep: every run and job row still pending/running becomes
    /// failed with the given error. Returns how many runs were swept.
    async fn fail_interrupted(&self, error: &str) -> Result<u64>;
}
