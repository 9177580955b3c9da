//! In-memory store for tests and local development.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::jobs::JobSnapshot;
use crate::types::{Action, Bot, Classification, Item, JobStatus, Run, SourceGroup};

use super::Store;

#[derive(Default)]
struct Inner {
    bots: HashMap<String, Bot>,
    // keyed by (bot_id, group_id)
    groups: HashMap<(String, String), SourceGroup>,
    items: Vec<Item>,
    actions: Vec<Action>,
    runs: HashMap<Uuid, Run>,
    job_rows: HashMap<Uuid, JobSnapshot>,
}

/// Everything under one lock; fine at test scale.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_bot(&self, bot: Bot) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.bots.insert(bot.bot_id.clone(), bot);
    }

    pub fn seed_group(&self, group: SourceGroup) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .groups
            .insert((group.bot_id.clone(), group.group_id.clone()), group);
    }

    pub fn seed_item(&self, item: Item) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.items.push(item);
    }

    pub fn seed_run(&self, run: Run) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.runs.insert(run.id, run);
    }

    pub fn seed_job_row(&self, snapshot: JobSnapshot) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.job_rows.insert(snapshot.job_id, snapshot);
    }

    // Inspection helpers for tests

    pub fn items(&self) -> Vec<Item> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .clone()
    }

    pub fn actions(&self) -> Vec<Action> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .actions
            .clone()
    }

    pub fn run(&self, run_id: Uuid) -> Option<Run> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .runs
            .get(&run_id)
            .cloned()
    }

    pub fn group(&self, bot_id: &str, group_id: &str) -> Option<SourceGroup> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .groups
            .get(&(bot_id.to_string(), group_id.to_string()))
            .cloned()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn bot(&self, bot_id: &str) -> Result<Option<Bot>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.bots.get(bot_id).cloned())
    }

    async fn groups_for_bot(&self, bot_id: &str) -> Result<Vec<SourceGroup>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut groups: Vec<SourceGroup> = inner
            .groups
            .values()
            .filter(|g| g.bot_id == bot_id)
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
        Ok(groups)
    }

    async fn ensure_group(&self, bot_id: &str, group_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .groups
            .entry((bot_id.to_string(), group_id.to_string()))
            .or_insert_with(|| SourceGroup {
                group_id: group_id.to_string(),
                bot_id: bot_id.to_string(),
                last_sync_watermark: None,
                last_run_failed: false,
                last_error: None,
            });
        Ok(())
    }

    async fn record_group_success(
        &self,
        bot_id: &str,
        group_id: &str,
        watermark: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(group) = inner
            .groups
            .get_mut(&(bot_id.to_string(), group_id.to_string()))
        {
            group.last_sync_watermark = Some(watermark);
            group.last_run_failed = false;
            group.last_error = None;
        }
        Ok(())
    }

    async fn record_group_failure(&self, bot_id: &str, group_id: &str, error: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(group) = inner
            .groups
            .get_mut(&(bot_id.to_string(), group_id.to_string()))
        {
            group.last_run_failed = true;
            group.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn insert_item(&self, item: &Item) -> Result<bool> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let exists = inner.items.iter().any(|i| {
            i.bot_id == item.bot_id
                && i.source_group_id == item.source_group_id
                && i.external_id == item.external_id
        });
        if exists {
            return Ok(false);
        }
        inner.items.push(item.clone());
        Ok(true)
    }

    async fn exact_duplicate_exists(
        &self,
        bot_id: &str,
        author_id: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.items.iter().any(|i| {
            i.bot_id == bot_id && i.author_id == author_id && i.content_hash == content_hash
        }))
    }

    async fn unclassified_items(&self, bot_id: &str) -> Result<Vec<Item>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .items
            .iter()
            .filter(|i| i.bot_id == bot_id && i.classification == Classification::Unclassified)
            .cloned()
            .collect())
    }

    async fn set_classification(
        &self,
        item_id: Uuid,
        classification: Classification,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = inner.items.iter_mut().find(|i| i.id == item_id) {
            item.classification = classification;
        }
        Ok(())
    }

    async fn included_contents_for_author(
        &self,
        bot_id: &str,
        author_id: &str,
    ) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .items
            .iter()
            .filter(|i| {
                i.bot_id == bot_id
                    && i.author_id == author_id
                    && i.classification == Classification::Included
            })
            .map(|i| i.content.clone())
            .collect())
    }

    async fn actionable_items(&self, bot_id: &str, limit: usize) -> Result<Vec<Item>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut items: Vec<Item> = inner
            .items
            .iter()
            .filter(|i| {
                i.bot_id == bot_id && i.classification == Classification::Included && !i.processed
            })
            .cloned()
            .collect();
        items.sort_by_key(|i| i.collected_at);
        items.truncate(limit);
        Ok(items)
    }

    async fn mark_processed(&self, item_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(item) = inner.items.iter_mut().find(|i| i.id == item_id) {
            item.processed = true;
        }
        Ok(())
    }

    async fn record_action(&self, action: &Action) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.actions.push(action.clone());
        Ok(())
    }

    async fn insert_run(&self, run: &Run) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn mark_run_running(&self, run_id: Uuid) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(run) = inner.runs.get_mut(&run_id) {
            run.status = JobStatus::Running;
        }
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
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(run) = inner.runs.get_mut(&run_id) {
            run.status = status;
            run.total_items = total_items;
            run.processed_items = processed_items;
            run.error = error.map(String::from);
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn run_history(&self, bot_id: Option<&str>, limit: i64) -> Result<Vec<Run>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut runs: Vec<Run> = inner
            .runs
            .values()
            .filter(|r| bot_id.map_or(true, |b| r.bot_id == b))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn insert_job_row(&self, snapshot: &JobSnapshot) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.job_rows.insert(snapshot.job_id, snapshot.clone());
        Ok(())
    }

    async fn update_job_row(&self, snapshot: &JobSnapshot) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.job_rows.insert(snapshot.job_id, snapshot.clone());
        Ok(())
    }

    async fn job_row(&self, job_id: Uuid) -> Result<Option<JobSnapshot>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Ok(inner.job_rows.get(&job_id).cloned())
    }

    async fn fail_interrupted(&self, error: &str) -> Result<u64> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let mut swept = 0;
        for run in inner.runs.values_mut() {
            if !run.status.is_terminal() {
                run.status = JobStatus::Failed;
                run.error = Some(error.to_string());
                run.finished_at = Some(Utc::now());
                swept += 1;
            }
        }
        for row in inner.job_rows.values_mut() {
            if !row.status.is_terminal() {
                row.status = JobStatus::Failed;
            }
        }
        Ok(swept)
    }
}
