//! Job scheduling: one tokio task per job, a registry of live handles, and
//! the durable Run/job-row bookkeeping around them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::capabilities::{Actor, Classifier, Composer, Crawler};
use crate::dedup::DuplicateDetector;
use crate::pipeline::{
    ActStage, ClassifyStage, CollectStage, PacingPolicy, PipelineStage, ProgressWindow,
    StageContext, StageError,
};
use crate::store::Store;
use crate::types::{Bot, JobKind, JobStatus, Run};

use super::handle::{JobHandle, JobSnapshot};

/// Capabilities the pipeline stages are built from.
pub struct PipelineDeps {
    pub crawler: Arc<dyn Crawler>,
    pub classifier: Arc<dyn Classifier>,
    pub composer: Arc<dyn Composer>,
    pub actor: Arc<dyn Actor>,
    pub detector: DuplicateDetector,
    pub pacing: PacingPolicy,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// How often the registry cleanup loop runs.
    pub cleanup_interval: Duration,
    /// How long terminal handles stay visible before being purged.
    pub retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(300),
            retention: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Error)]
pub enum StartJobError {
    #[error("unknown bot: {0}")]
    UnknownBot(String),
    #[error("bot is disabled: {0}")]
    BotDisabled(String),
    #[error("bot {bot_id} already has a live {running} job")]
    Overlap { bot_id: String, running: JobKind },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Owns the live-job registry and spawns job tasks.
///
/// Explicit instance, injected where needed; registry mutations happen only
/// under the lock, and nothing awaits while holding it.
pub struct JobScheduler {
    store: Arc<dyn Store>,
    deps: Arc<PipelineDeps>,
    jobs: RwLock<HashMap<Uuid, JobHandle>>,
    config: SchedulerConfig,
}

impl JobScheduler {
    pub fn new(store: Arc<dyn Store>, deps: PipelineDeps, config: SchedulerConfig) -> Self {
        Self {
            store,
            deps: Arc::new(deps),
            jobs: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Start a job for a bot. Returns the job id immediately; the work runs
    /// on a spawned task.
    pub async fn start_job(
        &self,
        bot_id: &str,
        kind: JobKind,
        triggered_by: &str,
    ) -> Result<Uuid, StartJobError> {
        let bot = self
            .store
            .bot(bot_id)
            .await?
            .ok_or_else(|| StartJobError::UnknownBot(bot_id.to_string()))?;
        if !bot.enabled {
            return Err(StartJobError::BotDisabled(bot_id.to_string()));
        }

        let run = Run::new(bot_id, kind, triggered_by);
        let handle = JobHandle::new(run.id, bot_id, kind);
        let job_id = handle.job_id;

        // Overlap check and insert under one write lock, so two concurrent
        // start_job calls cannot both pass the check.
        {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            if let Some(live) = jobs
                .values()
                .find(|h| h.bot_id == bot_id && !h.status().is_terminal() && h.kind.overlaps(kind))
            {
                return Err(StartJobError::Overlap {
                    bot_id: bot_id.to_string(),
                    running: live.kind,
                });
            }
            jobs.insert(job_id, handle.clone());
        }

        // Persist the pending run and job row; back out the handle if that
        // fails so the registry never references rows that don't exist.
        let persisted: anyhow::Result<()> = async {
            self.store.insert_run(&run).await?;
            self.store.insert_job_row(&handle.snapshot()).await?;
            Ok(())
        }
        .await;
        if let Err(err) = persisted {
            let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
            jobs.remove(&job_id);
            return Err(StartJobError::Store(err));
        }

        info!(bot_id, %job_id, kind = %kind, triggered_by, "job started");

        let store = Arc::clone(&self.store);
        let deps = Arc::clone(&self.deps);
        let bot = Arc::new(bot);
        tokio::spawn(async move {
            run_job(store, deps, bot, handle).await;
        });

        Ok(job_id)
    }

    /// Request cancellation. False when the job is unknown or terminal.
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        match jobs.get(&job_id) {
            Some(handle) => {
                let requested = handle.request_cancel();
                if requested {
                    info!(%job_id, "cancellation requested");
                }
                requested
            }
            None => false,
        }
    }

    pub fn job_status(&self, job_id: Uuid) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        jobs.get(&job_id).map(JobHandle::snapshot)
    }

    /// Snapshots of all pending/running jobs, optionally for one bot.
    pub fn active_jobs(&self, bot_id: Option<&str>) -> Vec<JobSnapshot> {
        let jobs = self.jobs.read().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<JobSnapshot> = jobs
            .values()
            .filter(|h| !h.status().is_terminal())
            .filter(|h| bot_id.map_or(true, |b| h.bot_id == b))
            .map(JobHandle::snapshot)
            .collect();
        snapshots.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        snapshots
    }

    /// Drop terminal handles older than the retention window.
    pub fn cleanup(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.retention)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
        let mut jobs = self.jobs.write().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|_, handle| {
            let snap = handle.snapshot();
            match snap.finished_at {
                Some(finished) if snap.status.is_terminal() => finished > cutoff,
                _ => true,
            }
        });
        let purged = before - jobs.len();
        if purged > 0 {
            info!(purged, "purged terminal job handles");
        }
    }

    /// Background loop calling `cleanup` on the configured interval.
    pub fn spawn_cleanup(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cleanup_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                self.cleanup();
            }
        });
    }
}

fn stages_for(deps: &PipelineDeps, kind: JobKind) -> Vec<(Box<dyn PipelineStage>, ProgressWindow)> {
    let build = |stage: JobKind| -> Box<dyn PipelineStage> {
        match stage {
            JobKind::Collect => Box::new(CollectStage::new(Arc::clone(&deps.crawler))),
            JobKind::Classify => Box::new(ClassifyStage::new(
                Arc::clone(&deps.classifier),
                deps.detector.clone(),
            )),
            JobKind::Act => Box::new(ActStage::new(
                Arc::clone(&deps.composer),
                Arc::clone(&deps.actor),
            )),
            JobKind::Full => unreachable!("full expands to its stages"),
        }
    };

    match kind {
        JobKind::Full => vec![
            (build(JobKind::Collect), ProgressWindow { lo: 0, hi: 33 }),
            (build(JobKind::Classify), ProgressWindow { lo: 33, hi: 66 }),
            (build(JobKind::Act), ProgressWindow { lo: 66, hi: 100 }),
        ],
        single => vec![(build(single), ProgressWindow::FULL)],
    }
}

async fn run_job(
    store: Arc<dyn Store>,
    deps: Arc<PipelineDeps>,
    bot: Arc<Bot>,
    handle: JobHandle,
) {
    handle.set_status(JobStatus::Running);
    if let Err(err) = store.mark_run_running(handle.run_id).await {
        error!(job_id = %handle.job_id, error = %err, "failed to mark run running");
    }
    flush_job_row(&store, &handle).await;

    let mut total = 0i64;
    let mut processed = 0i64;
    let mut failure: Option<String> = None;
    let mut cancelled = false;

    for (stage, window) in stages_for(&deps, handle.kind) {
        if handle.is_cancel_requested() {
            cancelled = true;
            break;
        }

        handle.set_current_step(stage.name());
        handle.set_progress(window.lo);
        handle.log(format!("starting {}", stage.name()));

        let ctx = StageContext {
            store: Arc::clone(&store),
            bot: Arc::clone(&bot),
            handle: handle.clone(),
            window,
            pacing: deps.pacing,
        };

        match stage.run(&ctx).await {
            Ok(outcome) => {
                total += outcome.total;
                processed += outcome.processed;
                handle.set_progress(window.hi);
                flush_job_row(&store, &handle).await;
            }
            Err(StageError::Cancelled) => {
                cancelled = true;
                break;
            }
            Err(StageError::Other(err)) => {
                let message = format!("{} failed: {err:#}", stage.name());
                warn!(job_id = %handle.job_id, bot_id = %bot.bot_id, "{message}");
                handle.log(&message);
                failure = Some(message);
                break;
            }
        }
    }

    let status = if cancelled {
        handle.log("job cancelled");
        JobStatus::Cancelled
    } else if failure.is_some() {
        JobStatus::Failed
    } else {
        handle.set_progress(100);
        JobStatus::Completed
    };
    handle.set_status(status);

    if let Err(err) = store
        .finish_run(handle.run_id, status, total, processed, failure.as_deref())
        .await
    {
        error!(job_id = %handle.job_id, error = %err, "failed to finish run row");
    }
    flush_job_row(&store, &handle).await;

    info!(
        job_id = %handle.job_id,
        bot_id = %bot.bot_id,
        status = ?status,
        total,
        processed,
        "job finished"
    );
}

/// Mirror the live handle into the durable job row. Store failures here are
/// logged, not fatal; the live registry stays authoritative.
async fn flush_job_row(store: &Arc<dyn Store>, handle: &JobHandle) {
    if let Err(err) = store.update_job_row(&handle.snapshot()).await {
        error!(job_id = %handle.job_id, error = %err, "failed to update job row");
    }
}
