//! Live job handles.
//!
//! A `JobHandle` is the in-memory view of a running job: status, progress,
//! current step, log lines and the cooperative cancel flag. The scheduler
//! keeps handles in its registry and mirrors snapshots into the durable job
//! row at stage boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{JobKind, JobStatus};

/// One timestamped line in a job's log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Point-in-time copy of a job's state, safe to serialize and ship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub bot_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0..=100 across the whole job.
    pub progress: u8,
    pub current_step: String,
    pub log: Vec<LogEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct JobInner {
    status: JobStatus,
    progress: u8,
    current_step: String,
    log: Vec<LogEntry>,
    finished_at: Option<DateTime<Utc>>,
}

/// Shared mutable job state. Clones are cheap and refer to the same job.
#[derive(Clone)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub bot_id: String,
    pub kind: JobKind,
    pub started_at: DateTime<Utc>,
    cancel: Arc<AtomicBool>,
    inner: Arc<RwLock<JobInner>>,
}

impl JobHandle {
    pub fn new(run_id: Uuid, bot_id: &str, kind: JobKind) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            run_id,
            bot_id: bot_id.to_string(),
            kind,
            started_at: Utc::now(),
            cancel: Arc::new(AtomicBool::new(false)),
            inner: Arc::new(RwLock::new(JobInner {
                status: JobStatus::Pending,
                progress: 0,
                current_step: String::new(),
                log: Vec::new(),
                finished_at: None,
            })),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Request cancellation. Returns false when the job is already terminal.
    pub fn request_cancel(&self) -> bool {
        if self.status().is_terminal() {
            return false;
        }
        self.cancel.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> JobStatus {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).status
    }

    /// Transition the status. Terminal states are absorbing: once the job is
    /// completed/failed/cancelled, further transitions are ignored.
    pub fn set_status(&self, status: JobStatus) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.status.is_terminal() {
            return;
        }
        inner.status = status;
        if status.is_terminal() {
            inner.finished_at = Some(Utc::now());
        }
    }

    pub fn set_progress(&self, progress: u8) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.progress = progress.min(100);
    }

    pub fn set_current_step(&self, step: &str) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.current_step = step.to_string();
    }

    pub fn log(&self, message: impl Into<String>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.log.push(LogEntry {
            at: Utc::now(),
            message: message.into(),
        });
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        JobSnapshot {
            job_id: self.job_id,
            run_id: self.run_id,
            bot_id: self.bot_id.clone(),
            kind: self.kind,
            status: inner.status,
            progress: inner.progress,
            current_step: inner.current_step.clone(),
            log: inner.log.clone(),
            started_at: self.started_at,
            finished_at: inner.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_status_is_absorbing() {
        let handle = JobHandle::new(Uuid::new_v4(), "garden-leads", JobKind::Collect);
        handle.set_status(JobStatus::Running);
        handle.set_status(JobStatus::Cancelled);
        assert_eq!(handle.status(), JobStatus::Cancelled);

        // Late writes from the finishing task must not resurrect the job.
        handle.set_status(JobStatus::Completed);
        assert_eq!(handle.status(), JobStatus::Cancelled);
        handle.set_status(JobStatus::Running);
        assert_eq!(handle.status(), JobStatus::Cancelled);
    }

    #[test]
    fn cancel_after_terminal_returns_false() {
        let handle = JobHandle::new(Uuid::new_v4(), "garden-leads", JobKind::Act);
        handle.set_status(JobStatus::Completed);
        assert!(!handle.request_cancel());
        assert!(!handle.is_cancel_requested());
    }

    #[test]
    fn cancel_sets_flag_once_running() {
        let handle = JobHandle::new(Uuid::new_v4(), "garden-leads", JobKind::Full);
        handle.set_status(JobStatus::Running);
        assert!(handle.request_cancel());
        assert!(handle.is_cancel_requested());
    }

    #[test]
    fn progress_is_clamped() {
        let handle = JobHandle::new(Uuid::new_v4(), "garden-leads", JobKind::Classify);
        handle.set_progress(250);
        assert_eq!(handle.snapshot().progress, 100);
    }

    #[test]
    fn snapshot_carries_log_and_step() {
        let handle = JobHandle::new(Uuid::new_v4(), "garden-leads", JobKind::Collect);
        handle.set_current_step("collect");
        handle.log("crawling group g1");
        let snap = handle.snapshot();
        assert_eq!(snap.current_step, "collect");
        assert_eq!(snap.log.len(), 1);
        assert_eq!(snap.log[0].message, "crawling group g1");
        assert!(snap.finished_at.is_none());
    }
}
