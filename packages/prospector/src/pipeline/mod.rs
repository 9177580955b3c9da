//! Pipeline stages and the context they run in.
//!
//! A job is a sequence of stages (collect, classify, act). Each stage gets a
//! `StageContext` that scopes progress reporting to the stage's window of the
//! job, exposes the cancel flag, and forwards log lines to the job handle.

pub mod act;
pub mod classify;
pub mod collect;
pub mod pacing;

pub use act::ActStage;
pub use classify::ClassifyStage;
pub use collect::CollectStage;
pub use pacing::PacingPolicy;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::jobs::JobHandle;
use crate::store::Store;
use crate::types::Bot;

/// The slice of job progress a stage owns, e.g. [33, 66] for classify in a
/// full run.
#[derive(Debug, Clone, Copy)]
pub struct ProgressWindow {
    pub lo: u8,
    pub hi: u8,
}

impl ProgressWindow {
    pub const FULL: ProgressWindow = ProgressWindow { lo: 0, hi: 100 };

    /// Map stage-local completion (0.0..=1.0) into the job's scale.
    pub fn map(&self, fraction: f64) -> u8 {
        let fraction = fraction.clamp(0.0, 1.0);
        let span = f64::from(self.hi - self.lo);
        self.lo + (fraction * span).round() as u8
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StageResult<T> = Result<T, StageError>;

/// Item counts a stage reports back for the run row.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageOutcome {
    pub total: i64,
    pub processed: i64,
}

/// Everything a stage needs from its surroundings.
#[derive(Clone)]
pub struct StageContext {
    pub store: Arc<dyn Store>,
    pub bot: Arc<Bot>,
    pub handle: JobHandle,
    pub window: ProgressWindow,
    pub pacing: PacingPolicy,
}

impl StageContext {
    /// Cooperative cancellation check, called at stage/batch/item boundaries.
    pub fn check_cancelled(&self) -> StageResult<()> {
        if self.handle.is_cancel_requested() {
            return Err(StageError::Cancelled);
        }
        Ok(())
    }

    /// Report stage-local completion; the window maps it onto the job.
    pub fn set_progress(&self, fraction: f64) {
        self.handle.set_progress(self.window.map(fraction));
    }

    pub fn log(&self, message: impl Into<String>) {
        self.handle.log(message);
    }
}

#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_maps_endpoints_and_midpoint() {
        let window = ProgressWindow { lo: 33, hi: 66 };
        assert_eq!(window.map(0.0), 33);
        assert_eq!(window.map(0.5), 50);
        assert_eq!(window.map(1.0), 66);
    }

    #[test]
    fn window_clamps_out_of_range_fractions() {
        let window = ProgressWindow { lo: 66, hi: 100 };
        assert_eq!(window.map(-0.5), 66);
        assert_eq!(window.map(1.5), 100);
    }

    #[test]
    fn full_window_spans_the_job() {
        assert_eq!(ProgressWindow::FULL.map(0.25), 25);
        assert_eq!(ProgressWindow::FULL.map(1.0), 100);
    }
}
