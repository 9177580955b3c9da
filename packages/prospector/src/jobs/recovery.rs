//! Startup recovery: runs and job rows left pending/running by a crash are
//! orphans, since live handles never survive the process.

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::store::Store;

pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

/// Sweep before the scheduler accepts any work.
pub async fn fail_interrupted_jobs(store: &Arc<dyn Store>) -> Result<u64> {
    let swept = store.fail_interrupted(INTERRUPTED_MESSAGE).await?;
    if swept > 0 {
        warn!(swept, "marked interrupted runs as failed");
    } else {
        info!("no interrupted runs found");
    }
    Ok(swept)
}
