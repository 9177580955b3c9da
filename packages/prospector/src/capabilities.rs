//! Capability traits: the seams between the pipeline and the outside world.
//!
//! Bots differ in kind (lead vs inviter) but the pipeline only ever talks to
//! these four traits. Production wires reqwest-backed adapters; tests wire
//! scripted doubles from `crate::testing`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Bot, Item};

/// A post as the source returns it, before ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    pub external_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    /// None when the source timestamp could not be parsed.
    pub posted_at: Option<DateTime<Utc>>,
}

/// One page of a reverse-chronological group feed.
#[derive(Debug, Clone, Default)]
pub struct CrawlPage {
    pub posts: Vec<RawPost>,
    /// None means the feed is exhausted.
    pub next_cursor: Option<String>,
}

/// Pages through a source group, newest first.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn fetch_page(&self, group_id: &str, cursor: Option<&str>) -> Result<CrawlPage>;
}

/// Per-item verdict from the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub item_id: Uuid,
    pub included: bool,
}

/// Classifies a batch of collected items against the bot's prompt.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, bot: &Bot, items: &[Item]) -> Result<Vec<Decision>>;
}

/// Composes the outbound message for a lead-bot item.
#[async_trait]
pub trait Composer: Send + Sync {
    async fn compose(&self, bot: &Bot, item: &Item) -> Result<String>;
}

/// Delivers the action for one item: a direct message for lead bots, a group
/// invite for inviter bots.
#[async_trait]
pub trait Actor: Send + Sync {
    async fn deliver(&self, bot: &Bot, item: &Item, summary: &str) -> Result<()>;
}
