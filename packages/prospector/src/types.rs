//! Core domain types: bots, source groups, items, runs and actions.
//!
//! Everything here is plain data keyed by string/uuid foreign keys. No
//! back-references between rows; relationships are resolved with explicit
//! queries in the store layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// What a bot does with items the classifier accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotKind {
    /// Finds leads and sends each one a composed direct message.
    Lead,
    /// Finds candidates and invites them to a target group.
    Inviter,
}

/// Which pipeline stage(s) a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Collect,
    Classify,
    Act,
    Full,
}

impl JobKind {
    /// The individual stages this kind executes.
    pub fn stages(&self) -> &'static [JobKind] {
        match self {
            JobKind::Full => &[JobKind::Collect, JobKind::Classify, JobKind::Act],
            JobKind::Collect => &[JobKind::Collect],
            JobKind::Classify => &[JobKind::Classify],
            JobKind::Act => &[JobKind::Act],
        }
    }

    /// Whether two job kinds would touch the same stage on the same bot.
    pub fn overlaps(&self, other: JobKind) -> bool {
        self.stages().iter().any(|s| other.stages().contains(s))
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collect" => Ok(JobKind::Collect),
            "classify" => Ok(JobKind::Classify),
            "act" => Ok(JobKind::Act),
            "full" => Ok(JobKind::Full),
            other => Err(format!("unknown job kind: {other}")),
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::Collect => "collect",
            JobKind::Classify => "classify",
            JobKind::Act => "act",
            JobKind::Full => "full",
        };
        f.write_str(s)
    }
}

/// Lifecycle of a run/job. `Pending` only exists between row creation and
/// the spawned task starting; all three right-hand states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Tri-state classification flag on an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "classification", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    #[default]
    Unclassified,
    Included,
    Excluded,
}

// ============================================================================
// Bot
// ============================================================================

fn default_enabled() -> bool {
    true
}

fn default_max_items_per_group() -> u32 {
    200
}

fn default_classify_batch_size() -> usize {
    10
}

fn default_max_actions_per_run() -> usize {
    25
}

/// A bot profile: what to crawl and how to classify/act on the results.
///
/// Table-backed (one JSONB `config` per row), loaded once per job and
/// immutable for the duration of a run. Prompts and templates are data here,
/// not code: `BotKind` picks the capability path, the profile supplies the
/// text.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Bot {
    pub bot_id: String,
    pub name: String,
    pub kind: BotKind,
    #[serde(default = "default_enabled")]
    #[builder(default = true)]
    pub enabled: bool,
    /// Source groups this bot crawls.
    pub groups: Vec<String>,

    // Collect settings
    #[serde(default)]
    #[builder(default)]
    pub force_full_recrawl: bool,
    #[serde(default = "default_max_items_per_group")]
    #[builder(default = 200)]
    pub max_items_per_group: u32,

    // Classify settings
    #[serde(default = "default_classify_batch_size")]
    #[builder(default = 10)]
    pub classify_batch_size: usize,
    #[serde(default)]
    #[builder(default)]
    pub classification_prompt: String,

    // Act settings
    #[serde(default = "default_max_actions_per_run")]
    #[builder(default = 25)]
    pub max_actions_per_run: usize,
    /// Lead bots: system prompt for composing direct messages.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub message_prompt: Option<String>,
    /// Inviter bots: invitation note, `{author}` is substituted.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub invite_template: Option<String>,
    /// Inviter bots: the group candidates are invited into.
    #[serde(default)]
    #[builder(default, setter(strip_option))]
    pub target_group_id: Option<String>,
}

// ============================================================================
// Source groups and items
// ============================================================================

/// Per-(bot, group) crawl watermark. Mutated only by the collect stage, at
/// most once per crawl attempt.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct SourceGroup {
    pub group_id: String,
    pub bot_id: String,
    /// Timestamp boundary below which this group is considered synchronized.
    pub last_sync_watermark: Option<DateTime<Utc>>,
    pub last_run_failed: bool,
    pub last_error: Option<String>,
}

/// A collected post. Unique per `(bot_id, source_group_id, external_id)`.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub bot_id: String,
    pub source_group_id: String,
    pub external_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub content_hash: String,
    /// None when the source gave no parseable timestamp.
    pub posted_at: Option<DateTime<Utc>>,
    pub classification: Classification,
    pub processed: bool,
    pub collected_at: DateTime<Utc>,
}

/// One delivered message/invite, written by the act stage.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub id: Uuid,
    pub bot_id: String,
    pub item_id: Uuid,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

impl Action {
    pub fn new(bot_id: &str, item_id: Uuid, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot_id: bot_id.to_string(),
            item_id,
            summary: summary.into(),
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// Runs
// ============================================================================

/// Append-only history row, one per scheduler invocation for a bot.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub bot_id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_items: i64,
    pub processed_items: i64,
    pub error: Option<String>,
    pub triggered_by: String,
}

impl Run {
    pub fn new(bot_id: &str, kind: JobKind, triggered_by: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            bot_id: bot_id.to_string(),
            kind,
            status: JobStatus::Pending,
            started_at: Utc::now(),
            finished_at: None,
            total_items: 0,
            processed_items: 0,
            error: None,
            triggered_by: triggered_by.to_string(),
        }
    }
}
