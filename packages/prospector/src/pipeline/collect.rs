//! Collect stage: incremental crawl of each source group.
//!
//! Groups are crawled newest-first. The cursor decides per post whether to
//! keep it, skip it, or stop the group entirely; the watermark only advances
//! after the whole group succeeds, and it advances to the crawl start time
//! rather than any post timestamp so clock skew between us and the source
//! cannot open a gap.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::capabilities::{Crawler, RawPost};
use crate::dedup::content_hash;
use crate::types::{Classification, Item};

use super::{PipelineStage, StageContext, StageError, StageOutcome, StageResult};

/// Consecutive items older than the watermark before a group stops.
const OLD_ITEM_STREAK: u32 = 3;
/// Consecutive empty pages before a group stops.
const MAX_EMPTY_FETCHES: u32 = 3;

/// What the cursor says about one observed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorVerdict {
    Keep,
    Skip,
    Stop,
}

/// Per-group crawl state: old-item streak and kept-item cap.
#[derive(Debug)]
pub struct CrawlCursor {
    watermark: Option<DateTime<Utc>>,
    streak: u32,
    kept: u32,
    max_items: u32,
}

impl CrawlCursor {
    pub fn new(watermark: Option<DateTime<Utc>>, max_items: u32) -> Self {
        Self {
            watermark,
            streak: 0,
            kept: 0,
            max_items,
        }
    }

    /// Feed the next post's timestamp, newest first.
    ///
    /// Posts strictly older than the watermark are skipped and grow the
    /// streak; the streak hitting its limit stops the group. Posts with no
    /// parseable timestamp count as recent and reset the streak, since they
    /// break the consecutive-old chain. A recent post past the item cap
    /// stops the group without being kept, so a cap of zero ingests nothing.
    pub fn observe(&mut self, posted_at: Option<DateTime<Utc>>) -> CursorVerdict {
        let is_old = match (posted_at, self.watermark) {
            (Some(posted), Some(mark)) => posted < mark,
            _ => false,
        };

        if is_old {
            self.streak += 1;
            if self.streak >= OLD_ITEM_STREAK {
                return CursorVerdict::Stop;
            }
            return CursorVerdict::Skip;
        }

        self.streak = 0;
        if self.kept >= self.max_items {
            return CursorVerdict::Stop;
        }
        self.kept += 1;
        CursorVerdict::Keep
    }

    pub fn kept(&self) -> u32 {
        self.kept
    }
}

pub struct CollectStage {
    crawler: Arc<dyn Crawler>,
}

impl CollectStage {
    pub fn new(crawler: Arc<dyn Crawler>) -> Self {
        Self { crawler }
    }

    async fn crawl_group(
        &self,
        ctx: &StageContext,
        group_id: &str,
        started_at: DateTime<Utc>,
    ) -> StageResult<i64> {
        let bot = &ctx.bot;
        let group = ctx
            .store
            .groups_for_bot(&bot.bot_id)
            .await?
            .into_iter()
            .find(|g| g.group_id == group_id);

        let watermark = if bot.force_full_recrawl {
            None
        } else {
            group.and_then(|g| g.last_sync_watermark)
        };

        let mut cursor = CrawlCursor::new(watermark, bot.max_items_per_group);
        let mut page_cursor: Option<String> = None;
        let mut empty_fetches = 0u32;
        let mut ingested = 0i64;

        'pages: loop {
            ctx.check_cancelled()?;

            let page = self
                .crawler
                .fetch_page(group_id, page_cursor.as_deref())
                .await
                .with_context(|| format!("fetching posts for group {group_id}"))?;

            if page.posts.is_empty() {
                empty_fetches += 1;
                if empty_fetches >= MAX_EMPTY_FETCHES || page.next_cursor.is_none() {
                    break;
                }
                page_cursor = page.next_cursor;
                ctx.pacing.pause().await;
                continue;
            }
            empty_fetches = 0;

            for post in &page.posts {
                match cursor.observe(post.posted_at) {
                    CursorVerdict::Keep => {
                        if self.ingest(ctx, group_id, post).await? {
                            ingested += 1;
                        }
                    }
                    CursorVerdict::Skip => {}
                    CursorVerdict::Stop => break 'pages,
                }
            }

            match page.next_cursor {
                Some(next) => page_cursor = Some(next),
                None => break,
            }
            ctx.pacing.pause().await;
        }

        ctx.store
            .record_group_success(&bot.bot_id, group_id, started_at)
            .await?;
        info!(bot_id = %bot.bot_id, group_id, ingested, "group crawl complete");
        Ok(ingested)
    }

    /// Returns true when the post was actually persisted.
    async fn ingest(&self, ctx: &StageContext, group_id: &str, post: &RawPost) -> StageResult<bool> {
        let bot = &ctx.bot;
        let hash = content_hash(&post.content);

        if ctx
            .store
            .exact_duplicate_exists(&bot.bot_id, &post.author_id, &hash)
            .await?
        {
            return Ok(false);
        }

        let item = Item {
            id: Uuid::new_v4(),
            bot_id: bot.bot_id.clone(),
            source_group_id: group_id.to_string(),
            external_id: post.external_id.clone(),
            author_id: post.author_id.clone(),
            author_name: post.author_name.clone(),
            content: post.content.clone(),
            content_hash: hash,
            posted_at: post.posted_at,
            classification: Classification::Unclassified,
            processed: false,
            collected_at: Utc::now(),
        };

        Ok(ctx.store.insert_item(&item).await?)
    }
}

#[async_trait]
impl PipelineStage for CollectStage {
    fn name(&self) -> &'static str {
        "collect"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let bot = Arc::clone(&ctx.bot);
        let started_at = Utc::now();
        let total_groups = bot.groups.len();
        let mut succeeded = 0usize;
        let mut ingested_total = 0i64;
        let mut last_error: Option<String> = None;

        for (idx, group_id) in bot.groups.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.store.ensure_group(&bot.bot_id, group_id).await?;
            ctx.log(format!("crawling group {group_id}"));

            match self.crawl_group(ctx, group_id, started_at).await {
                Ok(count) => {
                    succeeded += 1;
                    ingested_total += count;
                }
                Err(StageError::Cancelled) => return Err(StageError::Cancelled),
                Err(StageError::Other(err)) => {
                    warn!(bot_id = %bot.bot_id, group_id, error = %err, "group crawl failed");
                    ctx.log(format!("group {group_id} failed: {err:#}"));
                    ctx.store
                        .record_group_failure(&bot.bot_id, group_id, &format!("{err:#}"))
                        .await?;
                    last_error = Some(format!("{err:#}"));
                }
            }

            ctx.set_progress((idx + 1) as f64 / total_groups.max(1) as f64);
            if idx + 1 < total_groups {
                ctx.pacing.pause().await;
            }
        }

        if succeeded == 0 && total_groups > 0 {
            let detail = last_error.unwrap_or_else(|| "no groups configured".to_string());
            return Err(StageError::Other(anyhow::anyhow!(
                "all {total_groups} groups failed, last error: {detail}"
            )));
        }

        ctx.log(format!(
            "collect finished: {ingested_total} new items from {succeeded}/{total_groups} groups"
        ));
        Ok(StageOutcome {
            total: ingested_total,
            processed: ingested_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn no_watermark_keeps_everything_up_to_cap() {
        let mut cursor = CrawlCursor::new(None, 3);
        assert_eq!(cursor.observe(Some(ts(2024, 3, 1))), CursorVerdict::Keep);
        assert_eq!(cursor.observe(None), CursorVerdict::Keep);
        assert_eq!(cursor.observe(Some(ts(2024, 2, 1))), CursorVerdict::Keep);
        assert_eq!(cursor.observe(Some(ts(2024, 1, 1))), CursorVerdict::Stop);
        assert_eq!(cursor.kept(), 3);
    }

    #[test]
    fn zero_cap_keeps_nothing() {
        let mut cursor = CrawlCursor::new(None, 0);
        assert_eq!(cursor.observe(Some(ts(2024, 3, 1))), CursorVerdict::Stop);
        assert_eq!(cursor.kept(), 0);
    }

    #[test]
    fn three_consecutive_old_items_stop_the_group() {
        let mut cursor = CrawlCursor::new(Some(ts(2024, 1, 1)), 100);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 30))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 29))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 28))), CursorVerdict::Stop);
    }

    #[test]
    fn recent_item_resets_the_streak() {
        let mut cursor = CrawlCursor::new(Some(ts(2024, 1, 1)), 100);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 30))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 29))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2024, 1, 2))), CursorVerdict::Keep);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 28))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 27))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 26))), CursorVerdict::Stop);
    }

    #[test]
    fn unparseable_timestamp_counts_recent_and_resets_streak() {
        let mut cursor = CrawlCursor::new(Some(ts(2024, 1, 1)), 100);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 30))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 29))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(None), CursorVerdict::Keep);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 28))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 27))), CursorVerdict::Skip);
        assert_eq!(cursor.observe(Some(ts(2023, 12, 26))), CursorVerdict::Stop);
    }

    #[test]
    fn item_exactly_at_watermark_is_kept() {
        let mut cursor = CrawlCursor::new(Some(ts(2024, 1, 1)), 100);
        assert_eq!(cursor.observe(Some(ts(2024, 1, 1))), CursorVerdict::Keep);
    }
}
