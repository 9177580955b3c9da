//! Scripted capability implementations and fixture builders for tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::capabilities::{Actor, Classifier, Composer, CrawlPage, Crawler, Decision, RawPost};
use crate::dedup::content_hash;
use crate::types::{Bot, BotKind, Classification, Item};

pub fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
}

pub fn post(external_id: &str, author_id: &str, content: &str, posted_at: Option<DateTime<Utc>>) -> RawPost {
    RawPost {
        external_id: external_id.to_string(),
        author_id: author_id.to_string(),
        author_name: format!("Author {author_id}"),
        content: content.to_string(),
        posted_at,
    }
}

pub fn lead_bot(bot_id: &str, groups: &[&str]) -> Bot {
    Bot::builder()
        .bot_id(bot_id)
        .name(format!("{bot_id} (test)"))
        .kind(BotKind::Lead)
        .groups(groups.iter().map(|g| g.to_string()).collect::<Vec<_>>())
        .message_prompt("You write short friendly messages.")
        .build()
}

pub fn inviter_bot(bot_id: &str, groups: &[&str], target_group_id: &str) -> Bot {
    Bot::builder()
        .bot_id(bot_id)
        .name(format!("{bot_id} (test)"))
        .kind(BotKind::Inviter)
        .groups(groups.iter().map(|g| g.to_string()).collect::<Vec<_>>())
        .invite_template("Hi {author}, join us!")
        .target_group_id(target_group_id)
        .build()
}

pub fn item(bot_id: &str, group_id: &str, external_id: &str, author_id: &str, content: &str) -> Item {
    Item {
        id: Uuid::new_v4(),
        bot_id: bot_id.to_string(),
        source_group_id: group_id.to_string(),
        external_id: external_id.to_string(),
        author_id: author_id.to_string(),
        author_name: format!("Author {author_id}"),
        content: content.to_string(),
        content_hash: content_hash(content),
        posted_at: Some(utc(2024, 6, 1)),
        classification: Classification::Unclassified,
        processed: false,
        collected_at: Utc::now(),
    }
}

/// Serves pre-scripted pages per group; cursors are page indices.
pub struct ScriptedCrawler {
    pages: HashMap<String, Vec<Vec<RawPost>>>,
    /// Groups whose fetches always fail.
    failing_groups: Vec<String>,
}

impl ScriptedCrawler {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            failing_groups: Vec::new(),
        }
    }

    pub fn with_pages(mut self, group_id: &str, pages: Vec<Vec<RawPost>>) -> Self {
        self.pages.insert(group_id.to_string(), pages);
        self
    }

    pub fn with_failing_group(mut self, group_id: &str) -> Self {
        self.failing_groups.push(group_id.to_string());
        self
    }
}

impl Default for ScriptedCrawler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Crawler for ScriptedCrawler {
    async fn fetch_page(&self, group_id: &str, cursor: Option<&str>) -> Result<CrawlPage> {
        if self.failing_groups.iter().any(|g| g == group_id) {
            return Err(anyhow!("source unavailable for group {group_id}"));
        }

        let pages = self.pages.get(group_id).cloned().unwrap_or_default();
        let index: usize = match cursor {
            Some(c) => c.parse()?,
            None => 0,
        };

        let posts = pages.get(index).cloned().unwrap_or_default();
        let next_cursor = if index + 1 < pages.len() {
            Some((index + 1).to_string())
        } else {
            None
        };
        Ok(CrawlPage { posts, next_cursor })
    }
}

/// Never-ending feed of slow pages, for exercising cancellation mid-crawl.
pub struct StallCrawler {
    delay: Duration,
}

impl StallCrawler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Crawler for StallCrawler {
    async fn fetch_page(&self, _group_id: &str, cursor: Option<&str>) -> Result<CrawlPage> {
        tokio::time::sleep(self.delay).await;
        let index: usize = match cursor {
            Some(c) => c.parse()?,
            None => 0,
        };
        Ok(CrawlPage {
            posts: vec![post(
                &format!("stall-{index}"),
                "stall-author",
                &format!("stalling post number {index}"),
                Some(Utc::now()),
            )],
            next_cursor: Some((index + 1).to_string()),
        })
    }
}

/// Includes any item whose content contains one of the keywords.
pub struct KeywordClassifier {
    keywords: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, _bot: &Bot, items: &[Item]) -> Result<Vec<Decision>> {
        Ok(items
            .iter()
            .map(|item| {
                let content = item.content.to_lowercase();
                Decision {
                    item_id: item.id,
                    included: self.keywords.iter().any(|k| content.contains(k)),
                }
            })
            .collect())
    }
}

/// Always errors, as an unreachable classifier backend would.
pub struct FailingClassifier;

#[async_trait]
impl Classifier for FailingClassifier {
    async fn classify(&self, _bot: &Bot, _items: &[Item]) -> Result<Vec<Decision>> {
        Err(anyhow!("classifier backend unavailable"))
    }
}

/// Deterministic composer for asserting on delivered text.
pub struct TemplateComposer;

#[async_trait]
impl Composer for TemplateComposer {
    async fn compose(&self, _bot: &Bot, item: &Item) -> Result<String> {
        Ok(format!("Hi {}, saw your post!", item.author_name))
    }
}

/// Records deliveries; optionally fails for chosen authors.
#[derive(Default)]
pub struct RecordingActor {
    delivered: Mutex<Vec<(Uuid, String)>>,
    fail_for: Vec<String>,
}

impl RecordingActor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(authors: &[&str]) -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail_for: authors.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn delivered(&self) -> Vec<(Uuid, String)> {
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Actor for RecordingActor {
    async fn deliver(&self, _bot: &Bot, item: &Item, summary: &str) -> Result<()> {
        if self.fail_for.iter().any(|a| a == &item.author_id) {
            return Err(anyhow!("delivery rejected for {}", item.author_id));
        }
        self.delivered
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((item.id, summary.to_string()));
        Ok(())
    }
}
