//! Client for the external scrape gateway.
//!
//! The gateway owns browser sessions and site mechanics; we only speak its
//! REST surface: paged group feeds, message delivery and group invites.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::{Actor, CrawlPage, Crawler, RawPost};
use crate::types::{Bot, BotKind, Item};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("gateway error {status}: {message}")]
    Api { status: u16, message: String },
}

#[derive(Deserialize)]
pub struct PostsResponse {
    pub posts: Vec<RawPost>,
    pub next_cursor: Option<String>,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    recipient_id: &'a str,
    body: &'a str,
}

#[derive(Serialize)]
struct InviteRequest<'a> {
    user_id: &'a str,
    group_id: &'a str,
    note: &'a str,
}

pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    async fn check<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(resp.json().await?)
    }

    async fn check_empty(resp: reqwest::Response) -> Result<(), GatewayError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }

    /// One page of a group feed, newest first.
    pub async fn group_posts(
        &self,
        group_id: &str,
        cursor: Option<&str>,
    ) -> Result<PostsResponse, GatewayError> {
        let mut url = format!("{}/v1/groups/{}/posts", self.base_url, group_id);
        if let Some(cursor) = cursor {
            url.push_str(&format!("?cursor={cursor}"));
        }
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(resp).await
    }

    pub async fn send_message(&self, recipient_id: &str, body: &str) -> Result<(), GatewayError> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&MessageRequest { recipient_id, body })
            .send()
            .await?;
        Self::check_empty(resp).await
    }

    pub async fn send_invite(
        &self,
        user_id: &str,
        group_id: &str,
        note: &str,
    ) -> Result<(), GatewayError> {
        let url = format!("{}/v1/invites", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&InviteRequest {
                user_id,
                group_id,
                note,
            })
            .send()
            .await?;
        Self::check_empty(resp).await
    }
}

#[async_trait]
impl Crawler for GatewayClient {
    async fn fetch_page(&self, group_id: &str, cursor: Option<&str>) -> anyhow::Result<CrawlPage> {
        let page = self.group_posts(group_id, cursor).await?;
        Ok(CrawlPage {
            posts: page.posts,
            next_cursor: page.next_cursor,
        })
    }
}

#[async_trait]
impl Actor for GatewayClient {
    async fn deliver(&self, bot: &Bot, item: &Item, summary: &str) -> anyhow::Result<()> {
        match bot.kind {
            BotKind::Lead => self.send_message(&item.author_id, summary).await?,
            BotKind::Inviter => {
                let group_id = bot
                    .target_group_id
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("inviter bot has no target_group_id"))?;
                self.send_invite(&item.author_id, group_id, summary).await?;
            }
        }
        Ok(())
    }
}
