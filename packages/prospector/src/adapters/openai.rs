//! Minimal chat-completions client backing the classifier and composer.
//!
//! Prompts come from the bot profile; this module only handles transport and
//! response parsing.

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capabilities::{Classifier, Composer, Decision};
use crate::types::{Bot, Item};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn chat(&self, system: &str, user: String) -> Result<String> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: system.to_string(),
            },
            ChatMessage {
                role: "user",
                content: user,
            },
        ];

        let resp = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
            }))
            .send()
            .await
            .context("chat completion request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("chat completion error {status}: {body}"));
        }

        let body: ChatResponse = resp.json().await.context("decoding chat response")?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat response had no choices"))
    }
}

/// Models often wrap JSON in a markdown fence even when told not to.
fn strip_code_fence(s: &str) -> &str {
    let s = s.trim();
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

#[derive(Deserialize)]
struct RawDecision {
    id: String,
    included: bool,
}

#[async_trait]
impl Classifier for OpenAiClient {
    async fn classify(&self, bot: &Bot, items: &[Item]) -> Result<Vec<Decision>> {
        let listing = items
            .iter()
            .map(|item| {
                json!({
                    "id": item.id,
                    "author": item.author_name,
                    "content": item.content,
                })
            })
            .collect::<Vec<_>>();

        let user = format!(
            "Classify each post. Reply with a JSON array of objects \
             {{\"id\": \"<post id>\", \"included\": true|false}} and nothing else.\n\n{}",
            serde_json::to_string_pretty(&listing)?
        );

        let reply = self.chat(&bot.classification_prompt, user).await?;
        let raw: Vec<RawDecision> = serde_json::from_str(strip_code_fence(&reply))
            .context("classifier returned malformed JSON")?;

        raw.into_iter()
            .map(|d| {
                Ok(Decision {
                    item_id: d.id.parse().context("classifier returned a bad item id")?,
                    included: d.included,
                })
            })
            .collect()
    }
}

#[async_trait]
impl Composer for OpenAiClient {
    async fn compose(&self, bot: &Bot, item: &Item) -> Result<String> {
        let system = bot
            .message_prompt
            .as_deref()
            .ok_or_else(|| anyhow!("lead bot {} has no message_prompt", bot.bot_id))?;
        let user = format!(
            "Write a short, friendly first message to {} about their post:\n\n{}",
            item.author_name, item.content
        );
        self.chat(system, user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_plain_and_json_fences() {
        assert_eq!(strip_code_fence("```json\n[]\n```"), "[]");
        assert_eq!(strip_code_fence("```\n[]\n```"), "[]");
        assert_eq!(strip_code_fence("  [] "), "[]");
    }
}
