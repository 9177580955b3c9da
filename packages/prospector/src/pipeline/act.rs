//! Act stage: deliver a message or invite for each included, unprocessed
//! item. Per-item failures are logged and skipped; one bad recipient must not
//! sink the rest of the batch.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::capabilities::{Actor, Composer};
use crate::types::{Action, BotKind};

use super::{PipelineStage, StageContext, StageError, StageOutcome, StageResult};

pub struct ActStage {
    composer: Arc<dyn Composer>,
    actor: Arc<dyn Actor>,
}

impl ActStage {
    pub fn new(composer: Arc<dyn Composer>, actor: Arc<dyn Actor>) -> Self {
        Self { composer, actor }
    }
}

#[async_trait]
impl PipelineStage for ActStage {
    fn name(&self) -> &'static str {
        "act"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let bot = &ctx.bot;

        // Misconfiguration check up front, before any delivery.
        if bot.kind == BotKind::Inviter && bot.target_group_id.is_none() {
            return Err(StageError::Other(anyhow!(
                "inviter bot {} has no target_group_id",
                bot.bot_id
            )));
        }

        let items = ctx
            .store
            .actionable_items(&bot.bot_id, bot.max_actions_per_run)
            .await?;
        let total = items.len();
        if total == 0 {
            ctx.log("act: nothing to do");
            ctx.set_progress(1.0);
            return Ok(StageOutcome::default());
        }

        let mut delivered = 0i64;

        for (idx, item) in items.iter().enumerate() {
            ctx.check_cancelled()?;
            ctx.pacing.pause().await;

            let result = async {
                let summary = match bot.kind {
                    BotKind::Lead => self.composer.compose(bot, item).await?,
                    BotKind::Inviter => {
                        let template = bot
                            .invite_template
                            .as_deref()
                            .unwrap_or("Hi {author}, we think you'd be a great fit for our group!");
                        template.replace("{author}", &item.author_name)
                    }
                };
                self.actor.deliver(bot, item, &summary).await?;
                Ok::<String, anyhow::Error>(summary)
            }
            .await;

            match result {
                Ok(summary) => {
                    ctx.store.mark_processed(item.id).await?;
                    ctx.store
                        .record_action(&Action::new(&bot.bot_id, item.id, summary))
                        .await?;
                    delivered += 1;
                }
                Err(err) => {
                    warn!(
                        bot_id = %bot.bot_id,
                        item_id = %item.id,
                        error = %err,
                        "action failed, skipping item"
                    );
                    ctx.log(format!("item {} failed: {err:#}", item.external_id));
                }
            }

            ctx.set_progress((idx + 1) as f64 / total as f64);
        }

        info!(bot_id = %bot.bot_id, delivered, total, "act stage complete");
        ctx.log(format!("act finished: {delivered}/{total} delivered"));
        Ok(StageOutcome {
            total: total as i64,
            processed: delivered,
        })
    }
}
