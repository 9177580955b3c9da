//! Classify stage: batch the unclassified backlog through the classifier,
//! then demote near-duplicate reposts before they become actionable.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tracing::info;

use crate::capabilities::Classifier;
use crate::dedup::DuplicateDetector;
use crate::types::Classification;

use super::{PipelineStage, StageContext, StageOutcome, StageResult};

pub struct ClassifyStage {
    classifier: Arc<dyn Classifier>,
    detector: DuplicateDetector,
}

impl ClassifyStage {
    pub fn new(classifier: Arc<dyn Classifier>, detector: DuplicateDetector) -> Self {
        Self {
            classifier,
            detector,
        }
    }
}

#[async_trait]
impl PipelineStage for ClassifyStage {
    fn name(&self) -> &'static str {
        "classify"
    }

    async fn run(&self, ctx: &StageContext) -> StageResult<StageOutcome> {
        let bot = &ctx.bot;
        let items = ctx.store.unclassified_items(&bot.bot_id).await?;
        let total = items.len();
        if total == 0 {
            ctx.log("classify: nothing to do");
            ctx.set_progress(1.0);
            return Ok(StageOutcome::default());
        }

        let batch_size = bot.classify_batch_size.max(1);
        let mut classified = 0i64;
        let mut included = 0i64;
        let mut demoted = 0i64;

        for batch in items.chunks(batch_size) {
            ctx.check_cancelled()?;

            // Classifier failure is stage-fatal; the unclassified items stay
            // as they are and a later run picks them up.
            let decisions = self
                .classifier
                .classify(bot, batch)
                .await
                .context("classifier call failed")?;

            for decision in decisions {
                let Some(item) = batch.iter().find(|i| i.id == decision.item_id) else {
                    continue;
                };

                let classification = if decision.included {
                    let priors = ctx
                        .store
                        .included_contents_for_author(&bot.bot_id, &item.author_id)
                        .await?;
                    if self.detector.is_repost(&item.content, &priors) {
                        demoted += 1;
                        ctx.log(format!(
                            "item {} demoted: repost of earlier post by {}",
                            item.external_id, item.author_name
                        ));
                        Classification::Excluded
                    } else {
                        included += 1;
                        Classification::Included
                    }
                } else {
                    Classification::Excluded
                };

                ctx.store.set_classification(item.id, classification).await?;
                classified += 1;
            }

            ctx.set_progress(classified as f64 / total as f64);
            ctx.pacing.pause().await;
        }

        info!(
            bot_id = %bot.bot_id,
            classified, included, demoted,
            "classify stage complete"
        );
        ctx.log(format!(
            "classify finished: {classified} items, {included} included, {demoted} reposts demoted"
        ));
        Ok(StageOutcome {
            total: total as i64,
            processed: classified,
        })
    }
}
