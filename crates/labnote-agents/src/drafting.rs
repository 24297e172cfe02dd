//! Draft generation: one prompt fanned out to every roster model.
//!
//! ```text
//! retrieve context (k snippets) ─► build user prompt
//!   JoinSet::spawn(generate(model_i)) × N, each under the call timeout
//!   join all ─► sort by roster index ─► drop Err / empty ─► Vec<Draft>
//! ```
//!
//! The join waits for every call; a slow or failed model contributes nothing
//! and never cancels its siblings.

use std::sync::Arc;
use std::time::{Duration, Instant};

use coordination::{Draft, TaskContext};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use crate::errors::ModelError;
use crate::model_port::{generate_with_timeout, ChatRequest, ModelPort};
use crate::prompts::{draft_user_prompt, retrieval_query, DRAFTER_PREAMBLE};
use crate::retrieval::{format_context, ContextRetriever};

/// A roster model whose call produced no draft this cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedDraft {
    pub model: String,
    /// `ModelError::kind()` of the failure, or `panic` for a crashed task.
    pub cause: String,
    pub message: String,
}

/// Everything one generation step produced.
#[derive(Debug, Clone)]
pub struct DraftBatch {
    /// Successful drafts in roster order.
    pub drafts: Vec<Draft>,
    pub requested: usize,
    pub dropped: Vec<DroppedDraft>,
    /// The user prompt every model received.
    pub user_prompt: String,
    pub elapsed: Duration,
}

/// Fans a draft prompt out to the configured roster.
pub struct DraftGenerator {
    port: Arc<dyn ModelPort>,
    retriever: Arc<dyn ContextRetriever>,
    roster: Vec<String>,
    temperature: f32,
    call_timeout: Duration,
    retrieval_k: usize,
}

impl DraftGenerator {
    pub fn new(
        port: Arc<dyn ModelPort>,
        retriever: Arc<dyn ContextRetriever>,
        roster: Vec<String>,
    ) -> Self {
        Self {
            port,
            retriever,
            roster,
            temperature: 0.3,
            call_timeout: Duration::from_secs(120),
            retrieval_k: 3,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_retrieval_k(mut self, k: usize) -> Self {
        self.retrieval_k = k;
        self
    }

    /// Reference context for the task, formatted for the prompt.
    ///
    /// Retrieval errors degrade to "no context" rather than failing the cycle.
    async fn context_for(&self, task: &TaskContext) -> String {
        let query = retrieval_query(task);
        match self.retriever.retrieve(&query, self.retrieval_k).await {
            Ok(snippets) => self.retriever.format_context(&snippets),
            Err(e) => {
                warn!(error = %e, "context retrieval failed, drafting without SOP context");
                format_context(&[])
            }
        }
    }

    /// Run one generation step.
    #[instrument(skip(self, task, feedback), fields(unit = %task.unit.id, section = %task.section))]
    pub async fn generate(&self, task: &TaskContext, feedback: &str) -> DraftBatch {
        let start = Instant::now();
        let context = self.context_for(task).await;
        let user_prompt = draft_user_prompt(task, &context, feedback);

        info!(
            models = self.roster.len(),
            revision = !feedback.is_empty(),
            "fanning out draft requests"
        );

        let mut join_set: JoinSet<(usize, String, Result<String, ModelError>)> = JoinSet::new();
        for (index, model) in self.roster.iter().enumerate() {
            let port = self.port.clone();
            let request = ChatRequest::new(
                model.clone(),
                DRAFTER_PREAMBLE,
                user_prompt.clone(),
                self.temperature,
            );
            let limit = self.call_timeout;
            join_set.spawn(async move {
                let result = generate_with_timeout(port.as_ref(), &request, limit).await;
                (index, request.model, result)
            });
        }

        let mut slots: Vec<Option<Result<String, ModelError>>> = vec![None; self.roster.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, model, result)) => {
                    debug!(%model, ok = result.is_ok(), "draft call finished");
                    slots[index] = Some(result);
                }
                Err(e) => {
                    // Slot stays empty and is reported as a panic below.
                    warn!(error = %e, "draft task panicked");
                }
            }
        }

        let mut drafts = Vec::new();
        let mut dropped = Vec::new();
        for (model, slot) in self.roster.iter().zip(slots) {
            match slot {
                Some(Ok(text)) if !text.trim().is_empty() => {
                    drafts.push(Draft::new(model.clone(), text));
                }
                Some(Ok(_)) => {
                    let err = ModelError::EmptyCompletion;
                    warn!(%model, cause = err.kind(), "draft dropped");
                    dropped.push(DroppedDraft {
                        model: model.clone(),
                        cause: err.kind().to_string(),
                        message: err.to_string(),
                    });
                }
                Some(Err(err)) => {
                    warn!(%model, cause = err.kind(), error = %err, "draft dropped");
                    dropped.push(DroppedDraft {
                        model: model.clone(),
                        cause: err.kind().to_string(),
                        message: err.to_string(),
                    });
                }
                None => dropped.push(DroppedDraft {
                    model: model.clone(),
                    cause: "panic".to_string(),
                    message: "draft task panicked".to_string(),
                }),
            }
        }

        let elapsed = start.elapsed();
        info!(
            produced = drafts.len(),
            dropped = dropped.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "draft generation finished"
        );

        DraftBatch {
            drafts,
            requested: self.roster.len(),
            dropped,
            user_prompt,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::NullRetriever;
    use async_trait::async_trait;
    use coordination::UnitOperation;

    struct Echo;

    #[async_trait]
    impl ModelPort for Echo {
        async fn generate(&self, request: &ChatRequest) -> Result<String, ModelError> {
            match request.model.as_str() {
                "broken" => Err(ModelError::Status {
                    status: 500,
                    body: "oom".into(),
                }),
                "blank" => Ok("   ".into()),
                m => Ok(format!("- steps from {m}")),
            }
        }
    }

    fn task() -> TaskContext {
        TaskContext {
            query: "Grow E. coli".into(),
            section: "Method".into(),
            source_block: "### [UHW010 Liquid Handling]\n#### Input\n- LB\n".into(),
            unit: UnitOperation {
                id: "UHW010".into(),
                name: "Liquid Handling".into(),
            },
        }
    }

    fn generator(roster: &[&str]) -> DraftGenerator {
        DraftGenerator::new(
            Arc::new(Echo),
            Arc::new(NullRetriever),
            roster.iter().map(|m| m.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_failed_and_blank_calls_are_dropped() {
        let batch = generator(&["biollama3", "broken", "blank", "mixtral"])
            .generate(&task(), "")
            .await;
        assert_eq!(batch.requested, 4);
        assert_eq!(
            batch.drafts,
            vec![
                Draft::new("biollama3", "- steps from biollama3"),
                Draft::new("mixtral", "- steps from mixtral"),
            ]
        );
        let causes: Vec<(&str, &str)> = batch
            .dropped
            .iter()
            .map(|d| (d.model.as_str(), d.cause.as_str()))
            .collect();
        assert_eq!(causes, vec![("broken", "status"), ("blank", "empty")]);
    }

    #[tokio::test]
    async fn test_all_failures_yield_empty_batch() {
        let batch = generator(&["broken", "broken"]).generate(&task(), "").await;
        assert!(batch.drafts.is_empty());
        assert_eq!(batch.dropped.len(), 2);
    }

    #[tokio::test]
    async fn test_prompt_carries_feedback() {
        let batch = generator(&["mixtral"])
            .generate(&task(), "Add incubation temperatures.")
            .await;
        assert!(batch
            .user_prompt
            .contains("**IMPORTANT FEEDBACK FOR REVISION**: Add incubation temperatures."));
        assert!(batch.user_prompt.contains("- **Inputs**: '- LB'"));
    }
}
