//! Revision loop controller.
//!
//! Drives `Generating → Supervising → (Generating | Done)` until the judge
//! accepts, judging degrades, no drafts come back, or the cycle budget runs
//! out. Every degraded outcome is returned as data; only misconfiguration
//! and illegal transitions surface as [`LoopError`].

use std::sync::Arc;
use std::time::Instant;

use coordination::{
    best_effort_options, parse_header, LoopPhase, LoopState, LoopStateMachine, SupervisorDecision,
    TaskContext, Verdict,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::LabnoteConfig;
use crate::drafting::DraftGenerator;
use crate::errors::LoopError;
use crate::model_port::ModelPort;
use crate::retrieval::ContextRetriever;
use crate::supervisor::Supervisor;
use crate::telemetry::{CycleRecord, LoopReport, ReportCollector};

/// Unit id reported when the source block has no recognizable heading.
pub const INVALID_SOURCE_ID: &str = "Error";

/// Sole option reported when the source block has no recognizable heading.
pub const INVALID_SOURCE_MESSAGE: &str =
    "Error: Could not identify the Unit Operation. Please check the markdown format.";

/// What a run hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopResponse {
    pub uo_id: String,
    pub section: String,
    pub options: Vec<String>,
    /// `None` when the source block was rejected before the loop started.
    pub verdict: Option<Verdict>,
    pub report: LoopReport,
}

/// The controller. Holds no per-run state, so one instance serves concurrent runs.
pub struct RevisionLoop {
    generator: DraftGenerator,
    supervisor: Supervisor,
    max_cycles: u32,
}

impl RevisionLoop {
    pub fn new(generator: DraftGenerator, supervisor: Supervisor, max_cycles: u32) -> Self {
        Self {
            generator,
            supervisor,
            max_cycles: max_cycles.max(1),
        }
    }

    /// Wire a controller from validated configuration and injected collaborators.
    pub fn from_config(
        config: &LabnoteConfig,
        port: Arc<dyn ModelPort>,
        retriever: Arc<dyn ContextRetriever>,
    ) -> Result<Self, LoopError> {
        config.validate()?;
        let generator = DraftGenerator::new(port.clone(), retriever, config.draft_models.clone())
            .with_temperature(config.draft_temperature)
            .with_call_timeout(config.call_timeout())
            .with_retrieval_k(config.retrieval_k);
        let supervisor = Supervisor::new(port, config.judge_model.clone())
            .with_policy(config.acceptance_policy())
            .with_temperature(config.judge_temperature)
            .with_call_timeout(config.call_timeout());
        Ok(Self::new(generator, supervisor, config.max_cycles))
    }

    pub fn max_cycles(&self) -> u32 {
        self.max_cycles
    }

    /// Populate `section` of the unit operation described by `source_block`.
    #[instrument(skip(self, query, source_block))]
    pub async fn run_loop(
        &self,
        query: &str,
        source_block: &str,
        section: &str,
    ) -> Result<LoopResponse, LoopError> {
        let unit = match parse_header(source_block) {
            Ok(unit) => unit,
            Err(e) => {
                warn!(error = %e, "source block rejected");
                let report = ReportCollector::new(INVALID_SOURCE_ID, section).finalize(None, Vec::new());
                return Ok(LoopResponse {
                    uo_id: INVALID_SOURCE_ID.to_string(),
                    section: section.to_string(),
                    options: vec![INVALID_SOURCE_MESSAGE.to_string()],
                    verdict: None,
                    report,
                });
            }
        };

        let mut state = LoopState::new(TaskContext {
            query: query.to_string(),
            section: section.to_string(),
            source_block: source_block.to_string(),
            unit,
        });
        let mut machine = LoopStateMachine::new();
        let mut collector = ReportCollector::new(&state.task.unit.id, section);
        info!(
            run_id = %collector.run_id(),
            unit = %state.task.unit,
            max_cycles = self.max_cycles,
            "revision loop started"
        );

        let verdict = loop {
            let revision = state.has_feedback();
            let batch = self.generator.generate(&state.task, &state.feedback).await;
            let drafts_produced = batch.drafts.len();
            state.replace_drafts(batch.drafts);
            machine.advance(LoopPhase::Supervising, None)?;

            let judged = Instant::now();
            let decision = self.supervisor.supervise(&state.task.section, &state.drafts).await;
            state.cycle = machine.cycle();

            collector.record_cycle(CycleRecord {
                cycle: machine.cycle(),
                drafts_requested: batch.requested,
                drafts_produced,
                dropped: batch.dropped,
                top_score: decision.top_score(),
                decision: decision.kind().to_string(),
                revision,
                generation_ms: batch.elapsed.as_millis() as u64,
                supervision_ms: judged.elapsed().as_millis() as u64,
            });

            match decision {
                SupervisorDecision::Accepted { options, .. } => {
                    state.final_options = options;
                    state.feedback.clear();
                    machine.advance(LoopPhase::Done, Some("accepted"))?;
                    break Verdict::Accepted;
                }
                SupervisorDecision::Degraded { options, reason } => {
                    state.final_options = options;
                    state.feedback.clear();
                    machine.advance(LoopPhase::Done, Some(reason.as_str()))?;
                    break Verdict::JudgeFallback;
                }
                SupervisorDecision::NoDrafts { message } => {
                    state.final_options = vec![message];
                    state.feedback.clear();
                    machine.advance(LoopPhase::Done, Some("no drafts"))?;
                    break Verdict::NoDrafts;
                }
                SupervisorDecision::Rejected {
                    feedback,
                    top_score,
                    evaluations,
                } => {
                    if machine.cycle() >= self.max_cycles {
                        warn!(
                            top_score,
                            cycles = machine.cycle(),
                            "cycle budget exhausted, returning best-effort drafts"
                        );
                        state.final_options = best_effort_options(&state.drafts, &evaluations);
                        state.feedback.clear();
                        machine.advance(LoopPhase::Done, Some("cycle budget exhausted"))?;
                        break Verdict::BudgetExhausted;
                    }
                    state.feedback = feedback;
                    let reason = format!("top score {top_score} below threshold");
                    machine.advance(LoopPhase::Generating, Some(reason.as_str()))?;
                }
            }
        };

        info!(
            %verdict,
            cycles = state.cycle,
            options = state.final_options.len(),
            summary = %machine.summary(),
            "revision loop finished"
        );

        let report = collector.finalize(Some(verdict), machine.transitions().to_vec());
        Ok(LoopResponse {
            uo_id: state.task.unit.id,
            section: state.task.section,
            options: state.final_options,
            verdict: Some(verdict),
            report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ModelError;
    use crate::model_port::ChatRequest;
    use crate::retrieval::NullRetriever;
    use async_trait::async_trait;

    /// Drafts echo the model name; the judge always scores the first draft 9.
    struct Happy;

    #[async_trait]
    impl ModelPort for Happy {
        async fn generate(&self, request: &ChatRequest) -> Result<String, ModelError> {
            if request.model == "judge" {
                Ok(r#"[{"draft_index": 0, "model": "a", "score": 9, "justification": "ok"}]"#.into())
            } else {
                Ok(format!("draft by {}", request.model))
            }
        }
    }

    fn controller(max_cycles: u32) -> RevisionLoop {
        let port: Arc<dyn ModelPort> = Arc::new(Happy);
        RevisionLoop::new(
            DraftGenerator::new(port.clone(), Arc::new(NullRetriever), vec!["a".into(), "b".into()]),
            Supervisor::new(port, "judge"),
            max_cycles,
        )
    }

    #[tokio::test]
    async fn test_invalid_header_is_reported_not_raised() {
        let response = controller(3)
            .run_loop("goal", "## not a unit heading", "Method")
            .await
            .unwrap();
        assert_eq!(response.uo_id, INVALID_SOURCE_ID);
        assert_eq!(response.section, "Method");
        assert_eq!(response.options, vec![INVALID_SOURCE_MESSAGE.to_string()]);
        assert!(response.verdict.is_none());
        assert_eq!(response.report.cycles_used, 0);
    }

    #[tokio::test]
    async fn test_single_cycle_acceptance() {
        let response = controller(3)
            .run_loop("goal", "### [UHW010 Liquid Handling]\n", "Method")
            .await
            .unwrap();
        assert_eq!(response.uo_id, "UHW010");
        assert_eq!(response.verdict, Some(Verdict::Accepted));
        assert_eq!(
            response.options,
            vec!["--- Suggestion from a (quality score: 9) ---\n\ndraft by a".to_string()]
        );
        assert_eq!(response.report.cycles_used, 1);
        assert_eq!(response.report.transitions.len(), 2);
    }

    #[test]
    fn test_zero_budget_is_clamped() {
        assert_eq!(controller(0).max_cycles(), 1);
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = LabnoteConfig::default();
        config.draft_models.clear();
        let port: Arc<dyn ModelPort> = Arc::new(Happy);
        let result = RevisionLoop::from_config(&config, port, Arc::new(NullRetriever));
        assert!(matches!(result, Err(LoopError::Configuration(_))));
    }
}
