//! Supervisor: one judge call per cycle, then the acceptance policy.
//!
//! Judging never blocks progress. A transport error, a timeout, or an
//! unparseable verdict all fail open and surface every draft unranked.

use std::sync::Arc;
use std::time::Duration;

use coordination::{AcceptancePolicy, Draft, SupervisorDecision};
use tracing::{error, info, instrument, warn};

use crate::model_port::{generate_with_timeout, ChatRequest, ModelPort};
use crate::prompts::{evaluation_prompt, JUDGE_PREAMBLE};

pub struct Supervisor {
    port: Arc<dyn ModelPort>,
    judge_model: String,
    policy: AcceptancePolicy,
    temperature: f32,
    call_timeout: Duration,
}

impl Supervisor {
    pub fn new(port: Arc<dyn ModelPort>, judge_model: impl Into<String>) -> Self {
        Self {
            port,
            judge_model: judge_model.into(),
            policy: AcceptancePolicy::default(),
            temperature: 0.1,
            call_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_policy(mut self, policy: AcceptancePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Judge `drafts` for `section`. Drafts are only read.
    #[instrument(skip(self, drafts), fields(judge = %self.judge_model, drafts = drafts.len()))]
    pub async fn supervise(&self, section: &str, drafts: &[Draft]) -> SupervisorDecision {
        if drafts.is_empty() {
            warn!("no drafts to evaluate, ending run");
            return SupervisorDecision::no_drafts();
        }

        let request = ChatRequest::new(
            self.judge_model.clone(),
            JUDGE_PREAMBLE,
            evaluation_prompt(section, drafts),
            self.temperature,
        );

        info!("calling judge");
        let raw = match generate_with_timeout(self.port.as_ref(), &request, self.call_timeout).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "judge call failed, surfacing drafts unranked");
                return SupervisorDecision::fail_open(drafts, format!("judge call failed: {e}"));
            }
        };

        let decision = self.policy.judge(&raw, drafts);
        match &decision {
            SupervisorDecision::Accepted { options, top_score } => {
                info!(top_score, included = options.len(), "quality threshold met");
            }
            SupervisorDecision::Rejected { top_score, .. } => {
                info!(top_score, "quality threshold missed, requesting revision");
            }
            SupervisorDecision::Degraded { reason, .. } => {
                error!(
                    reason = %reason,
                    response_len = raw.len(),
                    "could not use judge verdict, surfacing drafts unranked"
                );
            }
            SupervisorDecision::NoDrafts { .. } => {}
        }
        decision
    }
}
