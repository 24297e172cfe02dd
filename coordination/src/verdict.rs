//! Judge verdict parsing and the two-threshold acceptance policy.
//!
//! The judge is asked for a JSON array of
//! `{draft_index, model, score, justification}` objects but may wrap it in
//! prose, so the first-`[`-to-last-`]` span is extracted before parsing.
//!
//! ```text
//! raw judge text
//!   ├─ no array / bad JSON / missing keys / bad index → Degraded (all drafts, unranked)
//!   └─ evaluations
//!        ├─ top score ≥ acceptance (8.5) → Accepted (drafts scoring ≥ inclusion (8.0))
//!        │                                  or Degraded when none reach inclusion
//!        └─ otherwise                   → Rejected (synthesized feedback)
//! ```
//!
//! The trigger and inclusion thresholds are deliberately different: a run
//! triggered by one 8.5 draft still drops every sibling below 8.0.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::state::{Draft, Evaluation};

/// Top score required to stop revising.
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 8.5;
/// Per-draft score required to appear in the accepted set.
pub const DEFAULT_INCLUSION_THRESHOLD: f64 = 8.0;

/// Final option shown when no model produced a draft.
pub const NO_DRAFTS_MESSAGE: &str =
    "The AI could not generate any drafts. Please try again.";

static JSON_ARRAY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[.*\]").expect("static array regex"));

/// Why a judge response could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerdictParseError {
    #[error("no JSON array found in judge response")]
    NoArray,

    #[error("judge response is not a valid evaluation array: {0}")]
    Malformed(String),

    #[error("judge returned an empty evaluation array")]
    Empty,

    #[error("evaluation references draft {index} but only {count} drafts exist")]
    IndexOutOfRange { index: usize, count: usize },
}

/// Parse a raw judge response into evaluations for `draft_count` drafts.
pub fn parse_evaluations(
    raw: &str,
    draft_count: usize,
) -> Result<Vec<Evaluation>, VerdictParseError> {
    let array = JSON_ARRAY_RE
        .find(raw)
        .ok_or(VerdictParseError::NoArray)?
        .as_str();

    let evaluations: Vec<Evaluation> = serde_json::from_str(array)
        .map_err(|e| VerdictParseError::Malformed(e.to_string()))?;

    if evaluations.is_empty() {
        return Err(VerdictParseError::Empty);
    }

    if let Some(bad) = evaluations.iter().find(|e| e.draft_index >= draft_count) {
        return Err(VerdictParseError::IndexOutOfRange {
            index: bad.draft_index,
            count: draft_count,
        });
    }

    Ok(evaluations)
}

/// Outcome of one supervisor step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SupervisorDecision {
    /// Quality bar met; options are ready for the user.
    Accepted { options: Vec<String>, top_score: f64 },
    /// Quality bar missed; regenerate with this feedback.
    Rejected {
        feedback: String,
        top_score: f64,
        evaluations: Vec<Evaluation>,
    },
    /// Judging failed; every draft is surfaced unranked.
    Degraded { options: Vec<String>, reason: String },
    /// Nothing to judge.
    NoDrafts { message: String },
}

impl SupervisorDecision {
    /// Short label for logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Accepted { .. } => "accepted",
            Self::Rejected { .. } => "rejected",
            Self::Degraded { .. } => "degraded",
            Self::NoDrafts { .. } => "no_drafts",
        }
    }

    /// Top judge score, when the judge produced usable evaluations.
    pub fn top_score(&self) -> Option<f64> {
        match self {
            Self::Accepted { top_score, .. } | Self::Rejected { top_score, .. } => {
                Some(*top_score)
            }
            _ => None,
        }
    }

    /// Terminal decision for an empty draft set.
    pub fn no_drafts() -> Self {
        Self::NoDrafts {
            message: NO_DRAFTS_MESSAGE.to_string(),
        }
    }

    /// Fail-open: surface every draft, labelled by model, without ranking.
    pub fn fail_open(drafts: &[Draft], reason: impl Into<String>) -> Self {
        Self::Degraded {
            options: drafts.iter().map(format_unranked_option).collect(),
            reason: reason.into(),
        }
    }
}

/// Thresholds applied to parsed evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcceptancePolicy {
    /// The best draft must reach this score to stop the loop.
    pub acceptance_threshold: f64,
    /// Each draft must reach this score to be offered once accepted.
    pub inclusion_threshold: f64,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            inclusion_threshold: DEFAULT_INCLUSION_THRESHOLD,
        }
    }
}

impl AcceptancePolicy {
    /// Parse a judge response and decide, failing open on any parse error.
    pub fn judge(&self, raw: &str, drafts: &[Draft]) -> SupervisorDecision {
        if drafts.is_empty() {
            return SupervisorDecision::no_drafts();
        }
        match parse_evaluations(raw, drafts.len()) {
            Ok(evaluations) => self.decide(drafts, evaluations),
            Err(e) => SupervisorDecision::fail_open(drafts, e.to_string()),
        }
    }

    /// Apply the thresholds to already-validated evaluations.
    pub fn decide(&self, drafts: &[Draft], evaluations: Vec<Evaluation>) -> SupervisorDecision {
        let Some(best) = best_evaluation(&evaluations) else {
            return SupervisorDecision::fail_open(drafts, VerdictParseError::Empty.to_string());
        };
        let top_score = best.score;
        debug!(
            top_score,
            best_model = %best.model,
            best_index = best.draft_index,
            "best evaluation selected"
        );

        if top_score >= self.acceptance_threshold {
            let options = drafts
                .iter()
                .enumerate()
                .filter(|(i, _)| {
                    evaluations
                        .iter()
                        .any(|e| e.draft_index == *i && e.score >= self.inclusion_threshold)
                })
                .filter_map(|(i, draft)| {
                    first_score_for(&evaluations, i).map(|score| format_scored_option(draft, score))
                })
                .collect::<Vec<_>>();
            if options.is_empty() {
                return SupervisorDecision::fail_open(
                    drafts,
                    format!(
                        "top score {top_score} accepted but no draft reached inclusion threshold {}",
                        self.inclusion_threshold
                    ),
                );
            }
            SupervisorDecision::Accepted { options, top_score }
        } else {
            SupervisorDecision::Rejected {
                feedback: synthesize_feedback(&evaluations, top_score),
                top_score,
                evaluations,
            }
        }
    }
}

/// Highest-scoring evaluation; ties go to the earliest in input order.
pub fn best_evaluation(evaluations: &[Evaluation]) -> Option<&Evaluation> {
    evaluations.iter().fold(None, |best, e| match best {
        Some(b) if b.score >= e.score => Some(b),
        _ => Some(e),
    })
}

/// Score of the first evaluation that targets draft `index`.
pub fn first_score_for(evaluations: &[Evaluation], index: usize) -> Option<f64> {
    evaluations
        .iter()
        .find(|e| e.draft_index == index)
        .map(|e| e.score)
}

/// Merge every justification into a single revision instruction.
pub fn synthesize_feedback(evaluations: &[Evaluation], top_score: f64) -> String {
    let points = evaluations
        .iter()
        .map(|e| format!("Draft from {} was critiqued: '{}'", e.model, e.justification))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "The previous drafts were not detailed enough (top score was {top_score}). \
         Specific feedback: {points}. Please generate a much more detailed and specific version."
    )
}

/// Options for a run that ran out of cycles: every draft in roster order,
/// labelled with its judge score when the judge scored it.
pub fn best_effort_options(drafts: &[Draft], evaluations: &[Evaluation]) -> Vec<String> {
    drafts
        .iter()
        .enumerate()
        .map(|(i, draft)| match first_score_for(evaluations, i) {
            Some(score) => format_scored_option(draft, score),
            None => format_unranked_option(draft),
        })
        .collect()
}

/// Option label for a judged draft.
pub fn format_scored_option(draft: &Draft, score: f64) -> String {
    format!(
        "--- Suggestion from {} (quality score: {}) ---\n\n{}",
        draft.model, score, draft.content
    )
}

/// Option label for a draft the judge never ranked.
pub fn format_unranked_option(draft: &Draft) -> String {
    format!("--- Suggestion from {} ---\n\n{}", draft.model, draft.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drafts(n: usize) -> Vec<Draft> {
        ["biollama3", "mixtral", "llama3:70b", "extra"]
            .iter()
            .take(n)
            .enumerate()
            .map(|(i, m)| Draft::new(*m, format!("draft body {i}")))
            .collect()
    }

    fn eval(index: usize, model: &str, score: f64, why: &str) -> Evaluation {
        Evaluation {
            draft_index: index,
            model: model.into(),
            score,
            justification: why.into(),
        }
    }

    #[test]
    fn test_parse_array_wrapped_in_prose() {
        let raw = r#"Here is my review:
[
  {"draft_index": 0, "model": "biollama3", "score": 8.5, "justification": "Clear steps."},
  {"draft_index": 1, "model": "mixtral", "score": 7, "justification": "Too generic."}
]
Hope this helps."#;
        let evals = parse_evaluations(raw, 2).unwrap();
        assert_eq!(evals.len(), 2);
        assert_eq!(evals[0].score, 8.5);
        assert_eq!(evals[1].model, "mixtral");
    }

    #[test]
    fn test_parse_no_array() {
        assert_eq!(
            parse_evaluations("All drafts look great to me.", 3),
            Err(VerdictParseError::NoArray)
        );
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_evaluations("[{draft_index: 0}]", 1).unwrap_err();
        assert!(matches!(err, VerdictParseError::Malformed(_)));
    }

    #[test]
    fn test_parse_missing_key_is_malformed() {
        let err = parse_evaluations(r#"[{"draft_index": 0, "model": "m", "score": 9}]"#, 1)
            .unwrap_err();
        assert!(matches!(err, VerdictParseError::Malformed(_)));
    }

    #[test]
    fn test_parse_empty_array() {
        assert_eq!(parse_evaluations("[]", 2), Err(VerdictParseError::Empty));
    }

    #[test]
    fn test_parse_index_out_of_range() {
        let raw = r#"[{"draft_index": 3, "model": "m", "score": 9, "justification": "x"}]"#;
        assert_eq!(
            parse_evaluations(raw, 2),
            Err(VerdictParseError::IndexOutOfRange { index: 3, count: 2 })
        );
    }

    #[test]
    fn test_reject_below_acceptance_threshold() {
        let d = drafts(3);
        let evals = vec![
            eval(0, "biollama3", 8.4, "Missing buffer concentrations."),
            eval(1, "mixtral", 8.3, "No incubation times."),
            eval(2, "llama3:70b", 8.0, "Vague equipment."),
        ];
        let decision = AcceptancePolicy::default().decide(&d, evals);
        match decision {
            SupervisorDecision::Rejected {
                feedback,
                top_score,
                ..
            } => {
                assert_eq!(top_score, 8.4);
                assert!(feedback.contains("top score was 8.4"));
                assert!(feedback
                    .contains("Draft from mixtral was critiqued: 'No incubation times.'"));
                assert!(feedback.ends_with("Please generate a much more detailed and specific version."));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_accept_keeps_only_inclusion_threshold_drafts() {
        let d = drafts(3);
        let evals = vec![
            eval(0, "biollama3", 8.5, "Good."),
            eval(1, "mixtral", 7.9, "Close."),
            eval(2, "llama3:70b", 6.0, "Weak."),
        ];
        let decision = AcceptancePolicy::default().decide(&d, evals);
        match decision {
            SupervisorDecision::Accepted { options, top_score } => {
                assert_eq!(top_score, 8.5);
                assert_eq!(options.len(), 1);
                assert_eq!(
                    options[0],
                    "--- Suggestion from biollama3 (quality score: 8.5) ---\n\ndraft body 0"
                );
            }
            other => panic!("expected acceptance, got {other:?}"),
        }
    }

    #[test]
    fn test_accept_includes_siblings_at_inclusion_threshold_in_draft_order() {
        let d = drafts(3);
        // Judge lists evaluations out of draft order.
        let evals = vec![
            eval(2, "llama3:70b", 9.2, "Excellent."),
            eval(0, "biollama3", 8.0, "Solid."),
            eval(1, "mixtral", 7.0, "Generic."),
        ];
        let decision = AcceptancePolicy::default().decide(&d, evals);
        let SupervisorDecision::Accepted { options, .. } = decision else {
            panic!("expected acceptance");
        };
        assert_eq!(options.len(), 2);
        assert!(options[0].contains("biollama3 (quality score: 8)"));
        assert!(options[1].contains("llama3:70b (quality score: 9.2)"));
    }

    #[test]
    fn test_tie_break_prefers_first_maximum() {
        let evals = vec![
            eval(0, "a", 9.0, "x"),
            eval(1, "b", 9.0, "y"),
            eval(2, "c", 3.0, "z"),
        ];
        let best = best_evaluation(&evals).unwrap();
        assert_eq!(best.draft_index, 0);
        assert_eq!(best.model, "a");
    }

    #[test]
    fn test_tie_does_not_change_inclusion() {
        let d = drafts(3);
        let evals = vec![
            eval(0, "biollama3", 8.7, "x"),
            eval(1, "mixtral", 8.7, "y"),
            eval(2, "llama3:70b", 8.1, "z"),
        ];
        let SupervisorDecision::Accepted { options, .. } =
            AcceptancePolicy::default().decide(&d, evals)
        else {
            panic!("expected acceptance");
        };
        assert_eq!(options.len(), 3);
    }

    #[test]
    fn test_judge_fails_open_on_prose() {
        let d = drafts(2);
        let decision = AcceptancePolicy::default().judge("Looks fine overall.", &d);
        match decision {
            SupervisorDecision::Degraded { options, reason } => {
                assert_eq!(
                    options,
                    vec![
                        "--- Suggestion from biollama3 ---\n\ndraft body 0".to_string(),
                        "--- Suggestion from mixtral ---\n\ndraft body 1".to_string(),
                    ]
                );
                assert!(reason.contains("no JSON array"));
            }
            other => panic!("expected degraded, got {other:?}"),
        }
    }

    #[test]
    fn test_judge_without_drafts() {
        let decision = AcceptancePolicy::default().judge("[]", &[]);
        assert_eq!(decision, SupervisorDecision::no_drafts());
        assert_eq!(decision.kind(), "no_drafts");
        assert_eq!(decision.top_score(), None);
    }

    #[test]
    fn test_best_effort_options_keep_roster_order() {
        let d = drafts(3);
        let evals = vec![eval(2, "llama3:70b", 8.2, "x"), eval(0, "biollama3", 7.5, "y")];
        let options = best_effort_options(&d, &evals);
        assert_eq!(options.len(), 3);
        assert!(options[0].starts_with("--- Suggestion from biollama3 (quality score: 7.5) ---"));
        assert!(options[1].starts_with("--- Suggestion from mixtral ---"));
        assert!(options[2].starts_with("--- Suggestion from llama3:70b (quality score: 8.2) ---"));
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = AcceptancePolicy {
            acceptance_threshold: 7.0,
            inclusion_threshold: 6.5,
        };
        let d = drafts(2);
        let evals = vec![eval(0, "biollama3", 7.0, "ok"), eval(1, "mixtral", 6.4, "meh")];
        let SupervisorDecision::Accepted { options, .. } = policy.decide(&d, evals) else {
            panic!("expected acceptance");
        };
        assert_eq!(options.len(), 1);
    }

    #[test]
    fn test_accepted_set_never_empty() {
        let policy = AcceptancePolicy {
            acceptance_threshold: 8.5,
            inclusion_threshold: 9.5,
        };
        let d = drafts(2);
        let evals = vec![eval(0, "biollama3", 9.0, "Good."), eval(1, "mixtral", 7.0, "Thin.")];
        let SupervisorDecision::Degraded { options, reason } = policy.decide(&d, evals) else {
            panic!("expected degraded decision");
        };
        assert_eq!(options.len(), 2);
        assert!(options[0].starts_with("--- Suggestion from biollama3 ---"));
        assert!(reason.contains("inclusion threshold 9.5"));
    }
}
