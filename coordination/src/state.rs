//! Loop data model — task context, drafts, evaluations, loop state, verdicts.
//!
//! One [`LoopState`] exists per controller run and is owned exclusively by
//! it. Drafts are replaced wholesale every cycle; evaluations never outlive
//! the cycle that produced them.

use serde::{Deserialize, Serialize};

use crate::source_block::UnitOperation;

/// Immutable per-run request data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Free-text experiment goal.
    pub query: String,
    /// Section of the unit operation to write (e.g. `Method`, `Reagent`).
    pub section: String,
    /// Raw markdown of the unit-operation block.
    pub source_block: String,
    /// Unit identity parsed from the block heading.
    pub unit: UnitOperation,
}

/// One candidate text for the section, tagged with the model that wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub model: String,
    pub content: String,
}

impl Draft {
    pub fn new(model: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            content: content.into(),
        }
    }
}

/// The judge's verdict on a single draft.
///
/// All four fields are required; a judge response missing any of them is
/// treated as unparseable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub draft_index: usize,
    pub model: String,
    pub score: f64,
    pub justification: String,
}

/// Terminal classification of a controller run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The judge accepted; options are the drafts above the inclusion threshold.
    Accepted,
    /// Every draft call failed; options hold a single explanatory message.
    NoDrafts,
    /// The judge response could not be used; options are all drafts, unranked.
    JudgeFallback,
    /// The cycle budget ran out while the judge still requested revision.
    BudgetExhausted,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::NoDrafts => write!(f, "no_drafts"),
            Self::JudgeFallback => write!(f, "judge_fallback"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
        }
    }
}

/// The single mutable record threaded through the loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub task: TaskContext,
    /// Drafts from the most recent generation step.
    pub drafts: Vec<Draft>,
    /// Revision instructions for the next generation step; empty when none.
    pub feedback: String,
    /// Options surfaced to the caller once the loop is done.
    pub final_options: Vec<String>,
    /// Completed generate/supervise cycles.
    pub cycle: u32,
}

impl LoopState {
    /// Fresh state: no drafts, no feedback, no options.
    pub fn new(task: TaskContext) -> Self {
        Self {
            task,
            drafts: Vec::new(),
            feedback: String::new(),
            final_options: Vec::new(),
            cycle: 0,
        }
    }

    /// Replace the previous cycle's drafts.
    pub fn replace_drafts(&mut self, drafts: Vec<Draft>) {
        self.drafts = drafts;
    }

    /// Whether the last supervisor step asked for a revision.
    pub fn has_feedback(&self) -> bool {
        !self.feedback.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> TaskContext {
        TaskContext {
            query: "Amplify the lacZ gene".into(),
            section: "Method".into(),
            source_block: "### [UHW100 Thermocycling]\n".into(),
            unit: UnitOperation {
                id: "UHW100".into(),
                name: "Thermocycling".into(),
            },
        }
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = LoopState::new(task());
        assert!(state.drafts.is_empty());
        assert!(!state.has_feedback());
        assert!(state.final_options.is_empty());
        assert_eq!(state.cycle, 0);
    }

    #[test]
    fn test_replace_drafts_never_appends() {
        let mut state = LoopState::new(task());
        state.replace_drafts(vec![Draft::new("a", "one"), Draft::new("b", "two")]);
        state.replace_drafts(vec![Draft::new("c", "three")]);
        assert_eq!(state.drafts, vec![Draft::new("c", "three")]);
    }

    #[test]
    fn test_evaluation_requires_all_keys() {
        let ok: Result<Evaluation, _> = serde_json::from_str(
            r#"{"draft_index": 0, "model": "m", "score": 9, "justification": "fine"}"#,
        );
        assert_eq!(ok.unwrap().score, 9.0);

        let missing: Result<Evaluation, _> =
            serde_json::from_str(r#"{"draft_index": 0, "model": "m", "score": 9}"#);
        assert!(missing.is_err());
    }

    #[test]
    fn test_verdict_display() {
        assert_eq!(Verdict::Accepted.to_string(), "accepted");
        assert_eq!(Verdict::JudgeFallback.to_string(), "judge_fallback");
        assert_eq!(
            serde_json::to_string(&Verdict::BudgetExhausted).unwrap(),
            "\"budget_exhausted\""
        );
    }
}
