//! Revision-loop state machine: explicit phases and legal transition guards.
//!
//! Every run starts in `Generating` and terminates in `Done`. The controller
//! calls `advance()` between steps; each call validates the edge and appends
//! to the transition log so a run can be replayed from its report.
//!
//! ```text
//! Generating  → Supervising
//! Supervising → Generating   (judge requested revision, budget left)
//! Supervising → Done         (accepted | fallback | no drafts | budget exhausted)
//! ```

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Phases of one controller run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    /// Fanning the prompt out to every draft model.
    Generating,
    /// Waiting on the judge and applying the acceptance policy.
    Supervising,
    /// Final options are set.
    Done,
}

impl LoopPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generating => write!(f, "Generating"),
            Self::Supervising => write!(f, "Supervising"),
            Self::Done => write!(f, "Done"),
        }
    }
}

fn is_legal_transition(from: LoopPhase, to: LoopPhase) -> bool {
    use LoopPhase::*;
    matches!(
        (from, to),
        (Generating, Supervising) | (Supervising, Generating) | (Supervising, Done)
    )
}

/// A single recorded phase change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: LoopPhase,
    pub to: LoopPhase,
    /// Cycle number at the time of the transition (1-based once generating).
    pub cycle: u32,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Returned when an edge outside the table is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: LoopPhase,
    pub to: LoopPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal loop transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Phase tracker for a single run.
pub struct LoopStateMachine {
    current: LoopPhase,
    cycle: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl LoopStateMachine {
    /// Start in `Generating` at cycle 1.
    pub fn new() -> Self {
        Self {
            current: LoopPhase::Generating,
            cycle: 1,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> LoopPhase {
        self.current
    }

    /// Cycle currently in progress.
    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Move to `to`, recording the edge. Re-entering `Generating` starts a new cycle.
    pub fn advance(&mut self, to: LoopPhase, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        if to == LoopPhase::Generating {
            self.cycle += 1;
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            cycle = self.cycle,
            "Loop transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            cycle: self.cycle,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line history, e.g. `Generating → Done (12ms, 4 transitions)`.
    pub fn summary(&self) -> String {
        format!(
            "{} → {} ({}ms, {} transitions)",
            LoopPhase::Generating,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        )
    }
}

impl Default for LoopStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
