//! Lab-note coordination library
//!
//! The deterministic, I/O-free half of the draft → supervise → revise loop:
//!
//! - [`source_block`]: unit-operation heading and `####` section parsing
//! - [`state`]: task context, drafts, evaluations, loop state, verdicts
//! - [`verdict`]: judge response parsing and the two-threshold acceptance policy
//! - [`state_machine`]: loop phases with audited transitions
//!
//! Model calls, retrieval, and the controller itself live in `labnote-agents`.

#![allow(clippy::uninlined_format_args)]

pub mod source_block;
pub mod state;
pub mod state_machine;
pub mod verdict;

pub use source_block::{
    extract_section, find_unit_block, parse_header, SourceBlockError, UnitOperation,
    BLOCK_TERMINATOR, NOT_SPECIFIED,
};
pub use state::{Draft, Evaluation, LoopState, TaskContext, Verdict};
pub use state_machine::{IllegalTransition, LoopPhase, LoopStateMachine, TransitionRecord};
pub use verdict::{
    best_effort_options, parse_evaluations, AcceptancePolicy, SupervisorDecision, VerdictParseError,
    DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_INCLUSION_THRESHOLD, NO_DRAFTS_MESSAGE,
};
