//! Per-run loop telemetry.
//!
//! A [`ReportCollector`] follows one controller run cycle by cycle and
//! finalizes into a serializable [`LoopReport`]. Reports can be printed by
//! the CLI or appended to a JSONL log for later analysis.

use std::path::Path;
use std::time::Instant;

use coordination::{TransitionRecord, Verdict};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::drafting::DroppedDraft;
use crate::prompts::PROMPT_VERSION;

/// What happened in one generate/supervise cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle: u32,
    pub drafts_requested: usize,
    pub drafts_produced: usize,
    pub dropped: Vec<DroppedDraft>,
    /// Judge's top score; absent when judging was skipped or failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_score: Option<f64>,
    /// `SupervisorDecision::kind()` of the step.
    pub decision: String,
    /// Whether the draft prompt carried revision feedback.
    pub revision: bool,
    pub generation_ms: u64,
    pub supervision_ms: u64,
}

/// Complete record of one controller run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopReport {
    pub run_id: String,
    pub unit_id: String,
    pub section: String,
    /// `None` when the run was rejected before the loop started.
    pub verdict: Option<Verdict>,
    pub cycles_used: u32,
    pub cycles: Vec<CycleRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub prompt_version: String,
    pub started_at: String,
    pub finished_at: String,
    pub elapsed_ms: u64,
}

/// Accumulates cycle records for one run.
pub struct ReportCollector {
    run_id: Uuid,
    unit_id: String,
    section: String,
    started: Instant,
    started_at: chrono::DateTime<chrono::Utc>,
    cycles: Vec<CycleRecord>,
}

impl ReportCollector {
    pub fn new(unit_id: &str, section: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            unit_id: unit_id.to_string(),
            section: section.to_string(),
            started: Instant::now(),
            started_at: chrono::Utc::now(),
            cycles: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record_cycle(&mut self, record: CycleRecord) {
        self.cycles.push(record);
    }

    pub fn finalize(self, verdict: Option<Verdict>, transitions: Vec<TransitionRecord>) -> LoopReport {
        LoopReport {
            run_id: self.run_id.to_string(),
            unit_id: self.unit_id,
            section: self.section,
            verdict,
            cycles_used: self.cycles.len() as u32,
            cycles: self.cycles,
            transitions,
            prompt_version: PROMPT_VERSION.to_string(),
            started_at: self.started_at.to_rfc3339(),
            finished_at: chrono::Utc::now().to_rfc3339(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Append a report as one JSON line to `path`.
pub fn append_report(report: &LoopReport, path: &Path) {
    match serde_json::to_string(report) {
        Ok(json) => {
            use std::io::Write;
            match std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
            {
                Ok(mut file) => {
                    if let Err(e) = writeln!(file, "{json}") {
                        warn!("Failed to append loop report: {e}");
                    } else {
                        info!(path = %path.display(), run_id = %report.run_id, "Appended loop report");
                    }
                }
                Err(e) => warn!("Failed to open report log: {e}"),
            }
        }
        Err(e) => warn!("Failed to serialize loop report: {e}"),
    }
}
