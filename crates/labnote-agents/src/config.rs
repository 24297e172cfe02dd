//! Runtime configuration for the lab-note loop.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (applied by the binary after [`LabnoteConfig::load`])
//! 2. Environment variables (`LABNOTE_*`)
//! 3. TOML file passed with `--config`
//! 4. Built-in defaults
//!
//! ## Defaults
//!
//! | Field                | Env var                     | Default                     |
//! |----------------------|-----------------------------|-----------------------------|
//! | endpoint.base_url    | `LABNOTE_BASE_URL`          | `http://localhost:11434/v1` |
//! | endpoint.api_key     | `LABNOTE_API_KEY`           | `local`                     |
//! | draft_models         | `LABNOTE_DRAFT_MODELS`      | biollama3, mixtral, llama3:70b |
//! | judge_model          | `LABNOTE_JUDGE_MODEL`       | `llama3:70b`                |
//! | max_cycles           | `LABNOTE_MAX_CYCLES`        | 3                           |
//! | call_timeout_secs    | `LABNOTE_CALL_TIMEOUT_SECS` | 120                         |
//! | sop_dir              | `LABNOTE_SOP_DIR`           | none                        |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use coordination::{AcceptancePolicy, DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_INCLUSION_THRESHOLD};
use serde::{Deserialize, Serialize};

use crate::errors::LoopError;

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_API_KEY: &str = "local";
const DEFAULT_DRAFT_MODELS: [&str; 3] = ["biollama3", "mixtral", "llama3:70b"];
const DEFAULT_JUDGE_MODEL: &str = "llama3:70b";
const DEFAULT_MAX_CYCLES: u32 = 3;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RETRIEVAL_K: usize = 3;
const DEFAULT_DRAFT_TEMPERATURE: f32 = 0.3;
const DEFAULT_JUDGE_TEMPERATURE: f32 = 0.1;

const ENV_BASE_URL: &str = "LABNOTE_BASE_URL";
const ENV_API_KEY: &str = "LABNOTE_API_KEY";
const ENV_DRAFT_MODELS: &str = "LABNOTE_DRAFT_MODELS";
const ENV_JUDGE_MODEL: &str = "LABNOTE_JUDGE_MODEL";
const ENV_MAX_CYCLES: &str = "LABNOTE_MAX_CYCLES";
const ENV_CALL_TIMEOUT_SECS: &str = "LABNOTE_CALL_TIMEOUT_SECS";
const ENV_SOP_DIR: &str = "LABNOTE_SOP_DIR";

/// OpenAI-compatible inference endpoint (Ollama, vLLM, llama.cpp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Base URL including the `/v1` suffix.
    pub base_url: String,
    /// Bearer token; local servers accept any non-empty value.
    pub api_key: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: DEFAULT_API_KEY.to_string(),
        }
    }
}

/// Top-level loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabnoteConfig {
    pub endpoint: EndpointConfig,
    /// Draft roster; draft order always follows this list.
    pub draft_models: Vec<String>,
    pub judge_model: String,
    pub acceptance_threshold: f64,
    pub inclusion_threshold: f64,
    /// Maximum generate/supervise cycles per run.
    pub max_cycles: u32,
    /// Per-call budget for every draft and judge request.
    pub call_timeout_secs: u64,
    /// Snippets requested from the context retriever.
    pub retrieval_k: usize,
    /// Directory of reference SOP documents; no retrieval when unset.
    pub sop_dir: Option<PathBuf>,
    pub draft_temperature: f32,
    pub judge_temperature: f32,
}

impl Default for LabnoteConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            draft_models: DEFAULT_DRAFT_MODELS.iter().map(|m| m.to_string()).collect(),
            judge_model: DEFAULT_JUDGE_MODEL.to_string(),
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            inclusion_threshold: DEFAULT_INCLUSION_THRESHOLD,
            max_cycles: DEFAULT_MAX_CYCLES,
            call_timeout_secs: DEFAULT_CALL_TIMEOUT_SECS,
            retrieval_k: DEFAULT_RETRIEVAL_K,
            sop_dir: None,
            draft_temperature: DEFAULT_DRAFT_TEMPERATURE,
            judge_temperature: DEFAULT_JUDGE_TEMPERATURE,
        }
    }
}

impl LabnoteConfig {
    /// Defaults, overlaid with an optional TOML file, overlaid with the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("failed to parse TOML configuration")
    }

    /// Overlay environment values obtained through `lookup`.
    ///
    /// Unparseable or non-positive numeric values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.endpoint.base_url = url;
        }
        if let Some(key) = lookup(ENV_API_KEY) {
            self.endpoint.api_key = key;
        }
        if let Some(models) = lookup(ENV_DRAFT_MODELS) {
            let roster = parse_roster(&models);
            if !roster.is_empty() {
                self.draft_models = roster;
            }
        }
        if let Some(judge) = lookup(ENV_JUDGE_MODEL) {
            self.judge_model = judge;
        }
        if let Some(cycles) = positive_from(&lookup, ENV_MAX_CYCLES) {
            self.max_cycles = cycles as u32;
        }
        if let Some(secs) = positive_from(&lookup, ENV_CALL_TIMEOUT_SECS) {
            self.call_timeout_secs = secs;
        }
        if let Some(dir) = lookup(ENV_SOP_DIR) {
            self.sop_dir = Some(PathBuf::from(dir));
        }
    }

    /// Reject configurations the loop cannot run with.
    pub fn validate(&self) -> Result<(), LoopError> {
        if self.draft_models.is_empty() || self.draft_models.iter().any(|m| m.trim().is_empty()) {
            return Err(LoopError::Configuration(
                "draft roster must list at least one non-empty model".into(),
            ));
        }
        if self.judge_model.trim().is_empty() {
            return Err(LoopError::Configuration("judge model must be set".into()));
        }
        if self.max_cycles == 0 {
            return Err(LoopError::Configuration("max_cycles must be at least 1".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(LoopError::Configuration(
                "call_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.inclusion_threshold > self.acceptance_threshold {
            return Err(LoopError::Configuration(format!(
                "inclusion threshold {} exceeds acceptance threshold {}",
                self.inclusion_threshold, self.acceptance_threshold
            )));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn acceptance_policy(&self) -> AcceptancePolicy {
        AcceptancePolicy {
            acceptance_threshold: self.acceptance_threshold,
            inclusion_threshold: self.inclusion_threshold,
        }
    }
}

/// Split a comma-separated model list, dropping blanks.
pub fn parse_roster(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}

fn positive_from(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<u64> {
    lookup(var)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}
