//! Context retriever port and a directory-backed implementation.
//!
//! The retriever is an explicitly constructed collaborator with a lifecycle:
//! `init()` before first use, `close()` when the process is done. The
//! controller holds it by `Arc` and never looks it up from global state.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::RetrievalError;

/// Formatted context that means "leave the context block out of the prompt".
pub const NO_CONTEXT_SENTINEL: &str = "No relevant context found.";

static TERM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9]+").expect("static term regex"));

/// One ranked piece of reference text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    /// File name the snippet came from.
    pub source: String,
    pub text: String,
    pub score: f64,
}

/// Source of reference context for draft prompts.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Load whatever index backs the retriever. Idempotent.
    async fn init(&self) -> Result<(), RetrievalError>;

    /// Up to `k` snippets for `query`, best first.
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ContextSnippet>, RetrievalError>;

    /// Release the index; `retrieve` fails with `NotInitialized` afterwards.
    async fn close(&self);

    /// Render snippets as prompt text, or the sentinel when there are none.
    fn format_context(&self, items: &[ContextSnippet]) -> String {
        format_context(items)
    }
}

/// Whether formatted context is empty or carries the no-context sentinel.
pub fn is_no_context(formatted: &str) -> bool {
    formatted.trim().is_empty() || formatted.contains("No relevant context found")
}

pub fn format_context(items: &[ContextSnippet]) -> String {
    if items.is_empty() {
        return NO_CONTEXT_SENTINEL.to_string();
    }
    items
        .iter()
        .map(|s| format!("[Source: {}]\n{}", s.source, s.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Retriever that never finds anything. Used when no SOP directory is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRetriever;

#[async_trait]
impl ContextRetriever for NullRetriever {
    async fn init(&self) -> Result<(), RetrievalError> {
        Ok(())
    }

    async fn retrieve(&self, _query: &str, _k: usize) -> Result<Vec<ContextSnippet>, RetrievalError> {
        Ok(Vec::new())
    }

    async fn close(&self) {}
}

#[derive(Debug, Clone)]
struct Chunk {
    source: String,
    text: String,
    terms: HashSet<String>,
}

/// Lexical retriever over a directory of `.md` / `.txt` SOP documents.
///
/// Files are split into blank-line separated paragraphs; a chunk's score is
/// the fraction of distinct query terms it contains.
pub struct SopRetriever {
    dir: PathBuf,
    index: RwLock<Option<Vec<Chunk>>>,
}

impl SopRetriever {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            index: RwLock::new(None),
        }
    }

    async fn load_chunks(dir: &Path) -> Result<Vec<Chunk>, RetrievalError> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_doc = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("md") || e.eq_ignore_ascii_case("txt"));
            if is_doc && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut chunks = Vec::new();
        for path in paths {
            let source = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let raw = tokio::fs::read_to_string(&path).await?;
            chunks.extend(
                raw.split("\n\n")
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Chunk {
                        source: source.clone(),
                        text: p.to_string(),
                        terms: terms(p),
                    }),
            );
        }
        Ok(chunks)
    }
}

/// Lowercased alphanumeric terms of three or more characters.
fn terms(text: &str) -> HashSet<String> {
    TERM_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| t.len() >= 3)
        .collect()
}

#[async_trait]
impl ContextRetriever for SopRetriever {
    async fn init(&self) -> Result<(), RetrievalError> {
        let mut index = self.index.write().await;
        if index.is_some() {
            return Ok(());
        }
        let chunks = Self::load_chunks(&self.dir).await?;
        info!(dir = %self.dir.display(), chunks = chunks.len(), "SOP index loaded");
        *index = Some(chunks);
        Ok(())
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ContextSnippet>, RetrievalError> {
        let index = self.index.read().await;
        let chunks = index.as_ref().ok_or(RetrievalError::NotInitialized)?;

        let query_terms = terms(query);
        if query_terms.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ContextSnippet> = chunks
            .iter()
            .filter_map(|chunk| {
                let hits = query_terms.intersection(&chunk.terms).count();
                (hits > 0).then(|| ContextSnippet {
                    source: chunk.source.clone(),
                    text: chunk.text.clone(),
                    score: hits as f64 / query_terms.len() as f64,
                })
            })
            .collect();
        // Stable sort keeps document order among equal scores.
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);

        debug!(hits = scored.len(), k, "context retrieved");
        Ok(scored)
    }

    async fn close(&self) {
        *self.index.write().await = None;
    }
}
