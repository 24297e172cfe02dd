//! Lab-note section population with a multi-model draft/judge/revise loop.
//!
//! N draft models write the same section concurrently, one judge model
//! scores the drafts, and the [`revision_loop::RevisionLoop`] either accepts,
//! feeds the judge's critique back for another cycle, or degrades to
//! returning every draft unranked.
//!
//! Model calls go through [`model_port::ModelPort`]; reference SOP context
//! comes from an injected [`retrieval::ContextRetriever`].

pub mod config;
pub mod drafting;
pub mod errors;
pub mod model_port;
pub mod prompts;
pub mod retrieval;
pub mod revision_loop;
pub mod supervisor;
pub mod telemetry;

pub use config::LabnoteConfig;
pub use errors::{LoopError, ModelError, RetrievalError};
pub use model_port::{ChatRequest, ModelPort, OpenAiCompatClient};
pub use retrieval::{ContextRetriever, NullRetriever, SopRetriever};
pub use revision_loop::{LoopResponse, RevisionLoop};
