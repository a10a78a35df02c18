//! LP planning chat assistant.
//!
//! Ordinary chat is answered from canned replies. A message of the form
//! `LP企画: <theme>` runs a two-stage model pipeline: a Japanese planning
//! analysis, then a 16:9 SVG slide built from it. Optional CSV and SVG uploads
//! ground the two stages.

pub mod analysis;
pub mod chat;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod diagram;
pub mod error;
pub mod export;
pub mod llm_interaction;
pub mod pipeline;
pub mod prompts;
pub mod reference;
pub mod render;
pub mod replies;
pub mod session;
pub mod web_server;

pub use config::Settings;
pub use error::{ExportError, PipelineError, ReferenceError};
pub use pipeline::{LpPlanner, PlannerSource, PlanningOutcome};
pub use session::{ClearPolicy, Reply, SessionContext};
