//! Tabsh - a multi-tab interactive command engine
//!
//! A small shell with per-tab sessions: pipelines with process-group job
//! control, a single poll-based output multiplexer, periodic command
//! watching (`multiwatch`), persistent history with fuzzy search, and
//! filesystem autocompletion.

pub mod app;
pub mod autocomplete;
pub mod config;
pub mod core;
pub mod history;
pub mod ops;
pub mod session;
pub mod ui;

// Re-exports
pub use app::App;
pub use config::Config;
pub use core::{MultiwatchGroup, PipelineJob, PipelinePlan, Scrollback, ScrollbackLine};
pub use history::{HistoryStore, SearchResult};
pub use ops::{InputOp, RenderLine, RenderModel};
pub use session::{InputLine, Session};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
