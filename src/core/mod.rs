//! Core engine - command parsing, pipeline execution, output multiplexing

pub mod multiwatch;
pub mod parser;
pub mod pipeline;
pub mod poller;
pub mod scrollback;

pub use multiwatch::{MultiwatchGroup, MultiwatchWorker};
pub use pipeline::{PipelineJob, PipelinePlan};
pub use scrollback::{LineAssembler, Scrollback, ScrollbackLine};
