//! clonewright: turn a captured web page into a deployable React project.
//!
//! A run goes scrape, budget, design tokens, plan, parallel section
//! generation, assemble, review, validate, deploy, then a bounded
//! compile-check and fix loop. [`orchestrator::Orchestrator`] drives it; the
//! other modules are the stages it calls.

pub mod assemble;
pub mod budget;
pub mod compile;
pub mod config;
pub mod design;
pub mod errors;
pub mod fix;
pub mod generate;
pub mod logging;
pub mod orchestrator;
pub mod plan;
pub mod pool;
pub mod providers;
pub mod review;
pub mod session;
pub mod ui;
pub mod util;
pub mod validate;

#[cfg(test)]
pub(crate) mod testing;

pub use clonewright_common as common;
pub use config::{CloneConfig, CloneToml};
pub use errors::{GenerationError, PipelineError};
pub use orchestrator::{Orchestrator, PipelineSettings, ProgressEvent, RunReport, RunStage};
