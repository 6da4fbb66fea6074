//! Run orchestration: the stage machine, progress events, and the driver
//! that sequences every pipeline component.

pub mod events;
pub mod runner;
pub mod state;

pub use events::{EventSink, ProgressEvent};
pub use runner::{Orchestrator, PipelineSettings, RunReport};
pub use state::{RunStage, StageMachine};
