//! Shared domain types for the clonewright pipeline.
//!
//! Everything that crosses a collaborator boundary lives here: the raw page
//! extraction produced by a scraper, the project file map handed to a
//! sandbox, completion requests sent to a generator, and the record written
//! to a store once a run ends.

pub mod completion;
pub mod errors;
pub mod extraction;
pub mod outcome;
pub mod project;
pub mod record;
pub mod traits;

pub use completion::{Completion, CompletionRequest, ImageInput, ResponseFormat, TokenUsage};
pub use errors::CollaboratorError;
pub use extraction::RawExtraction;
pub use outcome::ProviderOutcome;
pub use project::{FilePatch, ProjectFiles};
pub use record::{PooledResource, RunRecord, RunStatus};
pub use traits::{CloneStore, Generator, LogSnapshot, SandboxProvider, Scraper};
