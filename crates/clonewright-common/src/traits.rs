//! Collaborator seams. The pipeline only ever talks to these traits, so tests
//! swap in in-memory doubles and the binary wires real implementations.

use async_trait::async_trait;

use crate::completion::{Completion, CompletionRequest};
use crate::errors::CollaboratorError;
use crate::extraction::RawExtraction;
use crate::project::ProjectFiles;
use crate::record::{PooledResource, RunRecord};

/// Captures a page. Any failure is fatal to the run.
#[async_trait]
pub trait Scraper: Send + Sync {
    async fn extract(&self, url: &str) -> Result<RawExtraction, CollaboratorError>;
}

/// Single completion call against a model.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CollaboratorError>;

    fn name(&self) -> &str;
}

/// Log text fetched from an execution environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSnapshot {
    pub text: String,
    /// Provider-side hint; the compile checker does its own parsing.
    pub has_errors: bool,
}

/// Provisions and drives execution environments.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn provision(&self) -> Result<PooledResource, CollaboratorError>;

    /// Write (or overwrite) the given files into the environment.
    async fn upload(
        &self,
        resource: &PooledResource,
        files: &ProjectFiles,
    ) -> Result<(), CollaboratorError>;

    async fn fetch_logs(&self, resource: &PooledResource) -> Result<LogSnapshot, CollaboratorError>;

    async fn release(&self, resource: &PooledResource) -> Result<(), CollaboratorError>;
}

/// Persists finished runs.
#[async_trait]
pub trait CloneStore: Send + Sync {
    async fn save(&self, record: &RunRecord) -> Result<(), CollaboratorError>;
}
