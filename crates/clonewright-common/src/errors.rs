use thiserror::Error;

/// Failure reported by any external collaborator (scraper, generator,
/// sandbox provider, store).
///
/// Call sites inside the pipeline turn these into typed outcomes; they never
/// propagate past a task boundary unhandled.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{program} exited with code {code}")]
    ProcessExit { program: String, code: i32 },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("tool error: {0}")]
    Tool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CollaboratorError {
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs: duration.as_secs(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
