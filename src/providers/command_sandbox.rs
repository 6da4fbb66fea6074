//! Sandbox provider driven by an external command.
//!
//! The command is invoked once per action:
//!
//! ```text
//! <command> provision            -> {"kind":"deployed","url":...,"id":...}
//! <command> upload <id> <dir>    -> {"kind":"ok"}
//! <command> logs <id> <lines>    -> {"kind":"logs","text":...,"has_errors":...}
//! <command> release <id>         -> {"kind":"ok"}
//! ```
//!
//! Any action may answer `{"kind":"tool_error","message":...}` instead.

use async_trait::async_trait;
use clonewright_common::{
    CollaboratorError, LogSnapshot, PooledResource, ProjectFiles, ProviderOutcome, SandboxProvider,
};
use std::path::PathBuf;
use tracing::{debug, warn};

use super::{CommandOutput, run_command, split_command, write_project};

pub struct CommandSandbox {
    command: String,
    log_lines: usize,
    staging_root: PathBuf,
}

impl CommandSandbox {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            log_lines: 150,
            staging_root: std::env::temp_dir(),
        }
    }

    pub fn with_log_lines(mut self, lines: usize) -> Self {
        self.log_lines = lines;
        self
    }

    /// Where upload directories are staged before the tool picks them up.
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = root.into();
        self
    }

    async fn invoke(&self, action: &str, extra: &[String]) -> Result<ProviderOutcome, CollaboratorError> {
        let (program, mut args) = split_command(&self.command)?;
        args.push(action.to_string());
        args.extend(extra.iter().cloned());

        debug!(program = %program, action, "Invoking sandbox provider");
        let output = run_command(&program, &args, None).await?;
        decode_outcome(output)
    }
}

/// A failing tool that still printed a `tool_error` reports that message;
/// otherwise a non-zero exit is a `ProcessExit`.
fn decode_outcome(output: CommandOutput) -> Result<ProviderOutcome, CollaboratorError> {
    if !output.success() {
        if let Ok(ProviderOutcome::ToolError { message }) = ProviderOutcome::decode(&output.stdout) {
            return Err(CollaboratorError::Tool(message));
        }
        warn!(
            program = %output.program,
            stderr = %output.stderr.trim(),
            "Sandbox provider command failed"
        );
        return Err(CollaboratorError::ProcessExit {
            program: output.program,
            code: output.code.unwrap_or(-1),
        });
    }
    ProviderOutcome::decode(&output.stdout)?.into_result()
}

fn unexpected(action: &str, outcome: &ProviderOutcome) -> CollaboratorError {
    CollaboratorError::Malformed(format!("unexpected outcome for {action}: {outcome:?}"))
}

#[async_trait]
impl SandboxProvider for CommandSandbox {
    async fn provision(&self) -> Result<PooledResource, CollaboratorError> {
        match self.invoke("provision", &[]).await? {
            ProviderOutcome::Deployed { url, id } => Ok(PooledResource::new(id, url)),
            other => Err(unexpected("provision", &other)),
        }
    }

    async fn upload(
        &self,
        resource: &PooledResource,
        files: &ProjectFiles,
    ) -> Result<(), CollaboratorError> {
        let staging = self
            .staging_root
            .join(format!("clonewright-upload-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&staging).await?;

        let result = async {
            write_project(&staging, files).await?;
            let dir = staging.display().to_string();
            self.invoke("upload", &[resource.id.clone(), dir]).await
        }
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            debug!(error = %e, dir = %staging.display(), "Could not remove upload staging dir");
        }

        match result? {
            ProviderOutcome::Ok | ProviderOutcome::Deployed { .. } => Ok(()),
            other => Err(unexpected("upload", &other)),
        }
    }

    async fn fetch_logs(&self, resource: &PooledResource) -> Result<LogSnapshot, CollaboratorError> {
        let lines = self.log_lines.to_string();
        match self.invoke("logs", &[resource.id.clone(), lines]).await? {
            ProviderOutcome::Logs { text, has_errors } => Ok(LogSnapshot { text, has_errors }),
            other => Err(unexpected("logs", &other)),
        }
    }

    async fn release(&self, resource: &PooledResource) -> Result<(), CollaboratorError> {
        match self.invoke("release", &[resource.id.clone()]).await? {
            ProviderOutcome::Ok => Ok(()),
            other => Err(unexpected("release", &other)),
        }
    }
}
