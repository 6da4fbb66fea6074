use async_trait::async_trait;
use clonewright_common::{CollaboratorError, Completion, CompletionRequest, Generator};
use tracing::{debug, warn};

use super::run_command;

/// Generator backed by a local `claude --print` process. Text only: image
/// inputs are dropped.
pub struct ClaudeCliGenerator {
    claude_cmd: String,
    model: Option<String>,
}

impl ClaudeCliGenerator {
    pub fn new(claude_cmd: impl Into<String>) -> Self {
        Self {
            claude_cmd: claude_cmd.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec!["--print".to_string()];
        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args
    }
}

/// The CLI takes a single prompt, so the system text leads it.
fn stdin_prompt(request: &CompletionRequest) -> String {
    if request.system.trim().is_empty() {
        request.prompt.clone()
    } else {
        format!("{}\n\n{}", request.system, request.prompt)
    }
}

#[async_trait]
impl Generator for ClaudeCliGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CollaboratorError> {
        if !request.images.is_empty() {
            debug!(
                images = request.images.len(),
                "CLI backend ignores image inputs"
            );
        }

        let output = run_command(&self.claude_cmd, &self.args(), Some(&stdin_prompt(&request))).await?;
        if !output.success() {
            warn!(
                code = ?output.code,
                stderr = %output.stderr.trim(),
                "Claude command failed"
            );
        }
        let text = output.into_stdout()?;
        if text.trim().is_empty() {
            return Err(CollaboratorError::Malformed(
                "claude produced no output".to_string(),
            ));
        }
        Ok(Completion::text(text))
    }

    fn name(&self) -> &str {
        self.model.as_deref().unwrap_or("claude-cli")
    }
}
