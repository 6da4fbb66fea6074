use async_trait::async_trait;
use clonewright_common::{CollaboratorError, RawExtraction, Scraper};
use std::time::Duration;
use tracing::{info, warn};

use super::{run_command, split_command};

/// Runs an external capture tool as `<command> <url>` and reads the
/// extraction JSON from its stdout.
pub struct CommandScraper {
    command: String,
    timeout: Duration,
}

impl CommandScraper {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(90),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Scraper for CommandScraper {
    async fn extract(&self, url: &str) -> Result<RawExtraction, CollaboratorError> {
        let (program, mut args) = split_command(&self.command)?;
        args.push(url.to_string());

        info!(program = %program, url, "Capturing page");
        let output = tokio::time::timeout(self.timeout, run_command(&program, &args, None))
            .await
            .map_err(|_| CollaboratorError::timeout("page extraction", self.timeout))??;
        if !output.success() {
            warn!(stderr = %output.stderr.trim(), "Scraper exited with an error");
        }
        let stdout = output.into_stdout()?;

        let mut raw = RawExtraction::from_json(stdout.trim())
            .map_err(|e| CollaboratorError::Malformed(format!("extraction JSON: {e}")))?;
        if raw.url.is_empty() {
            raw.url = url.to_string();
        }
        Ok(raw)
    }
}
