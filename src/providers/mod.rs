//! Concrete collaborators wired by the binary.
//!
//! Each one implements a trait from `clonewright_common`. The command-backed
//! ones share [`run_command`], which spawns a program, optionally feeds it
//! stdin, and collects its output.

pub mod anthropic;
pub mod claude_cli;
pub mod command_sandbox;
pub mod command_scraper;
pub mod file_scraper;
pub mod file_store;

pub use anthropic::AnthropicGenerator;
pub use claude_cli::ClaudeCliGenerator;
pub use command_sandbox::CommandSandbox;
pub use command_scraper::CommandScraper;
pub use file_scraper::FileScraper;
pub use file_store::FileStore;

use clonewright_common::CollaboratorError;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub program: String,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stdout of a successful run, or `ProcessExit` otherwise.
    pub fn into_stdout(self) -> Result<String, CollaboratorError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(CollaboratorError::ProcessExit {
                program: self.program,
                code: self.code.unwrap_or(-1),
            })
        }
    }
}

/// Split a configured command line like `node scrape.js --fast` into the
/// program and its leading arguments.
pub fn split_command(command: &str) -> Result<(String, Vec<String>), CollaboratorError> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| CollaboratorError::Other(anyhow::anyhow!("empty command line")))?;
    Ok((program, parts.collect()))
}

/// Spawn `program args...`, write `stdin` if given, and wait for it.
///
/// A non-zero exit is not an error here; callers decide what it means.
pub async fn run_command(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
) -> Result<CommandOutput, CollaboratorError> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        // A child that exits without draining stdin closes the pipe early;
        // its exit status and stderr say more than the write error would.
        let written = match pipe.write_all(input.as_bytes()).await {
            Ok(()) => pipe.shutdown().await,
            Err(e) => Err(e),
        };
        match written {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!(program, "Child closed stdin before reading all input");
            }
            other => other?,
        }
    }

    let output = child.wait_with_output().await?;
    Ok(CommandOutput {
        program: program.to_string(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Join a project-relative path onto `root`, refusing anything that would
/// escape it.
pub fn safe_join(root: &Path, relative: &str) -> Result<PathBuf, CollaboratorError> {
    let rel = Path::new(relative);
    let escapes = rel
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if relative.is_empty() || escapes {
        return Err(CollaboratorError::Other(anyhow::anyhow!(
            "refusing to write outside the project: {relative}"
        )));
    }
    Ok(root.join(rel))
}

/// Write every file of a project under `root`, creating directories as needed.
pub async fn write_project(
    root: &Path,
    files: &clonewright_common::ProjectFiles,
) -> Result<(), CollaboratorError> {
    for (path, content) in files.iter() {
        let target = safe_join(root, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, content).await?;
    }
    Ok(())
}

/// Write an executable shell script for subprocess tests.
#[cfg(all(test, unix))]
pub(crate) fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}
