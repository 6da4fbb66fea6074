use async_trait::async_trait;
use clonewright_common::{CloneStore, CollaboratorError, RunRecord};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{safe_join, write_project};

/// Stores each run under `<root>/<run_id>/`: the record as `record.json` and
/// the final project files under `project/`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> Result<PathBuf, CollaboratorError> {
        safe_join(&self.root, run_id)
    }

    pub async fn load(&self, run_id: &str) -> Result<RunRecord, CollaboratorError> {
        let path = self.run_dir(run_id)?.join("record.json");
        let text = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&text)
            .map_err(|e| CollaboratorError::Malformed(format!("{}: {e}", path.display())))
    }

    /// Run ids with a saved record, sorted.
    pub fn list(&self) -> Result<Vec<String>, CollaboratorError> {
        list_runs(&self.root)
    }
}

fn list_runs(root: &Path) -> Result<Vec<String>, CollaboratorError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut ids: Vec<String> = std::fs::read_dir(root)?
        .filter_map(Result::ok)
        .filter(|entry| entry.path().join("record.json").is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    ids.sort();
    Ok(ids)
}

#[async_trait]
impl CloneStore for FileStore {
    async fn save(&self, record: &RunRecord) -> Result<(), CollaboratorError> {
        let dir = self.run_dir(&record.run_id)?;
        tokio::fs::create_dir_all(&dir).await?;

        let json = serde_json::to_string_pretty(record)
            .map_err(|e| CollaboratorError::Other(e.into()))?;
        tokio::fs::write(dir.join("record.json"), json).await?;
        write_project(&dir.join("project"), &record.files).await?;

        info!(
            run_id = %record.run_id,
            status = %record.status,
            files = record.files.len(),
            dir = %dir.display(),
            "Saved run record"
        );
        Ok(())
    }
}
