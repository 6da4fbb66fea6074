use async_trait::async_trait;
use clonewright_common::{CollaboratorError, RawExtraction, Scraper};
use std::path::PathBuf;

/// Replays a saved extraction instead of capturing a live page.
pub struct FileScraper {
    path: PathBuf,
}

impl FileScraper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Scraper for FileScraper {
    async fn extract(&self, url: &str) -> Result<RawExtraction, CollaboratorError> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut raw = RawExtraction::from_json(&text).map_err(|e| {
            CollaboratorError::Malformed(format!("{}: {e}", self.path.display()))
        })?;
        if raw.url.is_empty() {
            raw.url = url.to_string();
        }
        Ok(raw)
    }
}
