use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The full deployable project: path to source text.
///
/// Paths are relative and use forward slashes (`app/page.jsx`,
/// `components/Hero.jsx`). Ordered so that serialization, uploads and
/// review prompts are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectFiles {
    files: BTreeMap<String, String>,
}

/// A sparse set of replacement files. Only paths that actually change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilePatch {
    files: BTreeMap<String, String>,
}

impl ProjectFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn remove(&mut self, path: &str) -> Option<String> {
        self.files.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Files under `components/`.
    pub fn components(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(p, _)| p.starts_with("components/"))
    }

    /// Return a copy with `patch` applied, plus the paths whose content changed.
    ///
    /// The returned map is complete before any caller sees the change list,
    /// so notifications are always derived from the final state.
    pub fn patched(&self, patch: &FilePatch) -> (ProjectFiles, Vec<String>) {
        let mut next = self.clone();
        let mut changed = Vec::new();
        for (path, content) in patch.iter() {
            if next.get(path) != Some(content) {
                next.insert(path, content);
                changed.push(path.to_string());
            }
        }
        (next, changed)
    }

    /// A project containing only the listed paths (for partial uploads).
    pub fn subset<'a>(&self, paths: impl IntoIterator<Item = &'a str>) -> ProjectFiles {
        let mut out = ProjectFiles::new();
        for path in paths {
            if let Some(content) = self.get(path) {
                out.insert(path, content);
            }
        }
        out
    }
}

impl FromIterator<(String, String)> for ProjectFiles {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

impl FilePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Keep only entries accepted by `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &str) -> bool) {
        self.files.retain(|p, c| keep(p, c));
    }
}

impl FromIterator<(String, String)> for FilePatch {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ProjectFiles {
        let mut files = ProjectFiles::new();
        files.insert("app/page.jsx", "page");
        files.insert("components/Hero.jsx", "hero");
        files.insert("components/Footer.jsx", "footer");
        files
    }

    #[test]
    fn test_patched_reports_only_real_changes() {
        let files = sample();
        let mut patch = FilePatch::new();
        patch.insert("components/Hero.jsx", "hero v2");
        patch.insert("components/Footer.jsx", "footer");

        let (next, changed) = files.patched(&patch);
        assert_eq!(changed, vec!["components/Hero.jsx".to_string()]);
        assert_eq!(next.get("components/Hero.jsx"), Some("hero v2"));
        // original untouched
        assert_eq!(files.get("components/Hero.jsx"), Some("hero"));
    }

    #[test]
    fn test_patched_adds_new_files() {
        let mut patch = FilePatch::new();
        patch.insert("lib/utils.js", "export const cn = () => ''");
        let (next, changed) = sample().patched(&patch);
        assert_eq!(changed, vec!["lib/utils.js".to_string()]);
        assert_eq!(next.len(), 4);
    }

    #[test]
    fn test_components_filter() {
        let files = sample();
        let names: Vec<_> = files.components().map(|(p, _)| p).collect();
        assert_eq!(names, vec!["components/Footer.jsx", "components/Hero.jsx"]);
    }

    #[test]
    fn test_subset_skips_unknown_paths() {
        let subset = sample().subset(["app/page.jsx", "missing.js"]);
        assert_eq!(subset.len(), 1);
        assert!(subset.contains("app/page.jsx"));
    }

    #[test]
    fn test_serializes_as_plain_map() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.starts_with("{\"app/page.jsx\":\"page\""));
        let back: ProjectFiles = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }
}
