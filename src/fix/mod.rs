//! Targeted fixes.
//!
//! A fix call sees only the failing files, their errors, and what earlier
//! attempts already tried. It returns a sparse [`FilePatch`]; anything outside
//! the generated source tree is dropped. Some compile errors have a
//! deterministic repair that needs no model call at all.

use clonewright_common::{CompletionRequest, FilePatch, Generator, ProjectFiles};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::assemble::ENTRY_FILE;
use crate::compile::{CompileErrorKind, CompileReport};
use crate::errors::GenerationError;
use crate::util::{extract_json, strip_code_fences};
use crate::validate::{ValidationReport, local_base, resolve};

/// Only generated source lives under these roots.
pub const FIXABLE_ROOTS: &[&str] = &["app/", "components/", "lib/"];

const FIX_SYSTEM_PROMPT: &str = r#"You fix specific errors in a generated Next.js (app router) project.

You receive only the failing files, the exact errors for each, and a history of earlier fix attempts.

Return ONLY a JSON object mapping file path to the complete corrected file content:
{"components/Hero.jsx": "...full file..."}

Rules:
- Include only files you changed. Return {} if nothing can be fixed.
- Fix the listed errors. Do not restyle, rename, or remove content.
- Keep every color, font and text exactly as it is.
- Component files start with "use client"; and keep their default export.
- If an earlier attempt did not work, try a different approach."#;

/// One past fix attempt, fed back so the model doesn't repeat itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub attempt: u32,
    pub errors: Vec<String>,
    pub changed: Vec<String>,
}

pub fn is_fixable_path(path: &str) -> bool {
    FIXABLE_ROOTS.iter().any(|root| path.starts_with(root)) && !path.contains("..")
}

/// Keep only errors that point into the generated project.
///
/// An error naming a file outside the project (framework internals,
/// `node_modules`) or naming nothing at all can't be targeted.
pub fn filter_generated(report: &CompileReport, files: &ProjectFiles) -> CompileReport {
    let errors = report
        .errors
        .iter()
        .filter(|e| target_file(e.file.as_deref(), e.module.as_deref(), files).is_some())
        .cloned()
        .collect();
    CompileReport {
        compiled: report.compiled,
        has_errors: report.has_errors,
        errors,
    }
}

/// The project file an error should be fixed in.
fn target_file(file: Option<&str>, module: Option<&str>, files: &ProjectFiles) -> Option<String> {
    if let Some(file) = file {
        if files.contains(file) {
            return Some(file.to_string());
        }
        if file.contains("node_modules") {
            return None;
        }
    }
    // Unresolved imports name a directory; find who imports the module.
    let module = module?;
    let dir = file.map(|f| format!("{}/", f.trim_end_matches('/')));
    let importers: Vec<&str> = files
        .iter()
        .filter(|(_, content)| {
            content.contains(&format!("\"{module}\"")) || content.contains(&format!("'{module}'"))
        })
        .map(|(path, _)| path)
        .collect();
    importers
        .iter()
        .find(|p| dir.as_deref().is_some_and(|d| p.starts_with(d)))
        .or_else(|| importers.first())
        .map(|p| p.to_string())
}

/// Remove imports and usages of components that don't exist from the entry
/// page. Returns an empty patch when there's nothing to prune.
pub fn prune_missing_components(files: &ProjectFiles, report: &CompileReport) -> FilePatch {
    let mut patch = FilePatch::new();
    let Some(page) = files.get(ENTRY_FILE) else {
        return patch;
    };
    let mut page = page.to_string();
    let mut pruned = Vec::new();

    for err in &report.errors {
        if err.kind != CompileErrorKind::ModuleNotFound {
            continue;
        }
        let Some(module) = err.module.as_deref() else {
            continue;
        };
        let base = local_base(ENTRY_FILE, module);
        if !base.starts_with("components/") || resolve(&base, files).is_some() {
            continue;
        }
        if let Some(next) = remove_component(&page, module) {
            page = next;
            pruned.push(module.to_string());
        }
    }

    if !pruned.is_empty() {
        info!(modules = ?pruned, "Pruned missing components from entry page");
        patch.insert(ENTRY_FILE, page);
    }
    patch
}

fn remove_component(page: &str, module: &str) -> Option<String> {
    let spec = regex::escape(module);
    let import = Regex::new(&format!(
        r#"(?m)^[ \t]*import\s+(\w+)\s+from\s+['"]{spec}['"];?[ \t]*\r?\n?"#
    ))
    .ok()?;
    let name = import.captures(page)?.get(1)?.as_str().to_string();
    let without_import = import.replace_all(page, "").into_owned();

    let name = regex::escape(&name);
    let wrapped = Regex::new(&format!(
        r#"(?m)^[ \t]*<ErrorBoundary name="{name}">\s*<{name}\s*/>\s*</ErrorBoundary>[ \t]*\r?\n?"#
    ))
    .ok()?;
    let bare = Regex::new(&format!(r"(?m)^[ \t]*<{name}\s*/>[ \t]*\r?\n?")).ok()?;
    let out = wrapped.replace_all(&without_import, "");
    Some(bare.replace_all(&out, "").into_owned())
}

/// Scoped correction calls.
pub struct TargetedFixer {
    generator: Arc<dyn Generator>,
    timeout: Duration,
    max_tokens: u32,
}

impl TargetedFixer {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            timeout: Duration::from_secs(180),
            max_tokens: 16_000,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// One call covering every file with validation errors.
    pub async fn fix_validation(
        &self,
        files: &ProjectFiles,
        report: &ValidationReport,
    ) -> Result<FilePatch, GenerationError> {
        let targets: BTreeMap<String, Vec<String>> = report
            .errors_by_file()
            .into_iter()
            .map(|(path, issues)| {
                (
                    path.to_string(),
                    issues.iter().map(|i| i.to_string()).collect(),
                )
            })
            .collect();
        self.request_fix(files, &targets, &[]).await
    }

    /// One call covering the compile errors that point into generated files.
    pub async fn fix_compile(
        &self,
        files: &ProjectFiles,
        report: &CompileReport,
        history: &[FixAttempt],
    ) -> Result<FilePatch, GenerationError> {
        let mut targets: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for err in &report.errors {
            if let Some(path) = target_file(err.file.as_deref(), err.module.as_deref(), files) {
                targets.entry(path).or_default().push(err.to_string());
            }
        }
        self.request_fix(files, &targets, history).await
    }

    async fn request_fix(
        &self,
        files: &ProjectFiles,
        targets: &BTreeMap<String, Vec<String>>,
        history: &[FixAttempt],
    ) -> Result<FilePatch, GenerationError> {
        if targets.is_empty() {
            return Ok(FilePatch::new());
        }
        let prompt = build_prompt(files, targets, history);
        let request = CompletionRequest::new(FIX_SYSTEM_PROMPT, prompt)
            .with_max_tokens(self.max_tokens)
            .expecting_json();

        let completion = tokio::time::timeout(self.timeout, self.generator.complete(request))
            .await
            .map_err(|_| GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            })??;
        let patch = parse_patch(&completion.text, files)?;
        debug!(files = patch.len(), targets = targets.len(), "Fix call returned");
        Ok(patch)
    }
}

fn build_prompt(
    files: &ProjectFiles,
    targets: &BTreeMap<String, Vec<String>>,
    history: &[FixAttempt],
) -> String {
    let mut out = String::new();
    for (path, errors) in targets {
        let _ = writeln!(out, "=== {path} ===\nErrors:");
        for e in errors {
            let _ = writeln!(out, "- {e}");
        }
        match files.get(path) {
            Some(code) => {
                let _ = writeln!(out, "Code:\n{code}\n");
            }
            None => out.push_str("(file does not exist)\n\n"),
        }
    }
    if !history.is_empty() {
        out.push_str("Previous attempts:\n");
        for h in history {
            let _ = writeln!(
                out,
                "- attempt {}: changed [{}]; errors before: {}",
                h.attempt,
                h.changed.join(", "),
                h.errors.join(" | ")
            );
        }
    }
    out
}

/// Parse `{path: content}` or `{"files": {path: content}}` from model output.
/// Non-string entries are skipped; fenced contents are unwrapped.
pub(crate) fn parse_file_map(text: &str) -> Result<Vec<(String, String)>, GenerationError> {
    let json = extract_json(text)
        .ok_or_else(|| GenerationError::Malformed("no JSON object in output".into()))?;
    let value: Value =
        serde_json::from_str(&json).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    let map = match value.get("files") {
        Some(Value::Object(inner)) => inner.clone(),
        _ => match value {
            Value::Object(map) => map,
            _ => return Err(GenerationError::Malformed("output is not an object".into())),
        },
    };
    Ok(map
        .into_iter()
        .filter_map(|(path, content)| match content {
            Value::String(content) if content.trim_start().starts_with("```") => {
                Some((path, strip_code_fences(&content)))
            }
            Value::String(content) => Some((path, content)),
            _ => None,
        })
        .collect())
}

/// Entries for paths outside the source tree, empty files and no-op
/// rewrites are dropped.
fn parse_patch(text: &str, files: &ProjectFiles) -> Result<FilePatch, GenerationError> {
    let mut patch = FilePatch::new();
    for (path, content) in parse_file_map(text)? {
        if !is_fixable_path(&path) {
            warn!(path = %path, "Dropping fix for path outside the source tree");
            continue;
        }
        let unchanged = files.get(&path).map(str::trim) == Some(content.trim());
        if content.trim().is_empty() || unchanged {
            continue;
        }
        patch.insert(path, content);
    }
    Ok(patch)
}
