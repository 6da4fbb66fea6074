//! Cross-file consistency review.
//!
//! The reviewer reads the whole assembled project in one call and may answer
//! with a sparse map of corrected files. It is a linter, not a rewriter, so
//! every entry it returns is checked in code before it touches the project:
//!
//! - unknown paths are dropped
//! - a file may not shrink below half its length
//! - no hex color may appear that neither the file nor the design tokens had
//! - the entry page must keep rendering every section it rendered before
//!
//! Whatever survives is applied to a copy of the project and re-validated.
//! The patch is accepted only if that introduces no new validation error.

use clonewright_common::{CompletionRequest, FilePatch, Generator, ProjectFiles};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::assemble::ENTRY_FILE;
use crate::design::DesignTokens;
use crate::design::color::hex_literals;
use crate::errors::GenerationError;
use crate::fix::parse_file_map;
use crate::validate::Validator;

const REVIEW_SYSTEM_PROMPT: &str = r#"You review a generated Next.js (app router) project for cross-file consistency.

Each component was generated independently from the same design tokens. Look for problems that only show up across files:
- two components exporting or importing the same name
- an import of a shared helper that does not exist or is spelled differently
- inconsistent container widths or section padding where the tokens define one value
- a component that assumes a prop the page never passes

Return ONLY a JSON object mapping file path to the complete corrected file content, for files you changed:
{"components/Hero.jsx": "...full file..."}
Return {} if nothing needs changing.

Never change text content, colors, fonts or images. Never remove a section. Do not restyle."#;

static RENDERED_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<ErrorBoundary name="(\w+)">"#).unwrap());

/// What the reviewer produced and what survived the guards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewOutcome {
    /// Entries that passed every guard. Empty when the patch was rejected.
    pub patch: FilePatch,
    /// False when the reviewer proposed changes that were thrown out wholesale.
    pub accepted: bool,
    /// `path: reason` for every dropped entry, plus the patch-level reason.
    pub rejected: Vec<String>,
}

impl ReviewOutcome {
    fn empty() -> Self {
        Self {
            accepted: true,
            ..Default::default()
        }
    }
}

pub struct ConsistencyReviewer {
    generator: Arc<dyn Generator>,
    timeout: Duration,
    max_tokens: u32,
}

impl ConsistencyReviewer {
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

    /// Never fails: a failed or timed-out call yields an empty patch.
    pub async fn review(&self, files: &ProjectFiles, tokens: &DesignTokens) -> ReviewOutcome {
        let proposed = match self.request(files, tokens).await {
            Ok(proposed) => proposed,
            Err(e) => {
                warn!(error = %e, "Consistency review failed, keeping project as is");
                return ReviewOutcome::empty();
            }
        };
        if proposed.is_empty() {
            debug!("Reviewer proposed no changes");
            return ReviewOutcome::empty();
        }
        let outcome = guard_patch(files, tokens, proposed);
        info!(
            changed = outcome.patch.len(),
            rejected = outcome.rejected.len(),
            accepted = outcome.accepted,
            "Consistency review done"
        );
        outcome
    }

    async fn request(
        &self,
        files: &ProjectFiles,
        tokens: &DesignTokens,
    ) -> Result<Vec<(String, String)>, GenerationError> {
        let request = CompletionRequest::new(REVIEW_SYSTEM_PROMPT, build_prompt(files, tokens))
            .with_cached_system()
            .with_max_tokens(self.max_tokens)
            .expecting_json();
        let completion = tokio::time::timeout(self.timeout, self.generator.complete(request))
            .await
            .map_err(|_| GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            })??;
        parse_file_map(&completion.text)
    }
}

fn build_prompt(files: &ProjectFiles, tokens: &DesignTokens) -> String {
    let mut out = String::from("DESIGN TOKENS:\n");
    out.push_str(&serde_json::to_string_pretty(tokens).unwrap_or_default());
    out.push_str("\n\nPROJECT FILES:\n");
    for (path, content) in files.iter() {
        let _ = write!(out, "\n=== {path} ===\n{content}\n");
    }
    out
}

/// Apply the per-entry guards, then the re-validation gate.
fn guard_patch(
    files: &ProjectFiles,
    tokens: &DesignTokens,
    proposed: Vec<(String, String)>,
) -> ReviewOutcome {
    let token_colors = hex_literals(&serde_json::to_string(tokens).unwrap_or_default());
    let mut patch = FilePatch::new();
    let mut rejected = Vec::new();

    for (path, content) in proposed {
        let Some(original) = files.get(&path) else {
            rejected.push(format!("{path}: unknown path"));
            continue;
        };
        if original.trim() == content.trim() {
            continue;
        }
        match check_entry(&path, original, &content, &token_colors) {
            Ok(()) => patch.insert(path, content),
            Err(reason) => {
                warn!(path = %path, reason = %reason, "Dropping reviewer change");
                rejected.push(format!("{path}: {reason}"));
            }
        }
    }

    if patch.is_empty() {
        return ReviewOutcome {
            patch,
            accepted: rejected.is_empty(),
            rejected,
        };
    }

    let before = Validator.validate(files).error_keys();
    let (patched, _) = files.patched(&patch);
    let introduced: Vec<String> = Validator
        .validate(&patched)
        .error_keys()
        .difference(&before)
        .map(|(kind, file)| format!("{file} [{kind}]"))
        .collect();
    if !introduced.is_empty() {
        warn!(errors = ?introduced, "Reviewer patch introduces validation errors, discarding it");
        rejected.push(format!(
            "patch introduces validation errors: {}",
            introduced.join(", ")
        ));
        return ReviewOutcome {
            patch: FilePatch::new(),
            accepted: false,
            rejected,
        };
    }

    ReviewOutcome {
        patch,
        accepted: true,
        rejected,
    }
}

fn check_entry(
    path: &str,
    original: &str,
    content: &str,
    token_colors: &BTreeSet<String>,
) -> Result<(), String> {
    if content.trim().len() * 2 < original.trim().len() {
        return Err(format!(
            "shrinks file from {} to {} bytes",
            original.trim().len(),
            content.trim().len()
        ));
    }

    let known = hex_literals(original);
    let invented: Vec<String> = hex_literals(content)
        .into_iter()
        .filter(|c| !known.contains(c) && !token_colors.contains(c))
        .collect();
    if !invented.is_empty() {
        return Err(format!("introduces colors {}", invented.join(", ")));
    }

    if path == ENTRY_FILE {
        let kept = rendered_sections(content);
        let dropped: Vec<String> = rendered_sections(original)
            .into_iter()
            .filter(|name| !kept.contains(name))
            .collect();
        if !dropped.is_empty() {
            return Err(format!("removes sections {}", dropped.join(", ")));
        }
    }
    Ok(())
}

fn rendered_sections(page: &str) -> BTreeSet<String> {
    RENDERED_SECTION
        .captures_iter(page)
        .map(|c| c[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::Assembler;
    use crate::design::testing::sample_tokens;
    use crate::generate::GenerationResult;
    use crate::plan::SharedContext;
    use crate::testing::{Reply, ScriptedGenerator, valid_component};
    use serde_json::json;

    fn project(names: &[&str]) -> ProjectFiles {
        let results: Vec<GenerationResult> = names
            .iter()
            .enumerate()
            .map(|(i, name)| GenerationResult {
                component_name: name.to_string(),
                filepath: format!("components/{name}.jsx"),
                content: valid_component(name),
                success: true,
                error: None,
                order: i,
            })
            .collect();
        Assembler.assemble(&results, &sample_tokens(), &SharedContext::default())
    }

    fn with_reply(reply: Reply) -> (Arc<ScriptedGenerator>, ConsistencyReviewer) {
        let generator = Arc::new(ScriptedGenerator::new().on("cross-file consistency", reply));
        let reviewer = ConsistencyReviewer::new(generator.clone());
        (generator, reviewer)
    }

    fn reply(map: serde_json::Value) -> Reply {
        Reply::Text(map.to_string())
    }

    #[tokio::test]
    async fn test_accepts_token_consistent_change() {
        let files = project(&["Hero", "Footer"]);
        let fixed = valid_component("Hero").replace("py-24", "py-24 bg-[#6366F1]");
        let (generator, reviewer) = with_reply(reply(json!({ "components/Hero.jsx": fixed })));

        let outcome = reviewer.review(&files, &sample_tokens()).await;

        assert!(outcome.accepted);
        assert!(outcome.rejected.is_empty(), "{:?}", outcome.rejected);
        assert_eq!(outcome.patch.get("components/Hero.jsx"), Some(fixed.as_str()));
        assert_eq!(generator.calls(), 1);
        let requests = generator.requests.lock().unwrap();
        assert!(requests[0].prompt.contains("=== components/Footer.jsx ==="));
        assert!(requests[0].prompt.contains("#6366f1"));
    }

    #[tokio::test]
    async fn test_drops_unknown_paths_shrinks_and_new_colors() {
        let files = project(&["Hero", "Footer", "Pricing"]);
        let footer = valid_component("Footer").replace("py-24", "py-24 text-[#ff0044]");
        let pricing = valid_component("Pricing").replace("py-24", "py-16");
        let (_, reviewer) = with_reply(reply(json!({
            "components/Ghost.jsx": valid_component("Ghost"),
            "components/Hero.jsx": "\"use client\";\nexport default function Hero() { return null; }",
            "components/Footer.jsx": footer,
            "components/Pricing.jsx": pricing,
        })));

        let outcome = reviewer.review(&files, &sample_tokens()).await;

        assert!(outcome.accepted);
        assert_eq!(outcome.patch.paths().collect::<Vec<_>>(), vec!["components/Pricing.jsx"]);
        assert_eq!(outcome.rejected.len(), 3);
        assert!(outcome.rejected.iter().any(|r| r.starts_with("components/Ghost.jsx: unknown")));
        assert!(outcome.rejected.iter().any(|r| r.contains("shrinks file")));
        assert!(outcome.rejected.iter().any(|r| r.contains("#ff0044")));
    }

    #[tokio::test]
    async fn test_rejects_patch_that_breaks_validation() {
        let files = project(&["Hero"]);
        let broken = valid_component("Hero").replace("\"use client\";\n", "");
        let (_, reviewer) = with_reply(reply(json!({ "components/Hero.jsx": broken })));

        let outcome = reviewer.review(&files, &sample_tokens()).await;

        assert!(!outcome.accepted);
        assert!(outcome.patch.is_empty());
        assert!(outcome.rejected[0].contains("missing_use_client"), "{:?}", outcome.rejected);
    }

    #[tokio::test]
    async fn test_entry_page_must_keep_sections() {
        let files = project(&["Hero", "Pricing", "Footer"]);
        let page = files.get(ENTRY_FILE).unwrap().replace(
            "      <ErrorBoundary name=\"Pricing\">\n        <Pricing />\n      </ErrorBoundary>\n",
            "",
        );
        let (_, reviewer) = with_reply(reply(json!({ ENTRY_FILE: page })));

        let outcome = reviewer.review(&files, &sample_tokens()).await;

        assert!(outcome.patch.is_empty());
        assert!(outcome.rejected[0].contains("removes sections Pricing"));
    }

    #[tokio::test]
    async fn test_call_failure_yields_empty_patch() {
        let files = project(&["Hero"]);
        let (_, reviewer) = with_reply(Reply::Fail);
        let outcome = reviewer.review(&files, &sample_tokens()).await;
        assert!(outcome.accepted);
        assert!(outcome.patch.is_empty());

        let (_, reviewer) = reviewer_with_timeout();
        let outcome = reviewer.review(&files, &sample_tokens()).await;
        assert!(outcome.patch.is_empty());
    }

    fn reviewer_with_timeout() -> (Arc<ScriptedGenerator>, ConsistencyReviewer) {
        let generator = Arc::new(ScriptedGenerator::new().on(
            "cross-file consistency",
            Reply::Slow(Duration::from_secs(5), "{}".into()),
        ));
        let reviewer =
            ConsistencyReviewer::new(generator.clone()).with_timeout(Duration::from_millis(20));
        (generator, reviewer)
    }

    #[tokio::test]
    async fn test_unchanged_and_empty_replies() {
        let files = project(&["Hero"]);
        let same = files.get("components/Hero.jsx").unwrap().to_string();
        let (_, reviewer) = with_reply(reply(json!({ "components/Hero.jsx": same })));
        let outcome = reviewer.review(&files, &sample_tokens()).await;
        assert!(outcome.accepted);
        assert!(outcome.patch.is_empty());
        assert!(outcome.rejected.is_empty());

        let (_, reviewer) = with_reply(reply(json!({})));
        let outcome = reviewer.review(&files, &sample_tokens()).await;
        assert!(outcome.patch.is_empty());
    }
}
