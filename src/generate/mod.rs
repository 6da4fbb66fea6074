//! Parallel section generation.
//!
//! One model call per [`SectionPackage`], all launched together and bounded by
//! a semaphore. Results stream back first-completed-first-reported through
//! [`GenerationStream`]. A task's failure is captured in its
//! [`GenerationResult`] and never cancels siblings; the global deadline and
//! the caller's cancellation token turn whatever is still pending into
//! failures.

use clonewright_common::{CompletionRequest, Generator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::design::DesignTokens;
use crate::errors::GenerationError;
use crate::plan::{SectionPackage, SectionPlan, SharedContext};
use crate::util::strip_code_fences;

/// Instructions shared, and cached, across every section call of a run.
pub const SECTION_SYSTEM_PROMPT: &str = r#"You write one React section component for a Next.js (app router) page clone.

Output ONLY the file contents. No explanations, no markdown fences.

Requirements:
- First line is exactly "use client";
- One component, exported with `export default function <ComponentName>()`.
- Tailwind CSS classes via className. Never `class=`, never `for=`, never string style attributes.
- Use ONLY colors, fonts, spacing and radii from DESIGN TOKENS. Hex values go in arbitrary classes such as bg-[#0f172a].
- Allowed imports: react, next/link, next/image, framer-motion, lucide-react, clsx, tailwind-merge, and "@/lib/utils".
- Reproduce the section's real text content. Never write placeholder copy or "..." truncations.
- Every element rendered from .map() carries a stable key.
- Do not render other sections, a page wrapper, or <html>/<body>."#;

/// Outcome of one section's generation. Produced by exactly one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub component_name: String,
    pub filepath: String,
    pub content: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub order: usize,
}

impl GenerationResult {
    fn succeeded(slot: &Slot, content: String) -> Self {
        Self {
            component_name: slot.component_name.clone(),
            filepath: slot.filepath.clone(),
            content,
            success: true,
            error: None,
            order: slot.order,
        }
    }

    fn failed(slot: &Slot, error: impl Into<String>) -> Self {
        Self {
            component_name: slot.component_name.clone(),
            filepath: slot.filepath.clone(),
            content: String::new(),
            success: false,
            error: Some(error.into()),
            order: slot.order,
        }
    }
}

/// Identity of a package, kept while its task is in flight.
#[derive(Debug, Clone)]
struct Slot {
    order: usize,
    component_name: String,
    filepath: String,
}

impl From<&SectionPackage> for Slot {
    fn from(pkg: &SectionPackage) -> Self {
        Self {
            order: pkg.order,
            component_name: pkg.component_name.clone(),
            filepath: pkg.filepath.clone(),
        }
    }
}

/// Launches section generation tasks.
pub struct SectionGenerator {
    generator: Arc<dyn Generator>,
    max_parallel: usize,
    call_timeout: Duration,
    max_tokens: u32,
}

impl SectionGenerator {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            max_parallel: 8,
            call_timeout: Duration::from_secs(180),
            max_tokens: 8192,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Spawn one task per package and return the stream of their results.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        &self,
        plan: &SectionPlan,
        tokens: &DesignTokens,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> GenerationStream {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let tokens_json = serde_json::to_string_pretty(tokens).unwrap_or_default();
        let mut set = JoinSet::new();
        let mut pending = BTreeMap::new();

        for pkg in &plan.packages {
            let slot = Slot::from(pkg);
            let request = CompletionRequest::new(
                SECTION_SYSTEM_PROMPT,
                build_prompt(pkg, &plan.shared, &tokens_json),
            )
            .with_cached_system()
            .with_images(pkg.screenshot.clone().into_iter().collect())
            .with_max_tokens(self.max_tokens);

            let generator = Arc::clone(&self.generator);
            let semaphore = Arc::clone(&semaphore);
            let call_timeout = self.call_timeout;
            let task_slot = slot.clone();
            set.spawn(async move {
                // Closed only when the stream is dropped; the task is aborted then anyway.
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return GenerationResult::failed(&task_slot, "cancelled");
                };
                match call_section(generator.as_ref(), request, call_timeout).await {
                    Ok(content) => GenerationResult::succeeded(&task_slot, content),
                    Err(e) => GenerationResult::failed(&task_slot, e.to_string()),
                }
            });
            pending.insert(slot.order, slot);
        }

        debug!(
            sections = pending.len(),
            max_parallel = self.max_parallel,
            "Section generation started"
        );
        GenerationStream {
            set,
            pending,
            deadline,
            cancel,
            closed: None,
        }
    }
}

async fn call_section(
    generator: &dyn Generator,
    request: CompletionRequest,
    call_timeout: Duration,
) -> Result<String, GenerationError> {
    let completion = tokio::time::timeout(call_timeout, generator.complete(request))
        .await
        .map_err(|_| GenerationError::Timeout {
            secs: call_timeout.as_secs(),
        })??;
    let code = strip_code_fences(&completion.text);
    if code.trim().is_empty() {
        return Err(GenerationError::Malformed("empty output".into()));
    }
    if !code.contains("export default") {
        return Err(GenerationError::Malformed("no default export".into()));
    }
    Ok(code)
}

fn build_prompt(pkg: &SectionPackage, shared: &SharedContext, tokens_json: &str) -> String {
    let content = json!({
        "type": pkg.kind,
        "section": pkg.section,
        "nav_links": pkg.nav_links,
        "footer_links": pkg.footer_links,
        "logo": pkg.logo,
    });
    format!(
        "COMPONENT NAME: {name}\nFILE: {path}\nPAGE: {title} ({url})\nPAGE COMPONENTS IN ORDER: {manifest}\n\n\
         DESIGN TOKENS:\n{tokens_json}\n\nSECTION CONTENT:\n{content}\n{shot}",
        name = pkg.component_name,
        path = pkg.filepath,
        title = shared.title,
        url = shared.url,
        manifest = shared.manifest.join(", "),
        content = serde_json::to_string_pretty(&content).unwrap_or_default(),
        shot = if pkg.screenshot.is_some() {
            "\nThe attached screenshot shows this section."
        } else {
            ""
        },
    )
}

/// Fan-in side of a generation run.
pub struct GenerationStream {
    set: JoinSet<GenerationResult>,
    pending: BTreeMap<usize, Slot>,
    deadline: Instant,
    cancel: CancellationToken,
    closed: Option<&'static str>,
}

impl GenerationStream {
    /// Number of sections without a result yet.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    /// True once the deadline passed or the run was cancelled.
    pub fn was_interrupted(&self) -> Option<&'static str> {
        self.closed
    }

    /// Next result in completion order. After a timeout or cancellation,
    /// every remaining section is returned as a failure in section order.
    pub async fn next(&mut self) -> Option<GenerationResult> {
        loop {
            if let Some(reason) = self.closed {
                let (_, slot) = self.pending.pop_first()?;
                return Some(GenerationResult::failed(&slot, reason));
            }
            if self.pending.is_empty() {
                return None;
            }

            let joined = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.close("cancelled");
                    continue;
                }
                joined = tokio::time::timeout_at(self.deadline, self.set.join_next()) => joined,
            };

            match joined {
                Err(_) => {
                    warn!(pending = self.pending.len(), "Section generation deadline reached");
                    self.close("timed out");
                }
                Ok(None) => {
                    // Every task is gone but some sections never reported.
                    self.close("task lost");
                }
                Ok(Some(Ok(result))) => {
                    self.pending.remove(&result.order);
                    return Some(result);
                }
                Ok(Some(Err(join_err))) => {
                    // A panicked task's section is reported as lost once the set drains.
                    warn!(error = %join_err, "Section task panicked");
                }
            }
        }
    }

    /// Drain the stream into a vector, in completion order.
    pub async fn collect(mut self) -> Vec<GenerationResult> {
        let mut results = Vec::with_capacity(self.pending.len());
        while let Some(result) = self.next().await {
            results.push(result);
        }
        results
    }

    fn close(&mut self, reason: &'static str) {
        self.set.abort_all();
        self.closed = Some(reason);
    }
}

impl Drop for GenerationStream {
    fn drop(&mut self) {
        self.set.abort_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::Budgeter;
    use crate::design::testing::sample_tokens;
    use crate::plan::SectionPlanner;
    use crate::testing::{Reply, ScriptedGenerator, extraction_with_sections, valid_component};
    use std::sync::atomic::Ordering;

    fn plan(kinds: &[&str]) -> SectionPlan {
        let raw = extraction_with_sections(kinds);
        SectionPlanner.plan(&Budgeter::default().run(&raw).summary)
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    fn by_name(results: &[GenerationResult], name: &str) -> GenerationResult {
        results
            .iter()
            .find(|r| r.component_name == name)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_all_sections_generate() {
        let generator = Arc::new(ScriptedGenerator::new());
        let sections = SectionGenerator::new(generator.clone());
        let plan = plan(&["navbar", "hero", "features", "footer"]);

        let results = sections
            .spawn(&plan, &sample_tokens(), far(), CancellationToken::new())
            .collect()
            .await;

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.success));
        let hero = by_name(&results, "Hero");
        assert_eq!(hero.filepath, "components/Hero.jsx");
        assert_eq!(hero.order, 1);
        assert!(hero.content.contains("export default function Hero"));
        assert_eq!(generator.calls(), 4);
    }

    #[tokio::test]
    async fn test_prompts_carry_tokens_and_cached_system() {
        let generator = Arc::new(ScriptedGenerator::new());
        let plan = plan(&["hero"]);
        SectionGenerator::new(generator.clone())
            .spawn(&plan, &sample_tokens(), far(), CancellationToken::new())
            .collect()
            .await;

        let requests = generator.requests.lock().unwrap();
        assert!(requests[0].cache_system);
        assert!(requests[0].prompt.contains("COMPONENT NAME: Hero"));
        assert!(requests[0].prompt.contains("#6366f1"));
    }

    #[tokio::test]
    async fn test_failures_are_captured_not_raised() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on("COMPONENT NAME: Pricing", Reply::Fail)
                .on("COMPONENT NAME: FAQ", Reply::Text("Sorry, I can't.".into())),
        );
        let plan = plan(&["hero", "pricing", "faq", "footer"]);
        let results = SectionGenerator::new(generator)
            .spawn(&plan, &sample_tokens(), far(), CancellationToken::new())
            .collect()
            .await;

        assert_eq!(results.len(), 4);
        assert!(!by_name(&results, "Pricing").success);
        let faq = by_name(&results, "FAQ");
        assert!(!faq.success);
        assert!(faq.error.unwrap().contains("no default export"));
        assert!(by_name(&results, "Hero").success);
        assert!(by_name(&results, "Footer").success);
    }

    #[tokio::test]
    async fn test_code_fences_stripped() {
        let fenced = format!("```jsx\n{}```", valid_component("Hero"));
        let generator = Arc::new(ScriptedGenerator::new().on("COMPONENT NAME: Hero", Reply::Text(fenced)));
        let results = SectionGenerator::new(generator)
            .spawn(&plan(&["hero"]), &sample_tokens(), far(), CancellationToken::new())
            .collect()
            .await;
        assert!(results[0].success);
        assert!(results[0].content.starts_with("\"use client\""));
    }

    #[tokio::test]
    async fn test_deadline_turns_pending_into_failures() {
        let generator = Arc::new(ScriptedGenerator::new().on(
            "COMPONENT NAME: Features",
            Reply::Slow(Duration::from_secs(10), valid_component("Features")),
        ));
        let plan = plan(&["hero", "features", "footer"]);
        let deadline = Instant::now() + Duration::from_millis(300);
        let mut stream =
            SectionGenerator::new(generator).spawn(&plan, &sample_tokens(), deadline, CancellationToken::new());

        let mut results = Vec::new();
        while let Some(r) = stream.next().await {
            results.push(r);
        }
        assert_eq!(stream.was_interrupted(), Some("timed out"));
        assert_eq!(results.len(), 3);
        let features = by_name(&results, "Features");
        assert!(!features.success);
        assert_eq!(features.error.as_deref(), Some("timed out"));
        assert!(by_name(&results, "Hero").success);
    }

    #[tokio::test]
    async fn test_cancellation_fails_remaining_sections() {
        let generator = Arc::new(ScriptedGenerator::new().on(
            "COMPONENT NAME",
            Reply::Slow(Duration::from_secs(10), "export default 1".into()),
        ));
        let cancel = CancellationToken::new();
        let stream = SectionGenerator::new(generator).spawn(
            &plan(&["hero", "footer"]),
            &sample_tokens(),
            far(),
            cancel.clone(),
        );
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let results = stream.collect().await;
        trigger.await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.error.as_deref() == Some("cancelled")));
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let generator = Arc::new(ScriptedGenerator::new().on(
            "COMPONENT NAME",
            Reply::Slow(Duration::from_millis(40), "export default function X() {}".into()),
        ));
        let plan = plan(&["hero", "features", "pricing", "faq", "cta", "footer"]);
        let results = SectionGenerator::new(generator.clone())
            .with_max_parallel(2)
            .spawn(&plan, &sample_tokens(), far(), CancellationToken::new())
            .collect()
            .await;

        assert_eq!(results.len(), 6);
        assert!(generator.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_plan_yields_nothing() {
        let generator = Arc::new(ScriptedGenerator::new());
        let mut stream = SectionGenerator::new(generator).spawn(
            &SectionPlan::default(),
            &sample_tokens(),
            far(),
            CancellationToken::new(),
        );
        assert!(stream.next().await.is_none());
    }
}
