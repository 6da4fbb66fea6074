//! The run driver.
//!
//! One [`Orchestrator::run`] call takes a URL through every stage and always
//! returns a [`RunReport`] with a terminal status. Retry policy lives here and
//! nowhere else: the validator fix runs once, the compile fix loop runs at
//! most `max_compile_fix_attempts` times.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use clonewright_common::{
    CloneStore, CollaboratorError, Generator, PooledResource, ProjectFiles, RunRecord, RunStatus,
    Scraper,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::assemble::Assembler;
use crate::budget::Budgeter;
use crate::compile::CompileChecker;
use crate::config::CloneToml;
use crate::design::DesignTokenExtractor;
use crate::errors::PipelineError;
use crate::fix::{FixAttempt, TargetedFixer, filter_generated, prune_missing_components};
use crate::generate::{GenerationResult, SectionGenerator};
use crate::plan::SectionPlanner;
use crate::pool::ResourcePool;
use crate::review::ConsistencyReviewer;
use crate::session::RunSessions;
use crate::validate::{ValidationReport, Validator};

use super::events::{EventSink, ProgressEvent};
use super::state::{RunStage, StageMachine};

/// Timeouts and bounds for one run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub scrape_timeout: Duration,
    pub completion_timeout: Duration,
    /// Fallback bound on any single stage, and the generation fan-in deadline.
    pub stage_timeout: Duration,
    pub max_parallel: usize,
    pub max_tokens: u32,
    pub max_compile_fix_attempts: u32,
    pub compile_wait: Duration,
    pub recheck_wait: Duration,
    pub log_fetch_timeout: Duration,
    pub upload_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&CloneToml::default())
    }
}

impl PipelineSettings {
    pub fn from_config(config: &CloneToml) -> Self {
        Self {
            scrape_timeout: Duration::from_secs(config.scraper.timeout_secs.unwrap_or(90)),
            completion_timeout: Duration::from_secs(config.generation.completion_timeout_secs),
            stage_timeout: Duration::from_secs(config.generation.stage_timeout_secs),
            max_parallel: config.generation.max_parallel.max(1),
            max_tokens: config.generation.max_tokens,
            max_compile_fix_attempts: config.fix.max_compile_fix_attempts,
            compile_wait: Duration::from_secs(config.fix.compile_wait_secs),
            recheck_wait: Duration::from_secs(config.fix.recheck_wait_secs),
            log_fetch_timeout: Duration::from_secs(config.fix.log_fetch_timeout_secs),
            upload_timeout: Duration::from_secs(config.fix.upload_timeout_secs),
        }
    }
}

/// Everything a caller learns about a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub url: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub sections: Vec<GenerationResult>,
    pub fix_attempts: u32,
    pub stages: Vec<RunStage>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: ProjectFiles,
}

impl RunReport {
    pub fn sections_failed(&self) -> usize {
        self.sections.iter().filter(|s| !s.success).count()
    }

    pub fn record(&self) -> RunRecord {
        RunRecord {
            run_id: self.run_id.clone(),
            url: self.url.clone(),
            status: self.status,
            endpoint: self.endpoint.clone(),
            reason: self.reason.clone(),
            sections_total: self.sections.len(),
            sections_failed: self.sections_failed(),
            fix_attempts: self.fix_attempts,
            started_at: self.started_at,
            finished_at: self.finished_at,
            files: self.files.clone(),
        }
    }
}

/// Mutable state of one run while it is being driven.
struct RunContext {
    run_id: String,
    url: String,
    machine: StageMachine,
    resource: Option<PooledResource>,
    deployed: bool,
    files: ProjectFiles,
    sections: Vec<GenerationResult>,
    fix_attempts: u32,
    validation_clean: bool,
}

type Finish = (RunStatus, Option<String>);

pub struct Orchestrator {
    scraper: Arc<dyn Scraper>,
    generator: Arc<dyn Generator>,
    pool: ResourcePool,
    store: Option<Arc<dyn CloneStore>>,
    sessions: Option<RunSessions>,
    events: EventSink,
    settings: PipelineSettings,
    budgeter: Budgeter,
    checker: CompileChecker,
}

impl Orchestrator {
    pub fn new(scraper: Arc<dyn Scraper>, generator: Arc<dyn Generator>, pool: ResourcePool) -> Self {
        Self {
            scraper,
            generator,
            pool,
            store: None,
            sessions: None,
            events: EventSink::default(),
            settings: PipelineSettings::default(),
            budgeter: Budgeter::default(),
            checker: CompileChecker::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CloneStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sessions(mut self, sessions: RunSessions) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Set the event channel for progress updates.
    pub fn with_event_channel(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.events = EventSink::new(tx);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_budgeter(mut self, budgeter: Budgeter) -> Self {
        self.budgeter = budgeter;
        self
    }

    pub fn with_checker(mut self, checker: CompileChecker) -> Self {
        self.checker = checker;
        self
    }

    /// Drive one run to a terminal status. Never returns an error: failures
    /// end up in the report's status and reason.
    pub async fn run(&self, url: &str, cancel: CancellationToken) -> RunReport {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("run", run_id = %run_id);
        self.run_with_id(run_id, url, cancel).instrument(span).await
    }

    async fn run_with_id(&self, run_id: String, url: &str, cancel: CancellationToken) -> RunReport {
        let started_at = Utc::now();
        if let Some(sessions) = &self.sessions {
            sessions.evict_idle();
            sessions.start(&run_id, url);
        }
        info!(url = %url, "Run started");

        let mut ctx = RunContext {
            run_id,
            url: url.to_string(),
            machine: StageMachine::new(),
            resource: None,
            deployed: false,
            files: ProjectFiles::new(),
            sections: Vec::new(),
            fix_attempts: 0,
            validation_clean: true,
        };

        let (status, reason) = match self.drive(&mut ctx, &cancel).await {
            Ok(finish) => finish,
            Err(e) if ctx.deployed => {
                warn!(error = %e, stage = %ctx.machine.current(), "Run stopped after deploy");
                if ctx.machine.current().can_transition_to(RunStage::Done) {
                    let _ = ctx.machine.advance(RunStage::Done);
                }
                (RunStatus::DeployedWithIssues, Some(e.reason().to_string()))
            }
            Err(e) => {
                error!(error = %e, stage = %ctx.machine.current(), "Run failed before deploy");
                self.release_undeployed(&mut ctx).await;
                ctx.machine.fail();
                (RunStatus::FailedBeforeDeploy, Some(e.reason().to_string()))
            }
        };

        let endpoint = ctx
            .resource
            .as_ref()
            .filter(|_| ctx.deployed)
            .map(|r| r.endpoint.clone());
        let report = RunReport {
            run_id: ctx.run_id.clone(),
            url: ctx.url.clone(),
            status,
            reason: reason.clone(),
            endpoint: endpoint.clone(),
            sections: std::mem::take(&mut ctx.sections),
            fix_attempts: ctx.fix_attempts,
            stages: ctx.machine.path(),
            started_at,
            finished_at: Utc::now(),
            files: std::mem::take(&mut ctx.files),
        };

        info!(
            status = %status,
            reason = reason.as_deref().unwrap_or("-"),
            fix_attempts = report.fix_attempts,
            "Run finished"
        );
        self.events
            .emit(ProgressEvent::Terminal {
                status,
                reason,
                endpoint,
            })
            .await;
        if let Some(sessions) = &self.sessions {
            sessions.finish(&report.run_id, status);
        }
        self.save(&report).await;
        report
    }

    async fn drive(&self, ctx: &mut RunContext, cancel: &CancellationToken) -> Result<Finish, PipelineError> {
        // Extraction and provisioning are independent; neither waits for the other.
        self.enter(ctx, RunStage::Scraping, cancel).await?;
        let pool = self.pool.clone();
        let mut acquiring = tokio::spawn(async move { pool.acquire().await });

        let timeout = self.settings.scrape_timeout;
        let scrape = async {
            tokio::time::timeout(timeout, self.scraper.extract(&ctx.url))
                .await
                .map_err(|_| CollaboratorError::timeout("extract", timeout))?
        };
        let scraped = self.guard(cancel, RunStage::Scraping, scrape).await;
        let raw = match scraped {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                self.release_when_ready(acquiring);
                return Err(PipelineError::Extraction(e));
            }
            Err(e) => {
                self.release_when_ready(acquiring);
                return Err(e);
            }
        };
        let acquired = self.guard(cancel, RunStage::Scraping, &mut acquiring).await;
        let resource = match acquired {
            Ok(Ok(Ok(resource))) => resource,
            Ok(Ok(Err(e))) => return Err(PipelineError::Provisioning(e)),
            Ok(Err(join_err)) => {
                return Err(PipelineError::Provisioning(CollaboratorError::Other(anyhow!(
                    "provisioning task failed: {join_err}"
                ))));
            }
            Err(e) => {
                self.release_when_ready(acquiring);
                return Err(e);
            }
        };
        ctx.resource = Some(resource.clone());
        self.events
            .emit(ProgressEvent::ResourceReady {
                id: resource.id.clone(),
                endpoint: resource.endpoint.clone(),
            })
            .await;
        self.events
            .emit(ProgressEvent::ExtractionComplete {
                title: raw.title.clone(),
                sections: raw.sections.len(),
                screenshots: raw.screenshots.scroll_chunks.len()
                    + usize::from(raw.screenshots.viewport.is_some()),
            })
            .await;

        self.enter(ctx, RunStage::Budgeting, cancel).await?;
        let budget = self.budgeter.run(&raw);
        info!(
            estimated_tokens = budget.summary.meta.estimated_tokens,
            budget = budget.summary.meta.budget,
            sections = budget.summary.sections.len(),
            "Budget computed"
        );
        self.events
            .emit(ProgressEvent::BudgetComputed {
                profile: budget.profile.clone(),
                allocation: budget.allocation.clone(),
                meta: budget.summary.meta.clone(),
            })
            .await;

        self.enter(ctx, RunStage::TokenizingDesign, cancel).await?;
        let extractor = DesignTokenExtractor::new(Arc::clone(&self.generator))
            .with_timeout(self.settings.completion_timeout)
            .with_max_tokens(self.settings.max_tokens);
        let tokens = self
            .guard(cancel, RunStage::TokenizingDesign, extractor.extract(&budget.summary, &raw))
            .await?;
        self.events
            .emit(ProgressEvent::DesignTokensReady {
                fallback: tokens.fallback,
                primary: tokens.colors.primary.clone(),
                heading_font: tokens.typography.heading_font.clone(),
            })
            .await;

        self.enter(ctx, RunStage::Planning, cancel).await?;
        let plan = SectionPlanner.plan(&budget.summary);
        self.events
            .emit(ProgressEvent::SectionsPlanned {
                components: plan.packages.iter().map(|p| p.component_name.clone()).collect(),
            })
            .await;
        if plan.is_empty() {
            return Err(PipelineError::NoSections);
        }

        self.enter(ctx, RunStage::Generating, cancel).await?;
        let generator = SectionGenerator::new(Arc::clone(&self.generator))
            .with_max_parallel(self.settings.max_parallel)
            .with_call_timeout(self.settings.completion_timeout)
            .with_max_tokens(self.settings.max_tokens);
        let deadline = tokio::time::Instant::now() + self.settings.stage_timeout;
        let mut stream = generator.spawn(&plan, &tokens, deadline, cancel.clone());
        let total = plan.len();
        while let Some(result) = stream.next().await {
            if !result.success {
                warn!(
                    component = %result.component_name,
                    error = result.error.as_deref().unwrap_or("unknown"),
                    "Section failed"
                );
            }
            self.events
                .emit(ProgressEvent::SectionCompleted {
                    component: result.component_name.clone(),
                    order: result.order,
                    success: result.success,
                    error: result.error.clone(),
                    completed: ctx.sections.len() + 1,
                    total,
                })
                .await;
            ctx.sections.push(result);
        }
        if stream.was_interrupted() == Some("cancelled") {
            return Err(PipelineError::Cancelled {
                stage: RunStage::Generating.to_string(),
            });
        }
        let succeeded = ctx.sections.iter().filter(|r| r.success).count();
        info!(succeeded, failed = total - succeeded, "Section generation finished");
        if succeeded == 0 {
            return Err(PipelineError::NothingGenerated { total });
        }

        self.enter(ctx, RunStage::Assembling, cancel).await?;
        ctx.files = Assembler.assemble(&ctx.sections, &tokens, &plan.shared);

        self.enter(ctx, RunStage::Reviewing, cancel).await?;
        let reviewer = ConsistencyReviewer::new(Arc::clone(&self.generator))
            .with_timeout(self.settings.completion_timeout);
        let review = self
            .guard(cancel, RunStage::Reviewing, reviewer.review(&ctx.files, &tokens))
            .await?;
        let (files, changed) = ctx.files.patched(&review.patch);
        ctx.files = files;
        self.events
            .emit(ProgressEvent::ReviewApplied {
                changed,
                rejected: review.rejected,
                accepted: review.accepted,
            })
            .await;

        self.enter(ctx, RunStage::Validating, cancel).await?;
        self.validate_and_fix(ctx, cancel).await?;

        self.enter(ctx, RunStage::Deploying, cancel).await?;
        let resource = ctx
            .resource
            .clone()
            .ok_or_else(|| PipelineError::Other(anyhow!("no environment acquired")))?;
        self.upload(cancel, RunStage::Deploying, &resource, &ctx.files)
            .await?;
        ctx.deployed = true;
        info!(endpoint = %resource.endpoint, files = ctx.files.len(), "Deployed");
        self.events
            .emit(ProgressEvent::Deployed {
                id: resource.id.clone(),
                endpoint: resource.endpoint.clone(),
                files: ctx.files.len(),
            })
            .await;

        self.check_and_fix(ctx, cancel, &resource).await
    }

    /// Validate, fix once if needed, validate once more. Remaining errors are
    /// carried as known issues; they never stop the deploy.
    async fn validate_and_fix(
        &self,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let report = Validator.validate(&ctx.files);
        self.emit_validation(0, &report).await;
        if report.valid {
            return Ok(());
        }

        info!(errors = report.errors.len(), "Validation failed, requesting fix");
        let fixer = self.fixer();
        match self
            .guard(cancel, RunStage::Validating, fixer.fix_validation(&ctx.files, &report))
            .await?
        {
            Ok(patch) => {
                let (files, changed) = ctx.files.patched(&patch);
                ctx.files = files;
                if !changed.is_empty() {
                    self.events
                        .emit(ProgressEvent::FixApplied {
                            stage: RunStage::Validating,
                            attempt: 1,
                            changed,
                        })
                        .await;
                }
            }
            Err(e) => warn!(error = %e, "Validation fix failed"),
        }

        let report = Validator.validate(&ctx.files);
        self.emit_validation(1, &report).await;
        ctx.validation_clean = report.valid;
        if !report.valid {
            warn!(errors = report.errors.len(), "Validation errors remain, deploying anyway");
        }
        Ok(())
    }

    async fn emit_validation(&self, pass: u32, report: &ValidationReport) {
        self.events
            .emit(ProgressEvent::ValidationResult {
                pass,
                valid: report.valid,
                errors: report.errors.iter().map(|e| e.to_string()).collect(),
                warnings: report.warnings.len(),
            })
            .await;
    }

    /// Read logs, fix what points into generated files, re-upload only what
    /// changed, and check again. Bounded by `max_compile_fix_attempts`.
    async fn check_and_fix(
        &self,
        ctx: &mut RunContext,
        cancel: &CancellationToken,
        resource: &PooledResource,
    ) -> Result<Finish, PipelineError> {
        let provider = self.pool.provider();
        let fixer = self.fixer();
        let mut history: Vec<FixAttempt> = Vec::new();
        let mut wait = self.settings.compile_wait;

        loop {
            self.enter(ctx, RunStage::Checking, cancel).await?;
            self.guard(cancel, RunStage::Checking, tokio::time::sleep(wait))
                .await?;

            let timeout = self.settings.log_fetch_timeout;
            let fetched = self
                .guard(
                    cancel,
                    RunStage::Checking,
                    tokio::time::timeout(timeout, provider.fetch_logs(resource)),
                )
                .await?;
            let snapshot = match fetched {
                Ok(Ok(snapshot)) => snapshot,
                Ok(Err(e)) => {
                    warn!(error = %e, "Failed to fetch logs");
                    return self.end_deployed(ctx, "logs_unavailable");
                }
                Err(_) => {
                    warn!(secs = timeout.as_secs(), "Log fetch timed out");
                    return self.end_deployed(ctx, "logs_unavailable");
                }
            };

            let report = self.checker.check(&snapshot);
            info!(
                attempt = ctx.fix_attempts,
                compiled = report.compiled,
                errors = report.errors.len(),
                "Compile check"
            );
            self.events
                .emit(ProgressEvent::CompileResult {
                    attempt: ctx.fix_attempts,
                    compiled: report.compiled,
                    has_errors: report.has_errors,
                    errors: report.errors.iter().map(|e| e.to_string()).collect(),
                })
                .await;

            if report.is_clean() {
                ctx.machine.advance(RunStage::Done)?;
                return Ok(if ctx.validation_clean {
                    (RunStatus::Clean, None)
                } else {
                    (RunStatus::DeployedWithIssues, Some("validation_errors".to_string()))
                });
            }
            if !report.has_errors {
                return self.end_deployed(ctx, "unverified");
            }
            if ctx.fix_attempts >= self.settings.max_compile_fix_attempts {
                warn!(
                    attempts = ctx.fix_attempts,
                    "Compile fix limit reached, leaving known issues"
                );
                return self.end_deployed(ctx, "compile_fix_limit");
            }

            let targeted = filter_generated(&report, &ctx.files);
            if targeted.errors.is_empty() {
                warn!("Compile errors point outside the generated files");
                return self.end_deployed(ctx, "untargetable_errors");
            }

            self.enter(ctx, RunStage::Fixing, cancel).await?;
            ctx.fix_attempts += 1;
            let attempt = ctx.fix_attempts;

            let mut patch = prune_missing_components(&ctx.files, &targeted);
            if patch.is_empty() {
                match self
                    .guard(
                        cancel,
                        RunStage::Fixing,
                        fixer.fix_compile(&ctx.files, &targeted, &history),
                    )
                    .await?
                {
                    Ok(fixed) => patch = fixed,
                    Err(e) => warn!(attempt, error = %e, "Compile fix call failed"),
                }
            }

            let (files, changed) = ctx.files.patched(&patch);
            history.push(FixAttempt {
                attempt,
                errors: targeted.errors.iter().map(|e| e.to_string()).collect(),
                changed: changed.clone(),
            });

            if changed.is_empty() {
                debug!(attempt, "Fix attempt changed nothing");
            } else {
                let delta = files.subset(changed.iter().map(String::as_str));
                match self.upload(cancel, RunStage::Fixing, resource, &delta).await {
                    Ok(()) => {}
                    Err(e @ PipelineError::Cancelled { .. }) => return Err(e),
                    Err(e) => {
                        warn!(attempt, error = %e, "Re-upload failed");
                        return self.end_deployed(ctx, "upload_failed");
                    }
                }
                ctx.files = files;
                let revalidated = Validator.validate(&ctx.files);
                ctx.validation_clean = revalidated.valid;
                info!(
                    attempt,
                    files = ?changed,
                    validation_errors = revalidated.errors.len(),
                    "Applied compile fix"
                );
                self.events
                    .emit(ProgressEvent::FixApplied {
                        stage: RunStage::Fixing,
                        attempt,
                        changed,
                    })
                    .await;
            }
            wait = self.settings.recheck_wait;
        }
    }

    fn end_deployed(&self, ctx: &mut RunContext, reason: &str) -> Result<Finish, PipelineError> {
        ctx.machine.advance(RunStage::Done)?;
        Ok((RunStatus::DeployedWithIssues, Some(reason.to_string())))
    }

    async fn enter(
        &self,
        ctx: &mut RunContext,
        stage: RunStage,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled {
                stage: ctx.machine.current().to_string(),
            });
        }
        if ctx.machine.current() != stage {
            ctx.machine.advance(stage)?;
        }
        if let Some(sessions) = &self.sessions {
            sessions.touch(&ctx.run_id, stage);
        }
        debug!(stage = %stage, "Entering stage");
        self.events.emit(ProgressEvent::StageEntered { stage }).await;
        Ok(())
    }

    /// Race `fut` against cancellation and the stage timeout.
    async fn guard<T>(
        &self,
        cancel: &CancellationToken,
        stage: RunStage,
        fut: impl Future<Output = T>,
    ) -> Result<T, PipelineError> {
        let limit = self.settings.stage_timeout;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled { stage: stage.to_string() }),
            res = tokio::time::timeout(limit, fut) => res.map_err(|_| PipelineError::StageTimeout {
                stage: stage.to_string(),
                secs: limit.as_secs(),
            }),
        }
    }

    async fn upload(
        &self,
        cancel: &CancellationToken,
        stage: RunStage,
        resource: &PooledResource,
        files: &ProjectFiles,
    ) -> Result<(), PipelineError> {
        let provider = self.pool.provider();
        let timeout = self.settings.upload_timeout;
        let uploaded = self
            .guard(cancel, stage, tokio::time::timeout(timeout, provider.upload(resource, files)))
            .await?;
        let result = uploaded.unwrap_or_else(|_| Err(CollaboratorError::timeout("upload", timeout)));
        result.map_err(|source| PipelineError::Upload {
            resource: resource.id.clone(),
            source,
        })
    }

    fn fixer(&self) -> TargetedFixer {
        TargetedFixer::new(Arc::clone(&self.generator)).with_timeout(self.settings.completion_timeout)
    }

    /// Give back an environment the run acquired but never deployed to.
    async fn release_undeployed(&self, ctx: &mut RunContext) {
        let Some(resource) = ctx.resource.take() else {
            return;
        };
        let provider = self.pool.provider();
        match tokio::time::timeout(self.settings.upload_timeout, provider.release(&resource)).await {
            Ok(Ok(())) => debug!(id = %resource.id, "Released environment"),
            Ok(Err(e)) => warn!(id = %resource.id, error = %e, "Failed to release environment"),
            Err(_) => warn!(id = %resource.id, "Timed out releasing environment"),
        }
    }

    /// The run no longer needs the environment being acquired; release it
    /// once provisioning finishes instead of leaking it.
    fn release_when_ready(&self, acquiring: JoinHandle<Result<PooledResource, CollaboratorError>>) {
        let provider = self.pool.provider();
        tokio::spawn(async move {
            if let Ok(Ok(resource)) = acquiring.await {
                debug!(id = %resource.id, "Releasing environment of an abandoned run");
                if let Err(e) = provider.release(&resource).await {
                    warn!(id = %resource.id, error = %e, "Failed to release environment");
                }
            }
        });
    }

    /// A store failure is logged and never changes the outcome.
    async fn save(&self, report: &RunReport) {
        let Some(store) = &self.store else {
            return;
        };
        match tokio::time::timeout(self.settings.upload_timeout, store.save(&report.record())).await {
            Ok(Ok(())) => debug!("Run record saved"),
            Ok(Err(e)) => warn!(error = %e, "Failed to save run record"),
            Err(_) => warn!("Timed out saving run record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::ENTRY_FILE;
    use crate::pool::testing::CountingProvider;
    use crate::testing::{
        MemoryStore, Reply, ScriptedGenerator, StaticScraper, extraction_with_sections,
        valid_component,
    };
    use std::sync::atomic::Ordering;

    const CLEAN_LOG: &str = "○ Compiling / ...\n✓ Compiled / in 900ms (412 modules)\n";
    const HERO_SYNTAX_LOG: &str =
        "○ Compiling / ...\n⨯ ./components/Hero.jsx:3:5\nSyntaxError: Unexpected token (3:5)\n";
    const FIX_PROMPT: &str = "You fix specific errors";
    const SIX: &[&str] = &["navbar", "hero", "features", "pricing", "faq", "footer"];

    fn fast_settings() -> PipelineSettings {
        PipelineSettings {
            compile_wait: Duration::ZERO,
            recheck_wait: Duration::ZERO,
            completion_timeout: Duration::from_secs(5),
            stage_timeout: Duration::from_secs(10),
            ..PipelineSettings::default()
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        provider: Arc<CountingProvider>,
        generator: Arc<ScriptedGenerator>,
        store: Arc<MemoryStore>,
        events: mpsc::Receiver<ProgressEvent>,
    }

    fn harness(kinds: &[&str], generator: ScriptedGenerator, provider: CountingProvider) -> Harness {
        let provider = Arc::new(provider);
        let generator = Arc::new(generator);
        let store = Arc::new(MemoryStore::default());
        let (tx, rx) = mpsc::channel(1024);
        let orchestrator = Orchestrator::new(
            Arc::new(StaticScraper(Some(extraction_with_sections(kinds)))),
            generator.clone(),
            ResourcePool::new(provider.clone(), 1),
        )
        .with_store(store.clone())
        .with_event_channel(tx)
        .with_settings(fast_settings());
        Harness {
            orchestrator,
            provider,
            generator,
            store,
            events: rx,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn stages_entered(events: &[ProgressEvent]) -> Vec<RunStage> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::StageEntered { stage } => Some(*stage),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_clean_run_event_order_and_record() {
        let mut h = harness(
            &["hero", "footer"],
            ScriptedGenerator::new(),
            CountingProvider::with_logs(vec![CLEAN_LOG]),
        );
        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::Clean, "{:?}", report.reason);
        assert_eq!(report.endpoint.as_deref(), Some("https://sb-0.sandbox.test"));
        assert_eq!(report.fix_attempts, 0);
        assert_eq!(*report.stages.last().unwrap(), RunStage::Done);

        let events = drain(&mut h.events);
        assert_eq!(
            stages_entered(&events),
            vec![
                RunStage::Scraping,
                RunStage::Budgeting,
                RunStage::TokenizingDesign,
                RunStage::Planning,
                RunStage::Generating,
                RunStage::Assembling,
                RunStage::Reviewing,
                RunStage::Validating,
                RunStage::Deploying,
                RunStage::Checking,
            ]
        );
        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        let pos = |k: &str| kinds.iter().position(|x| *x == k).unwrap();
        assert!(pos("resource_ready") < pos("budget_computed"));
        assert!(pos("sections_planned") < pos("section_completed"));
        assert!(pos("deployed") < pos("compile_result"));
        assert_eq!(*kinds.last().unwrap(), "terminal");

        let records = h.store.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RunStatus::Clean);
        assert_eq!(records[0].sections_total, 2);
        assert!(records[0].files.contains("components/Hero.jsx"));
    }

    #[tokio::test]
    async fn test_partial_generation_still_deploys() {
        let generator = ScriptedGenerator::new()
            .on("COMPONENT NAME: Features", Reply::Fail)
            .on("COMPONENT NAME: FAQ", Reply::Text("not a component".into()));
        let mut h = harness(SIX, generator, CountingProvider::with_logs(vec![CLEAN_LOG]));

        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert!(report.status.is_deployed(), "{:?}", report.reason);
        assert!(report.stages.contains(&RunStage::Deploying));
        assert_eq!(report.sections.len(), 6);
        assert_eq!(report.sections_failed(), 2);

        let page = report.files.get(ENTRY_FILE).unwrap();
        let imports: Vec<&str> = page
            .lines()
            .filter(|l| l.starts_with("import ") && l.contains("@/components/") && !l.contains("ErrorBoundary"))
            .collect();
        assert_eq!(
            imports,
            vec![
                "import Navbar from \"@/components/Navbar\";",
                "import Hero from \"@/components/Hero\";",
                "import Pricing from \"@/components/Pricing\";",
                "import Footer from \"@/components/Footer\";",
            ]
        );
        assert!(!report.files.contains("components/Features.jsx"));

        let failed: Vec<String> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::SectionCompleted {
                    component,
                    success: false,
                    ..
                } => Some(component),
                _ => None,
            })
            .collect();
        assert_eq!(failed.len(), 2);
        assert_eq!(h.provider.uploaded_paths().len(), 1);
    }

    #[tokio::test]
    async fn test_compile_fix_is_bounded() {
        let fixes: Vec<Reply> = (1..=5)
            .map(|n| {
                let hero = format!("{}// attempt {n}\n", valid_component("Hero"));
                Reply::Text(serde_json::json!({ "components/Hero.jsx": hero }).to_string())
            })
            .collect();
        let generator = ScriptedGenerator::new().on_seq(FIX_PROMPT, fixes);
        let h = harness(
            &["hero", "footer"],
            generator,
            CountingProvider::with_logs(vec![HERO_SYNTAX_LOG]),
        );

        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::DeployedWithIssues);
        assert_eq!(report.reason.as_deref(), Some("compile_fix_limit"));
        assert_eq!(report.fix_attempts, 3);
        assert_eq!(h.generator.calls_matching(FIX_PROMPT), 3);
        assert_eq!(h.provider.log_fetches.load(Ordering::SeqCst), 4);

        let uploads = h.provider.uploaded_paths();
        assert_eq!(uploads.len(), 4);
        for partial in &uploads[1..] {
            assert_eq!(partial, &vec!["components/Hero.jsx".to_string()]);
        }
        assert!(report.files.get("components/Hero.jsx").unwrap().contains("attempt 3"));
        assert_eq!(report.stages.iter().filter(|s| **s == RunStage::Fixing).count(), 3);

        let requests = h.generator.requests.lock().unwrap();
        let last_fix = requests.iter().rev().find(|r| r.system.contains(FIX_PROMPT)).unwrap();
        assert!(last_fix.prompt.contains("attempt 2"));
    }

    #[tokio::test]
    async fn test_compile_fix_then_clean() {
        let hero = format!("{}// fixed\n", valid_component("Hero"));
        let generator = ScriptedGenerator::new().on(
            FIX_PROMPT,
            Reply::Text(serde_json::json!({ "components/Hero.jsx": hero }).to_string()),
        );
        let h = harness(
            &["hero", "footer"],
            generator,
            CountingProvider::with_logs(vec![HERO_SYNTAX_LOG, CLEAN_LOG]),
        );

        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::Clean);
        assert_eq!(report.fix_attempts, 1);
        assert!(report.files.get("components/Hero.jsx").unwrap().ends_with("// fixed\n"));
    }

    #[tokio::test]
    async fn test_validation_fix_runs_once() {
        let broken = valid_component("Hero").replace("\"use client\";\n\n", "");
        let fixed = valid_component("Hero");
        let generator = ScriptedGenerator::new()
            .on("COMPONENT NAME: Hero", Reply::Text(broken))
            .on(
                FIX_PROMPT,
                Reply::Text(serde_json::json!({ "components/Hero.jsx": fixed }).to_string()),
            );
        let mut h = harness(
            &["hero", "footer"],
            generator,
            CountingProvider::with_logs(vec![CLEAN_LOG]),
        );

        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::Clean, "{:?}", report.reason);
        assert_eq!(h.generator.calls_matching(FIX_PROMPT), 1);
        let passes: Vec<(u32, bool)> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::ValidationResult { pass, valid, .. } => Some((pass, valid)),
                _ => None,
            })
            .collect();
        assert_eq!(passes, vec![(0, false), (1, true)]);
    }

    #[tokio::test]
    async fn test_unfixed_validation_is_a_known_issue() {
        let broken = valid_component("Hero").replace("\"use client\";\n\n", "");
        let generator = ScriptedGenerator::new()
            .on("COMPONENT NAME: Hero", Reply::Text(broken))
            .on(FIX_PROMPT, Reply::Fail);
        let h = harness(
            &["hero", "footer"],
            generator,
            CountingProvider::with_logs(vec![CLEAN_LOG]),
        );

        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::DeployedWithIssues);
        assert_eq!(report.reason.as_deref(), Some("validation_errors"));
        assert_eq!(h.generator.calls_matching(FIX_PROMPT), 1);
    }

    #[tokio::test]
    async fn test_compile_fix_that_repairs_validation_ends_clean() {
        let broken = valid_component("Hero").replace("\"use client\";\n\n", "");
        let fixed = valid_component("Hero");
        let generator = ScriptedGenerator::new()
            .on("COMPONENT NAME: Hero", Reply::Text(broken))
            .on_seq(
                FIX_PROMPT,
                vec![
                    Reply::Fail,
                    Reply::Text(serde_json::json!({ "components/Hero.jsx": fixed }).to_string()),
                ],
            );
        let h = harness(
            &["hero", "footer"],
            generator,
            CountingProvider::with_logs(vec![HERO_SYNTAX_LOG, CLEAN_LOG]),
        );

        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::Clean, "{:?}", report.reason);
        assert_eq!(report.fix_attempts, 1);
        assert!(Validator.validate(&report.files).valid);
    }

    #[tokio::test]
    async fn test_compile_fix_that_breaks_validation_is_a_known_issue() {
        let regressed = valid_component("Hero").replace("className=\"py-24\"", "class=\"py-24\"");
        let generator = ScriptedGenerator::new().on(
            FIX_PROMPT,
            Reply::Text(serde_json::json!({ "components/Hero.jsx": regressed }).to_string()),
        );
        let h = harness(
            &["hero", "footer"],
            generator,
            CountingProvider::with_logs(vec![HERO_SYNTAX_LOG, CLEAN_LOG]),
        );

        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::DeployedWithIssues);
        assert_eq!(report.reason.as_deref(), Some("validation_errors"));
        assert_eq!(report.fix_attempts, 1);
        assert!(report.files.get("components/Hero.jsx").unwrap().contains("class=\"py-24\""));
    }

    #[tokio::test]
    async fn test_cancellation_releases_resource() {
        let generator = ScriptedGenerator::new().on(
            "COMPONENT NAME:",
            Reply::Slow(Duration::from_secs(30), "never".into()),
        );
        let h = harness(SIX, generator, CountingProvider::with_logs(vec![CLEAN_LOG]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let report = h.orchestrator.run("https://acme.test", cancel).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.status, RunStatus::FailedBeforeDeploy);
        assert_eq!(report.reason.as_deref(), Some("cancelled"));
        assert_eq!(report.endpoint, None);
        assert_eq!(h.provider.releases.load(Ordering::SeqCst), 1);
        assert!(h.provider.uploaded_paths().is_empty());
        assert_eq!(*report.stages.last().unwrap(), RunStage::Failed);
        assert_eq!(h.store.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_no_sections_fails_before_generation() {
        let h = harness(&[], ScriptedGenerator::new(), CountingProvider::default());
        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::FailedBeforeDeploy);
        assert_eq!(report.reason.as_deref(), Some("no_sections"));
        assert!(!report.stages.contains(&RunStage::Generating));
        assert_eq!(h.provider.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_nothing_generated() {
        let generator = ScriptedGenerator::new().on("COMPONENT NAME:", Reply::Fail);
        let h = harness(&["hero", "footer"], generator, CountingProvider::default());
        let report = h.orchestrator.run("https://acme.test", CancellationToken::new()).await;

        assert_eq!(report.status, RunStatus::FailedBeforeDeploy);
        assert_eq!(report.reason.as_deref(), Some("nothing_generated"));
        assert_eq!(report.sections_failed(), 2);
        assert!(h.provider.uploaded_paths().is_empty());
    }

    #[tokio::test]
    async fn test_extraction_failure_releases_acquired_resource() {
        let provider = Arc::new(CountingProvider::default());
        let orchestrator = Orchestrator::new(
            Arc::new(StaticScraper(None)),
            Arc::new(ScriptedGenerator::new()),
            ResourcePool::new(provider.clone(), 0),
        )
        .with_settings(fast_settings());

        let report = orchestrator.run("https://down.test", CancellationToken::new()).await;
        assert_eq!(report.status, RunStatus::FailedBeforeDeploy);
        assert_eq!(report.reason.as_deref(), Some("extraction_failed"));

        for _ in 0..50 {
            if provider.releases.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(provider.releases.load(Ordering::SeqCst), 1);
        assert_eq!(provider.provisions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sessions_track_the_run() {
        let sessions = RunSessions::new(Duration::from_secs(60));
        let h = harness(
            &["hero"],
            ScriptedGenerator::new(),
            CountingProvider::with_logs(vec![CLEAN_LOG]),
        );
        let orchestrator = h.orchestrator.with_sessions(sessions.clone());

        let report = orchestrator.run("https://acme.test", CancellationToken::new()).await;

        let session = sessions.get(&report.run_id).unwrap();
        assert_eq!(session.status, Some(RunStatus::Clean));
        assert_eq!(session.stage, RunStage::Checking);
    }
}
