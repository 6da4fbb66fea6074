//! `clonewright clone <url>...`: wire real collaborators and drive runs.

use anyhow::{Context, Result, bail};
use clonewright::budget::Budgeter;
use clonewright::common::{Generator, RunStatus, SandboxProvider, Scraper};
use clonewright::config::{Backend, CloneConfig};
use clonewright::orchestrator::{Orchestrator, PipelineSettings, ProgressEvent, RunReport};
use clonewright::pool::ResourcePool;
use clonewright::providers::{
    AnthropicGenerator, ClaudeCliGenerator, CommandSandbox, CommandScraper, FileScraper, FileStore,
    write_project,
};
use clonewright::session::RunSessions;
use clonewright::ui::RunProgressUI;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct CloneOptions {
    pub urls: Vec<String>,
    pub extraction: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub json: bool,
    pub backend: Option<Backend>,
    pub model: Option<String>,
    pub verbose: bool,
}

fn build_scraper(config: &CloneConfig, extraction: Option<&Path>) -> Result<Arc<dyn Scraper>> {
    if let Some(path) = extraction {
        return Ok(Arc::new(FileScraper::new(path)));
    }
    match &config.toml.scraper.command {
        Some(command) => Ok(Arc::new(
            CommandScraper::new(command).with_timeout(config.scraper_timeout()),
        )),
        None => bail!(
            "No scraper configured. Pass --extraction <file> or set [scraper] command in {}",
            clonewright::config::CONFIG_FILE
        ),
    }
}

fn build_generator(config: &CloneConfig) -> Result<Arc<dyn Generator>> {
    let generation = &config.toml.generation;
    Ok(match generation.backend {
        Backend::Api => Arc::new(
            AnthropicGenerator::from_env(
                generation.api_url.clone(),
                &generation.api_key_env,
                generation.model.clone(),
            )?
            .with_timeout(config.completion_timeout()),
        ),
        Backend::Cli => Arc::new(
            ClaudeCliGenerator::new(generation.claude_cmd.clone())
                .with_model(generation.model.clone()),
        ),
    })
}

/// Render events until the sender side closes.
async fn render_events(mut rx: mpsc::Receiver<ProgressEvent>, ui: Option<Arc<RunProgressUI>>) {
    while let Some(event) = rx.recv().await {
        match &ui {
            Some(ui) => ui.handle(&event),
            None => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "Failed to serialize progress event"),
            },
        }
    }
}

fn print_json_report(report: &RunReport) -> Result<()> {
    let summary = json!({
        "type": "report",
        "run_id": report.run_id,
        "url": report.url,
        "status": report.status,
        "reason": report.reason,
        "endpoint": report.endpoint,
        "sections_total": report.sections.len(),
        "sections_failed": report.sections_failed(),
        "fix_attempts": report.fix_attempts,
        "stages": report.stages,
    });
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

pub async fn cmd_clone(project_dir: &Path, options: CloneOptions) -> Result<()> {
    let mut config = CloneConfig::new(project_dir.to_path_buf())?;
    if let Some(backend) = options.backend {
        config.toml.generation.backend = backend;
    }
    if let Some(model) = &options.model {
        config.toml.generation.model = model.clone();
    }
    for warning in config.toml.validate() {
        warn!("{}", warning);
    }

    let scraper = build_scraper(&config, options.extraction.as_deref())?;
    let generator = build_generator(&config)?;
    let provider: Arc<dyn SandboxProvider> = Arc::new(
        CommandSandbox::new(config.toml.sandbox.command.clone())
            .with_log_lines(config.toml.sandbox.log_lines),
    );

    // A single run already overlaps provisioning with scraping; warming only
    // pays off when later URLs can pick up an environment.
    let target = if options.urls.len() > 1 {
        config.toml.pool.size
    } else {
        0
    };
    let pool = ResourcePool::new(provider, target).with_provision_timeout(config.provision_timeout());

    let sessions = RunSessions::new(config.session_ttl());
    let cancel = CancellationToken::new();
    let sweeper = sessions.spawn_sweeper(Duration::from_secs(60), cancel.child_token());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let store = Arc::new(FileStore::new(config.runs_dir()));
    let settings = PipelineSettings::from_config(&config.toml);
    let budgeter = Budgeter::from_config(&config.toml.budget);

    let mut failed = 0usize;
    for url in &options.urls {
        if cancel.is_cancelled() {
            break;
        }

        let (tx, rx) = mpsc::channel(256);
        let ui = (!options.json).then(|| Arc::new(RunProgressUI::new(url, options.verbose)));
        let renderer = tokio::spawn(render_events(rx, ui.clone()));

        let orchestrator =
            Orchestrator::new(Arc::clone(&scraper), Arc::clone(&generator), pool.clone())
                .with_store(store.clone())
                .with_sessions(sessions.clone())
                .with_event_channel(tx)
                .with_settings(settings.clone())
                .with_budgeter(budgeter.clone());

        let report = orchestrator.run(url, cancel.child_token()).await;
        drop(orchestrator);
        if let Err(e) = renderer.await {
            warn!(error = %e, "Progress renderer stopped early");
        }

        match &ui {
            Some(ui) => ui.finish(&report),
            None => print_json_report(&report)?,
        }

        if let Some(output) = &options.output {
            let dir = if options.urls.len() > 1 {
                output.join(&report.run_id)
            } else {
                output.clone()
            };
            if !report.files.is_empty() {
                write_project(&dir, &report.files)
                    .await
                    .with_context(|| format!("Failed to write project to {}", dir.display()))?;
                info!(dir = %dir.display(), files = report.files.len(), "Wrote project files");
            }
        }

        if report.status == RunStatus::FailedBeforeDeploy {
            failed += 1;
        }
    }

    pool.shutdown().await;
    cancel.cancel();
    if let Err(e) = sweeper.await {
        warn!(error = %e, "Session sweeper panicked");
    }

    if failed > 0 {
        bail!("{} of {} run(s) failed before deploy", failed, options.urls.len());
    }
    Ok(())
}
