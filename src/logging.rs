//! Tracing subscriber setup.
//!
//! Logs always go to stderr so stdout stays free for command output and
//! `--json` event streams. The filter comes from `CLONEWRIGHT_LOG`, then
//! `RUST_LOG`, then the verbosity flag.

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub const LOG_ENV: &str = "CLONEWRIGHT_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub format: LogFormat,
    /// Also write a daily-rotating log file here.
    pub log_dir: Option<PathBuf>,
}

/// Filter directive used when neither env var is set.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "clonewright=debug,clonewright_common=debug,info"
    } else {
        "clonewright=info,warn"
    }
}

/// The directive string that will be used, first non-blank source wins.
fn resolve_directive(verbose: bool, lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup(LOG_ENV)
        .filter(|d| !d.trim().is_empty())
        .or_else(|| lookup("RUST_LOG").filter(|d| !d.trim().is_empty()))
        .unwrap_or_else(|| default_directive(verbose).to_string())
}

fn build_filter(verbose: bool, lookup: impl Fn(&str) -> Option<String>) -> EnvFilter {
    let directive = resolve_directive(verbose, lookup);
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn stderr_layer(format: LogFormat) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// life of the process so buffered file output is flushed.
pub fn init(options: &LogOptions) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(options.verbose, |key| std::env::var(key).ok());

    let mut layers: Vec<BoxedLayer> = vec![stderr_layer(options.format)];
    let mut guard = None;

    if let Some(dir) = &options.log_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "clonewright.log");
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        layers.push(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_own_env_var_wins() {
        let directive =
            resolve_directive(false, lookup(&[(LOG_ENV, "trace"), ("RUST_LOG", "error")]));
        assert_eq!(directive, "trace");
    }

    #[test]
    fn test_falls_back_to_rust_log_then_default() {
        let directive = resolve_directive(false, lookup(&[("RUST_LOG", "error")]));
        assert_eq!(directive, "error");

        let directive = resolve_directive(true, lookup(&[(LOG_ENV, "  ")]));
        assert_eq!(directive, default_directive(true));
    }

    #[test]
    fn test_invalid_directive_falls_back() {
        // Must not panic on garbage.
        let _ = build_filter(false, lookup(&[(LOG_ENV, "clonewright=loud[")]));
    }

    #[test]
    fn test_default_directive_by_verbosity() {
        assert!(default_directive(false).contains("clonewright=info"));
        assert!(default_directive(true).contains("clonewright=debug"));
    }
}
