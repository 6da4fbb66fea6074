//! Layered configuration for clonewright.
//!
//! Settings come from `.clonewright/clonewright.toml` in the project directory,
//! then environment overrides, then CLI flags applied by the command layer.
//! Every field has a default, so a missing file is the same as an empty one.
//!
//! ```toml
//! [budget]
//! total_tokens = 25000
//! screenshot_tokens = 4000
//!
//! [pool]
//! size = 1
//!
//! [generation]
//! backend = "api"
//! model = "claude-sonnet-4-5"
//! max_parallel = 8
//!
//! [fix]
//! max_compile_fix_attempts = 3
//!
//! [sandbox]
//! command = "clonewright-sandbox"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".clonewright";
pub const CONFIG_FILE: &str = "clonewright.toml";

/// Which generator implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// HTTP completion API with image support.
    #[default]
    Api,
    /// Local `claude --print` subprocess, text only.
    Cli,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Api => write!(f, "api"),
            Backend::Cli => write!(f, "cli"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "api" => Ok(Backend::Api),
            "cli" => Ok(Backend::Cli),
            _ => anyhow::bail!("Invalid backend '{}'. Valid values: api, cli", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetSection {
    pub total_tokens: usize,
    /// Fixed cost charged for the screenshot sent alongside the summary.
    pub screenshot_tokens: usize,
    pub chars_per_token: f64,
    pub max_sections: usize,
    pub viewport_height: f64,
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            total_tokens: 25_000,
            screenshot_tokens: 4_000,
            chars_per_token: crate::util::CHARS_PER_TOKEN,
            max_sections: 25,
            viewport_height: 900.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub size: usize,
    pub provision_timeout_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            size: 1,
            provision_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSection {
    pub backend: Backend,
    pub model: String,
    pub max_tokens: u32,
    pub completion_timeout_secs: u64,
    /// Upper bound on the whole section fan-in.
    pub stage_timeout_secs: u64,
    pub max_parallel: usize,
    pub claude_cmd: String,
    pub api_url: String,
    pub api_key_env: String,
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            backend: Backend::Api,
            model: "claude-sonnet-4-5".to_string(),
            max_tokens: 8192,
            completion_timeout_secs: 180,
            stage_timeout_secs: 420,
            max_parallel: 8,
            claude_cmd: "claude".to_string(),
            api_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixSection {
    pub max_compile_fix_attempts: u32,
    /// Wait after the first deploy before reading logs.
    pub compile_wait_secs: u64,
    /// Wait after each fix re-upload before reading logs again.
    pub recheck_wait_secs: u64,
    pub log_fetch_timeout_secs: u64,
    pub upload_timeout_secs: u64,
}

impl Default for FixSection {
    fn default() -> Self {
        Self {
            max_compile_fix_attempts: 3,
            compile_wait_secs: 20,
            recheck_wait_secs: 15,
            log_fetch_timeout_secs: 30,
            upload_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperSection {
    /// External command invoked as `<command> <url>`; prints the extraction JSON.
    pub command: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub command: String,
    pub log_lines: usize,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            command: "clonewright-sandbox".to_string(),
            log_lines: 150,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub idle_ttl_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_ttl_secs: 1800,
        }
    }
}

/// The on-disk configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloneToml {
    pub budget: BudgetSection,
    pub pool: PoolSection,
    pub generation: GenerationSection,
    pub fix: FixSection,
    pub scraper: ScraperSection,
    pub sandbox: SandboxSection,
    pub session: SessionSection,
}

impl CloneToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse clonewright.toml")
    }

    /// Load from `<config_dir>/clonewright.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize clonewright.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(model) = lookup("CLONEWRIGHT_MODEL") {
            self.generation.model = model;
        }
        if let Some(backend) = lookup("CLONEWRIGHT_BACKEND") {
            self.generation.backend = backend.parse()?;
        }
        if let Some(cmd) = lookup("CLAUDE_CMD") {
            self.generation.claude_cmd = cmd;
        }
        if let Some(cmd) = lookup("CLONEWRIGHT_SANDBOX_CMD") {
            self.sandbox.command = cmd;
        }
        if let Some(cmd) = lookup("CLONEWRIGHT_SCRAPER_CMD") {
            self.scraper.command = Some(cmd);
        }
        Ok(())
    }

    /// Non-fatal problems worth surfacing to the user.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.budget.screenshot_tokens >= self.budget.total_tokens {
            warnings.push(format!(
                "budget.screenshot_tokens ({}) leaves no room in budget.total_tokens ({})",
                self.budget.screenshot_tokens, self.budget.total_tokens
            ));
        }
        if self.budget.chars_per_token <= 0.0 {
            warnings.push("budget.chars_per_token must be positive".to_string());
        }
        if self.budget.viewport_height <= 0.0 {
            warnings.push("budget.viewport_height must be positive".to_string());
        }
        if self.pool.size == 0 {
            warnings.push(
                "pool.size is 0: every run provisions its environment on demand".to_string(),
            );
        }
        if self.generation.max_parallel == 0 {
            warnings.push("generation.max_parallel is 0: treated as 1".to_string());
        }
        if self.fix.max_compile_fix_attempts == 0 {
            warnings.push(
                "fix.max_compile_fix_attempts is 0: compile errors will never be fixed"
                    .to_string(),
            );
        }
        if self.generation.completion_timeout_secs > self.generation.stage_timeout_secs {
            warnings.push(format!(
                "generation.completion_timeout_secs ({}) exceeds stage_timeout_secs ({})",
                self.generation.completion_timeout_secs, self.generation.stage_timeout_secs
            ));
        }

        warnings
    }
}

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct CloneConfig {
    pub project_dir: PathBuf,
    pub toml: CloneToml,
}

impl CloneConfig {
    /// Load file config and apply process environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let mut toml = CloneToml::load_or_default(&config_dir(&project_dir))?;
        toml.apply_env(|key| std::env::var(key).ok())?;
        Ok(Self { project_dir, toml })
    }

    pub fn config_dir(&self) -> PathBuf {
        config_dir(&self.project_dir)
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.config_dir().join("runs")
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.pool.provision_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.generation.completion_timeout_secs)
    }

    pub fn scraper_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.scraper.timeout_secs.unwrap_or(90))
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.toml.session.idle_ttl_secs)
    }
}

pub fn config_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR)
}
