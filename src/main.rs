use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clonewright::config::Backend;
use clonewright::logging::{self, LogFormat, LogOptions};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "clonewright")]
#[command(version, about = "Clone a web page into a deployable React project")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log line format on stderr
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also write daily-rotated JSON logs to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Directory holding `.clonewright/` (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for one or more URLs
    Clone {
        /// Page URLs, cloned one after another
        #[arg(required = true)]
        urls: Vec<String>,

        /// Use a saved extraction instead of running the scraper
        #[arg(long)]
        extraction: Option<PathBuf>,

        /// Write the final project files here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print progress events as JSON lines on stdout
        #[arg(long)]
        json: bool,

        /// Override the configured generator backend
        #[arg(long)]
        backend: Option<Backend>,

        /// Override the configured model
        #[arg(long)]
        model: Option<String>,
    },
    /// Show budget diagnostics for a saved extraction, without calling a model
    Inspect {
        extraction: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// Run the static validator over a project directory
    Validate {
        dir: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// Parse a saved dev-server log for compile errors
    ParseLogs {
        file: PathBuf,

        #[arg(long)]
        json: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
    /// Write a default clonewright.toml
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _log_guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        format: cli.log_format,
        log_dir: cli.log_dir.clone(),
    })?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Clone {
            urls,
            extraction,
            output,
            json,
            backend,
            model,
        } => {
            let options = cmd::CloneOptions {
                urls: urls.clone(),
                extraction: extraction.clone(),
                output: output.clone(),
                json: *json,
                backend: *backend,
                model: model.clone(),
                verbose: cli.verbose,
            };
            cmd::cmd_clone(&project_dir, options).await?;
        }
        Commands::Inspect { extraction, json } => {
            cmd::cmd_inspect(&project_dir, extraction, *json)?
        }
        Commands::Validate { dir, json } => cmd::cmd_validate(dir, *json)?,
        Commands::ParseLogs { file, json } => cmd::cmd_parse_logs(file, *json)?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
