//! `clonewright validate <dir>`.

use anyhow::{Context, Result, bail};
use clonewright::common::ProjectFiles;
use clonewright::validate::Validator;
use console::style;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

const SKIP_DIRS: &[&str] = &["node_modules", ".git", ".next", "dist", "build", "out"];
const TEXT_EXTENSIONS: &[&str] = &["tsx", "ts", "jsx", "js", "mjs", "cjs", "json", "css"];

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && SKIP_DIRS.contains(&entry.file_name().to_string_lossy().as_ref())
}

/// Read a project tree into a file map keyed by `/`-separated relative paths.
pub fn load_project(dir: &Path) -> Result<ProjectFiles> {
    let mut files = ProjectFiles::new();
    for entry in WalkDir::new(dir).into_iter().filter_entry(|e| !is_skipped(e)) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let wanted = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXT_EXTENSIONS.contains(&e));
        if !wanted {
            continue;
        }
        let relative = path.strip_prefix(dir).unwrap_or(path);
        let key = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.insert(key, content);
    }
    Ok(files)
}

pub fn cmd_validate(dir: &Path, json_output: bool) -> Result<()> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let files = load_project(dir)?;
    let report = Validator.validate(&files);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Checked {} files ({} components)",
            report.stats.files_checked, report.stats.components
        );
        for issue in &report.errors {
            println!("  {} {}", style("error").red().bold(), issue);
        }
        for issue in &report.warnings {
            println!("  {} {}", style("warning").yellow(), issue);
        }
        if report.valid {
            println!("{}", style("Project is valid.").green());
        }
    }

    if !report.valid {
        bail!("{} validation error(s)", report.errors.len());
    }
    Ok(())
}
