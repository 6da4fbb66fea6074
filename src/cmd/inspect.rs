//! Offline diagnostics: `clonewright inspect` and `clonewright parse-logs`.

use anyhow::{Context, Result};
use clonewright::budget::Budgeter;
use clonewright::common::{LogSnapshot, RawExtraction};
use clonewright::compile::CompileChecker;
use clonewright::config::CloneConfig;
use console::style;
use serde_json::json;
use std::path::Path;

pub fn cmd_inspect(project_dir: &Path, extraction: &Path, json_output: bool) -> Result<()> {
    let config = CloneConfig::new(project_dir.to_path_buf())?;
    let text = std::fs::read_to_string(extraction)
        .with_context(|| format!("Failed to read {}", extraction.display()))?;
    let raw = RawExtraction::from_json(&text)
        .with_context(|| format!("Failed to parse extraction {}", extraction.display()))?;

    let outcome = Budgeter::from_config(&config.toml.budget).run(&raw);

    if json_output {
        let value = json!({
            "profile": outcome.profile,
            "allocation": outcome.allocation,
            "meta": outcome.summary.meta,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let profile = &outcome.profile;
    let meta = &outcome.summary.meta;
    println!();
    println!("{}", style(format!("Extraction: {}", raw.title)).bold());
    println!("  url = {}", raw.url);
    println!();
    println!("[profile]");
    println!("  framework = {}", profile.framework);
    println!("  duplication_ratio = {:.2}", profile.duplication_ratio);
    println!("  density = {:?}", profile.density);
    println!("  page_length = {:?}", profile.page_length);
    println!("  nav_complexity = {:?}", profile.nav_complexity);
    println!("  sections = {}", profile.counts.sections);
    println!("  images = {}", profile.counts.images);
    println!();
    println!("[allocation]");
    println!("  available = {}", outcome.allocation.available);
    for (category, tokens) in &outcome.allocation.categories {
        println!("  {} = {}", category, tokens);
    }
    println!();
    println!("[summary]");
    println!("  estimated_tokens = {}", meta.estimated_tokens);
    println!("  budget = {}", meta.budget);
    println!("  sections = {} -> {}", meta.sections_in, meta.sections_out);
    println!("  images = {} -> {}", meta.images_raw, meta.images_kept);
    println!("  screenshot_tokens = {}", meta.screenshot_tokens);
    if meta.estimated_tokens > meta.budget {
        println!();
        println!(
            "{}",
            style("Summary exceeds its budget even after truncation.").yellow()
        );
    }
    println!();
    Ok(())
}

pub fn cmd_parse_logs(file: &Path, json_output: bool) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let checker = CompileChecker::default();
    let report = checker.check(&LogSnapshot {
        text,
        has_errors: false,
    });

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let verdict = if report.is_clean() {
        style("compiled").green()
    } else if report.is_inconclusive() {
        style("inconclusive").yellow()
    } else {
        style("errors").red()
    };
    println!("Parser: {}", checker.parser_name());
    println!("Result: {}", verdict);
    if !report.is_clean() && !report.is_inconclusive() {
        println!();
        print!("{}", report.describe());
    }
    Ok(())
}
