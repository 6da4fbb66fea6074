//! Adaptive data budgeting.
//!
//! Compresses an arbitrarily large page extraction into a fixed token budget:
//!
//! - **Profiling**: classify the extraction (framework, duplication, density, length)
//! - **Allocation**: split the available budget across content categories
//! - **Deduplication**: drop repeated text, links, assets and markup
//! - **Summarization**: truncate each category to its allocation and enforce the total
//!
//! ```ignore
//! use clonewright::budget::Budgeter;
//!
//! let budgeter = Budgeter::from_config(&config.toml.budget);
//! let outcome = budgeter.run(&raw);
//! assert!(outcome.summary.meta.estimated_tokens <= 25_000);
//! ```

pub mod allocator;
pub mod dedup;
pub mod profile;
pub mod summary;

pub use allocator::{BudgetAllocation, BudgetAllocator, BudgetCategory};
pub use dedup::dedup_extraction;
pub use profile::{ContentDensity, Framework, PageLength, SiteProfile, SiteProfiler};
pub use summary::{ScrapeSummary, Summarizer};

use clonewright_common::RawExtraction;

use crate::config::BudgetSection;

/// Everything the budgeting stage produces for one run.
#[derive(Debug, Clone)]
pub struct BudgetOutcome {
    pub profile: SiteProfile,
    pub allocation: BudgetAllocation,
    pub summary: ScrapeSummary,
}

/// Profiler, allocator and summarizer wired to one configuration.
#[derive(Debug, Clone)]
pub struct Budgeter {
    profiler: SiteProfiler,
    allocator: BudgetAllocator,
    summarizer: Summarizer,
}

impl Default for Budgeter {
    fn default() -> Self {
        Self::from_config(&BudgetSection::default())
    }
}

impl Budgeter {
    pub fn from_config(config: &BudgetSection) -> Self {
        Self {
            profiler: SiteProfiler::new(config.chars_per_token, config.viewport_height),
            allocator: BudgetAllocator::new(config.total_tokens, config.screenshot_tokens),
            summarizer: Summarizer {
                total_tokens: config.total_tokens,
                screenshot_tokens: config.screenshot_tokens,
                chars_per_token: config.chars_per_token,
                max_sections: config.max_sections,
            },
        }
    }

    /// Pure and synchronous; never fails, whatever the extraction looks like.
    pub fn run(&self, raw: &RawExtraction) -> BudgetOutcome {
        let profile = self.profiler.profile(raw);
        let allocation = self.allocator.allocate(&profile);
        let summary = self.summarizer.summarize(raw, &profile, &allocation);
        BudgetOutcome {
            profile,
            allocation,
            summary,
        }
    }
}
