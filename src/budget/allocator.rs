//! Per-category token allocation.
//!
//! Starts from a fixed base per category, nudges each category from profile
//! signals, then balances against the available budget: proportional scaling
//! when over, surplus donated to skeleton and text when under.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::profile::{ContentDensity, NavComplexity, PageLength, SiteProfile};

/// Floor for any category that has raw content, so scaling never zeroes it.
pub const MIN_CATEGORY_TOKENS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetCategory {
    Skeleton,
    TextContent,
    Links,
    Images,
    Icons,
    Backgrounds,
    Sections,
    Interactive,
}

impl BudgetCategory {
    pub const ALL: [BudgetCategory; 8] = [
        BudgetCategory::Skeleton,
        BudgetCategory::TextContent,
        BudgetCategory::Links,
        BudgetCategory::Images,
        BudgetCategory::Icons,
        BudgetCategory::Backgrounds,
        BudgetCategory::Sections,
        BudgetCategory::Interactive,
    ];

    fn has_content(self, profile: &SiteProfile) -> bool {
        let c = &profile.counts;
        match self {
            BudgetCategory::Skeleton => c.skeleton_tokens > 0,
            BudgetCategory::TextContent => c.text_tokens > 0,
            BudgetCategory::Links => c.nav_links + c.footer_links > 0,
            BudgetCategory::Images => c.images > 0,
            BudgetCategory::Icons => c.icons > 0,
            BudgetCategory::Backgrounds => c.backgrounds > 0,
            BudgetCategory::Sections => c.sections > 0,
            BudgetCategory::Interactive => c.interactives > 0,
        }
    }
}

impl std::fmt::Display for BudgetCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BudgetCategory::Skeleton => "skeleton",
            BudgetCategory::TextContent => "text_content",
            BudgetCategory::Links => "links",
            BudgetCategory::Images => "images",
            BudgetCategory::Icons => "icons",
            BudgetCategory::Backgrounds => "backgrounds",
            BudgetCategory::Sections => "sections",
            BudgetCategory::Interactive => "interactive",
        };
        write!(f, "{s}")
    }
}

/// Category to token count. `total() <= available` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub available: usize,
    pub categories: BTreeMap<BudgetCategory, usize>,
}

impl BudgetAllocation {
    pub fn get(&self, category: BudgetCategory) -> usize {
        self.categories.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.categories.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetAllocator {
    pub total_tokens: usize,
    pub screenshot_tokens: usize,
}

impl Default for BudgetAllocator {
    fn default() -> Self {
        Self {
            total_tokens: 25_000,
            screenshot_tokens: 4_000,
        }
    }
}

impl BudgetAllocator {
    pub fn new(total_tokens: usize, screenshot_tokens: usize) -> Self {
        Self {
            total_tokens,
            screenshot_tokens,
        }
    }

    pub fn available(&self) -> usize {
        self.total_tokens.saturating_sub(self.screenshot_tokens)
    }

    pub fn allocate(&self, profile: &SiteProfile) -> BudgetAllocation {
        let mut categories = base_allocation(profile);
        let available = self.available();
        let sum: usize = categories.values().sum();

        if sum > available {
            for value in categories.values_mut() {
                *value = (*value as u128 * available as u128 / sum as u128) as usize;
            }
            apply_content_floor(&mut categories, profile, available);
        } else {
            let half = (available - sum) / 2;
            *categories.entry(BudgetCategory::Skeleton).or_default() += half;
            *categories.entry(BudgetCategory::TextContent).or_default() += half;
        }

        BudgetAllocation {
            available,
            categories,
        }
    }
}

fn base_allocation(profile: &SiteProfile) -> BTreeMap<BudgetCategory, usize> {
    let counts = &profile.counts;
    let features = &profile.features;
    let short = profile.page_length == PageLength::Short;

    let skeleton = if profile.framework.has_verbose_dom() {
        4500
    } else if short {
        2000
    } else {
        3000
    };

    let sections = if counts.sections > 15 {
        9000
    } else if short {
        5000
    } else {
        7000
    };

    let mut text = match profile.density {
        ContentDensity::Heavy => 4000,
        ContentDensity::Minimal => 1000,
        ContentDensity::Normal => 2500,
    };
    if features.has_pricing {
        text += 800;
    }
    if features.has_faq {
        text += 600;
    }
    if features.has_code_blocks {
        text += 400;
    }

    let links = match profile.nav_complexity {
        NavComplexity::MegaMenu => 2500,
        NavComplexity::Dropdown => 2000,
        NavComplexity::Simple => 1200,
    };

    let images = if counts.images > 30 {
        2000
    } else if counts.images < 5 {
        400
    } else {
        1200
    };

    // Image-light pages tend to carry their visuals as inline icons.
    let icons = if counts.images < 5 { 1500 } else { 800 };

    let interactive = if features.has_interactives { 1500 } else { 0 };

    BTreeMap::from([
        (BudgetCategory::Skeleton, skeleton),
        (BudgetCategory::TextContent, text),
        (BudgetCategory::Links, links),
        (BudgetCategory::Images, images),
        (BudgetCategory::Icons, icons),
        (BudgetCategory::Backgrounds, 500),
        (BudgetCategory::Sections, sections),
        (BudgetCategory::Interactive, interactive),
    ])
}

/// Raise categories with content up to the floor, paying from the largest
/// category. Only runs after a scale-down, so the sum stays within `available`.
fn apply_content_floor(
    categories: &mut BTreeMap<BudgetCategory, usize>,
    profile: &SiteProfile,
    available: usize,
) {
    let floor = MIN_CATEGORY_TOKENS.min(available / BudgetCategory::ALL.len());
    for category in BudgetCategory::ALL {
        if !category.has_content(profile) {
            continue;
        }
        let current = categories.get(&category).copied().unwrap_or(0);
        if current >= floor {
            continue;
        }
        let needed = floor - current;
        let donor = categories
            .iter()
            .filter(|(c, _)| **c != category)
            .max_by_key(|(_, v)| **v)
            .map(|(c, v)| (*c, *v));
        if let Some((donor, donor_value)) = donor
            && donor_value >= needed + floor
        {
            categories.insert(donor, donor_value - needed);
            categories.insert(category, floor);
        }
    }
}
