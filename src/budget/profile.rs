//! Statistical classification of a raw extraction.

use clonewright_common::extraction::RawExtraction;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::dedup::{dedup_text, normalize_text};
use crate::util::estimate_tokens;

/// Lines at least this long count toward the duplication ratio.
const DUPLICATION_MIN_LINE: usize = 20;
const MINIMAL_TEXT_TOKENS: usize = 500;
const HEAVY_TEXT_TOKENS: usize = 3000;
const MEGA_MENU_LINKS: usize = 15;
const DROPDOWN_LINKS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Framer,
    Webflow,
    Wix,
    Squarespace,
    Wordpress,
    Nextjs,
    #[default]
    Unknown,
}

impl Framework {
    /// Builders whose DOM is deeply nested and attribute-heavy.
    pub fn has_verbose_dom(self) -> bool {
        matches!(self, Framework::Framer | Framework::Webflow | Framework::Wix)
    }

    fn detect(haystack: &str) -> Self {
        const MARKERS: &[(&str, Framework)] = &[
            ("framerusercontent", Framework::Framer),
            ("data-framer", Framework::Framer),
            ("webflow", Framework::Webflow),
            ("wixstatic", Framework::Wix),
            ("wix.com", Framework::Wix),
            ("squarespace", Framework::Squarespace),
            ("wp-content", Framework::Wordpress),
            ("wordpress", Framework::Wordpress),
            ("/_next/", Framework::Nextjs),
            ("__next", Framework::Nextjs),
        ];
        MARKERS
            .iter()
            .find(|(marker, _)| haystack.contains(marker))
            .map(|(_, fw)| *fw)
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Framework::Framer => "framer",
            Framework::Webflow => "webflow",
            Framework::Wix => "wix",
            Framework::Squarespace => "squarespace",
            Framework::Wordpress => "wordpress",
            Framework::Nextjs => "nextjs",
            Framework::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentDensity {
    Minimal,
    #[default]
    Normal,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageLength {
    Short,
    #[default]
    Normal,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavComplexity {
    #[default]
    Simple,
    Dropdown,
    MegaMenu,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub has_pricing: bool,
    pub has_faq: bool,
    pub has_code_blocks: bool,
    pub has_carousel: bool,
    pub has_interactives: bool,
}

/// Raw quantities, so the allocator can tell an empty category from a small one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentCounts {
    pub sections: usize,
    pub images: usize,
    pub icons: usize,
    pub nav_links: usize,
    pub footer_links: usize,
    pub backgrounds: usize,
    pub interactives: usize,
    pub raw_text_tokens: usize,
    pub text_tokens: usize,
    pub skeleton_tokens: usize,
}

/// Read-only classification of one extraction, computed fresh each run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    pub framework: Framework,
    pub duplication_ratio: f64,
    pub density: ContentDensity,
    pub page_length: PageLength,
    pub nav_complexity: NavComplexity,
    pub features: FeatureFlags,
    pub counts: ContentCounts,
}

#[derive(Debug, Clone)]
pub struct SiteProfiler {
    chars_per_token: f64,
    viewport_height: f64,
}

impl Default for SiteProfiler {
    fn default() -> Self {
        Self {
            chars_per_token: crate::util::CHARS_PER_TOKEN,
            viewport_height: 900.0,
        }
    }
}

impl SiteProfiler {
    pub fn new(chars_per_token: f64, viewport_height: f64) -> Self {
        Self {
            chars_per_token,
            viewport_height,
        }
    }

    pub fn profile(&self, raw: &RawExtraction) -> SiteProfile {
        let deduped_text = dedup_text(&raw.text_content);
        let text_tokens = estimate_tokens(&deduped_text, self.chars_per_token);

        let counts = ContentCounts {
            sections: raw.sections.len(),
            images: raw.images.len(),
            icons: raw.icons.len(),
            nav_links: raw.clickables.nav_links.len(),
            footer_links: raw.clickables.footer_links.len(),
            backgrounds: raw.backgrounds.len(),
            interactives: raw.interactives.len(),
            raw_text_tokens: estimate_tokens(&raw.text_content, self.chars_per_token),
            text_tokens,
            skeleton_tokens: estimate_tokens(&raw.dom_skeleton, self.chars_per_token),
        };

        SiteProfile {
            framework: Framework::detect(&framework_haystack(raw)),
            duplication_ratio: duplication_ratio(&raw.text_content),
            density: density_for(text_tokens),
            page_length: self.page_length(raw.page_height),
            nav_complexity: nav_complexity_for(counts.nav_links),
            features: detect_features(raw),
            counts,
        }
    }

    fn page_length(&self, page_height: f64) -> PageLength {
        let viewports = if self.viewport_height > 0.0 {
            page_height / self.viewport_height
        } else {
            0.0
        };
        if viewports < 2.0 {
            PageLength::Short
        } else if viewports < 6.0 {
            PageLength::Normal
        } else {
            PageLength::Long
        }
    }
}

/// `count(long lines) / count(distinct normalized long lines)`; 1.0 means no repetition.
pub fn duplication_ratio(text: &str) -> f64 {
    let long_lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().count() >= DUPLICATION_MIN_LINE)
        .collect();
    if long_lines.is_empty() {
        return 1.0;
    }
    let distinct: HashSet<String> = long_lines.iter().map(|l| normalize_text(l)).collect();
    long_lines.len() as f64 / distinct.len().max(1) as f64
}

fn density_for(text_tokens: usize) -> ContentDensity {
    if text_tokens < MINIMAL_TEXT_TOKENS {
        ContentDensity::Minimal
    } else if text_tokens > HEAVY_TEXT_TOKENS {
        ContentDensity::Heavy
    } else {
        ContentDensity::Normal
    }
}

fn nav_complexity_for(nav_links: usize) -> NavComplexity {
    if nav_links > MEGA_MENU_LINKS {
        NavComplexity::MegaMenu
    } else if nav_links > DROPDOWN_LINKS {
        NavComplexity::Dropdown
    } else {
        NavComplexity::Simple
    }
}

/// Places where builder fingerprints show up. Screenshots are left out on
/// purpose: base64 noise could match a marker by accident.
fn framework_haystack(raw: &RawExtraction) -> String {
    let mut hay = String::with_capacity(raw.dom_skeleton.len() + 256);
    hay.push_str(&raw.url);
    hay.push('\n');
    hay.push_str(&raw.dom_skeleton);
    for img in &raw.images {
        hay.push('\n');
        hay.push_str(&img.url);
    }
    for url in &raw.theme.fonts.google_font_urls {
        hay.push('\n');
        hay.push_str(url);
    }
    hay.to_lowercase()
}

fn detect_features(raw: &RawExtraction) -> FeatureFlags {
    let kinds: Vec<String> = raw.sections.iter().map(|s| s.kind.to_lowercase()).collect();
    let has_kind = |needle: &str| kinds.iter().any(|k| k.contains(needle));
    let text = raw.text_content.to_lowercase();
    let skeleton = raw.dom_skeleton.to_lowercase();

    FeatureFlags {
        has_pricing: has_kind("pricing")
            || text.contains("per month")
            || text.contains("/mo")
            || text.contains("pricing"),
        has_faq: has_kind("faq")
            || text.contains("frequently asked")
            || text.contains("faq"),
        has_code_blocks: skeleton.contains("<pre") || skeleton.contains("<code"),
        has_carousel: has_kind("carousel")
            || ["carousel", "swiper", "slick", "splide"]
                .iter()
                .any(|m| skeleton.contains(m)),
        has_interactives: !raw.interactives.is_empty(),
    }
}
