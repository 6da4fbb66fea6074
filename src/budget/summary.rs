//! Budget-fitted projection of a raw extraction.
//!
//! The summary is the only page data generation ever sees. Its serialized
//! size estimate plus the fixed screenshot cost never exceeds the total token
//! budget: category truncation does most of the work, and a final shedding
//! loop enforces the bound regardless of how the categories came out.

use clonewright_common::completion::ImageInput;
use clonewright_common::extraction::{
    Background, Button, IconMarkup, ImageAsset, Link, RawExtraction, Screenshots, Section, Theme,
};
use serde::Serialize;
use serde_json::Value;

use super::allocator::{BudgetAllocation, BudgetCategory};
use super::dedup::dedup_extraction;
use super::profile::{Framework, SiteProfile};
use crate::util::{estimate_json_tokens, estimate_tokens, truncate_chars};

pub const MIDDLE_MARKER: &str = "\n[... middle content omitted, see screenshot ...]\n";

/// Head share of a head/tail truncation.
const HEAD_SHARE: f64 = 0.6;
/// Room left for the meta block's own digits changing after the final estimate.
const META_SLACK_TOKENS: usize = 16;
const MAX_THEME_ENTRIES: usize = 12;
const MAX_FIELD_CHARS: usize = 300;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryMeta {
    /// Text estimate plus screenshot cost.
    pub estimated_tokens: usize,
    pub budget: usize,
    pub duplication_ratio: f64,
    pub framework: Framework,
    pub sections_in: usize,
    pub sections_out: usize,
    pub images_raw: usize,
    pub images_kept: usize,
    pub screenshot_tokens: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScrapeSummary {
    pub url: String,
    pub title: String,
    pub page_height: f64,
    pub theme: Theme,
    pub skeleton: String,
    pub text_content: String,
    pub nav_links: Vec<Link>,
    pub footer_links: Vec<Link>,
    pub cta_buttons: Vec<Button>,
    pub images: Vec<ImageAsset>,
    pub icons: Vec<IconMarkup>,
    pub backgrounds: Vec<Background>,
    pub sections: Vec<Section>,
    pub interactives: Vec<Value>,
    /// Sent as images, accounted as a fixed cost rather than text.
    #[serde(skip)]
    pub screenshots: Screenshots,
    pub meta: SummaryMeta,
}

impl ScrapeSummary {
    /// Token estimate of the text part (everything but screenshots).
    pub fn text_tokens(&self, chars_per_token: f64) -> usize {
        estimate_json_tokens(self, chars_per_token)
    }

    /// Above-the-fold capture, or the first scroll chunk when missing.
    pub fn representative_screenshot(&self) -> Option<ImageInput> {
        let data = self
            .screenshots
            .viewport
            .clone()
            .or_else(|| self.screenshots.scroll_chunks.first().map(|c| c.data.clone()))?;
        Some(ImageInput {
            media_type: self.screenshots.media_type().to_string(),
            data,
        })
    }

    pub fn has_screenshots(&self) -> bool {
        self.screenshots.count() > 0
    }
}

#[derive(Debug, Clone)]
pub struct Summarizer {
    pub total_tokens: usize,
    pub screenshot_tokens: usize,
    pub chars_per_token: f64,
    pub max_sections: usize,
}

impl Default for Summarizer {
    fn default() -> Self {
        Self {
            total_tokens: 25_000,
            screenshot_tokens: 4_000,
            chars_per_token: crate::util::CHARS_PER_TOKEN,
            max_sections: 25,
        }
    }
}

impl Summarizer {
    pub fn summarize(
        &self,
        raw: &RawExtraction,
        profile: &SiteProfile,
        allocation: &BudgetAllocation,
    ) -> ScrapeSummary {
        let deduped = dedup_extraction(raw);
        let cpt = self.chars_per_token;
        let budget = |c: BudgetCategory| allocation.get(c);

        let skeleton = truncate_head_tail(&deduped.dom_skeleton, budget(BudgetCategory::Skeleton), cpt);
        let text_content = truncate_lines(&deduped.text_content, budget(BudgetCategory::TextContent), cpt);

        let mut links_left = budget(BudgetCategory::Links);
        let nav_links = take_within(&deduped.clickables.nav_links, &mut links_left, cpt);
        let footer_links = take_within(&deduped.clickables.footer_links, &mut links_left, cpt);
        let cta_buttons = take_within(&deduped.clickables.cta_buttons, &mut links_left, cpt);

        let mut ranked_images = deduped.images.clone();
        ranked_images.sort_by_key(image_rank);
        let images = truncate_list(&ranked_images, budget(BudgetCategory::Images), cpt);
        let icons = truncate_list(&deduped.icons, budget(BudgetCategory::Icons), cpt);
        let backgrounds = truncate_list(&deduped.backgrounds, budget(BudgetCategory::Backgrounds), cpt);
        let interactives = truncate_list(&deduped.interactives, budget(BudgetCategory::Interactive), cpt);

        let mut sections: Vec<Section> = deduped
            .sections
            .iter()
            .enumerate()
            .map(|(position, section)| Section {
                index: position,
                ..section.clone()
            })
            .take(self.max_sections)
            .collect();
        fit_sections(&mut sections, budget(BudgetCategory::Sections), cpt);

        let mut summary = ScrapeSummary {
            url: truncate_chars(&raw.url, MAX_FIELD_CHARS).to_string(),
            title: truncate_chars(&raw.title, MAX_FIELD_CHARS).to_string(),
            page_height: raw.page_height,
            theme: cap_theme(&raw.theme),
            skeleton,
            text_content,
            nav_links,
            footer_links,
            cta_buttons,
            images,
            icons,
            backgrounds,
            sections,
            interactives,
            screenshots: raw.screenshots.clone(),
            meta: SummaryMeta {
                budget: self.total_tokens,
                duplication_ratio: profile.duplication_ratio,
                framework: profile.framework,
                sections_in: raw.sections.len(),
                images_raw: raw.images.len(),
                ..Default::default()
            },
        };

        self.enforce_total(&mut summary);

        summary.meta.sections_out = summary.sections.len();
        summary.meta.images_kept = summary.images.len();
        summary.meta.screenshot_tokens = self.screenshot_cost(&summary);
        summary.meta.estimated_tokens = summary.text_tokens(cpt) + summary.meta.screenshot_tokens;
        summary
    }

    fn screenshot_cost(&self, summary: &ScrapeSummary) -> usize {
        if summary.has_screenshots() {
            self.screenshot_tokens
        } else {
            0
        }
    }

    /// Shed lowest-priority content until the whole summary fits.
    fn enforce_total(&self, summary: &mut ScrapeSummary) {
        if self.screenshot_tokens + META_SLACK_TOKENS >= self.total_tokens {
            summary.screenshots = Screenshots::default();
        }
        loop {
            let limit = self
                .total_tokens
                .saturating_sub(self.screenshot_cost(summary))
                .saturating_sub(META_SLACK_TOKENS);
            if summary.text_tokens(self.chars_per_token) <= limit {
                return;
            }
            if !shed_one(summary) {
                // Nothing text-side left to drop; the screenshots must go.
                if summary.has_screenshots() {
                    summary.screenshots = Screenshots::default();
                    continue;
                }
                return;
            }
        }
    }
}

/// Remove one piece of content, lowest priority first. False when empty.
fn shed_one(summary: &mut ScrapeSummary) -> bool {
    if summary.interactives.pop().is_some()
        || summary.backgrounds.pop().is_some()
        || summary.icons.pop().is_some()
        || summary.cta_buttons.pop().is_some()
        || summary.footer_links.pop().is_some()
        || summary.images.pop().is_some()
    {
        return true;
    }
    if summary.sections.len() > 1 {
        summary.sections.pop();
        return true;
    }
    if halve(&mut summary.skeleton) || halve(&mut summary.text_content) {
        return true;
    }
    if summary.nav_links.pop().is_some() || summary.sections.pop().is_some() {
        return true;
    }
    if summary.theme != Theme::default() {
        summary.theme = Theme::default();
        return true;
    }
    if !summary.title.is_empty() || !summary.url.is_empty() {
        summary.title.clear();
        summary.url.clear();
        return true;
    }
    false
}

fn halve(text: &mut String) -> bool {
    if text.is_empty() {
        return false;
    }
    let keep = text.chars().count() / 2;
    *text = truncate_chars(text, keep).to_string();
    true
}

/// Keep the first 60% and last 40% of the allowed characters, with a marker between.
pub fn truncate_head_tail(text: &str, budget_tokens: usize, chars_per_token: f64) -> String {
    if estimate_tokens(text, chars_per_token) <= budget_tokens {
        return text.to_string();
    }
    let budget_chars = (budget_tokens as f64 * chars_per_token) as usize;
    let marker_chars = MIDDLE_MARKER.chars().count();
    if budget_chars <= marker_chars {
        return truncate_chars(text, budget_chars).to_string();
    }
    let usable = budget_chars - marker_chars;
    let head_chars = (usable as f64 * HEAD_SHARE) as usize;
    let tail_chars = usable - head_chars;

    let chars: Vec<char> = text.chars().collect();
    let head: String = chars[..head_chars].iter().collect();
    let tail: String = chars[chars.len() - tail_chars..].iter().collect();
    format!("{head}{MIDDLE_MARKER}{tail}")
}

/// Keep whole lines from the top while they fit.
pub fn truncate_lines(text: &str, budget_tokens: usize, chars_per_token: f64) -> String {
    if estimate_tokens(text, chars_per_token) <= budget_tokens {
        return text.to_string();
    }
    let mut kept = String::new();
    for line in text.split('\n') {
        let candidate_len = kept.chars().count() + line.chars().count() + 1;
        if (candidate_len as f64 / chars_per_token).ceil() as usize > budget_tokens {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
    }
    kept
}

/// Ranked-list truncation: keep items in order while their cumulative estimate fits.
pub fn truncate_list<T: Clone + Serialize>(
    items: &[T],
    budget_tokens: usize,
    chars_per_token: f64,
) -> Vec<T> {
    let mut left = budget_tokens;
    take_within(items, &mut left, chars_per_token)
}

/// Like `truncate_list`, but draws from a shared remaining budget.
fn take_within<T: Clone + Serialize>(items: &[T], left: &mut usize, chars_per_token: f64) -> Vec<T> {
    let mut out = Vec::new();
    for item in items {
        // +1 for the separating comma
        let cost = estimate_json_tokens(item, chars_per_token) + 1;
        if cost > *left {
            break;
        }
        *left -= cost;
        out.push(item.clone());
    }
    out
}

fn image_rank(image: &ImageAsset) -> u8 {
    match image.role.as_deref().map(str::to_lowercase).as_deref() {
        Some("logo") => 0,
        Some("hero") => 1,
        Some("background") => 2,
        _ => 3,
    }
}

fn cap_theme(theme: &Theme) -> Theme {
    let mut out = theme.clone();
    let colors = &mut out.colors;
    for list in [
        &mut colors.accent_colors,
        &mut colors.backgrounds,
        &mut colors.heading_colors,
        &mut colors.text_colors,
        &mut colors.border_colors,
    ] {
        list.truncate(MAX_THEME_ENTRIES);
    }
    out.fonts.families.truncate(MAX_THEME_ENTRIES);
    out.fonts.google_font_urls.truncate(MAX_THEME_ENTRIES);
    out.fonts.scale.truncate(MAX_THEME_ENTRIES);
    out
}

fn sections_fit(sections: &[Section], budget: usize, cpt: f64) -> bool {
    estimate_json_tokens(&sections, cpt) <= budget
}

/// Trim section detail from the last section backwards, coarser each pass,
/// and only then drop trailing sections.
fn fit_sections(sections: &mut Vec<Section>, budget: usize, cpt: f64) {
    type Trim = fn(&mut Section);
    let passes: [Trim; 4] = [
        |s| s.links.clear(),
        |s| {
            s.paragraphs.truncate(2);
            s.icons.truncate(1);
        },
        |s| {
            s.images.truncate(1);
            s.buttons.truncate(2);
        },
        |s| {
            s.headings.truncate(2);
            s.paragraphs.truncate(1);
            for block in s.headings.iter_mut().chain(s.paragraphs.iter_mut()) {
                block.text = truncate_chars(&block.text, MAX_FIELD_CHARS).to_string();
            }
        },
    ];

    for trim in passes {
        for i in (0..sections.len()).rev() {
            if sections_fit(sections, budget, cpt) {
                return;
            }
            trim(&mut sections[i]);
        }
    }
    while sections.len() > 1 && !sections_fit(sections, budget, cpt) {
        sections.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::allocator::BudgetAllocator;
    use crate::budget::profile::SiteProfiler;
    use clonewright_common::extraction::{ScrollChunk, TextBlock};
    use proptest::prelude::*;

    fn big_extraction(sections: usize) -> RawExtraction {
        let block = |t: String| TextBlock {
            text: t,
            ..Default::default()
        };
        RawExtraction {
            url: "https://acme.test".into(),
            title: "Acme".into(),
            page_height: 9000.0,
            text_content: (0..2000)
                .map(|i| format!("Line of marketing copy number {i}\n"))
                .collect(),
            dom_skeleton: (0..3000).map(|i| format!("<div class=\"c{i}\">")).collect(),
            images: (0..200)
                .map(|i| ImageAsset {
                    url: format!("https://cdn.test/img{i}.png"),
                    alt: format!("image {i}"),
                    role: (i == 150).then(|| "logo".to_string()),
                    ..Default::default()
                })
                .collect(),
            sections: (0..sections)
                .map(|i| Section {
                    kind: "features".into(),
                    headings: vec![block(format!("Heading {i}"))],
                    paragraphs: (0..6).map(|p| block(format!("Section {i} paragraph {p} {}", "lorem ipsum ".repeat(20)))).collect(),
                    links: (0..10)
                        .map(|l| Link {
                            text: format!("link {i}-{l}"),
                            href: format!("/s{i}/l{l}"),
                        })
                        .collect(),
                    ..Default::default()
                })
                .collect(),
            screenshots: Screenshots {
                viewport: Some("aGVsbG8=".into()),
                scroll_chunks: vec![ScrollChunk {
                    y: 0.0,
                    data: "aGVsbG8=".into(),
                }],
                media_type: Some("image/jpeg".into()),
            },
            ..Default::default()
        }
    }

    fn summarize(raw: &RawExtraction, total: usize, shot: usize) -> ScrapeSummary {
        let profile = SiteProfiler::default().profile(raw);
        let allocation = BudgetAllocator::new(total, shot).allocate(&profile);
        Summarizer {
            total_tokens: total,
            screenshot_tokens: shot,
            ..Default::default()
        }
        .summarize(raw, &profile, &allocation)
    }

    #[test]
    fn test_summary_respects_total_budget() {
        let raw = big_extraction(40);
        let summary = summarize(&raw, 25_000, 4_000);
        assert!(summary.meta.estimated_tokens <= 25_000);
        assert_eq!(summary.meta.screenshot_tokens, 4_000);
        assert_eq!(summary.meta.sections_in, 40);
        assert!(summary.meta.sections_out <= 25);
        assert!(summary.meta.sections_out >= 1);
        assert!(summary.images.len() < 200);
    }

    #[test]
    fn test_tight_budget_still_fits() {
        let raw = big_extraction(10);
        let summary = summarize(&raw, 6_000, 4_000);
        assert!(summary.meta.estimated_tokens <= 6_000);
    }

    #[test]
    fn test_screenshots_dropped_when_they_cannot_fit() {
        let raw = big_extraction(3);
        let summary = summarize(&raw, 3_000, 4_000);
        assert!(!summary.has_screenshots());
        assert!(summary.meta.estimated_tokens <= 3_000);
    }

    #[test]
    fn test_sections_reindexed_by_position() {
        let mut raw = big_extraction(3);
        for s in &mut raw.sections {
            s.index = 7;
        }
        let summary = summarize(&raw, 25_000, 4_000);
        let indices: Vec<usize> = summary.sections.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_logo_ranked_first() {
        let raw = big_extraction(2);
        let summary = summarize(&raw, 25_000, 4_000);
        assert_eq!(summary.images[0].role.as_deref(), Some("logo"));
    }

    #[test]
    fn test_empty_extraction_summarizes() {
        let summary = summarize(&RawExtraction::default(), 25_000, 4_000);
        assert!(summary.sections.is_empty());
        assert_eq!(summary.meta.screenshot_tokens, 0);
        assert!(summary.representative_screenshot().is_none());
    }

    #[test]
    fn test_representative_screenshot_prefers_viewport() {
        let summary = summarize(&big_extraction(1), 25_000, 4_000);
        let shot = summary.representative_screenshot().unwrap();
        assert_eq!(shot.media_type, "image/jpeg");
        assert_eq!(shot.data, "aGVsbG8=");
    }

    #[test]
    fn test_truncate_head_tail_keeps_both_ends() {
        let text: String = format!("HEAD{}TAIL", "x".repeat(10_000));
        let out = truncate_head_tail(&text, 100, 3.5);
        assert!(out.starts_with("HEAD"));
        assert!(out.ends_with("TAIL"));
        assert!(out.contains("middle content omitted"));
        assert!(out.chars().count() <= 350);
    }

    #[test]
    fn test_truncate_head_tail_under_budget_is_identity() {
        assert_eq!(truncate_head_tail("short", 100, 3.5), "short");
    }

    #[test]
    fn test_truncate_lines_keeps_whole_lines() {
        let out = truncate_lines("aaaa\nbbbb\ncccc\ndddd", 3, 3.5);
        assert_eq!(out, "aaaa\nbbbb");
    }

    #[test]
    fn test_truncate_list_cuts_at_budget() {
        let items: Vec<String> = (0..100).map(|i| format!("item-{i:03}")).collect();
        let kept = truncate_list(&items, 20, 3.5);
        assert!(!kept.is_empty());
        assert!(kept.len() < 100);
        assert_eq!(kept[0], "item-000");
    }

    #[test]
    fn test_fit_sections_drops_links_first() {
        let raw = big_extraction(4);
        let mut sections = raw.sections.clone();
        let full = estimate_json_tokens(&sections, 3.5);
        let links_only: usize = sections
            .iter()
            .map(|s| estimate_json_tokens(&s.links, 3.5))
            .sum();
        fit_sections(&mut sections, full - links_only / 2, 3.5);
        assert_eq!(sections.len(), 4);
        assert!(sections.last().unwrap().links.is_empty());
        assert_eq!(sections[0].paragraphs.len(), 6);
    }

    fn generated_extraction(
        sections: usize,
        text_lines: usize,
        skeleton_nodes: usize,
        images: usize,
        icons: usize,
        shots: bool,
    ) -> RawExtraction {
        let mut raw = big_extraction(sections);
        raw.text_content = (0..text_lines)
            .map(|i| format!("Distinct sentence {i} about the product and its pricing\n"))
            .collect();
        raw.dom_skeleton = (0..skeleton_nodes)
            .map(|i| format!("<section class=\"s{i}\"><div>"))
            .collect();
        raw.images.truncate(images);
        raw.icons = (0..icons)
            .map(|i| IconMarkup {
                markup: format!("<svg viewBox=\"0 0 24 24\"><path d=\"M{i} 0L24 {i}\"/></svg>"),
                label: Some(format!("icon {i}")),
            })
            .collect();
        if !shots {
            raw.screenshots = Screenshots::default();
        }
        raw
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_summary_never_exceeds_total(
            sections in 0usize..40,
            text_lines in 0usize..3000,
            skeleton_nodes in 0usize..4000,
            images in 0usize..200,
            icons in 0usize..80,
            shots in any::<bool>(),
            total in 1_500usize..30_000,
            screenshot in 0usize..6_000,
        ) {
            let raw = generated_extraction(sections, text_lines, skeleton_nodes, images, icons, shots);
            let summary = summarize(&raw, total, screenshot);
            prop_assert!(
                summary.meta.estimated_tokens <= total,
                "estimated {} over total {}",
                summary.meta.estimated_tokens,
                total
            );
        }
    }
}
