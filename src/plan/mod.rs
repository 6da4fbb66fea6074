//! Section planning.
//!
//! Splits a [`ScrapeSummary`] into independent [`SectionPackage`]s, one per
//! page section. Each package carries only its own slice of the page plus the
//! small shared context every section needs (fonts, component manifest), so
//! packages can be generated concurrently without seeing each other.

use clonewright_common::ImageInput;
use clonewright_common::extraction::{ImageAsset, Link, Section};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::budget::ScrapeSummary;

/// Height of one scroll-chunk screenshot in page pixels.
pub const CHUNK_HEIGHT: f64 = 1080.0;

/// Detected section type to canonical component name.
const TYPE_TO_COMPONENT: &[(&str, &str)] = &[
    ("navbar", "Navbar"),
    ("nav", "Navbar"),
    ("header", "Navbar"),
    ("hero", "Hero"),
    ("features", "Features"),
    ("feature", "Features"),
    ("pricing", "Pricing"),
    ("testimonials", "Testimonials"),
    ("testimonial", "Testimonials"),
    ("faq", "FAQ"),
    ("cta", "CTA"),
    ("footer", "Footer"),
    ("stats", "Stats"),
    ("logos", "LogoCloud"),
    ("team", "Team"),
    ("contact", "Contact"),
    ("about", "About"),
    ("blog", "Blog"),
];

/// One section's isolated slice of the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionPackage {
    /// `section-{index}`
    pub id: String,
    /// Stable sort key for assembly.
    pub order: usize,
    pub section_index: usize,
    pub component_name: String,
    /// `components/{Name}.jsx`
    pub filepath: String,
    pub kind: String,
    pub section: Section,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nav_links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub footer_links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<ImageAsset>,
    #[serde(skip)]
    pub screenshot: Option<ImageInput>,
}

/// Context shared by every package of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedContext {
    pub title: String,
    pub url: String,
    /// Every component the page will contain, in order.
    pub manifest: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionPlan {
    pub packages: Vec<SectionPackage>,
    pub shared: SharedContext,
}

impl SectionPlan {
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }
}

/// Canonical component name for a detected section type.
pub fn component_for(kind: &str, index: usize) -> String {
    let normalized = kind.trim().to_lowercase().replace(['-', '_'], " ");
    let lookup = |key: &str| {
        TYPE_TO_COMPONENT
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
    };
    lookup(&normalized)
        .or_else(|| normalized.split_whitespace().find_map(lookup))
        .unwrap_or_else(|| format!("Section{index}"))
}

/// Pure, synchronous partition of a summary into section packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionPlanner;

impl SectionPlanner {
    pub fn plan(&self, summary: &ScrapeSummary) -> SectionPlan {
        let mut used = BTreeSet::new();
        let logo = summary
            .images
            .iter()
            .find(|img| img.role.as_deref() == Some("logo"))
            .cloned();

        let packages: Vec<SectionPackage> = summary
            .sections
            .iter()
            .enumerate()
            .map(|(order, section)| {
                let name = unique_name(component_for(&section.kind, section.index), &mut used);
                let is_nav = name.starts_with("Navbar");
                let is_footer = name.starts_with("Footer");
                SectionPackage {
                    id: format!("section-{}", section.index),
                    order,
                    section_index: section.index,
                    filepath: format!("components/{name}.jsx"),
                    kind: section.kind.clone(),
                    section: section.clone(),
                    nav_links: if is_nav { summary.nav_links.clone() } else { Vec::new() },
                    footer_links: if is_footer {
                        summary.footer_links.clone()
                    } else {
                        Vec::new()
                    },
                    logo: if is_nav || is_footer { logo.clone() } else { None },
                    screenshot: screenshot_for(summary, section),
                    component_name: name,
                }
            })
            .collect();

        let shared = SharedContext {
            title: summary.title.clone(),
            url: summary.url.clone(),
            manifest: packages.iter().map(|p| p.component_name.clone()).collect(),
        };
        SectionPlan { packages, shared }
    }
}

fn unique_name(base: String, used: &mut BTreeSet<String>) -> String {
    let mut name = base.clone();
    let mut n = 2;
    while used.contains(&name) {
        name = format!("{base}{n}");
        n += 1;
    }
    used.insert(name.clone());
    name
}

/// The scroll chunk with the greatest vertical overlap with the section,
/// else the viewport capture.
fn screenshot_for(summary: &ScrapeSummary, section: &Section) -> Option<ImageInput> {
    let shots = &summary.screenshots;
    let top = section.top.max(0.0);
    let bottom = top + section.height.max(1.0);
    let best = shots
        .scroll_chunks
        .iter()
        .map(|chunk| {
            let overlap = (bottom.min(chunk.y + CHUNK_HEIGHT) - top.max(chunk.y)).max(0.0);
            (overlap, chunk)
        })
        .filter(|(overlap, _)| *overlap > 0.0)
        .fold(None, |best: Option<(f64, _)>, candidate| match best {
            Some(b) if b.0 >= candidate.0 => Some(b),
            _ => Some(candidate),
        })
        .map(|(_, chunk)| chunk.data.clone());
    let data = best.or_else(|| shots.viewport.clone())?;
    Some(ImageInput {
        media_type: shots.media_type().to_string(),
        data,
    })
}
