//! Removal of repeated content from a raw extraction.
//!
//! Site builders often render the same block several times (desktop, tablet
//! and mobile variants hidden with CSS), and the same asset is frequently
//! served at several resolutions. Every function here keeps the first
//! occurrence of each normalized key and is idempotent.

use clonewright_common::extraction::{
    Background, Button, IconMarkup, ImageAsset, Link, RawExtraction, Section, TextBlock,
};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Lines shorter than this (after trimming) are layout noise, not content.
const MIN_LINE_CHARS: usize = 4;

static PUNCTUATION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\s]").unwrap());
static WIDTH_SEGMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/[wh]_\d+/").unwrap());
static RETINA_SUFFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@\d(\.\d+)?x").unwrap());
static SIZE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\d{2,5}x\d{2,5}(\.[A-Za-z0-9]+)$").unwrap());
static SVG_ID_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\s*id="[^"]*""#).unwrap());

/// Collapse whitespace, strip punctuation and lowercase.
pub fn normalize_text(text: &str) -> String {
    let stripped = PUNCTUATION.replace_all(text, "");
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn text_hash(normalized: &str) -> [u8; 32] {
    Sha256::digest(normalized.as_bytes()).into()
}

/// Line-level text dedup.
///
/// Keeps the first occurrence of each normalized line, keeps paragraph
/// breaks but never two in a row, and drops lines too short to carry content.
pub fn dedup_text(text: &str) -> String {
    let mut seen: HashSet<[u8; 32]> = HashSet::new();
    let mut kept: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        let stripped = line.trim();
        if stripped.is_empty() {
            if kept.last().is_some_and(|last| !last.is_empty()) {
                kept.push("");
            }
            continue;
        }
        if stripped.chars().count() < MIN_LINE_CHARS {
            continue;
        }
        if seen.insert(text_hash(&normalize_text(stripped))) {
            kept.push(stripped);
        }
    }

    kept.join("\n")
}

/// Normalize an asset URL so that resolution variants share one key.
///
/// Stripping one marker can expose another (`/w_1/w_2/`), so this runs to a
/// fixed point. Each pass only ever shortens the string.
pub fn normalize_url(url: &str) -> String {
    let mut current = url
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_string();
    loop {
        let base = current.trim();
        let base = WIDTH_SEGMENT.replace_all(base, "/");
        let base = RETINA_SUFFIX.replace_all(&base, "");
        let next = SIZE_SUFFIX.replace(&base, "$1").into_owned();
        if next == current {
            return next;
        }
        current = next;
    }
}

/// Link key: lowercase text plus href without scheme or trailing slash.
fn link_key(text: &str, href: &str) -> (String, String) {
    let href = href
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    (text.trim().to_lowercase(), href.to_string())
}

fn svg_key(markup: &str) -> String {
    let collapsed = markup.split_whitespace().collect::<Vec<_>>().join(" ");
    SVG_ID_ATTR.replace_all(&collapsed, "").into_owned()
}

fn keep_first<T, K, F>(items: &[T], key: F) -> Vec<T>
where
    T: Clone,
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|item| seen.insert(key(item)))
        .cloned()
        .collect()
}

pub fn dedup_links(links: &[Link]) -> Vec<Link> {
    keep_first(links, |l| link_key(&l.text, &l.href))
}

pub fn dedup_buttons(buttons: &[Button]) -> Vec<Button> {
    keep_first(buttons, |b| link_key(&b.text, b.href.as_deref().unwrap_or("")))
}

pub fn dedup_images(images: &[ImageAsset]) -> Vec<ImageAsset> {
    let with_url: Vec<ImageAsset> = images
        .iter()
        .filter(|img| !img.url.trim().is_empty())
        .cloned()
        .collect();
    keep_first(&with_url, |img| normalize_url(&img.url))
}

pub fn dedup_icons(icons: &[IconMarkup]) -> Vec<IconMarkup> {
    let non_empty: Vec<IconMarkup> = icons
        .iter()
        .filter(|icon| !icon.markup.trim().is_empty())
        .cloned()
        .collect();
    keep_first(&non_empty, |icon| svg_key(&icon.markup))
}

pub fn dedup_backgrounds(backgrounds: &[Background]) -> Vec<Background> {
    keep_first(backgrounds, |bg| {
        (
            bg.color.clone(),
            bg.gradient.clone(),
            bg.image_url.as_deref().map(normalize_url),
        )
    })
}

/// Drop blocks whose normalized text was already seen in an earlier section.
fn dedup_blocks(blocks: &[TextBlock], seen: &mut HashSet<[u8; 32]>) -> Vec<TextBlock> {
    blocks
        .iter()
        .filter(|block| {
            let normalized = normalize_text(&block.text);
            !normalized.is_empty() && seen.insert(text_hash(&normalized))
        })
        .cloned()
        .collect()
}

/// Per-section list dedup plus heading/paragraph dedup across sections.
pub fn dedup_sections(sections: &[Section]) -> Vec<Section> {
    let mut seen_headings = HashSet::new();
    let mut seen_paragraphs = HashSet::new();

    sections
        .iter()
        .map(|section| Section {
            headings: dedup_blocks(&section.headings, &mut seen_headings),
            paragraphs: dedup_blocks(&section.paragraphs, &mut seen_paragraphs),
            buttons: dedup_buttons(&section.buttons),
            images: dedup_images(&section.images),
            icons: dedup_icons(&section.icons),
            links: dedup_links(&section.links),
            ..section.clone()
        })
        .collect()
}

/// Deduplicate every repeated category of an extraction.
pub fn dedup_extraction(raw: &RawExtraction) -> RawExtraction {
    let mut out = raw.clone();
    out.text_content = dedup_text(&raw.text_content);
    out.clickables.nav_links = dedup_links(&raw.clickables.nav_links);
    out.clickables.footer_links = dedup_links(&raw.clickables.footer_links);
    out.clickables.cta_buttons = dedup_buttons(&raw.clickables.cta_buttons);
    out.images = dedup_images(&raw.images);
    out.icons = dedup_icons(&raw.icons);
    out.backgrounds = dedup_backgrounds(&raw.backgrounds);
    out.sections = dedup_sections(&raw.sections);
    out
}
