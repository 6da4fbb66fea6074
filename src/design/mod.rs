//! The shared style contract and the one model call that produces it.
//!
//! Model output is untrusted. After parsing, the code enforces what can be
//! checked mechanically: schema shape, hex-only colors drawn from the
//! extracted palette, and font families the page actually uses. Any failure
//! that can't be repaired falls back to tokens built straight from the raw
//! theme, so a run always has a usable contract.

pub mod color;

use clonewright_common::extraction::RawExtraction;
use clonewright_common::{CompletionRequest, Generator};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::budget::ScrapeSummary;
use crate::errors::GenerationError;
use crate::util::extract_json;
use color::{Palette, canonical, is_hex_literal, to_hex};

const GENERIC_FAMILIES: &[&str] = &[
    "sans-serif",
    "serif",
    "monospace",
    "system-ui",
    "cursive",
    "ui-sans-serif",
    "ui-serif",
    "ui-monospace",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTokens {
    pub primary: String,
    pub background: String,
    pub text: String,
    pub heading: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark_background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub muted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border: Option<String>,
}

impl ColorTokens {
    fn values(&self) -> impl Iterator<Item = &str> {
        [
            Some(self.primary.as_str()),
            Some(self.background.as_str()),
            Some(self.text.as_str()),
            Some(self.heading.as_str()),
            self.secondary.as_deref(),
            self.surface.as_deref(),
            self.dark_background.as_deref(),
            self.muted_text.as_deref(),
            self.border.as_deref(),
        ]
        .into_iter()
        .flatten()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeScaleEntry {
    pub size: String,
    pub weight: String,
    pub line_height: String,
    pub letter_spacing: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Typography {
    pub heading_font: String,
    pub body_font: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mono_font: Option<String>,
    #[serde(default)]
    pub google_font_urls: Vec<String>,
    /// Keyed by role: `h1`, `h2`, `body`, `small`...
    #[serde(default)]
    pub scale: BTreeMap<String, TypeScaleEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Spacing {
    pub section_padding_y: String,
    pub container_max_width: String,
    pub gap: String,
    pub radius: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Animation {
    pub duration_ms: u32,
    pub stagger_ms: u32,
    pub easing: String,
    pub initial_y: i32,
}

impl Default for Animation {
    fn default() -> Self {
        Self {
            duration_ms: 500,
            stagger_ms: 100,
            easing: "easeOut".to_string(),
            initial_y: 20,
        }
    }
}

/// Style properties for one named component (`button_primary`, `card`...).
pub type ComponentStyle = BTreeMap<String, String>;

/// The single style contract every generated section draws from.
/// Created once per run and shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignTokens {
    pub colors: ColorTokens,
    pub typography: Typography,
    #[serde(default)]
    pub spacing: Spacing,
    #[serde(default)]
    pub components: BTreeMap<String, ComponentStyle>,
    #[serde(default)]
    pub animation: Animation,
    /// True when built from raw theme fields instead of the model.
    #[serde(default)]
    pub fallback: bool,
}

impl DesignTokens {
    /// Deterministic tokens from the raw theme. No model call.
    pub fn fallback_from(raw: &RawExtraction) -> Self {
        let palette = Palette::from_extraction(raw);
        let theme = &raw.theme;
        let first_canonical = |candidates: &[Option<&str>]| -> Option<String> {
            candidates.iter().flatten().find_map(|v| canonical(v))
        };
        let first_in = |list: &[String]| list.iter().find_map(|v| canonical(v));

        // Pure white/black only when the page gave us nothing at all.
        let neutral = |light: bool| {
            if palette.is_empty() {
                Some(if light { "#ffffff" } else { "#000000" }.to_string())
            } else {
                None
            }
        };
        let any_palette = palette.hex_values().into_iter().next();

        let background = first_canonical(&[theme.colors.body_bg.as_deref()])
            .or_else(|| first_in(&theme.colors.backgrounds))
            .or_else(|| neutral(true))
            .or_else(|| any_palette.clone())
            .unwrap_or_default();
        let text = first_canonical(&[theme.colors.body_text.as_deref()])
            .or_else(|| first_in(&theme.colors.text_colors))
            .or_else(|| neutral(false))
            .or_else(|| palette.first_dark().map(to_hex))
            .or_else(|| any_palette.clone())
            .unwrap_or_default();
        let heading = first_in(&theme.colors.heading_colors).unwrap_or_else(|| text.clone());
        let cta_background = raw
            .clickables
            .cta_buttons
            .iter()
            .chain(raw.sections.iter().flat_map(|s| s.buttons.iter()))
            .find_map(|b| b.background.as_deref().and_then(canonical));
        let primary = first_in(&theme.colors.accent_colors)
            .or(cta_background)
            .unwrap_or_else(|| text.clone());

        let heading_font = theme
            .fonts
            .heading
            .clone()
            .or_else(|| theme.fonts.body.clone())
            .unwrap_or_else(|| "sans-serif".to_string());
        let body_font = theme
            .fonts
            .body
            .clone()
            .unwrap_or_else(|| heading_font.clone());

        let scale = theme
            .fonts
            .scale
            .iter()
            .filter(|sample| !sample.tag.is_empty())
            .map(|sample| {
                (
                    sample.tag.to_lowercase(),
                    TypeScaleEntry {
                        size: sample.font_size.clone().unwrap_or_default(),
                        weight: sample.font_weight.clone().unwrap_or_default(),
                        line_height: sample.line_height.clone().unwrap_or_default(),
                        letter_spacing: sample.letter_spacing.clone().unwrap_or_default(),
                    },
                )
            })
            .collect();

        DesignTokens {
            colors: ColorTokens {
                primary,
                background,
                text,
                heading,
                secondary: theme.colors.accent_colors.get(1).and_then(|v| canonical(v)),
                surface: theme.colors.backgrounds.get(1).and_then(|v| canonical(v)),
                dark_background: palette.first_dark().map(to_hex),
                muted_text: theme.colors.text_colors.get(1).and_then(|v| canonical(v)),
                border: first_in(&theme.colors.border_colors),
            },
            typography: Typography {
                heading_font,
                body_font,
                mono_font: theme.fonts.mono.clone(),
                google_font_urls: theme.fonts.google_font_urls.clone(),
                scale,
            },
            spacing: Spacing::default(),
            components: BTreeMap::new(),
            animation: Animation::default(),
            fallback: true,
        }
    }
}

/// Font families present on the page, lowercased.
fn known_families(raw: &RawExtraction) -> BTreeSet<String> {
    let fonts = &raw.theme.fonts;
    let mut families: BTreeSet<String> = [&fonts.heading, &fonts.body, &fonts.mono]
        .into_iter()
        .flatten()
        .chain(fonts.families.iter())
        .filter_map(|stack| primary_family(stack))
        .collect();
    for url in &fonts.google_font_urls {
        for part in url.split(['?', '&']) {
            if let Some(family) = part.strip_prefix("family=") {
                let name = family.split(':').next().unwrap_or_default().replace('+', " ");
                if let Some(name) = primary_family(&name) {
                    families.insert(name);
                }
            }
        }
    }
    families
}

/// First family of a CSS font stack, unquoted and lowercased.
fn primary_family(stack: &str) -> Option<String> {
    let first = stack.split(',').next()?.trim().trim_matches(['"', '\'']).trim();
    (!first.is_empty()).then(|| first.to_lowercase())
}

/// What the provenance pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvenanceReport {
    pub snapped_colors: usize,
    pub replaced_fonts: usize,
}

/// Enforce color and font provenance on parsed tokens.
///
/// Fails when a `colors` entry is not a hex literal at all, or when the
/// extraction sampled no colors, so nothing the model returns can be traced.
pub fn enforce_provenance(
    tokens: DesignTokens,
    raw: &RawExtraction,
) -> Result<(DesignTokens, ProvenanceReport), GenerationError> {
    if let Some(bad) = tokens.colors.values().find(|v| !is_hex_literal(v)) {
        return Err(GenerationError::Rejected(format!(
            "color token {bad:?} is not a hex literal"
        )));
    }

    // With nothing sampled there is nothing to trace a color back to.
    let palette = Palette::from_extraction(raw);
    if palette.is_empty() {
        return Err(GenerationError::Rejected(
            "extraction has no colors to trace model colors to".into(),
        ));
    }
    let mut report = ProvenanceReport::default();

    let mut value = serde_json::to_value(&tokens)
        .map_err(|e| GenerationError::Malformed(e.to_string()))?;
    snap_strings(&mut value, &palette, &mut report.snapped_colors);
    let mut tokens: DesignTokens =
        serde_json::from_value(value).map_err(|e| GenerationError::Malformed(e.to_string()))?;

    let families = known_families(raw);
    if !families.is_empty() {
        let body = raw
            .theme
            .fonts
            .body
            .clone()
            .or_else(|| raw.theme.fonts.heading.clone())
            .unwrap_or_else(|| "sans-serif".to_string());
        let typography = &mut tokens.typography;
        for font in [&mut typography.heading_font, &mut typography.body_font] {
            if !font_is_known(font, &families) {
                *font = body.clone();
                report.replaced_fonts += 1;
            }
        }
        if let Some(mono) = &typography.mono_font
            && !font_is_known(mono, &families)
        {
            typography.mono_font = raw.theme.fonts.mono.clone();
            report.replaced_fonts += 1;
        }
    }

    Ok((tokens, report))
}

fn font_is_known(stack: &str, families: &BTreeSet<String>) -> bool {
    match primary_family(stack) {
        Some(family) => families.contains(&family) || GENERIC_FAMILIES.contains(&family.as_str()),
        None => false,
    }
}

fn snap_strings(value: &mut Value, palette: &Palette, snapped: &mut usize) {
    match value {
        Value::String(s) => {
            let (out, n) = palette.snap_text(s);
            *snapped += n;
            *s = out;
        }
        Value::Array(items) => items
            .iter_mut()
            .for_each(|item| snap_strings(item, palette, snapped)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|item| snap_strings(item, palette, snapped)),
        _ => {}
    }
}

const DESIGN_SYSTEM_PROMPT: &str = r##"You extract a design system from a scraped web page.

Return ONLY a JSON object with this shape:
{
  "colors": {"primary": "#hex", "background": "#hex", "text": "#hex", "heading": "#hex",
             "secondary": "#hex", "surface": "#hex", "dark_background": "#hex",
             "muted_text": "#hex", "border": "#hex"},
  "typography": {"heading_font": "...", "body_font": "...", "mono_font": "...",
                 "google_font_urls": ["..."],
                 "scale": {"h1": {"size": "...", "weight": "...", "line_height": "...", "letter_spacing": "..."}}},
  "spacing": {"section_padding_y": "...", "container_max_width": "...", "gap": "...", "radius": "..."},
  "components": {"button_primary": {"background": "#hex", "color": "#hex", "radius": "...", "padding": "..."}},
  "animation": {"duration_ms": 500, "stagger_ms": 100, "easing": "easeOut", "initial_y": 20}
}

Rules:
- Every color is a hex literal copied from ALLOWED_COLORS. Never use color names, never invent a color.
- Fonts, sizes and spacing come from the observed values. You may round, never invent.
- Optional color fields may be omitted when the page has no such color."##;

/// Produces the run's DesignTokens with one model call, or the fallback.
pub struct DesignTokenExtractor {
    generator: Arc<dyn Generator>,
    timeout: Duration,
    max_tokens: u32,
}

impl DesignTokenExtractor {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            timeout: Duration::from_secs(180),
            max_tokens: 4096,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Never fails: any error yields `DesignTokens::fallback_from(raw)`.
    pub async fn extract(&self, summary: &ScrapeSummary, raw: &RawExtraction) -> DesignTokens {
        match self.try_extract(summary, raw).await {
            Ok((tokens, report)) => {
                info!(
                    snapped_colors = report.snapped_colors,
                    replaced_fonts = report.replaced_fonts,
                    "Design tokens extracted"
                );
                tokens
            }
            Err(e) => {
                warn!(error = %e, "Design token extraction failed, using raw theme");
                DesignTokens::fallback_from(raw)
            }
        }
    }

    async fn try_extract(
        &self,
        summary: &ScrapeSummary,
        raw: &RawExtraction,
    ) -> Result<(DesignTokens, ProvenanceReport), GenerationError> {
        let palette = Palette::from_extraction(raw);
        let prompt = build_prompt(summary, &palette);
        let request = CompletionRequest::new(DESIGN_SYSTEM_PROMPT, prompt)
            .with_cached_system()
            .with_images(summary.representative_screenshot().into_iter().collect())
            .with_max_tokens(self.max_tokens)
            .expecting_json();

        let completion = tokio::time::timeout(self.timeout, self.generator.complete(request))
            .await
            .map_err(|_| GenerationError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        let json = extract_json(&completion.text)
            .ok_or_else(|| GenerationError::Malformed("no JSON object in output".into()))?;
        let tokens: DesignTokens = serde_json::from_str(&json)
            .map_err(|e| GenerationError::Malformed(format!("design tokens: {e}")))?;
        let (mut tokens, report) = enforce_provenance(tokens, raw)?;
        tokens.fallback = false;
        Ok((tokens, report))
    }
}

fn build_prompt(summary: &ScrapeSummary, palette: &Palette) -> String {
    let buttons: Vec<_> = summary
        .cta_buttons
        .iter()
        .chain(summary.sections.iter().flat_map(|s| s.buttons.iter()))
        .take(8)
        .collect();
    let sections: Vec<Value> = summary
        .sections
        .iter()
        .map(|s| {
            json!({
                "type": s.kind,
                "background_color": s.background_color,
                "gradient": s.gradient,
                "headings": s.headings.iter().take(2).collect::<Vec<_>>(),
            })
        })
        .collect();
    let context = json!({
        "title": summary.title,
        "theme": summary.theme,
        "buttons": buttons,
        "sections": sections,
    });
    format!(
        "ALLOWED_COLORS: {}\n\nPAGE DATA:\n{}",
        palette.hex_values().join(", "),
        serde_json::to_string_pretty(&context).unwrap_or_default()
    )
}
