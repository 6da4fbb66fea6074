//! Color parsing, the extracted palette, and provenance snapping.

use clonewright_common::extraction::RawExtraction;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static HEX_LITERAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(?:[0-9a-fA-F]{8}|[0-9a-fA-F]{6}|[0-9a-fA-F]{3,4})\b").unwrap());
static RGB_FUNC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"rgba?\(\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*(?:,\s*[\d.]+\s*)?\)").unwrap()
});

pub type Rgb = [u8; 3];

/// Parse `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`, `rgb()` or `rgba()`. Alpha is dropped.
pub fn parse_color(value: &str) -> Option<Rgb> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix('#') {
        let digits: Vec<u8> = hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<_>>()?;
        return match digits.len() {
            3 | 4 => Some([digits[0] * 17, digits[1] * 17, digits[2] * 17]),
            6 | 8 => Some([
                digits[0] * 16 + digits[1],
                digits[2] * 16 + digits[3],
                digits[4] * 16 + digits[5],
            ]),
            _ => None,
        };
    }
    let caps = RGB_FUNC.captures(value)?;
    if caps.get(0)?.as_str().len() != value.len() {
        return None;
    }
    let channel = |i: usize| caps.get(i)?.as_str().parse::<u16>().ok().map(|v| v.min(255) as u8);
    Some([channel(1)?, channel(2)?, channel(3)?])
}

pub fn to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Canonical `#rrggbb` form of any parseable color.
pub fn canonical(value: &str) -> Option<String> {
    parse_color(value).map(to_hex)
}

/// True only for a bare hex literal (not a name, not a function).
pub fn is_hex_literal(value: &str) -> bool {
    let value = value.trim();
    value.starts_with('#') && parse_color(value).is_some()
}

/// Every hex color literal in `text`, canonicalized.
pub fn hex_literals(text: &str) -> BTreeSet<String> {
    HEX_LITERAL
        .find_iter(text)
        .filter_map(|m| canonical(m.as_str()))
        .collect()
}

fn mean(rgb: Rgb) -> f64 {
    (rgb[0] as f64 + rgb[1] as f64 + rgb[2] as f64) / 3.0
}

pub fn is_dark(rgb: Rgb) -> bool {
    mean(rgb) < 80.0
}

fn distance(a: Rgb, b: Rgb) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = *x as i32 - *y as i32;
            (d * d) as u32
        })
        .sum()
}

/// Every color the scraper observed, canonicalized, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgb>,
}

impl Palette {
    pub fn from_extraction(raw: &RawExtraction) -> Self {
        let mut palette = Palette::default();
        let theme = &raw.theme.colors;
        palette.add_opt(theme.body_bg.as_deref());
        palette.add_opt(theme.body_text.as_deref());
        for list in [
            &theme.accent_colors,
            &theme.backgrounds,
            &theme.heading_colors,
            &theme.text_colors,
            &theme.border_colors,
        ] {
            for value in list {
                palette.add_text(value);
            }
        }
        for bg in &raw.backgrounds {
            palette.add_opt(bg.color.as_deref());
            palette.add_opt(bg.gradient.as_deref());
        }
        for button in &raw.clickables.cta_buttons {
            palette.add_opt(button.background.as_deref());
            palette.add_opt(button.color.as_deref());
        }
        for section in &raw.sections {
            palette.add_opt(section.background_color.as_deref());
            palette.add_opt(section.gradient.as_deref());
            for block in section.headings.iter().chain(section.paragraphs.iter()) {
                palette.add_opt(block.color.as_deref());
            }
            for button in &section.buttons {
                palette.add_opt(button.background.as_deref());
                palette.add_opt(button.color.as_deref());
            }
        }
        palette
    }

    fn add(&mut self, rgb: Rgb) {
        if !self.colors.contains(&rgb) {
            self.colors.push(rgb);
        }
    }

    fn add_opt(&mut self, value: Option<&str>) {
        if let Some(value) = value {
            self.add_text(value);
        }
    }

    /// Add a bare color, or every color literal inside a longer value (gradients, borders).
    fn add_text(&mut self, value: &str) {
        if let Some(rgb) = parse_color(value) {
            self.add(rgb);
            return;
        }
        for m in HEX_LITERAL.find_iter(value) {
            if let Some(rgb) = parse_color(m.as_str()) {
                self.add(rgb);
            }
        }
        for caps in RGB_FUNC.captures_iter(value) {
            if let Some(rgb) = caps.get(0).and_then(|m| parse_color(m.as_str())) {
                self.add(rgb);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn contains(&self, rgb: Rgb) -> bool {
        self.colors.contains(&rgb)
    }

    pub fn hex_values(&self) -> Vec<String> {
        self.colors.iter().copied().map(to_hex).collect()
    }

    pub fn first_dark(&self) -> Option<Rgb> {
        self.colors.iter().copied().find(|c| is_dark(*c))
    }

    pub fn nearest(&self, rgb: Rgb) -> Option<Rgb> {
        self.colors.iter().copied().min_by_key(|c| distance(*c, rgb))
    }

    /// Replace every color literal in `text` that the palette doesn't contain
    /// with its nearest palette color. Returns the new text and the number of
    /// replacements. Known colors are canonicalized.
    pub fn snap_text(&self, text: &str) -> (String, usize) {
        let mut snapped = 0usize;
        let mut replace = |literal: &str| -> String {
            let Some(rgb) = parse_color(literal) else {
                return literal.to_string();
            };
            if self.contains(rgb) {
                return to_hex(rgb);
            }
            match self.nearest(rgb) {
                Some(near) => {
                    snapped += 1;
                    to_hex(near)
                }
                None => literal.to_string(),
            }
        };
        let pass = RGB_FUNC.replace_all(text, |caps: &regex::Captures| replace(&caps[0]));
        let out = HEX_LITERAL
            .replace_all(&pass, |caps: &regex::Captures| replace(&caps[0]))
            .into_owned();
        (out, snapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clonewright_common::extraction::{Section, TextBlock};

    #[test]
    fn test_parse_color_forms() {
        assert_eq!(parse_color("#fff"), Some([255, 255, 255]));
        assert_eq!(parse_color("#1A2b3C"), Some([0x1a, 0x2b, 0x3c]));
        assert_eq!(parse_color("#1a2b3cff"), Some([0x1a, 0x2b, 0x3c]));
        assert_eq!(parse_color("rgb(10, 20, 30)"), Some([10, 20, 30]));
        assert_eq!(parse_color("rgba(10,20,30,0.5)"), Some([10, 20, 30]));
        assert_eq!(parse_color("blue"), None);
        assert_eq!(parse_color("#12"), None);
        assert_eq!(parse_color("rgb(1,2,3) extra"), None);
    }

    #[test]
    fn test_hex_literals() {
        let found = hex_literals("bg-[#0F172A] text-[#fff] border-[#0f172a]");
        assert_eq!(found.into_iter().collect::<Vec<_>>(), vec!["#0f172a", "#ffffff"]);
    }

    #[test]
    fn test_is_hex_literal() {
        assert!(is_hex_literal("#0f172a"));
        assert!(!is_hex_literal("rgb(0,0,0)"));
        assert!(!is_hex_literal("slate-900"));
    }

    #[test]
    fn test_palette_collects_from_everywhere() {
        let mut raw = RawExtraction::default();
        raw.theme.colors.body_bg = Some("rgb(255, 255, 255)".into());
        raw.theme.colors.accent_colors = vec!["#6366F1".into()];
        raw.sections = vec![Section {
            gradient: Some("linear-gradient(90deg, #0f172a 0%, rgba(30, 41, 59, 1) 100%)".into()),
            headings: vec![TextBlock {
                text: "Hi".into(),
                color: Some("#fff".into()),
                ..Default::default()
            }],
            ..Default::default()
        }];
        let palette = Palette::from_extraction(&raw);
        assert_eq!(
            palette.hex_values(),
            vec!["#ffffff", "#6366f1", "#0f172a", "#1e293b"]
        );
        assert_eq!(palette.first_dark(), Some([0x0f, 0x17, 0x2a]));
    }

    #[test]
    fn test_snap_text_replaces_invented_colors() {
        let mut raw = RawExtraction::default();
        raw.theme.colors.accent_colors = vec!["#3b82f6".into(), "#111827".into()];
        let palette = Palette::from_extraction(&raw);

        let (out, n) = palette.snap_text("1px solid #3a80f0; color: #3B82F6; bg: rgb(20, 24, 39)");
        assert_eq!(out, "1px solid #3b82f6; color: #3b82f6; bg: #111827");
        assert_eq!(n, 2);
    }

    #[test]
    fn test_snap_text_empty_palette_leaves_text() {
        let (out, n) = Palette::default().snap_text("#abcdef");
        assert_eq!(out, "#abcdef");
        assert_eq!(n, 0);
    }
}
