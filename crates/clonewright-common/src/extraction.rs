//! Raw page extraction as produced by an external scraper.
//!
//! The scraper is outside our control and its payloads drift, so every field
//! is read leniently: a missing, null, or wrongly-typed value falls back to its
//! default instead of failing the whole document. List fields drop individual
//! malformed entries and keep the rest.

use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Deserialize any value, falling back to `T::default()` when the shape is wrong.
pub fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Deserialize a list, keeping only the entries that parse.
pub fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

/// Deserialize an optional string, accepting numbers and treating blanks as absent.
pub fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Everything the scraper captured about one page. Immutable once produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawExtraction {
    #[serde(deserialize_with = "lenient")]
    pub url: String,
    #[serde(deserialize_with = "lenient")]
    pub title: String,
    /// Total scroll height in CSS pixels.
    #[serde(deserialize_with = "lenient")]
    pub page_height: f64,
    #[serde(deserialize_with = "lenient")]
    pub text_content: String,
    #[serde(deserialize_with = "lenient")]
    pub dom_skeleton: String,
    #[serde(deserialize_with = "lenient")]
    pub theme: Theme,
    #[serde(deserialize_with = "lenient")]
    pub clickables: Clickables,
    #[serde(deserialize_with = "lenient_list")]
    pub images: Vec<ImageAsset>,
    #[serde(deserialize_with = "lenient_list")]
    pub icons: Vec<IconMarkup>,
    #[serde(deserialize_with = "lenient_list")]
    pub backgrounds: Vec<Background>,
    #[serde(deserialize_with = "lenient_list")]
    pub sections: Vec<Section>,
    #[serde(deserialize_with = "lenient_list")]
    pub interactives: Vec<Value>,
    #[serde(deserialize_with = "lenient")]
    pub screenshots: Screenshots,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Theme {
    #[serde(deserialize_with = "lenient")]
    pub colors: ThemeColors,
    #[serde(deserialize_with = "lenient")]
    pub fonts: ThemeFonts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeColors {
    #[serde(deserialize_with = "lenient_opt_string")]
    pub body_bg: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub body_text: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub accent_colors: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub backgrounds: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub heading_colors: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub text_colors: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub border_colors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeFonts {
    #[serde(deserialize_with = "lenient_opt_string")]
    pub heading: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub body: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub mono: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub families: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub google_font_urls: Vec<String>,
    /// Computed typography samples, one per distinct text role.
    #[serde(deserialize_with = "lenient_list")]
    pub scale: Vec<TypeSample>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeSample {
    #[serde(deserialize_with = "lenient")]
    pub tag: String,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub font_size: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub font_weight: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub line_height: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub letter_spacing: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Clickables {
    #[serde(deserialize_with = "lenient_list")]
    pub nav_links: Vec<Link>,
    #[serde(deserialize_with = "lenient_list")]
    pub footer_links: Vec<Link>,
    #[serde(deserialize_with = "lenient_list")]
    pub cta_buttons: Vec<Button>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Link {
    #[serde(deserialize_with = "lenient")]
    pub text: String,
    #[serde(deserialize_with = "lenient")]
    pub href: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Button {
    #[serde(deserialize_with = "lenient")]
    pub text: String,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub href: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub background: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub color: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub border_radius: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub padding: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageAsset {
    #[serde(deserialize_with = "lenient")]
    pub url: String,
    #[serde(deserialize_with = "lenient")]
    pub alt: String,
    /// Scraper's guess at the image's purpose: logo, hero, background, avatar...
    #[serde(deserialize_with = "lenient_opt_string")]
    pub role: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub width: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconMarkup {
    #[serde(deserialize_with = "lenient")]
    pub markup: String,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Background {
    #[serde(deserialize_with = "lenient_opt_string")]
    pub selector: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub color: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub gradient: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextBlock {
    #[serde(deserialize_with = "lenient")]
    pub text: String,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub tag: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub color: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub font_size: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub font_weight: Option<String>,
}

/// One structurally distinct region of the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Section {
    #[serde(deserialize_with = "lenient")]
    pub index: usize,
    #[serde(rename = "type", deserialize_with = "lenient")]
    pub kind: String,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub background_color: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub gradient: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub background_image: Option<String>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub layout: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub top: f64,
    #[serde(deserialize_with = "lenient")]
    pub height: f64,
    #[serde(deserialize_with = "lenient_list")]
    pub headings: Vec<TextBlock>,
    #[serde(deserialize_with = "lenient_list")]
    pub paragraphs: Vec<TextBlock>,
    #[serde(deserialize_with = "lenient_list")]
    pub buttons: Vec<Button>,
    #[serde(deserialize_with = "lenient_list")]
    pub images: Vec<ImageAsset>,
    #[serde(deserialize_with = "lenient_list")]
    pub icons: Vec<IconMarkup>,
    #[serde(deserialize_with = "lenient_list")]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Screenshots {
    /// Base64-encoded above-the-fold capture.
    #[serde(deserialize_with = "lenient_opt_string")]
    pub viewport: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub scroll_chunks: Vec<ScrollChunk>,
    #[serde(deserialize_with = "lenient_opt_string")]
    pub media_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollChunk {
    /// Scroll offset of the top of this chunk.
    #[serde(deserialize_with = "lenient")]
    pub y: f64,
    #[serde(deserialize_with = "lenient")]
    pub data: String,
}

impl Screenshots {
    pub fn count(&self) -> usize {
        usize::from(self.viewport.is_some()) + self.scroll_chunks.len()
    }

    pub fn media_type(&self) -> &str {
        self.media_type.as_deref().unwrap_or("image/png")
    }
}

impl RawExtraction {
    /// Parse an extraction from JSON text. Only a syntactically broken
    /// document is an error; structural drift is absorbed.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_parses_to_defaults() {
        let raw = RawExtraction::from_json("{}").unwrap();
        assert_eq!(raw, RawExtraction::default());
    }

    #[test]
    fn test_wrong_types_fall_back() {
        let raw = RawExtraction::from_json(
            r#"{"title": 42, "page_height": "tall", "sections": "nope", "images": null}"#,
        )
        .unwrap();
        assert_eq!(raw.title, "");
        assert_eq!(raw.page_height, 0.0);
        assert!(raw.sections.is_empty());
        assert!(raw.images.is_empty());
    }

    #[test]
    fn test_bad_list_entries_are_skipped() {
        let raw = RawExtraction::from_json(
            r#"{"images": [{"url": "https://a.test/x.png"}, 7, "junk", {"url": "https://a.test/y.png", "alt": "y"}]}"#,
        )
        .unwrap();
        assert_eq!(raw.images.len(), 2);
        assert_eq!(raw.images[1].alt, "y");
    }

    #[test]
    fn test_section_type_field_and_numeric_strings() {
        let raw = RawExtraction::from_json(
            r##"{"sections": [{"type": "hero", "index": 3, "background_color": "#111111",
                 "headings": [{"text": "Hi", "font_size": 48}]}]}"##,
        )
        .unwrap();
        let section = &raw.sections[0];
        assert_eq!(section.kind, "hero");
        assert_eq!(section.index, 3);
        assert_eq!(section.headings[0].font_size.as_deref(), Some("48"));
    }

    #[test]
    fn test_blank_optional_strings_are_none() {
        let raw = RawExtraction::from_json(r#"{"theme": {"colors": {"body_bg": "  "}}}"#).unwrap();
        assert!(raw.theme.colors.body_bg.is_none());
    }

    #[test]
    fn test_screenshot_count() {
        let shots = Screenshots {
            viewport: Some("aGk=".into()),
            scroll_chunks: vec![ScrollChunk::default(), ScrollChunk::default()],
            media_type: None,
        };
        assert_eq!(shots.count(), 3);
        assert_eq!(shots.media_type(), "image/png");
    }

    #[test]
    fn test_syntax_error_is_error() {
        assert!(RawExtraction::from_json("{not json").is_err());
    }
}
