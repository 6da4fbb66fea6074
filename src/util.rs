//! Shared helpers for handling model output and estimating sizes.

/// Default characters-per-token ratio used by every size estimate.
pub const CHARS_PER_TOKEN: f64 = 3.5;

/// Conservative token estimate for `text` at the given characters-per-token ratio.
pub fn estimate_tokens(text: &str, chars_per_token: f64) -> usize {
    if text.is_empty() {
        return 0;
    }
    let ratio = if chars_per_token > 0.0 {
        chars_per_token
    } else {
        CHARS_PER_TOKEN
    };
    (text.chars().count() as f64 / ratio).ceil() as usize
}

/// Token estimate for a serializable value's compact JSON form.
pub fn estimate_json_tokens<T: serde::Serialize>(value: &T, chars_per_token: f64) -> usize {
    serde_json::to_string(value)
        .map(|s| estimate_tokens(&s, chars_per_token))
        .unwrap_or(0)
}

/// Extract a JSON object from text that may contain other content.
///
/// Brace counting skips braces inside string literals, since model output
/// routinely embeds source code in JSON string values.
pub fn extract_json_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull the JSON payload out of a model response: the whole text, a
/// ```json fenced block, or the first balanced object, in that order.
pub fn extract_json(output: &str) -> Option<String> {
    let trimmed = output.trim();
    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }

    if let Some(start) = output.find("```json") {
        let after_marker = &output[start + 7..];
        if let Some(end) = after_marker.rfind("```") {
            let inner = after_marker[..end].trim();
            if serde_json::from_str::<serde_json::Value>(inner).is_ok() {
                return Some(inner.to_string());
            }
        }
    }

    extract_json_object(output)
}

/// Strip a surrounding markdown code fence (with or without a language tag).
pub fn strip_code_fences(output: &str) -> String {
    let trimmed = output.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => "",
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_simple() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"key": "value"}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_with_prefix_and_suffix() {
        let text = r#"Here you go: {"key": "value"} hope that helps"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"key": "value"}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_braces_in_strings() {
        let text = r#"{"components/Hero.jsx": "export default function Hero() { return <div>{\"}\"}</div> }"} tail"#;
        let json = extract_json_object(text).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["components/Hero.jsx"].as_str().unwrap().contains("Hero()"));
    }

    #[test]
    fn test_extract_json_object_unclosed() {
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
        assert_eq!(extract_json_object("No JSON here"), None);
    }

    #[test]
    fn test_extract_json_fenced() {
        let text = "Sure.\n```json\n{\"a\": 1}\n```\nDone.";
        assert_eq!(extract_json(text), Some("{\"a\": 1}".to_string()));
    }

    #[test]
    fn test_extract_json_whole_text() {
        assert_eq!(extract_json("  {}  "), Some("{}".to_string()));
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```jsx\nexport default function A() {}\n```"),
            "export default function A() {}"
        );
        assert_eq!(strip_code_fences("plain"), "plain");
        assert_eq!(strip_code_fences("```\nx\n```  "), "x");
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("", 3.5), 0);
        assert_eq!(estimate_tokens("abcdefg", 3.5), 2);
        assert_eq!(estimate_tokens("abcdefgh", 3.5), 3);
        // a nonsense ratio falls back to the default
        assert_eq!(estimate_tokens("abcdefg", 0.0), 2);
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
