use serde::{Deserialize, Serialize};

use crate::errors::CollaboratorError;

/// Result of one sandbox provider action, decoded once at the boundary.
///
/// Provider tools print a single JSON object tagged by `kind`. Downstream
/// code matches on the variant and never inspects the raw JSON again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderOutcome {
    Deployed { url: String, id: String },
    /// Base64-encoded image bytes.
    Screenshot { bytes: String },
    Logs { text: String, has_errors: bool },
    ToolError { message: String },
    Ok,
}

impl ProviderOutcome {
    /// Decode provider stdout. The last line that parses as an outcome wins,
    /// so tools may print progress chatter before their result.
    pub fn decode(stdout: &str) -> Result<Self, CollaboratorError> {
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str::<ProviderOutcome>(line).ok())
            .ok_or_else(|| {
                let preview: String = stdout.chars().take(200).collect();
                CollaboratorError::Malformed(format!("no provider outcome in output: {preview}"))
            })
    }

    /// Turn a `ToolError` into an error, passing everything else through.
    pub fn into_result(self) -> Result<Self, CollaboratorError> {
        match self {
            Self::ToolError { message } => Err(CollaboratorError::Tool(message)),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_each_kind() {
        assert_eq!(
            ProviderOutcome::decode(r#"{"kind":"deployed","url":"https://x.test","id":"sb-1"}"#)
                .unwrap(),
            ProviderOutcome::Deployed {
                url: "https://x.test".into(),
                id: "sb-1".into()
            }
        );
        assert_eq!(
            ProviderOutcome::decode(r#"{"kind":"logs","text":"ok","has_errors":false}"#).unwrap(),
            ProviderOutcome::Logs {
                text: "ok".into(),
                has_errors: false
            }
        );
        assert_eq!(
            ProviderOutcome::decode(r#"{"kind":"screenshot","bytes":"aGk="}"#).unwrap(),
            ProviderOutcome::Screenshot {
                bytes: "aGk=".into()
            }
        );
        assert_eq!(
            ProviderOutcome::decode(r#"{"kind":"ok"}"#).unwrap(),
            ProviderOutcome::Ok
        );
    }

    #[test]
    fn test_decode_skips_chatter() {
        let out = "starting container...\n{\"progress\": 50}\n{\"kind\":\"ok\"}\n";
        assert_eq!(ProviderOutcome::decode(out).unwrap(), ProviderOutcome::Ok);
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let err = ProviderOutcome::decode("segfault").unwrap_err();
        assert!(matches!(err, CollaboratorError::Malformed(_)));
    }

    #[test]
    fn test_tool_error_into_result() {
        let outcome = ProviderOutcome::ToolError {
            message: "quota exceeded".into(),
        };
        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.to_string(), "tool error: quota exceeded");
    }
}
