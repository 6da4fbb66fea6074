//! Compile checking from execution-environment logs.
//!
//! Log formats differ per dev server, so parsing sits behind [`LogParser`].
//! [`NextDevLogParser`] understands `next dev` output. The checker never
//! retries or fixes anything itself; it turns a log snapshot into a
//! [`CompileReport`] and the orchestrator decides what to do.

use clonewright_common::LogSnapshot;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;

static LOG_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=== LOG_MARKER_\d+ ===").unwrap());
static COMPILE_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Compiling|▲ Next\.js").unwrap());
static COMPILED_OK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)compiled\s+(?:successfully|(?:\S+\s+)?in\s+[\d.]+)|ready in\s+[\d.]+").unwrap()
});
static MODULE_NOT_FOUND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"Module not found:\s*(?:Error:\s*)?Can't resolve\s*['"]([^'"]+)['"]\s*(?:in\s*['"]([^'"]+)['"])?"#,
    )
    .unwrap()
});
static FILE_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\./[\w/.\-\[\]]+\.(?:tsx?|jsx?|css))(?::(\d+)(?::(\d+))?)?[^\n]*\n([^\n]+)").unwrap()
});
static FILE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\./[\w/.\-\[\]]+\.(?:tsx?|jsx?|css)").unwrap());
static SYNTAX_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"SyntaxError:\s*([^\n]+?)(?:\s*\((\d+):(\d+)\))?\s*(?:\n|$)").unwrap());
static TYPE_ERROR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"TypeError:\s*([^\n]+)").unwrap());
static HYDRATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)hydration\s+(?:failed|mismatch|error)[^\n]*").unwrap());
static BAD_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"The default export is not a React Component|does not have a default export").unwrap()
});
static GENERIC_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:⨯\s*)?Error:\s*([^\n]+)").unwrap());

/// Generic errors with these fragments are environment noise, not code problems.
const NOISE: &[&str] = &["ENOENT", "EACCES", "watch", "EMFILE"];
const PROJECT_ROOTS: &[&str] = &["/my-app/", "/clone-app/"];
const MAX_MESSAGE_CHARS: usize = 300;
const DEDUP_PREFIX_CHARS: usize = 100;
const NEARBY_WINDOW: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileErrorKind {
    ModuleNotFound,
    BuildError,
    SyntaxError,
    TypeError,
    HydrationError,
    BadExport,
    GenericError,
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ModuleNotFound => "module_not_found",
            Self::BuildError => "build_error",
            Self::SyntaxError => "syntax_error",
            Self::TypeError => "type_error",
            Self::HydrationError => "hydration_error",
            Self::BadExport => "bad_export",
            Self::GenericError => "generic_error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    /// Project-relative path, when the log names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub message: String,
    /// The unresolvable specifier, for `module_not_found`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl CompileError {
    fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self {
            kind,
            file: None,
            line: None,
            message: crate::util::truncate_chars(message.trim(), MAX_MESSAGE_CHARS).to_string(),
            module: None,
        }
    }

    fn in_file(mut self, file: Option<String>) -> Self {
        self.file = file;
        self
    }

    fn at_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.file.as_deref().unwrap_or("unknown file"))?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(module) = &self.module {
            write!(f, " (missing module: {module})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileReport {
    /// The latest compile block reported success and nothing failed.
    pub compiled: bool,
    pub has_errors: bool,
    pub errors: Vec<CompileError>,
}

impl CompileReport {
    pub fn is_clean(&self) -> bool {
        self.compiled && !self.has_errors
    }

    /// Neither a success line nor an error: the server hasn't settled.
    pub fn is_inconclusive(&self) -> bool {
        !self.compiled && !self.has_errors
    }

    /// Numbered error list in the form handed to the fixer.
    pub fn describe(&self) -> String {
        if self.errors.is_empty() {
            return if self.has_errors {
                "Compilation failed but no specific errors were extracted from logs.".to_string()
            } else {
                "No errors found.".to_string()
            };
        }
        let mut out = format!("Found {} compilation error(s):\n", self.errors.len());
        for (i, err) in self.errors.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, err));
        }
        out
    }
}

/// Turns raw dev-server log text into a [`CompileReport`].
pub trait LogParser: Send + Sync {
    fn parse(&self, log: &str) -> CompileReport;

    fn name(&self) -> &str;
}

/// Parser for `next dev` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextDevLogParser;

impl LogParser for NextDevLogParser {
    fn name(&self) -> &str {
        "next-dev"
    }

    fn parse(&self, log: &str) -> CompileReport {
        if log.trim().is_empty() {
            return CompileReport::default();
        }
        let after_marker = LOG_MARKER.split(log).last().unwrap_or(log);
        let block = COMPILE_START.split(after_marker).last().unwrap_or(after_marker);

        let failed = block.contains("Failed to compile");
        let compiled = COMPILED_OK.is_match(block) && !failed;

        let mut errors = Vec::new();

        for caps in MODULE_NOT_FOUND.captures_iter(block) {
            let module = caps.get(1).map(|m| m.as_str().to_string());
            let file = caps.get(2).map(|m| project_path(m.as_str()));
            let mut err = CompileError::new(
                CompileErrorKind::ModuleNotFound,
                format!("Module not found: '{}'", module.as_deref().unwrap_or_default()),
            )
            .in_file(file);
            err.module = module;
            errors.push(err);
        }

        for caps in FILE_LOCATION.captures_iter(block) {
            let (Some(file), Some(msg)) = (caps.get(1), caps.get(4)) else {
                continue;
            };
            let msg = msg.as_str().trim();
            if msg.starts_with("./") || msg.len() <= 5 {
                continue;
            }
            let line = caps.get(2).and_then(|m| m.as_str().parse().ok());
            errors.push(
                CompileError::new(CompileErrorKind::BuildError, msg)
                    .in_file(Some(project_path(file.as_str())))
                    .at_line(line),
            );
        }

        for caps in SYNTAX_ERROR.captures_iter(block) {
            let msg = caps.get(1).map_or("", |m| m.as_str());
            let line = caps.get(2).and_then(|m| m.as_str().parse().ok());
            let start = caps.get(0).map_or(0, |m| m.start());
            errors.push(
                CompileError::new(CompileErrorKind::SyntaxError, format!("SyntaxError: {msg}"))
                    .in_file(nearby_file(block, start))
                    .at_line(line),
            );
        }

        for caps in TYPE_ERROR.captures_iter(block) {
            let msg = caps.get(1).map_or("", |m| m.as_str());
            let start = caps.get(0).map_or(0, |m| m.start());
            errors.push(
                CompileError::new(CompileErrorKind::TypeError, format!("TypeError: {msg}"))
                    .in_file(nearby_file(block, start)),
            );
        }

        for m in HYDRATION.find_iter(block) {
            errors.push(CompileError::new(CompileErrorKind::HydrationError, m.as_str()));
        }

        for m in BAD_EXPORT.find_iter(block) {
            errors.push(
                CompileError::new(CompileErrorKind::BadExport, m.as_str())
                    .in_file(nearby_file(block, m.start())),
            );
        }

        for caps in GENERIC_ERROR.captures_iter(block) {
            let msg = caps.get(1).map_or("", |m| m.as_str()).trim();
            if msg.is_empty()
                || NOISE.iter().any(|n| msg.contains(n))
                || errors.iter().any(|e: &CompileError| e.message.contains(msg))
            {
                continue;
            }
            let start = caps.get(0).map_or(0, |m| m.start());
            errors.push(
                CompileError::new(CompileErrorKind::GenericError, msg)
                    .in_file(nearby_file(block, start)),
            );
        }

        let errors = dedup(errors);
        let has_errors = !errors.is_empty() || failed;
        CompileReport {
            compiled: compiled && !has_errors,
            has_errors,
            errors,
        }
    }
}

fn dedup(errors: Vec<CompileError>) -> Vec<CompileError> {
    let mut seen = HashSet::new();
    errors
        .into_iter()
        .filter(|e| {
            let prefix: String = e.message.chars().take(DEDUP_PREFIX_CHARS).collect();
            seen.insert((e.kind, e.file.clone(), prefix))
        })
        .collect()
}

/// Project-relative form of a path the dev server printed.
pub fn project_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("./") {
        return rest.to_string();
    }
    for root in PROJECT_ROOTS {
        if let Some(idx) = path.find(root) {
            return path[idx + root.len()..].to_string();
        }
    }
    path.to_string()
}

/// Last file reference in the window before `position`.
fn nearby_file(log: &str, position: usize) -> Option<String> {
    let mut start = position.saturating_sub(NEARBY_WINDOW);
    while !log.is_char_boundary(start) {
        start += 1;
    }
    FILE_REF
        .find_iter(&log[start..position])
        .last()
        .map(|m| project_path(m.as_str()))
}

/// Runs a [`LogParser`] over fetched log snapshots.
pub struct CompileChecker {
    parser: Box<dyn LogParser>,
}

impl Default for CompileChecker {
    fn default() -> Self {
        Self::new(Box::new(NextDevLogParser))
    }
}

impl CompileChecker {
    pub fn new(parser: Box<dyn LogParser>) -> Self {
        Self { parser }
    }

    pub fn parser_name(&self) -> &str {
        self.parser.name()
    }

    /// Parse a snapshot. The provider's error hint only upgrades an
    /// otherwise inconclusive report.
    pub fn check(&self, snapshot: &LogSnapshot) -> CompileReport {
        let mut report = self.parser.parse(&snapshot.text);
        if snapshot.has_errors && report.is_inconclusive() {
            report.has_errors = true;
        }
        report
    }
}
