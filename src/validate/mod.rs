//! Static validation of a generated project.
//!
//! A fixed battery of structural checks over [`ProjectFiles`], no model call.
//! Each rule reports at most one issue per file, carrying the first offending
//! line and the number of occurrences, so a report stays small enough to hand
//! to the fixer in one call.

use clonewright_common::ProjectFiles;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::LazyLock;

use crate::assemble::{ENTRY_FILE, GLOBALS_FILE, LAYOUT_FILE};

static USE_CLIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:(?://[^\n]*|/\*[\s\S]*?\*/)\s*)*['"]use client['"]"#).unwrap()
});
static IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*import\s+(?:[^'";]*?\s+from\s+)?['"]([^'"]+)['"]"#).unwrap()
});
static CLASS_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\sclass=["{]"#).unwrap());
static FOR_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\sfor=["{]"#).unwrap());
static VOID_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:img|br|hr|input|meta|link|source|area|col|embed|track|wbr)\b(?:=>|[^<>])*>")
        .unwrap()
});
static STYLE_STRING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"\sstyle=["']"#).unwrap());
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<!--").unwrap());
static ELLIPSIS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:\{/\*|/\*|//)?\s*(?:\.\.\.|…)\s*(?:\*/\}|\*/)?\s*$").unwrap()
});
static ELIDED_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?://|/\*)[^\n]*\b(?:rest of (?:the )?(?:code|component|content|items|sections)|remaining (?:sections|items|content|code)|same as above|and so on)\b",
    )
    .unwrap()
});

const ALLOWED_PACKAGES: &[&str] = &[
    "react",
    "react-dom",
    "next",
    "framer-motion",
    "lucide-react",
    "@radix-ui/react-accordion",
    "@radix-ui/react-dialog",
    "@radix-ui/react-tabs",
    "react-intersection-observer",
    "clsx",
    "tailwind-merge",
];

const CODE_EXTENSIONS: &[&str] = &[".jsx", ".js", ".tsx", ".ts"];
const RESOLVE_SUFFIXES: &[&str] = &["", ".jsx", ".js", ".tsx", ".ts", "/index.jsx", "/index.js"];
const DUPLICATE_WINDOW: usize = 4;
const MIN_DUPLICATE_LINE_CHARS: usize = 12;
const KEY_LOOKAHEAD_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingUseClient,
    BadImport,
    ClassNotClassname,
    ForNotHtmlfor,
    UnclosedVoidElement,
    StyleString,
    HtmlComment,
    TruncationMarker,
    DuplicateBlock,
    MissingDefaultExport,
    EmptyComponent,
    MissingComponentFile,
    MissingEntryFile,
    // warnings
    MissingKeyProp,
    OrphanComponent,
    MissingLayout,
    MissingGlobals,
}

impl IssueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingUseClient => "missing_use_client",
            Self::BadImport => "bad_import",
            Self::ClassNotClassname => "class_not_classname",
            Self::ForNotHtmlfor => "for_not_htmlfor",
            Self::UnclosedVoidElement => "unclosed_void_element",
            Self::StyleString => "style_string",
            Self::HtmlComment => "html_comment",
            Self::TruncationMarker => "truncation_marker",
            Self::DuplicateBlock => "duplicate_block",
            Self::MissingDefaultExport => "missing_default_export",
            Self::EmptyComponent => "empty_component",
            Self::MissingComponentFile => "missing_component_file",
            Self::MissingEntryFile => "missing_entry_file",
            Self::MissingKeyProp => "missing_key_prop",
            Self::OrphanComponent => "orphan_component",
            Self::MissingLayout => "missing_layout",
            Self::MissingGlobals => "missing_globals",
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::MissingKeyProp | Self::OrphanComponent | Self::MissingLayout | Self::MissingGlobals
        )
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            file: file.into(),
            line: None,
            message: message.into(),
        }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{} [{}] {}", self.file, line, self.kind, self.message),
            None => write!(f, "{} [{}] {}", self.file, self.kind, self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationStats {
    pub files_checked: usize,
    pub components: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub stats: ValidationStats,
}

impl ValidationReport {
    /// Errors grouped by file, for scoped fix calls.
    pub fn errors_by_file(&self) -> BTreeMap<&str, Vec<&ValidationIssue>> {
        let mut grouped: BTreeMap<&str, Vec<&ValidationIssue>> = BTreeMap::new();
        for issue in &self.errors {
            grouped.entry(issue.file.as_str()).or_default().push(issue);
        }
        grouped
    }

    /// Identity of each error, ignoring line numbers and counts, used to
    /// decide whether a patch introduced anything new.
    pub fn error_keys(&self) -> BTreeSet<(IssueKind, String)> {
        self.errors
            .iter()
            .map(|e| (e.kind, e.file.clone()))
            .collect()
    }
}

/// Rule-based project checker.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    pub fn validate(&self, files: &ProjectFiles) -> ValidationReport {
        let mut issues = Vec::new();
        let mut imported = BTreeSet::new();
        let mut stats = ValidationStats::default();

        for (path, content) in files.iter() {
            if !is_code_file(path) {
                continue;
            }
            stats.files_checked += 1;
            if is_component(path) {
                stats.components += 1;
            }
            check_file(path, content, files, &mut imported, &mut issues);
        }

        if !files.contains(ENTRY_FILE) {
            issues.push(ValidationIssue::new(
                IssueKind::MissingEntryFile,
                ENTRY_FILE,
                "project has no entry page",
            ));
        }
        if !files.contains(LAYOUT_FILE) {
            issues.push(ValidationIssue::new(
                IssueKind::MissingLayout,
                LAYOUT_FILE,
                "no root layout",
            ));
        }
        if !files.contains(GLOBALS_FILE) {
            issues.push(ValidationIssue::new(
                IssueKind::MissingGlobals,
                GLOBALS_FILE,
                "no global stylesheet",
            ));
        }
        for (path, _) in files.components() {
            if is_code_file(path) && !imported.contains(path) {
                issues.push(ValidationIssue::new(
                    IssueKind::OrphanComponent,
                    path,
                    "component is never imported",
                ));
            }
        }

        let (warnings, errors): (Vec<_>, Vec<_>) =
            issues.into_iter().partition(|i| i.kind.is_warning());
        ValidationReport {
            valid: errors.is_empty(),
            errors,
            warnings,
            stats,
        }
    }
}

fn is_code_file(path: &str) -> bool {
    CODE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn is_component(path: &str) -> bool {
    path.starts_with("components/") && is_code_file(path)
}

fn is_jsx(path: &str) -> bool {
    path.ends_with(".jsx") || path.ends_with(".tsx")
}

fn line_of(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

/// Push one issue for the first of `offsets`, noting how many there were.
fn report_occurrences(
    issues: &mut Vec<ValidationIssue>,
    kind: IssueKind,
    path: &str,
    content: &str,
    offsets: &[usize],
    what: &str,
) {
    let Some(first) = offsets.first() else {
        return;
    };
    let message = if offsets.len() == 1 {
        what.to_string()
    } else {
        format!("{what} ({} occurrences)", offsets.len())
    };
    issues.push(ValidationIssue::new(kind, path, message).with_line(line_of(content, *first)));
}

fn check_file(
    path: &str,
    content: &str,
    files: &ProjectFiles,
    imported: &mut BTreeSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    let needs_client = is_jsx(path) && (is_component(path) || path == ENTRY_FILE);
    if needs_client && !USE_CLIENT.is_match(content) {
        issues.push(
            ValidationIssue::new(
                IssueKind::MissingUseClient,
                path,
                "first statement must be \"use client\"",
            )
            .with_line(1),
        );
    }

    check_imports(path, content, files, imported, issues);

    if is_jsx(path) {
        let rules: [(IssueKind, &Regex, &str); 4] = [
            (IssueKind::ClassNotClassname, &*CLASS_ATTR, "use className instead of class"),
            (IssueKind::ForNotHtmlfor, &*FOR_ATTR, "use htmlFor instead of for"),
            (IssueKind::StyleString, &*STYLE_STRING, "style must be an object, not a string"),
            (IssueKind::HtmlComment, &*HTML_COMMENT, "HTML comments are not valid JSX"),
        ];
        for (kind, re, what) in rules {
            let offsets: Vec<usize> = re.find_iter(content).map(|m| m.start()).collect();
            report_occurrences(issues, kind, path, content, &offsets, what);
        }

        let unclosed: Vec<usize> = VOID_ELEMENT
            .find_iter(content)
            .filter(|m| !m.as_str().ends_with("/>"))
            .map(|m| m.start())
            .collect();
        report_occurrences(
            issues,
            IssueKind::UnclosedVoidElement,
            path,
            content,
            &unclosed,
            "void element must self-close",
        );
    }

    let truncations: Vec<usize> = ELLIPSIS_LINE
        .find_iter(content)
        .chain(ELIDED_COMMENT.find_iter(content))
        .map(|m| m.start())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    report_occurrences(
        issues,
        IssueKind::TruncationMarker,
        path,
        content,
        &truncations,
        "output looks truncated",
    );

    if let Some(line) = duplicate_block(content) {
        issues.push(
            ValidationIssue::new(
                IssueKind::DuplicateBlock,
                path,
                format!("block of {DUPLICATE_WINDOW}+ lines repeated"),
            )
            .with_line(line),
        );
    }

    if is_jsx(path) && (is_component(path) || path.starts_with("app/")) {
        if !content.contains("export default") {
            issues.push(ValidationIssue::new(
                IssueKind::MissingDefaultExport,
                path,
                "no default export",
            ));
        } else if is_component(path) && !content.contains("return") && !content.contains("=>") {
            issues.push(ValidationIssue::new(
                IssueKind::EmptyComponent,
                path,
                "component renders nothing",
            ));
        }
    }

    if let Some(line) = map_without_key(content) {
        issues.push(
            ValidationIssue::new(IssueKind::MissingKeyProp, path, ".map() without a key prop")
                .with_line(line),
        );
    }
}

fn check_imports(
    path: &str,
    content: &str,
    files: &ProjectFiles,
    imported: &mut BTreeSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut bad = Vec::new();
    let mut missing = Vec::new();
    for caps in IMPORT.captures_iter(content) {
        let (Some(whole), Some(spec)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let spec = spec.as_str();
        if is_local(spec) {
            let base = local_base(path, spec);
            match resolve(&base, files) {
                Some(target) => {
                    imported.insert(target);
                }
                None if base.starts_with("components/") => missing.push((whole.start(), spec)),
                None => bad.push((whole.start(), spec)),
            }
        } else if !is_allowed_package(spec) {
            bad.push((whole.start(), spec));
        }
    }

    for (kind, found, what) in [
        (IssueKind::BadImport, bad, "disallowed or unresolved import"),
        (IssueKind::MissingComponentFile, missing, "imported component does not exist"),
    ] {
        if found.is_empty() {
            continue;
        }
        let specs: Vec<&str> = found.iter().map(|(_, s)| *s).collect();
        let offsets: Vec<usize> = found.iter().map(|(o, _)| *o).collect();
        report_occurrences(
            issues,
            kind,
            path,
            content,
            &offsets,
            &format!("{what}: {}", specs.join(", ")),
        );
    }
}

fn is_local(spec: &str) -> bool {
    spec.starts_with("./") || spec.starts_with("../") || spec.starts_with("@/")
}

fn is_allowed_package(spec: &str) -> bool {
    ALLOWED_PACKAGES.iter().any(|pkg| {
        spec == *pkg
            || spec
                .strip_prefix(pkg)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

/// Project-relative path an import points at, before extension resolution.
pub fn local_base(from: &str, spec: &str) -> String {
    if let Some(rest) = spec.strip_prefix("@/") {
        return rest.to_string();
    }
    let mut parts: Vec<&str> = from.split('/').collect();
    parts.pop();
    for segment in spec.split('/') {
        match segment {
            "." | "" => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

pub fn resolve(base: &str, files: &ProjectFiles) -> Option<String> {
    RESOLVE_SUFFIXES
        .iter()
        .map(|suffix| format!("{base}{suffix}"))
        .find(|candidate| files.contains(candidate))
}

/// First line of a block of consecutive non-trivial lines that occurs again
/// later in the file without overlapping.
fn duplicate_block(content: &str) -> Option<usize> {
    let lines: Vec<&str> = content.lines().map(str::trim).collect();
    let mut seen: HashMap<&[&str], usize> = HashMap::new();
    for start in 0..lines.len().saturating_sub(DUPLICATE_WINDOW - 1) {
        let window = &lines[start..start + DUPLICATE_WINDOW];
        if window.iter().any(|l| l.len() < MIN_DUPLICATE_LINE_CHARS) {
            continue;
        }
        match seen.get(window) {
            Some(first) if start >= first + DUPLICATE_WINDOW => return Some(first + 1),
            Some(_) => {}
            None => {
                seen.insert(window, start);
            }
        }
    }
    None
}

fn map_without_key(content: &str) -> Option<usize> {
    let lines: Vec<&str> = content.lines().collect();
    lines.iter().enumerate().find_map(|(i, line)| {
        if !line.contains(".map(") {
            return None;
        }
        let end = (i + KEY_LOOKAHEAD_LINES).min(lines.len());
        let keyed = lines[i..end].iter().any(|l| l.contains("key="));
        (!keyed).then_some(i + 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::Assembler;
    use crate::design::testing::sample_tokens;
    use crate::generate::GenerationResult;
    use crate::plan::SharedContext;
    use crate::testing::valid_component;
    use clonewright_common::FilePatch;

    fn project(components: &[(&str, String)]) -> ProjectFiles {
        let results: Vec<GenerationResult> = components
            .iter()
            .enumerate()
            .map(|(i, (name, content))| GenerationResult {
                component_name: name.to_string(),
                filepath: format!("components/{name}.jsx"),
                content: content.clone(),
                success: true,
                error: None,
                order: i,
            })
            .collect();
        Assembler.assemble(&results, &sample_tokens(), &SharedContext::default())
    }

    fn kinds(report: &ValidationReport) -> Vec<IssueKind> {
        report.errors.iter().map(|e| e.kind).collect()
    }

    #[test]
    fn test_assembled_skeleton_is_clean() {
        let files = project(&[("Hero", valid_component("Hero"))]);
        let report = Validator.validate(&files);
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert_eq!(report.stats.components, 2);
        assert_eq!(report.stats.files_checked, 5);
    }

    #[test]
    fn test_round_trip_two_errors_then_clean() {
        let hero_no_directive = valid_component("Hero").replacen("\"use client\";\n", "", 1);
        let footer_with_class = valid_component("Footer").replace("<h2 className=", "<h2 class=");
        let files = project(&[("Hero", hero_no_directive), ("Footer", footer_with_class)]);

        let report = Validator.validate(&files);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
        assert!(kinds(&report).contains(&IssueKind::MissingUseClient));
        assert!(kinds(&report).contains(&IssueKind::ClassNotClassname));
        let grouped = report.errors_by_file();
        assert_eq!(grouped.len(), 2);
        assert!(grouped.contains_key("components/Footer.jsx"));

        // What a correct fixer returns for the two failing files.
        let fix: FilePatch = [
            ("components/Hero.jsx".to_string(), valid_component("Hero")),
            ("components/Footer.jsx".to_string(), valid_component("Footer")),
        ]
        .into_iter()
        .collect();
        let (fixed, changed) = files.patched(&fix);
        assert_eq!(changed.len(), 2);
        let report = Validator.validate(&fixed);
        assert!(report.valid);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_jsx_attribute_rules() {
        let body = r#""use client";

export default function Form() {
  return (
    <form style="color: red">
      <!-- legacy -->
      <label for="email">Email</label>
      <input id="email" onChange={(e) => setValue(e.target.value)} />
      <img src="/a.png" alt="a">
      <br>
    </form>
  );
}
"#;
        let files = project(&[("Form", body.to_string())]);
        let report = Validator.validate(&files);
        let errors = kinds(&report);
        assert!(errors.contains(&IssueKind::StyleString));
        assert!(errors.contains(&IssueKind::HtmlComment));
        assert!(errors.contains(&IssueKind::ForNotHtmlfor));
        let void = report
            .errors
            .iter()
            .find(|e| e.kind == IssueKind::UnclosedVoidElement)
            .unwrap();
        assert_eq!(void.line, Some(9));
        assert!(void.message.contains("2 occurrences"));
    }

    #[test]
    fn test_imports() {
        let body = r#""use client";
import { motion } from "framer-motion";
import { Check } from "lucide-react";
import Image from "next/image";
import axios from "axios";
import Card from "@/components/Card";
import { cn } from "@/lib/utils";
import {
  Accordion,
} from "@radix-ui/react-accordion";

export default function Pricing() {
  return <div className={cn("p-4")} />;
}
"#;
        let files = project(&[("Pricing", body.to_string())]);
        let report = Validator.validate(&files);
        let bad = report
            .errors
            .iter()
            .find(|e| e.kind == IssueKind::BadImport)
            .unwrap();
        assert!(bad.message.contains("axios"));
        assert!(!bad.message.contains("radix"));
        let missing = report
            .errors
            .iter()
            .find(|e| e.kind == IssueKind::MissingComponentFile)
            .unwrap();
        assert!(missing.message.contains("@/components/Card"));
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn test_truncation_markers() {
        let body = "\"use client\";\n\nexport default function Faq() {\n  const all = [...items];\n  return (\n    <div>\n      {/* ... */}\n      {/* rest of the items */}\n    </div>\n  );\n}\n";
        let files = project(&[("Faq", body.to_string())]);
        let report = Validator.validate(&files);
        let issue = report
            .errors
            .iter()
            .find(|e| e.kind == IssueKind::TruncationMarker)
            .unwrap();
        assert_eq!(issue.line, Some(7));
        assert!(issue.message.contains("2 occurrences"));
    }

    #[test]
    fn test_duplicate_block() {
        let block = "      <p className=\"text-lg text-slate-600\">Fast builds</p>\n      <p className=\"text-lg text-slate-600\">Global edge</p>\n      <p className=\"text-lg text-slate-600\">Zero config</p>\n      <p className=\"text-lg text-slate-600\">Instant rollbacks</p>\n";
        let body = format!(
            "\"use client\";\n\nexport default function Features() {{\n  return (\n    <div>\n{block}{block}    </div>\n  );\n}}\n"
        );
        let files = project(&[("Features", body)]);
        let report = Validator.validate(&files);
        let dup = report
            .errors
            .iter()
            .find(|e| e.kind == IssueKind::DuplicateBlock)
            .unwrap();
        assert_eq!(dup.line, Some(6));
    }

    #[test]
    fn test_default_export_and_empty_component() {
        let files = project(&[
            ("A", "\"use client\";\nfunction A() { return <div />; }\n".to_string()),
            ("B", "\"use client\";\nexport default function B() {}\n".to_string()),
        ]);
        let report = Validator.validate(&files);
        let errors = kinds(&report);
        assert!(errors.contains(&IssueKind::MissingDefaultExport));
        assert!(errors.contains(&IssueKind::EmptyComponent));
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let mut files = project(&[(
            "List",
            "\"use client\";\nexport default function List() {\n  return <ul>{items.map((i) => <li>{i}</li>)}</ul>;\n}\n"
                .to_string(),
        )]);
        files.insert("components/Unused.jsx", valid_component("Unused"));
        files.remove(LAYOUT_FILE);
        let report = Validator.validate(&files);
        assert!(report.valid, "{:?}", report.errors);
        let warnings: Vec<IssueKind> = report.warnings.iter().map(|w| w.kind).collect();
        assert!(warnings.contains(&IssueKind::MissingKeyProp));
        assert!(warnings.contains(&IssueKind::OrphanComponent));
        assert!(warnings.contains(&IssueKind::MissingLayout));
    }

    #[test]
    fn test_missing_entry_is_error() {
        let mut files = project(&[]);
        files.remove(ENTRY_FILE);
        let report = Validator.validate(&files);
        assert!(!report.valid);
        assert!(kinds(&report).contains(&IssueKind::MissingEntryFile));
    }

    #[test]
    fn test_local_base() {
        assert_eq!(local_base("app/layout.jsx", "./globals.css"), "app/globals.css");
        assert_eq!(local_base("components/a/B.jsx", "../C"), "components/C");
        assert_eq!(local_base("app/page.jsx", "@/components/Hero"), "components/Hero");
    }
}
