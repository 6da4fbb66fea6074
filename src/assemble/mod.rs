//! Project assembly.
//!
//! Pure string composition: successful section outputs plus a skeleton
//! (entry page, layout, global styles, shared helpers, error boundary)
//! derived from the design tokens. Failed sections are skipped; callers see
//! them through [`GenerationResult::success`].

use clonewright_common::ProjectFiles;
use std::fmt::Write as _;

use crate::design::DesignTokens;
use crate::generate::GenerationResult;
use crate::plan::SharedContext;

pub const ENTRY_FILE: &str = "app/page.jsx";
pub const LAYOUT_FILE: &str = "app/layout.jsx";
pub const GLOBALS_FILE: &str = "app/globals.css";
pub const UTILS_FILE: &str = "lib/utils.js";
pub const ERROR_BOUNDARY_FILE: &str = "components/ErrorBoundary.jsx";

const ERROR_BOUNDARY: &str = r#""use client";

import { Component } from "react";

export default class ErrorBoundary extends Component {
  constructor(props) {
    super(props);
    this.state = { hasError: false };
  }

  static getDerivedStateFromError() {
    return { hasError: true };
  }

  componentDidCatch(error) {
    console.error(`[${this.props.name}] render failed`, error);
  }

  render() {
    if (this.state.hasError) {
      return null;
    }
    return this.props.children;
  }
}
"#;

/// `@/components/Hero` for `components/Hero.jsx`.
pub fn import_path(filepath: &str) -> String {
    let stem = filepath
        .strip_suffix(".jsx")
        .or_else(|| filepath.strip_suffix(".js"))
        .unwrap_or(filepath);
    format!("@/{stem}")
}

/// Builds the project skeleton around generated sections.
#[derive(Debug, Clone, Copy, Default)]
pub struct Assembler;

impl Assembler {
    /// Output depends only on the `order` fields, never on the order of `results`.
    pub fn assemble(
        &self,
        results: &[GenerationResult],
        tokens: &DesignTokens,
        shared: &SharedContext,
    ) -> ProjectFiles {
        let mut ok: Vec<&GenerationResult> = results.iter().filter(|r| r.success).collect();
        ok.sort_by_key(|r| r.order);

        let mut files = ProjectFiles::new();
        for result in &ok {
            files.insert(result.filepath.clone(), result.content.clone());
        }
        files.insert(ENTRY_FILE, entry_file(&ok));
        files.insert(LAYOUT_FILE, layout_file(tokens, shared));
        files.insert(GLOBALS_FILE, globals_css(tokens));
        files.insert(UTILS_FILE, utils_js(tokens));
        files.insert(ERROR_BOUNDARY_FILE, ERROR_BOUNDARY);
        files
    }
}

fn entry_file(components: &[&GenerationResult]) -> String {
    let mut out = String::from("\"use client\";\n\nimport ErrorBoundary from \"@/components/ErrorBoundary\";\n");
    for c in components {
        let _ = writeln!(
            out,
            "import {} from \"{}\";",
            c.component_name,
            import_path(&c.filepath)
        );
    }
    out.push_str("\nexport default function Page() {\n  return (\n    <main className=\"min-h-screen\">\n");
    for c in components {
        let name = &c.component_name;
        let _ = writeln!(
            out,
            "      <ErrorBoundary name=\"{name}\">\n        <{name} />\n      </ErrorBoundary>"
        );
    }
    out.push_str("    </main>\n  );\n}\n");
    out
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn layout_file(tokens: &DesignTokens, shared: &SharedContext) -> String {
    let mut out = String::from("import \"./globals.css\";\n\n");
    let title = if shared.title.is_empty() {
        "Clone"
    } else {
        shared.title.as_str()
    };
    let _ = write!(
        out,
        "export const metadata = {{\n  title: {},\n  description: {},\n}};\n\n",
        js_string(title),
        js_string(&format!("Clone of {}", shared.url)),
    );
    out.push_str("export default function RootLayout({ children }) {\n  return (\n    <html lang=\"en\">\n");
    if !tokens.typography.google_font_urls.is_empty() {
        out.push_str("      <head>\n");
        out.push_str(
            "        <link rel=\"preconnect\" href=\"https://fonts.gstatic.com\" crossOrigin=\"anonymous\" />\n",
        );
        for url in &tokens.typography.google_font_urls {
            let _ = writeln!(out, "        <link rel=\"stylesheet\" href={} />", js_attr(url));
        }
        out.push_str("      </head>\n");
    }
    out.push_str("      <body className=\"antialiased\">{children}</body>\n    </html>\n  );\n}\n");
    out
}

fn js_attr(value: &str) -> String {
    if value.contains('"') {
        format!("{{{}}}", js_string(value))
    } else {
        format!("\"{value}\"")
    }
}

fn font_stack(family: &str, generic: &str) -> String {
    if family.contains(',') {
        family.to_string()
    } else if family.is_empty() {
        generic.to_string()
    } else {
        format!("\"{}\", {generic}", family.trim_matches(['"', '\'']))
    }
}

fn globals_css(tokens: &DesignTokens) -> String {
    let colors = &tokens.colors;
    let mut vars: Vec<(&str, String)> = vec![
        ("color-primary", colors.primary.clone()),
        ("color-background", colors.background.clone()),
        ("color-text", colors.text.clone()),
        ("color-heading", colors.heading.clone()),
    ];
    let optional = [
        ("color-secondary", &colors.secondary),
        ("color-surface", &colors.surface),
        ("color-dark-background", &colors.dark_background),
        ("color-muted-text", &colors.muted_text),
        ("color-border", &colors.border),
    ];
    vars.extend(
        optional
            .into_iter()
            .filter_map(|(name, value)| value.clone().map(|v| (name, v))),
    );
    let typography = &tokens.typography;
    vars.push(("font-heading", font_stack(&typography.heading_font, "sans-serif")));
    vars.push(("font-body", font_stack(&typography.body_font, "sans-serif")));
    if let Some(mono) = &typography.mono_font {
        vars.push(("font-mono", font_stack(mono, "monospace")));
    }
    let spacing = &tokens.spacing;
    for (name, value) in [
        ("section-padding-y", &spacing.section_padding_y),
        ("container-max-width", &spacing.container_max_width),
        ("gap", &spacing.gap),
        ("radius", &spacing.radius),
    ] {
        if !value.is_empty() {
            vars.push((name, value.clone()));
        }
    }

    let mut out = String::from("@tailwind base;\n@tailwind components;\n@tailwind utilities;\n\n:root {\n");
    for (name, value) in vars {
        let _ = writeln!(out, "  --{name}: {value};");
    }
    out.push_str("}\n\nhtml {\n  scroll-behavior: smooth;\n}\n\n");
    out.push_str(
        "body {\n  background: var(--color-background);\n  color: var(--color-text);\n  font-family: var(--font-body);\n}\n\n",
    );
    out.push_str(
        "h1,\nh2,\nh3,\nh4,\nh5,\nh6 {\n  font-family: var(--font-heading);\n  color: var(--color-heading);\n}\n",
    );
    for (tag, entry) in &typography.scale {
        if !tag.starts_with('h') || entry.size.is_empty() {
            continue;
        }
        let _ = write!(out, "\n{tag} {{\n  font-size: {};\n", entry.size);
        for (prop, value) in [
            ("font-weight", &entry.weight),
            ("line-height", &entry.line_height),
            ("letter-spacing", &entry.letter_spacing),
        ] {
            if !value.is_empty() {
                let _ = writeln!(out, "  {prop}: {value};");
            }
        }
        out.push_str("}\n");
    }
    out
}

fn utils_js(tokens: &DesignTokens) -> String {
    let spacing = &tokens.spacing;
    let padding = non_empty(&spacing.section_padding_y, "96px");
    let width = non_empty(&spacing.container_max_width, "1200px");
    let anim = &tokens.animation;
    let easing = js_string(&anim.easing);
    format!(
        r#"import {{ clsx }} from "clsx";
import {{ twMerge }} from "tailwind-merge";

export function cn(...inputs) {{
  return twMerge(clsx(inputs));
}}

export const containerClass = "mx-auto w-full max-w-[{width}] px-6";

export function sectionClass(...extra) {{
  return cn("relative w-full py-[{padding}]", ...extra);
}}

export const fadeUp = {{
  initial: {{ opacity: 0, y: {y} }},
  whileInView: {{ opacity: 1, y: 0 }},
  viewport: {{ once: true, margin: "-80px" }},
  transition: {{ duration: {duration}, ease: {easing} }},
}};

export function staggered(index) {{
  return {{
    ...fadeUp,
    transition: {{ ...fadeUp.transition, delay: index * {stagger} }},
  }};
}}
"#,
        y = anim.initial_y,
        duration = anim.duration_ms as f64 / 1000.0,
        stagger = anim.stagger_ms as f64 / 1000.0,
    )
}

fn non_empty<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.trim().is_empty() { default } else { value }
}
