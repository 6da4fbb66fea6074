//! In-memory collaborator doubles shared by the crate's unit tests.

use async_trait::async_trait;
use clonewright_common::{
    CloneStore, CollaboratorError, Completion, CompletionRequest, Generator, RawExtraction,
    RunRecord, Scraper,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Marker line every section prompt carries; see `generate::build_prompt`.
pub const COMPONENT_LINE: &str = "COMPONENT NAME: ";

#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail,
    Slow(Duration, String),
}

/// Generator double. Rules match a needle against system prompt plus
/// prompt; a rule with several replies hands them out in turn and repeats
/// the last one. Section prompts with no matching rule get a valid component.
pub struct ScriptedGenerator {
    rules: Mutex<Vec<(String, VecDeque<Reply>)>>,
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn on(self, needle: &str, reply: Reply) -> Self {
        self.on_seq(needle, vec![reply])
    }

    pub fn on_seq(self, needle: &str, replies: Vec<Reply>) -> Self {
        self.rules
            .lock()
            .unwrap()
            .push((needle.to_string(), replies.into()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of recorded requests whose system prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.system.contains(needle))
            .count()
    }

    fn pick(&self, request: &CompletionRequest) -> Reply {
        let haystack = format!("{}\n{}", request.system, request.prompt);
        let mut rules = self.rules.lock().unwrap();
        for (needle, replies) in rules.iter_mut() {
            if haystack.contains(needle.as_str()) {
                return if replies.len() > 1 {
                    replies.pop_front().unwrap()
                } else {
                    replies.front().cloned().unwrap()
                };
            }
        }
        match component_name(&request.prompt) {
            Some(name) => Reply::Text(valid_component(&name)),
            None => Reply::Text("{}".to_string()),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let reply = self.pick(&request);
        self.requests.lock().unwrap().push(request);

        let outcome = match reply {
            Reply::Text(text) => Ok(Completion::text(text)),
            Reply::Fail => Err(CollaboratorError::Transport("scripted failure".into())),
            Reply::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(Completion::text(text))
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn component_name(prompt: &str) -> Option<String> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(COMPONENT_LINE))
        .map(|name| name.trim().to_string())
}

pub fn valid_component(name: &str) -> String {
    format!(
        "\"use client\";\n\nexport default function {name}() {{\n  return (\n    <section id=\"{id}\" className=\"py-24\">\n      <h2 className=\"text-3xl font-bold\">{name}</h2>\n    </section>\n  );\n}}\n",
        id = name.to_lowercase()
    )
}

/// Scraper double returning a fixed extraction, or failing.
pub struct StaticScraper(pub Option<RawExtraction>);

#[async_trait]
impl Scraper for StaticScraper {
    async fn extract(&self, _url: &str) -> Result<RawExtraction, CollaboratorError> {
        self.0
            .clone()
            .ok_or_else(|| CollaboratorError::Transport("page unreachable".into()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub records: Mutex<Vec<RunRecord>>,
}

#[async_trait]
impl CloneStore for MemoryStore {
    async fn save(&self, record: &RunRecord) -> Result<(), CollaboratorError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Extraction with one section per kind, laid out top to bottom.
pub fn extraction_with_sections(kinds: &[&str]) -> RawExtraction {
    let sections: Vec<serde_json::Value> = kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            serde_json::json!({
                "index": i,
                "type": kind,
                "top": i as f64 * 700.0,
                "height": 700.0,
                "headings": [{"text": format!("{kind} heading {i}"), "tag": "h2"}],
            })
        })
        .collect();
    let doc = serde_json::json!({
        "url": "https://acme.test",
        "title": "Acme",
        "page_height": kinds.len() as f64 * 700.0,
        "theme": {
            "colors": {"body_bg": "#ffffff", "body_text": "#0f172a", "accent_colors": ["#6366f1"]},
            "fonts": {"heading": "Inter", "body": "Inter"}
        },
        "sections": sections,
    });
    RawExtraction::from_json(&doc.to_string()).unwrap()
}
