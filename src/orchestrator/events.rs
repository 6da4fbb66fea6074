//! Progress events emitted by the orchestrator.
//!
//! Events go out in logical stage order. Section completions arrive in
//! whatever order the generation tasks finish, but always between the
//! `generating` and `assembling` stage events.

use clonewright_common::RunStatus;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::budget::summary::SummaryMeta;
use crate::budget::{BudgetAllocation, SiteProfile};

use super::state::RunStage;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    StageEntered {
        stage: RunStage,
    },
    ResourceReady {
        id: String,
        endpoint: String,
    },
    ExtractionComplete {
        title: String,
        sections: usize,
        screenshots: usize,
    },
    BudgetComputed {
        profile: SiteProfile,
        allocation: BudgetAllocation,
        meta: SummaryMeta,
    },
    DesignTokensReady {
        fallback: bool,
        primary: String,
        heading_font: String,
    },
    SectionsPlanned {
        components: Vec<String>,
    },
    SectionCompleted {
        component: String,
        order: usize,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        completed: usize,
        total: usize,
    },
    ReviewApplied {
        changed: Vec<String>,
        rejected: Vec<String>,
        accepted: bool,
    },
    ValidationResult {
        /// 0 for the first pass, 1 after the fix.
        pass: u32,
        valid: bool,
        errors: Vec<String>,
        warnings: usize,
    },
    FixApplied {
        stage: RunStage,
        attempt: u32,
        changed: Vec<String>,
    },
    Deployed {
        id: String,
        endpoint: String,
        files: usize,
    },
    CompileResult {
        attempt: u32,
        compiled: bool,
        has_errors: bool,
        errors: Vec<String>,
    },
    Terminal {
        status: RunStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StageEntered { .. } => "stage_entered",
            Self::ResourceReady { .. } => "resource_ready",
            Self::ExtractionComplete { .. } => "extraction_complete",
            Self::BudgetComputed { .. } => "budget_computed",
            Self::DesignTokensReady { .. } => "design_tokens_ready",
            Self::SectionsPlanned { .. } => "sections_planned",
            Self::SectionCompleted { .. } => "section_completed",
            Self::ReviewApplied { .. } => "review_applied",
            Self::ValidationResult { .. } => "validation_result",
            Self::FixApplied { .. } => "fix_applied",
            Self::Deployed { .. } => "deployed",
            Self::CompileResult { .. } => "compile_result",
            Self::Terminal { .. } => "terminal",
        }
    }
}

/// Optional sender. A dropped receiver never affects the run.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub async fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx
            && tx.send(event).await.is_err()
        {
            debug!("Progress receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let event = ProgressEvent::SectionCompleted {
            component: "Hero".into(),
            order: 1,
            success: false,
            error: Some("timed out".into()),
            completed: 2,
            total: 6,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "section_completed");
        assert_eq!(value["component"], "Hero");
        assert_eq!(value["error"], "timed out");
        assert_eq!(event.kind(), "section_completed");

        let terminal = ProgressEvent::Terminal {
            status: RunStatus::DeployedWithIssues,
            reason: None,
            endpoint: Some("https://sb.test".into()),
        };
        let value = serde_json::to_value(&terminal).unwrap();
        assert_eq!(value["status"], "deployed_with_issues");
        assert!(value.get("reason").is_none());

        let stage = ProgressEvent::StageEntered {
            stage: RunStage::TokenizingDesign,
        };
        assert_eq!(
            serde_json::to_string(&stage).unwrap(),
            r#"{"type":"stage_entered","stage":"tokenizing_design"}"#
        );
    }

    #[tokio::test]
    async fn test_sink_survives_dropped_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = EventSink::new(tx);
        sink.emit(ProgressEvent::StageEntered {
            stage: RunStage::Scraping,
        })
        .await;
        EventSink::default()
            .emit(ProgressEvent::StageEntered {
                stage: RunStage::Scraping,
            })
            .await;
    }
}
