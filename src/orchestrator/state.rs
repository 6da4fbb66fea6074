use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::errors::PipelineError;

/// Where a run is. Stages only move forward, except the
/// `Checking -> Fixing -> Checking` compile-fix cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    #[default]
    Scraping,
    Budgeting,
    TokenizingDesign,
    Planning,
    Generating,
    Assembling,
    Reviewing,
    Validating,
    Deploying,
    Checking,
    Fixing,
    Done,
    Failed,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scraping => "scraping",
            Self::Budgeting => "budgeting",
            Self::TokenizingDesign => "tokenizing_design",
            Self::Planning => "planning",
            Self::Generating => "generating",
            Self::Assembling => "assembling",
            Self::Reviewing => "reviewing",
            Self::Validating => "validating",
            Self::Deploying => "deploying",
            Self::Checking => "checking",
            Self::Fixing => "fixing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// True for the stages that follow the first upload.
    pub fn is_post_deploy(&self) -> bool {
        matches!(self, Self::Checking | Self::Fixing | Self::Done)
    }

    /// Any live stage may fail; otherwise only the pipeline edges are legal.
    /// A deployed run can end from any post-upload stage, for example when
    /// it is cancelled mid-fix.
    pub fn can_transition_to(&self, next: RunStage) -> bool {
        use RunStage::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (*self, next),
            (Scraping, Budgeting)
                | (Budgeting, TokenizingDesign)
                | (TokenizingDesign, Planning)
                | (Planning, Generating)
                | (Generating, Assembling)
                | (Assembling, Reviewing)
                | (Reviewing, Validating)
                | (Validating, Deploying)
                | (Deploying, Checking)
                | (Checking, Fixing)
                | (Fixing, Checking)
                | (Checking, Done)
                | (Fixing, Done)
                | (Deploying, Done)
        )
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current stage and how long each visited stage took.
#[derive(Debug)]
pub struct StageMachine {
    current: RunStage,
    entered: Instant,
    history: Vec<(RunStage, Duration)>,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            current: RunStage::Scraping,
            entered: Instant::now(),
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> RunStage {
        self.current
    }

    pub fn advance(&mut self, next: RunStage) -> Result<(), PipelineError> {
        if !self.current.can_transition_to(next) {
            return Err(PipelineError::IllegalTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        self.history.push((self.current, self.entered.elapsed()));
        self.current = next;
        self.entered = Instant::now();
        Ok(())
    }

    /// Move to `Failed` from wherever the run is. No-op once terminal.
    pub fn fail(&mut self) {
        if !self.current.is_terminal() {
            self.history.push((self.current, self.entered.elapsed()));
            self.current = RunStage::Failed;
            self.entered = Instant::now();
        }
    }

    /// Every stage visited so far, in order, ending with the current one.
    pub fn path(&self) -> Vec<RunStage> {
        self.history
            .iter()
            .map(|(stage, _)| *stage)
            .chain(std::iter::once(self.current))
            .collect()
    }

    pub fn durations(&self) -> &[(RunStage, Duration)] {
        &self.history
    }

    /// How many times the compile-fix cycle was entered.
    pub fn fix_cycles(&self) -> usize {
        self.path().iter().filter(|s| **s == RunStage::Fixing).count()
    }
}
