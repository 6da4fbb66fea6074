//! Per-run session state with idle expiry.
//!
//! The orchestrator records each run here as it moves through its stages.
//! Entries that haven't been touched for `idle_ttl` are evicted by
//! [`RunSessions::evict_idle`], which a background sweeper can call on an
//! interval.

use chrono::{DateTime, Utc};
use clonewright_common::RunStatus;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::orchestrator::RunStage;

#[derive(Debug, Clone, Serialize)]
pub struct RunSession {
    pub run_id: String,
    pub url: String,
    pub stage: RunStage,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip)]
    last_seen: Instant,
}

impl RunSession {
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }
}

/// Concurrent map of live runs keyed by run id. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunSessions {
    inner: Arc<DashMap<String, RunSession>>,
    idle_ttl: Duration,
}

impl RunSessions {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            idle_ttl,
        }
    }

    pub fn start(&self, run_id: &str, url: &str) {
        self.inner.insert(
            run_id.to_string(),
            RunSession {
                run_id: run_id.to_string(),
                url: url.to_string(),
                stage: RunStage::Scraping,
                started_at: Utc::now(),
                status: None,
                last_seen: Instant::now(),
            },
        );
    }

    /// Record a stage change. Unknown run ids are ignored.
    pub fn touch(&self, run_id: &str, stage: RunStage) {
        if let Some(mut session) = self.inner.get_mut(run_id) {
            session.stage = stage;
            session.last_seen = Instant::now();
        }
    }

    pub fn finish(&self, run_id: &str, status: RunStatus) {
        if let Some(mut session) = self.inner.get_mut(run_id) {
            session.status = Some(status);
            session.last_seen = Instant::now();
        }
    }

    pub fn get(&self, run_id: &str) -> Option<RunSession> {
        self.inner.get(run_id).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop every session idle longer than the TTL. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|_, s| s.last_seen.elapsed() < self.idle_ttl);
        let evicted = before.saturating_sub(self.inner.len());
        if evicted > 0 {
            debug!(evicted, remaining = self.inner.len(), "Evicted idle run sessions");
        }
        evicted
    }

    /// Evict on an interval until `cancel` fires.
    pub fn spawn_sweeper(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let sessions = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        sessions.evict_idle();
                    }
                }
            }
        })
    }
}
