//! Pre-warmed execution environments.
//!
//! Provisioning a sandbox takes far longer than anything else a run does
//! before generation, so the pool keeps `target` environments ready. An
//! acquire pops one under the pool lock and triggers a background
//! replenisher; an empty pool provisions synchronously instead of failing.
//!
//! All pool mutation happens under one `tokio::sync::Mutex`. The
//! `replenishing` flag inside that lock guarantees a single replenisher at a
//! time, and the replenisher re-checks the fill level under the lock before
//! every push, so the pool never exceeds its target.

use clonewright_common::{CollaboratorError, PooledResource, SandboxProvider};
use futures::future::join_all;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<PooledResource>,
    replenishing: bool,
    initialized: bool,
    closed: bool,
    provisioned: usize,
    slow_path: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub target: usize,
    /// Every environment the pool has provisioned, fast or slow path.
    pub provisioned: usize,
    /// Acquires that found the pool empty.
    pub slow_path: usize,
}

/// Bounded pool of ready environments. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ResourcePool {
    provider: Arc<dyn SandboxProvider>,
    target: usize,
    provision_timeout: Duration,
    state: Arc<Mutex<PoolState>>,
}

impl ResourcePool {
    pub fn new(provider: Arc<dyn SandboxProvider>, target: usize) -> Self {
        Self {
            provider,
            target,
            provision_timeout: Duration::from_secs(120),
            state: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    pub fn with_provision_timeout(mut self, timeout: Duration) -> Self {
        self.provision_timeout = timeout;
        self
    }

    pub fn provider(&self) -> Arc<dyn SandboxProvider> {
        Arc::clone(&self.provider)
    }

    /// Pre-warm up to `target` environments concurrently. Idempotent.
    ///
    /// Individual provisioning failures are logged; the pool simply starts
    /// with fewer ready environments and acquire falls back to on-demand.
    pub async fn initialize(&self) {
        let missing = {
            let mut state = self.state.lock().await;
            if state.initialized || state.closed {
                return;
            }
            state.initialized = true;
            self.target.saturating_sub(state.idle.len())
        };
        if missing == 0 {
            return;
        }

        info!(count = missing, "Pre-warming execution environments");
        let results = join_all((0..missing).map(|_| self.provision_bounded())).await;

        let mut state = self.state.lock().await;
        for result in results {
            match result {
                Ok(resource) => {
                    state.provisioned += 1;
                    if state.closed || state.idle.len() >= self.target {
                        self.release_detached(resource);
                    } else {
                        state.idle.push_back(resource);
                    }
                }
                Err(e) => warn!(error = %e, "Pre-warm provisioning failed"),
            }
        }
    }

    /// Hand out a ready environment, provisioning one on demand if none is idle.
    ///
    /// Only a provider failure is an error; an empty pool just costs latency.
    pub async fn acquire(&self) -> Result<PooledResource, CollaboratorError> {
        let popped = {
            let mut state = self.state.lock().await;
            let popped = state.idle.pop_front();
            if popped.is_none() {
                state.slow_path += 1;
            }
            popped
        };

        if let Some(resource) = popped {
            debug!(id = %resource.id, "Acquired pre-warmed environment");
            self.spawn_replenish();
            return Ok(resource);
        }

        info!("Pool empty, provisioning on demand");
        let resource = self.provision_bounded().await?;
        self.state.lock().await.provisioned += 1;
        self.spawn_replenish();
        Ok(resource)
    }

    /// Fire-and-forget refill. Returns immediately.
    fn spawn_replenish(&self) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.replenish().await;
        });
    }

    /// Fill the pool back to `target`, one environment at a time.
    ///
    /// Returns immediately if another replenisher is already running.
    pub async fn replenish(&self) {
        {
            let mut state = self.state.lock().await;
            if state.replenishing || state.closed || state.idle.len() >= self.target {
                return;
            }
            state.replenishing = true;
        }

        loop {
            let result = self.provision_bounded().await;
            let mut state = self.state.lock().await;
            match result {
                Ok(resource) => {
                    state.provisioned += 1;
                    if state.closed || state.idle.len() >= self.target {
                        self.release_detached(resource);
                    } else {
                        debug!(id = %resource.id, "Replenished pool");
                        state.idle.push_back(resource);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Replenish provisioning failed");
                    state.replenishing = false;
                    return;
                }
            }
            if state.closed || state.idle.len() >= self.target {
                state.replenishing = false;
                return;
            }
        }
    }

    /// Release every idle environment and stop replenishing.
    pub async fn shutdown(&self) {
        let drained: Vec<PooledResource> = {
            let mut state = self.state.lock().await;
            state.closed = true;
            state.idle.drain(..).collect()
        };
        if drained.is_empty() {
            return;
        }
        info!(count = drained.len(), "Releasing idle environments");
        let provider = &self.provider;
        let results = join_all(drained.iter().map(|r| provider.release(r))).await;
        for (resource, result) in drained.iter().zip(results) {
            if let Err(e) = result {
                warn!(id = %resource.id, error = %e, "Failed to release environment");
            }
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            idle: state.idle.len(),
            target: self.target,
            provisioned: state.provisioned,
            slow_path: state.slow_path,
        }
    }

    async fn provision_bounded(&self) -> Result<PooledResource, CollaboratorError> {
        tokio::time::timeout(self.provision_timeout, self.provider.provision())
            .await
            .map_err(|_| CollaboratorError::timeout("provision", self.provision_timeout))?
    }

    /// Release an environment the pool has no room for, without blocking the lock holder.
    fn release_detached(&self, resource: PooledResource) {
        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            if let Err(e) = provider.release(&resource).await {
                warn!(id = %resource.id, error = %e, "Failed to release surplus environment");
            }
        });
    }
}
