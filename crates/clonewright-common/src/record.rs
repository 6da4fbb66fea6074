use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::project::ProjectFiles;

/// One ready execution environment handed out by the resource pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PooledResource {
    pub id: String,
    pub endpoint: String,
    pub provisioned_at: DateTime<Utc>,
}

impl PooledResource {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            provisioned_at: Utc::now(),
        }
    }
}

/// Terminal status of a run. Every run ends in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Deployed and the last compile check was clean.
    Clean,
    /// Deployed and reachable, but not verified error-free.
    DeployedWithIssues,
    /// Stopped before anything was deployed.
    FailedBeforeDeploy,
}

impl RunStatus {
    pub fn is_deployed(self) -> bool {
        !matches!(self, Self::FailedBeforeDeploy)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Clean => "clean",
            Self::DeployedWithIssues => "deployed_with_issues",
            Self::FailedBeforeDeploy => "failed_before_deploy",
        };
        write!(f, "{s}")
    }
}

/// What a store receives once a run has ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub url: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub sections_total: usize,
    pub sections_failed: usize,
    pub fix_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files: ProjectFiles,
}
