use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Paused,
    Archived,
}

/// Routing profile for the orchestrator's `AgentClient` (see agenterm-orchestrator).
/// The provider/model fields are opaque strings the client implementation interprets;
/// this crate never validates them against a provider SDK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorProfile {
    pub provider: String,
    pub model: String,
    pub api_base: String,
    pub max_parallel: u32,
}

/// Root of ownership: a project exclusively owns its tasks, worktrees,
/// sessions, commands, events, exceptions, demand items, and orchestrator
/// history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub repo_path: String,
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook_id: Option<String>,
    pub orchestrator_profile: OrchestratorProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, repo_path: impl Into<String>, profile: OrchestratorProfile) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            repo_path: repo_path.into(),
            status: ProjectStatus::Active,
            playbook_id: None,
            orchestrator_profile: profile,
            created_at: now,
            updated_at: now,
        }
    }

    /// `.worktrees/` root that every Worktree.path for this project must live under.
    pub fn worktrees_root(&self) -> String {
        format!("{}/.worktrees", self.repo_path.trim_end_matches('/'))
    }
}
