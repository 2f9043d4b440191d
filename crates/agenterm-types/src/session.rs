use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Orchestrator,
    Planner,
    Coder,
    Reviewer,
    Tester,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Ready,
    Working,
    Waiting,
    Idle,
    NeedsInput,
    Completed,
    Failed,
    HumanTakeover,
}

/// A session exclusively owns a multiplexer target and a scrollback ring
/// (last N lines, default 2000). Sessions are mutable only by their
/// terminal gateway and the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_id: Option<Uuid>,
    pub multiplexer_target: String,
    pub agent_id: String,
    pub role: SessionRole,
    pub status: SessionStatus,
    pub human_attached: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Session {
    pub fn target_name(project: &str, task: &str, role: SessionRole, short_id: &str) -> String {
        let role_slug = match role {
            SessionRole::Orchestrator => "orchestrator",
            SessionRole::Planner => "planner",
            SessionRole::Coder => "coder",
            SessionRole::Reviewer => "reviewer",
            SessionRole::Tester => "tester",
        };
        format!("{project}-{task}-{role_slug}-{short_id}")
    }
}
