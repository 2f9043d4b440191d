//! Tool contract exposed to the LLM function-calling oracle. Each tool is a
//! record `{name, input_schema, handler}` keyed by name in a map; adding a
//! tool is additive and never touches the loop in [`crate::engine`].

use std::collections::HashSet;

use agenterm_types::SessionRole;
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GetProjectStatus,
    CreateTask,
    CreateWorktree,
    WriteTaskSpec,
    CreateSession,
    WaitForSessionReady,
    SendCommand,
    ReadSessionOutput,
    IsSessionIdle,
    CloseSession,
    MergeWorktree,
    ResolveMergeConflict,
    GenerateProgressReport,
    RequestConfirmation,
    WriteProjectMemory,
    ReadProjectMemory,
    ReportReviewVerdict,
    ReportChecksResult,
}

impl ToolName {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::GetProjectStatus => "get_project_status",
            ToolName::CreateTask => "create_task",
            ToolName::CreateWorktree => "create_worktree",
            ToolName::WriteTaskSpec => "write_task_spec",
            ToolName::CreateSession => "create_session",
            ToolName::WaitForSessionReady => "wait_for_session_ready",
            ToolName::SendCommand => "send_command",
            ToolName::ReadSessionOutput => "read_session_output",
            ToolName::IsSessionIdle => "is_session_idle",
            ToolName::CloseSession => "close_session",
            ToolName::MergeWorktree => "merge_worktree",
            ToolName::ResolveMergeConflict => "resolve_merge_conflict",
            ToolName::GenerateProgressReport => "generate_progress_report",
            ToolName::RequestConfirmation => "request_confirmation",
            ToolName::WriteProjectMemory => "write_project_memory",
            ToolName::ReadProjectMemory => "read_project_memory",
            ToolName::ReportReviewVerdict => "report_review_verdict",
            ToolName::ReportChecksResult => "report_checks_result",
        }
    }

    pub const ALL: [ToolName; 18] = [
        ToolName::GetProjectStatus,
        ToolName::CreateTask,
        ToolName::CreateWorktree,
        ToolName::WriteTaskSpec,
        ToolName::CreateSession,
        ToolName::WaitForSessionReady,
        ToolName::SendCommand,
        ToolName::ReadSessionOutput,
        ToolName::IsSessionIdle,
        ToolName::CloseSession,
        ToolName::MergeWorktree,
        ToolName::ResolveMergeConflict,
        ToolName::GenerateProgressReport,
        ToolName::RequestConfirmation,
        ToolName::WriteProjectMemory,
        ToolName::ReadProjectMemory,
        ToolName::ReportReviewVerdict,
        ToolName::ReportChecksResult,
    ];

    /// True for tools whose effect the approval policy requires explicit
    /// human confirmation for: merges, any mutating action outside the
    /// project directory (modeled here as `resolve_merge_conflict`, which can
    /// touch arbitrary worktree files on the agent's behalf), and the
    /// assignment-matrix actions that create new tasks or spawn new sessions.
    pub fn requires_confirmation(self) -> bool {
        matches!(
            self,
            ToolName::MergeWorktree
                | ToolName::ResolveMergeConflict
                | ToolName::CreateTask
                | ToolName::CreateSession
        )
    }
}

/// Role contract: the subset of tools a role may invoke, independent of
/// stage. The double gate in [`is_admitted`] additionally requires stage
/// admission.
#[derive(Debug, Clone)]
pub struct RoleContract {
    pub role: SessionRole,
    pub actions_allowed: HashSet<ToolName>,
}

impl RoleContract {
    pub fn for_role(role: SessionRole) -> Self {
        use ToolName::*;
        let actions_allowed: HashSet<ToolName> = match role {
            SessionRole::Orchestrator => ToolName::ALL.into_iter().collect(),
            SessionRole::Planner => [
                GetProjectStatus,
                CreateTask,
                WriteTaskSpec,
                GenerateProgressReport,
                RequestConfirmation,
                WriteProjectMemory,
                ReadProjectMemory,
            ]
            .into_iter()
            .collect(),
            SessionRole::Coder => [
                GetProjectStatus,
                CreateWorktree,
                CreateSession,
                WaitForSessionReady,
                SendCommand,
                ReadSessionOutput,
                IsSessionIdle,
                ReadProjectMemory,
            ]
            .into_iter()
            .collect(),
            SessionRole::Reviewer => [
                GetProjectStatus,
                SendCommand,
                ReadSessionOutput,
                IsSessionIdle,
                RequestConfirmation,
                ReadProjectMemory,
                ReportReviewVerdict,
            ]
            .into_iter()
            .collect(),
            SessionRole::Tester => [
                GetProjectStatus,
                SendCommand,
                ReadSessionOutput,
                IsSessionIdle,
                ReadProjectMemory,
                ReportChecksResult,
            ]
            .into_iter()
            .collect(),
        };
        Self { role, actions_allowed }
    }

    pub fn allows(&self, tool: ToolName) -> bool {
        self.actions_allowed.contains(&tool)
    }
}

/// Stage allowlist: the set of tools admissible while the project is
/// derived to be in a given stage, independent of role.
pub fn stage_allows(stage: Stage, tool: ToolName) -> bool {
    use ToolName::*;
    match stage {
        Stage::Plan => matches!(
            tool,
            GetProjectStatus
                | CreateTask
                | WriteTaskSpec
                | GenerateProgressReport
                | RequestConfirmation
                | WriteProjectMemory
                | ReadProjectMemory
        ),
        Stage::Build => !matches!(tool, MergeWorktree),
        Stage::Test => !matches!(tool, CreateTask | MergeWorktree),
        Stage::Summarize => matches!(
            tool,
            GetProjectStatus
                | GenerateProgressReport
                | MergeWorktree
                | ResolveMergeConflict
                | RequestConfirmation
                | WriteProjectMemory
                | ReadProjectMemory
        ),
    }
}

/// Double gate: admitted iff the role contract allows the tool *and* the
/// stage allowlist admits it. Otherwise the engine returns
/// `stage_tool_not_allowed` without executing anything.
pub fn is_admitted(contract: &RoleContract, stage: Stage, tool: ToolName) -> bool {
    contract.allows(tool) && stage_allows(stage, tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_stage_denies_merge() {
        let contract = RoleContract::for_role(SessionRole::Orchestrator);
        assert!(!is_admitted(&contract, Stage::Plan, ToolName::MergeWorktree));
    }

    #[test]
    fn reviewer_cannot_create_task() {
        let contract = RoleContract::for_role(SessionRole::Reviewer);
        assert!(!contract.allows(ToolName::CreateTask));
    }

    #[test]
    fn summarize_stage_admits_merge_for_orchestrator() {
        let contract = RoleContract::for_role(SessionRole::Orchestrator);
        assert!(is_admitted(&contract, Stage::Summarize, ToolName::MergeWorktree));
    }
}
