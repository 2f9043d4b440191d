//! Stage derivation. A project's stage is never stored; it is computed
//! from live task/worktree/session state on every invocation.

use agenterm_types::{SessionStatus, Task, TaskStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Plan,
    Build,
    Test,
    Summarize,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Build => "build",
            Stage::Test => "test",
            Stage::Summarize => "summarize",
        }
    }
}

/// `plan` if no active task/worktree graph; `build` if tasks/worktrees in
/// progress; `test` if implementation done and validation pending;
/// `summarize` at finalization.
pub fn derive_stage(tasks: &[Task], session_statuses: &[SessionStatus]) -> Stage {
    if tasks.is_empty() {
        return Stage::Plan;
    }

    let all_terminal = tasks
        .iter()
        .all(|t| matches!(t.status, TaskStatus::Done | TaskStatus::Failed));
    if all_terminal {
        return Stage::Summarize;
    }

    let any_reviewing_or_running = tasks
        .iter()
        .any(|t| matches!(t.status, TaskStatus::Running | TaskStatus::Blocked));
    if any_reviewing_or_running {
        return Stage::Build;
    }

    let any_reviewing = tasks.iter().any(|t| t.status == TaskStatus::Reviewing);
    let any_tester_active = session_statuses
        .iter()
        .any(|s| matches!(s, SessionStatus::Working | SessionStatus::Ready));
    if any_reviewing || (any_tester_active && tasks.iter().all(|t| t.status != TaskStatus::Pending)) {
        return Stage::Test;
    }

    Stage::Build
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn task(status: TaskStatus) -> Task {
        let mut t = Task::new(Uuid::new_v4(), "t", "d");
        t.status = status;
        t
    }

    #[test]
    fn empty_project_is_plan() {
        assert_eq!(derive_stage(&[], &[]), Stage::Plan);
    }

    #[test]
    fn all_done_is_summarize() {
        let tasks = vec![task(TaskStatus::Done), task(TaskStatus::Failed)];
        assert_eq!(derive_stage(&tasks, &[]), Stage::Summarize);
    }

    #[test]
    fn running_task_is_build() {
        let tasks = vec![task(TaskStatus::Running)];
        assert_eq!(derive_stage(&tasks, &[]), Stage::Build);
    }

    #[test]
    fn reviewing_task_is_test() {
        let tasks = vec![task(TaskStatus::Reviewing)];
        assert_eq!(derive_stage(&tasks, &[]), Stage::Test);
    }
}
