//! Progress reporter: on-demand structured snapshot of project state, no
//! timers. Computed synchronously from the store plus terminal gateway
//! stats and published as a `project_event`.

use agenterm_core::error::Result;
use agenterm_core::store::Store;
use agenterm_types::{EventKind, SessionStatus, TaskStatus};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub phase: String,
    pub queue_depth: usize,
    pub active_sessions: usize,
    pub pending_tasks: usize,
    pub completed_tasks: usize,
    pub review_state: String,
    pub open_review_issues_total: u32,
    pub blockers: Vec<String>,
    pub finalize_ready: bool,
}

pub async fn generate(store: &Store, project_id: Uuid) -> Result<ProgressReport> {
    let tasks = store.list_tasks(project_id).await?;
    let sessions = store.list_sessions(project_id).await?;
    let exceptions = store.list_exceptions(project_id).await?;

    let pending_tasks = tasks
        .iter()
        .filter(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Running | TaskStatus::Blocked))
        .count();
    let completed_tasks = tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
    let reviewing = tasks.iter().filter(|t| t.status == TaskStatus::Reviewing).count();
    let active_sessions = sessions
        .iter()
        .filter(|s| matches!(s.status, SessionStatus::Working | SessionStatus::Ready | SessionStatus::NeedsInput))
        .count();

    let queue_depth = pending_tasks;
    let blockers: Vec<String> = exceptions
        .iter()
        .filter(|e| e.status == agenterm_types::ExceptionStatus::Open)
        .map(|e| e.message.clone())
        .collect();

    let phase = if tasks.is_empty() {
        "plan"
    } else if tasks.iter().all(|t| matches!(t.status, TaskStatus::Done | TaskStatus::Failed)) {
        "summarize"
    } else if reviewing > 0 {
        "test"
    } else {
        "build"
    };

    let finalize_ready = !tasks.is_empty()
        && tasks.iter().all(|t| t.status == TaskStatus::Done)
        && blockers.is_empty();

    let review_state = if reviewing > 0 { "reviewing" } else { "idle" }.to_string();

    let report = ProgressReport {
        phase: phase.to_string(),
        queue_depth,
        active_sessions,
        pending_tasks,
        completed_tasks,
        review_state,
        open_review_issues_total: blockers.len() as u32,
        blockers,
        finalize_ready,
    };

    store
        .publish(
            project_id,
            "progress",
            EventKind::ProjectEvent,
            serde_json::to_value(&report).unwrap_or_default(),
        )
        .await?;

    Ok(report)
}
