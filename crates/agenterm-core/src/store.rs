//! Durable, file-based, project-scoped persistence. Grounded on
//! `orchestrator/store.rs`'s per-run JSON/JSONL layout, generalized from
//! "one run" to "one project" as the persistence root.
//!
//! Layout: `<state_dir>/projects/<project_id>/{project.json, tasks.json,
//! worktrees.json, sessions.json, commands.json, exceptions.json,
//! demand_items.json, events.jsonl}`. Every mutation is written to a `.tmp`
//! sibling then renamed into place, so a crash mid-write never corrupts the
//! previous state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use agenterm_types::{
    Command, CommandStatus, DemandItem, Event, EventKind, Exception, ExceptionStatus, Project,
    Session, Task, Worktree,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{AgentTermError, Result};
use crate::event_bus::EventBus;

async fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = tokio::fs::read_to_string(path).await?;
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&raw)?)
}

async fn write_json_array<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn write_json_object<T: Serialize>(path: &Path, item: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let raw = serde_json::to_string_pretty(item)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, raw).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json_object<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|_| AgentTermError::NotFound(path.display().to_string()))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Per-project runtime handle: event sequence counter and live broadcast
/// channel. One write lock per project serializes multi-row transactions,
/// so a cross-entity state transition always commits as a single unit.
struct ProjectRuntime {
    dir: PathBuf,
    seq: AtomicU64,
    bus: EventBus,
    write_lock: Mutex<()>,
}

impl ProjectRuntime {
    fn events_path(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }
}

pub struct Store {
    state_dir: PathBuf,
    projects: RwLock<HashMap<Uuid, Arc<ProjectRuntime>>>,
}

impl Store {
    pub async fn new(state_dir: impl AsRef<Path>) -> Result<Self> {
        let state_dir = state_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&state_dir).await?;
        Ok(Self {
            state_dir,
            projects: RwLock::new(HashMap::new()),
        })
    }

    fn project_dir(&self, project_id: Uuid) -> PathBuf {
        self.state_dir.join("projects").join(project_id.to_string())
    }

    async fn runtime(&self, project_id: Uuid) -> Result<Arc<ProjectRuntime>> {
        if let Some(rt) = self.projects.read().await.get(&project_id) {
            return Ok(rt.clone());
        }
        let dir = self.project_dir(project_id);
        let events = read_events_jsonl(&dir.join("events.jsonl")).await?;
        let last_seq = events.last().map(|e| e.seq).unwrap_or(0);
        tracing::debug!(%project_id, event_count = events.len(), last_seq, "loaded project event log");
        let rt = Arc::new(ProjectRuntime {
            dir,
            seq: AtomicU64::new(last_seq),
            bus: EventBus::new(),
            write_lock: Mutex::new(()),
        });
        self.projects.write().await.insert(project_id, rt.clone());
        Ok(rt)
    }

    // ---- Project ----

    pub async fn create_project(&self, project: &Project) -> Result<()> {
        let rt = self.runtime(project.id).await?;
        let _guard = rt.write_lock.lock().await;
        write_json_object(&rt.dir.join("project.json"), project).await
    }

    pub async fn get_project(&self, project_id: Uuid) -> Result<Project> {
        let rt = self.runtime(project_id).await?;
        read_json_object(&rt.dir.join("project.json")).await
    }

    pub async fn update_project(&self, project: &Project) -> Result<()> {
        self.create_project(project).await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let root = self.state_dir.join("projects");
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let candidate = entry.path().join("project.json");
            if candidate.exists() {
                out.push(read_json_object(&candidate).await?);
            }
        }
        Ok(out)
    }

    // ---- Tasks ----

    pub async fn create_task(&self, task: &Task) -> Result<()> {
        let rt = self.runtime(task.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("tasks.json");
        let mut tasks: Vec<Task> = read_json_array(&path).await?;
        if tasks.iter().any(|t| t.id == task.id) {
            return Err(AgentTermError::Conflict(format!("task {} already exists", task.id)));
        }
        validate_acyclic(&tasks, task)?;
        tasks.push(task.clone());
        write_json_array(&path, &tasks).await
    }

    pub async fn list_tasks(&self, project_id: Uuid) -> Result<Vec<Task>> {
        let rt = self.runtime(project_id).await?;
        read_json_array(&rt.dir.join("tasks.json")).await
    }

    pub async fn update_task(&self, task: &Task) -> Result<()> {
        let rt = self.runtime(task.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("tasks.json");
        let mut tasks: Vec<Task> = read_json_array(&path).await?;
        let slot = tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| AgentTermError::NotFound(format!("task {}", task.id)))?;
        *slot = task.clone();
        write_json_array(&path, &tasks).await
    }

    // ---- Worktrees ----

    pub async fn create_worktree(&self, worktree: &Worktree) -> Result<()> {
        let rt = self.runtime(worktree.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("worktrees.json");
        let mut worktrees: Vec<Worktree> = read_json_array(&path).await?;
        let branch_taken = worktrees.iter().any(|w| {
            w.branch == worktree.branch && w.status == agenterm_types::WorktreeStatus::Active
        });
        if branch_taken {
            return Err(AgentTermError::Conflict(format!(
                "an active worktree already exists for branch {}",
                worktree.branch
            )));
        }
        worktrees.push(worktree.clone());
        write_json_array(&path, &worktrees).await
    }

    pub async fn list_worktrees(&self, project_id: Uuid) -> Result<Vec<Worktree>> {
        let rt = self.runtime(project_id).await?;
        read_json_array(&rt.dir.join("worktrees.json")).await
    }

    pub async fn update_worktree(&self, worktree: &Worktree) -> Result<()> {
        let rt = self.runtime(worktree.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("worktrees.json");
        let mut worktrees: Vec<Worktree> = read_json_array(&path).await?;
        let slot = worktrees
            .iter_mut()
            .find(|w| w.id == worktree.id)
            .ok_or_else(|| AgentTermError::NotFound(format!("worktree {}", worktree.id)))?;
        *slot = worktree.clone();
        write_json_array(&path, &worktrees).await
    }

    // ---- Sessions ----

    pub async fn create_session(&self, session: &Session) -> Result<()> {
        let rt = self.runtime(session.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("sessions.json");
        let mut sessions: Vec<Session> = read_json_array(&path).await?;
        sessions.push(session.clone());
        write_json_array(&path, &sessions).await
    }

    pub async fn list_sessions(&self, project_id: Uuid) -> Result<Vec<Session>> {
        let rt = self.runtime(project_id).await?;
        read_json_array(&rt.dir.join("sessions.json")).await
    }

    pub async fn update_session(&self, session: &Session) -> Result<()> {
        let rt = self.runtime(session.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("sessions.json");
        let mut sessions: Vec<Session> = read_json_array(&path).await?;
        let slot = sessions
            .iter_mut()
            .find(|s| s.id == session.id)
            .ok_or_else(|| AgentTermError::NotFound(format!("session {}", session.id)))?;
        *slot = session.clone();
        write_json_array(&path, &sessions).await
    }

    // ---- Commands ----

    pub async fn enqueue_command(&self, project_id: Uuid, command: &Command) -> Result<()> {
        let rt = self.runtime(project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("commands.json");
        let mut commands: Vec<Command> = read_json_array(&path).await?;
        commands.push(command.clone());
        write_json_array(&path, &commands).await
    }

    /// Atomically checks the single-inflight-command-per-session invariant
    /// and enqueues `command` under the same project write lock, so two
    /// concurrent dispatches can never both observe "no inflight command"
    /// and both enqueue. Returns `Conflict` if `session_id` already has a
    /// command in `{sent, acked}`.
    pub async fn enqueue_command_if_no_inflight(&self, project_id: Uuid, command: &Command) -> Result<()> {
        let rt = self.runtime(project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("commands.json");
        let mut commands: Vec<Command> = read_json_array(&path).await?;
        if commands
            .iter()
            .any(|c| c.session_id == command.session_id && c.status.is_inflight())
        {
            return Err(AgentTermError::Conflict(format!(
                "session {} already has a command in flight",
                command.session_id
            )));
        }
        commands.push(command.clone());
        write_json_array(&path, &commands).await
    }

    pub async fn list_commands(&self, project_id: Uuid, session_id: Uuid) -> Result<Vec<Command>> {
        let rt = self.runtime(project_id).await?;
        let commands: Vec<Command> = read_json_array(&rt.dir.join("commands.json")).await?;
        Ok(commands.into_iter().filter(|c| c.session_id == session_id).collect())
    }

    /// True if `session_id` already has a command in `{sent, acked}`; used
    /// to enforce the single-inflight-command-per-session rule.
    pub async fn has_inflight_command(&self, project_id: Uuid, session_id: Uuid) -> Result<bool> {
        Ok(self
            .list_commands(project_id, session_id)
            .await?
            .iter()
            .any(|c| c.status.is_inflight()))
    }

    pub async fn update_command(&self, project_id: Uuid, command: &Command) -> Result<()> {
        let rt = self.runtime(project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("commands.json");
        let mut commands: Vec<Command> = read_json_array(&path).await?;
        let slot = commands
            .iter_mut()
            .find(|c| c.id == command.id)
            .ok_or_else(|| AgentTermError::NotFound(format!("command {}", command.id)))?;
        *slot = command.clone();
        write_json_array(&path, &commands).await
    }

    // ---- Exceptions ----

    pub async fn create_exception(&self, exception: &Exception) -> Result<()> {
        let rt = self.runtime(exception.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("exceptions.json");
        let mut exceptions: Vec<Exception> = read_json_array(&path).await?;
        exceptions.push(exception.clone());
        write_json_array(&path, &exceptions).await
    }

    pub async fn list_exceptions(&self, project_id: Uuid) -> Result<Vec<Exception>> {
        let rt = self.runtime(project_id).await?;
        read_json_array(&rt.dir.join("exceptions.json")).await
    }

    pub async fn resolve_exception(&self, project_id: Uuid, exception_id: Uuid) -> Result<()> {
        let rt = self.runtime(project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("exceptions.json");
        let mut exceptions: Vec<Exception> = read_json_array(&path).await?;
        let slot = exceptions
            .iter_mut()
            .find(|e| e.id == exception_id)
            .ok_or_else(|| AgentTermError::NotFound(format!("exception {}", exception_id)))?;
        slot.status = ExceptionStatus::Resolved;
        slot.resolved_at = Some(chrono::Utc::now());
        write_json_array(&path, &exceptions).await
    }

    // ---- Demand items ----

    pub async fn create_demand_item(&self, item: &DemandItem) -> Result<()> {
        let rt = self.runtime(item.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("demand_items.json");
        let mut items: Vec<DemandItem> = read_json_array(&path).await?;
        items.push(item.clone());
        write_json_array(&path, &items).await
    }

    pub async fn list_demand_items(&self, project_id: Uuid) -> Result<Vec<DemandItem>> {
        let rt = self.runtime(project_id).await?;
        read_json_array(&rt.dir.join("demand_items.json")).await
    }

    pub async fn update_demand_item(&self, item: &DemandItem) -> Result<()> {
        let rt = self.runtime(item.project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let path = rt.dir.join("demand_items.json");
        let mut items: Vec<DemandItem> = read_json_array(&path).await?;
        let slot = items
            .iter_mut()
            .find(|d| d.id == item.id)
            .ok_or_else(|| AgentTermError::NotFound(format!("demand item {}", item.id)))?;
        *slot = item.clone();
        write_json_array(&path, &items).await
    }

    // ---- Events ----

    /// Assigns `seq = max(seq)+1` atomically and appends to the JSONL log,
    /// then broadcasts to live subscribers. This is the only way an `Event`
    /// is produced; producers never invent their own `seq`.
    pub async fn publish(
        &self,
        project_id: Uuid,
        channel: impl Into<String>,
        kind: EventKind,
        payload: Value,
    ) -> Result<Event> {
        let rt = self.runtime(project_id).await?;
        let _guard = rt.write_lock.lock().await;
        let seq = rt.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event {
            seq,
            project_id,
            channel: channel.into(),
            kind,
            payload,
            ts: chrono::Utc::now(),
        };
        append_event_jsonl(&rt.events_path(), &event).await?;
        rt.bus.publish(event.clone());
        Ok(event)
    }

    pub async fn events_since(&self, project_id: Uuid, cursor: u64) -> Result<Vec<Event>> {
        let rt = self.runtime(project_id).await?;
        let events = read_events_jsonl(&rt.events_path()).await?;
        Ok(events.into_iter().filter(|e| e.seq > cursor).collect())
    }

    /// Replay-then-live subscription. Drains the persisted backlog strictly
    /// greater than `cursor`, then switches to the live
    /// broadcast receiver, filtering out anything the backlog already
    /// delivered so the splice point never double-delivers a `seq`.
    pub async fn subscribe(
        &self,
        project_id: Uuid,
        cursor: u64,
    ) -> Result<(Vec<Event>, tokio::sync::broadcast::Receiver<Event>, u64)> {
        let rt = self.runtime(project_id).await?;
        // Subscribe before reading the backlog so no event published between
        // the backlog read and the subscribe call is lost.
        let live = rt.bus.subscribe();
        let backlog = self.events_since(project_id, cursor).await?;
        let watermark = backlog.last().map(|e| e.seq).unwrap_or(cursor);
        Ok((backlog, live, watermark))
    }
}

async fn append_event_jsonl(path: &Path, event: &Event) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    let mut line = serde_json::to_string(event)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn read_events_jsonl(path: &Path) -> Result<Vec<Event>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = tokio::fs::read_to_string(path).await?;
    let mut out = Vec::new();
    for line in raw.lines() {
        if line.trim().is_empty() {
            continue;
        }
        out.push(serde_json::from_str(line)?);
    }
    Ok(out)
}

/// `depends_on` must be a DAG; a cycle is a hard error at insert time. DFS
/// cycle check in the style of `orchestrator/scheduler.rs`'s `detect_cycle`.
fn validate_acyclic(existing: &[Task], candidate: &Task) -> Result<()> {
    let mut by_id: HashMap<Uuid, &Task> = existing.iter().map(|t| (t.id, t)).collect();
    by_id.insert(candidate.id, candidate);

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();

    fn visit(
        id: Uuid,
        by_id: &HashMap<Uuid, &Task>,
        visiting: &mut HashSet<Uuid>,
        visited: &mut HashSet<Uuid>,
    ) -> std::result::Result<(), ()> {
        if visited.contains(&id) {
            return Ok(());
        }
        if !visiting.insert(id) {
            return Err(());
        }
        if let Some(task) = by_id.get(&id) {
            for dep in &task.depends_on {
                visit(*dep, by_id, visiting, visited)?;
            }
        }
        visiting.remove(&id);
        visited.insert(id);
        Ok(())
    }

    if visit(candidate.id, &by_id, &mut visiting, &mut visited).is_err() {
        return Err(AgentTermError::Conflict(format!(
            "inserting task {} would create a dependency cycle",
            candidate.id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenterm_types::{OrchestratorProfile, Project};

    fn profile() -> OrchestratorProfile {
        OrchestratorProfile {
            provider: "anthropic".to_string(),
            model: "claude".to_string(),
            api_base: "http://localhost".to_string(),
            max_parallel: 2,
        }
    }

    #[tokio::test]
    async fn create_and_get_project_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path()).await.unwrap();
        let project = Project::new("demo", "/tmp/demo", profile());
        store.create_project(&project).await.unwrap();
        let loaded = store.get_project(project.id).await.unwrap();
        assert_eq!(loaded.id, project.id);
        assert_eq!(loaded.name, "demo");
    }

    #[tokio::test]
    async fn task_cycle_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path()).await.unwrap();
        let project = Project::new("demo", "/tmp/demo", profile());
        store.create_project(&project).await.unwrap();

        let mut t1 = Task::new(project.id, "t1", "first");
        let mut t2 = Task::new(project.id, "t2", "second");
        t2.depends_on.push(t1.id);
        store.create_task(&t1).await.unwrap();
        store.create_task(&t2).await.unwrap();

        t1.depends_on.push(t2.id);
        let err = store.create_task(&t1).await;
        // t1 already exists, so this exercises the conflict-on-duplicate path;
        // the cycle check itself is exercised by inserting a fresh node below.
        assert!(err.is_err());

        let mut t3 = Task::new(project.id, "t3", "third");
        t3.depends_on.push(t2.id);
        t3.depends_on.push(t3.id); // self-cycle
        let err = store.create_task(&t3).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn events_have_monotonic_seq_and_exclusive_replay() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path()).await.unwrap();
        let project = Project::new("demo", "/tmp/demo", profile());
        store.create_project(&project).await.unwrap();

        for i in 0..5 {
            store
                .publish(
                    project.id,
                    "project",
                    EventKind::ProjectEvent,
                    serde_json::json!({ "i": i }),
                )
                .await
                .unwrap();
        }

        let all = store.events_since(project.id, 0).await.unwrap();
        assert_eq!(all.len(), 5);
        for pair in all.windows(2) {
            assert!(pair[1].seq > pair[0].seq);
        }

        let since_3 = store.events_since(project.id, 3).await.unwrap();
        assert!(since_3.iter().all(|e| e.seq > 3));
    }

    #[tokio::test]
    async fn single_inflight_command_is_observable() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path()).await.unwrap();
        let project = Project::new("demo", "/tmp/demo", profile());
        store.create_project(&project).await.unwrap();
        let session_id = Uuid::new_v4();

        let mut cmd = Command::new(
            session_id,
            agenterm_types::CommandOp::SendText,
            serde_json::json!({ "text": "echo hi\n" }),
        );
        store.enqueue_command(project.id, &cmd).await.unwrap();
        assert!(!store.has_inflight_command(project.id, session_id).await.unwrap());

        cmd.status = CommandStatus::Sent;
        store.update_command(project.id, &cmd).await.unwrap();
        assert!(store.has_inflight_command(project.id, session_id).await.unwrap());
    }
}
