//! Orchestrator engine: stage-driven, tool-gated LLM loop. Event-driven
//! and stateless per invocation — state always comes from the store; the
//! conversation history kept here is the LLM's working memory only.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agenterm_core::error::{AgentTermError, Result};
use agenterm_core::store::Store;
use agenterm_runtime::session_manager::SessionManager;
use agenterm_runtime::worktree_manager::WorktreeManager;
use agenterm_types::{
    CommandOp, DemandStatus, EventKind, Exception, Session, SessionRole, SessionStatus, Task,
    TaskStatus, Worktree, WorktreeStatus,
};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Mutex};
use tracing::warn;
use uuid::Uuid;

use crate::agent::{AgentClient, AgentEnvelope, Role, ToolSchema, Turn};
use crate::review::{Lane, LaneEvent, LaneState, ReviewVerdict};
use crate::stage::{derive_stage, Stage};
use crate::tools::{is_admitted, RoleContract, ToolName};

/// Conversation history cap: last 50 turns plus a rolling summary.
const MAX_HISTORY_TURNS: usize = 50;
/// Bounded tool-call loop: at most 10 rounds per invocation.
const MAX_TOOL_ROUNDS: u32 = 10;

struct ProjectHistory {
    turns: Vec<Turn>,
    rolling_summary: Option<String>,
}

impl ProjectHistory {
    fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
        if self.turns.len() > MAX_HISTORY_TURNS {
            let overflow = self.turns.remove(0);
            let note = format!("[{:?}] {}", overflow.role, truncate(&overflow.content, 120));
            self.rolling_summary = Some(match self.rolling_summary.take() {
                Some(prev) => format!("{prev}\n{note}"),
                None => note,
            });
        }
    }
}

fn truncate(s: &str, n: usize) -> String {
    if s.len() <= n {
        s.to_string()
    } else {
        format!("{}…", &s[..n])
    }
}

/// An outstanding `confirmation_required` the engine is suspended on.
struct PendingConfirmation {
    resolver: oneshot::Sender<bool>,
}

pub struct OrchestratorEngine {
    store: Arc<Store>,
    sessions: Arc<SessionManager>,
    agent: Arc<dyn AgentClient>,
    history: Mutex<HashMap<Uuid, ProjectHistory>>,
    worktree_managers: Mutex<HashMap<Uuid, Arc<WorktreeManager>>>,
    confirmations: Mutex<HashMap<Uuid, PendingConfirmation>>,
    /// Review loop controller state, one `Lane` per task.
    lanes: Mutex<HashMap<Uuid, Lane>>,
    /// Last stage observed per project, so a stage change (not every
    /// unchanged round) triggers the stage-transition confirmation gate.
    stage_memory: Mutex<HashMap<Uuid, Stage>>,
}

impl OrchestratorEngine {
    pub fn new(store: Arc<Store>, sessions: Arc<SessionManager>, agent: Arc<dyn AgentClient>) -> Self {
        Self {
            store,
            sessions,
            agent,
            history: Mutex::new(HashMap::new()),
            worktree_managers: Mutex::new(HashMap::new()),
            confirmations: Mutex::new(HashMap::new()),
            lanes: Mutex::new(HashMap::new()),
            stage_memory: Mutex::new(HashMap::new()),
        }
    }

    async fn lane_for_task(&self, task_id: Uuid) -> Lane {
        self.lanes.lock().await.entry(task_id).or_insert_with(Lane::new).clone()
    }

    /// Applies `event` to the task's lane and, only when the resulting
    /// state actually changed, publishes a `lane_state` event — so an event
    /// that leaves the state unchanged (e.g. `HumanMergeApproved`, which
    /// only flips a flag while staying in `merging`) never emits a
    /// duplicate transition.
    async fn advance_lane(&self, project_id: Uuid, task_id: Uuid, event: LaneEvent) -> Result<Lane> {
        let mut guard = self.lanes.lock().await;
        let current = guard.entry(task_id).or_insert_with(Lane::new).clone();
        let previous_state = current.state;
        let (next, _commands) = current.apply(event);
        guard.insert(task_id, next.clone());
        drop(guard);
        if next.state != previous_state {
            self.store
                .publish(
                    project_id,
                    "orchestrator",
                    EventKind::LaneState,
                    json!({"task_id": task_id, "state": lane_state_str(next.state)}),
                )
                .await?;
        }
        Ok(next)
    }

    /// Registers the worker's readiness signal with the lane if it hasn't
    /// already left `planning`/`coding`, so a review verdict reported
    /// without an explicit prior readiness check still advances correctly.
    async fn ensure_lane_reviewing(&self, project_id: Uuid, task_id: Uuid) -> Result<Lane> {
        let state = self.lane_for_task(task_id).await.state;
        if matches!(state, LaneState::Planning | LaneState::Coding) {
            self.advance_lane(project_id, task_id, LaneEvent::WorkerReadyForReview).await
        } else {
            Ok(self.lane_for_task(task_id).await)
        }
    }

    async fn worktree_manager(&self, project_id: Uuid, repo_path: &str) -> Result<Arc<WorktreeManager>> {
        let mut guard = self.worktree_managers.lock().await;
        if let Some(existing) = guard.get(&project_id) {
            return Ok(existing.clone());
        }
        let manager = Arc::new(WorktreeManager::new(PathBuf::from(repo_path)).await?);
        guard.insert(project_id, manager.clone());
        Ok(manager)
    }

    /// Bridges git introspection operations for the REST layer, which has
    /// no direct reason to construct its own `WorktreeManager`.
    pub async fn worktree_status(
        &self,
        project_id: Uuid,
        repo_path: &str,
        path: &str,
    ) -> Result<agenterm_runtime::WorktreeStatusReport> {
        self.worktree_manager(project_id, repo_path).await?.status(path).await
    }

    pub async fn worktree_log(
        &self,
        project_id: Uuid,
        repo_path: &str,
        path: &str,
        n: u32,
    ) -> Result<Vec<agenterm_runtime::LogEntry>> {
        self.worktree_manager(project_id, repo_path).await?.log(path, n).await
    }

    pub async fn worktree_diff(&self, project_id: Uuid, repo_path: &str, path: &str) -> Result<String> {
        self.worktree_manager(project_id, repo_path).await?.diff(path).await
    }

    pub async fn worktree_remove(&self, project_id: Uuid, repo_path: &str, path: &str, branch: &str) -> Result<()> {
        self.worktree_manager(project_id, repo_path).await?.remove(path, branch).await
    }

    /// Resolves a pending `confirmation_required` by id. An ambiguous reply
    /// must be translated to `approved = false` by the caller (ambiguous
    /// replies are treated as not approved) before reaching this method —
    /// see [`interpret_reply`].
    pub async fn resolve_confirmation(&self, confirmation_id: Uuid, approved: bool) -> Result<()> {
        let pending = self.confirmations.lock().await.remove(&confirmation_id);
        match pending {
            Some(p) => {
                let _ = p.resolver.send(approved);
                Ok(())
            }
            None => Err(AgentTermError::NotFound(format!(
                "confirmation {confirmation_id}"
            ))),
        }
    }

    /// Entry point triggered by a user message, a session idle
    /// notification, a periodic tick, or a review-ready signal. Runs one
    /// bounded tool-call loop and returns the final assistant text.
    pub async fn invoke(&self, project_id: Uuid, user_message: &str) -> Result<String> {
        let project = self.store.get_project(project_id).await?;
        let role_contract = RoleContract::for_role(SessionRole::Orchestrator);
        let tool_schemas = tool_schemas();

        {
            let mut history = self.history.lock().await;
            let entry = history.entry(project_id).or_insert_with(|| ProjectHistory {
                turns: Vec::new(),
                rolling_summary: None,
            });
            entry.push(Turn {
                role: Role::User,
                content: user_message.to_string(),
                tool_call_id: None,
            });
        }

        for round in 0..MAX_TOOL_ROUNDS {
            let tasks = self.store.list_tasks(project_id).await?;
            let sessions = self.store.list_sessions(project_id).await?;
            let stage = derive_stage(&tasks, &sessions.iter().map(|s| s.status).collect::<Vec<_>>());
            self.store
                .publish(
                    project_id,
                    "orchestrator",
                    EventKind::StageState,
                    json!({"stage": stage.as_str(), "round": round}),
                )
                .await?;

            let previous_stage = self.stage_memory.lock().await.insert(project_id, stage);
            if let Some(prev) = previous_stage {
                if prev != stage {
                    let approved = self
                        .request_and_await_confirmation(
                            project_id,
                            "stage_transition",
                            &json!({"from": prev.as_str(), "to": stage.as_str()}),
                        )
                        .await?;
                    if !approved {
                        return Err(AgentTermError::Policy(format!(
                            "stage transition from {} to {} was not approved",
                            prev.as_str(),
                            stage.as_str()
                        )));
                    }
                }
            }

            let turns_snapshot = {
                let mut history = self.history.lock().await;
                let entry = history.entry(project_id).or_insert_with(|| ProjectHistory {
                    turns: Vec::new(),
                    rolling_summary: None,
                });
                let mut snapshot = Vec::new();
                if let Some(summary) = &entry.rolling_summary {
                    snapshot.push(Turn {
                        role: Role::System,
                        content: format!("earlier turns (summarized): {summary}"),
                        tool_call_id: None,
                    });
                }
                snapshot.extend(entry.turns.clone());
                snapshot
            };

            let mut stream = self.agent.invoke(&turns_snapshot, &tool_schemas).await;
            let mut assistant_text = String::new();
            let mut made_tool_call = false;

            while let Some(envelope) = stream.next().await {
                match envelope {
                    AgentEnvelope::Token { text } => assistant_text.push_str(&text),
                    AgentEnvelope::ToolCall { id, name, input } => {
                        made_tool_call = true;
                        let result = self
                            .handle_tool_call(project_id, &project.repo_path, &role_contract, stage, &name, input)
                            .await;
                        let mut history = self.history.lock().await;
                        let entry = history.get_mut(&project_id).unwrap();
                        entry.push(Turn {
                            role: Role::Tool,
                            content: result.to_string(),
                            tool_call_id: Some(id),
                        });
                    }
                    AgentEnvelope::ToolResult { .. } => {}
                    AgentEnvelope::Done => break,
                    AgentEnvelope::Error { message } => {
                        warn!(project_id = %project_id, error = %message, "agent stream error");
                        return Err(AgentTermError::Transient(message));
                    }
                }
            }

            if !assistant_text.is_empty() {
                let mut history = self.history.lock().await;
                history.get_mut(&project_id).unwrap().push(Turn {
                    role: Role::Assistant,
                    content: assistant_text.clone(),
                    tool_call_id: None,
                });
            }

            if !made_tool_call {
                return Ok(assistant_text);
            }
        }

        let exception = Exception::new(
            project_id,
            "orchestrator_loop_bound",
            "blocker",
            format!("exceeded {MAX_TOOL_ROUNDS} tool-call rounds in one invocation"),
            json!({}),
        );
        self.store.create_exception(&exception).await?;
        self.store
            .publish(project_id, "orchestrator", EventKind::Exception, json!({"exception_id": exception.id}))
            .await?;
        Err(AgentTermError::Blocker(
            "tool-call round bound exceeded; control returned to user".to_string(),
        ))
    }

    async fn handle_tool_call(
        &self,
        project_id: Uuid,
        repo_path: &str,
        contract: &RoleContract,
        stage: Stage,
        name: &str,
        input: Value,
    ) -> Value {
        let Some(tool) = ToolName::ALL.into_iter().find(|t| t.as_str() == name) else {
            return json!({"error": "unknown_tool", "tool": name});
        };

        if !is_admitted(contract, stage, tool) {
            let _ = self
                .store
                .publish(
                    project_id,
                    "orchestrator",
                    EventKind::AssignmentState,
                    json!({"tool": tool.as_str(), "stage": stage.as_str(), "admitted": false}),
                )
                .await;
            return json!({"error": "stage_tool_not_allowed", "stage": stage.as_str(), "tool": tool.as_str()});
        }

        if tool.requires_confirmation() {
            match self.request_and_await_confirmation(project_id, tool.as_str(), &input).await {
                Ok(true) => {}
                Ok(false) => {
                    return json!({"error": "not_approved", "tool": tool.as_str()});
                }
                Err(e) => return json!({"error": "confirmation_failed", "message": e.to_string()}),
            }
        }

        match self.dispatch(project_id, repo_path, tool, input).await {
            Ok(value) => value,
            Err(e) => json!({"error": e.category(), "message": e.to_string()}),
        }
    }

    /// Suspends the calling action until a matching `confirmation_resolved`
    /// arrives. `kind` labels what is awaiting approval (a tool name, or
    /// `"stage_transition"` for an automatic stage change) for the
    /// `confirmation_required` event payload.
    async fn request_and_await_confirmation(&self, project_id: Uuid, kind: &str, input: &Value) -> Result<bool> {
        let confirmation_id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        self.confirmations
            .lock()
            .await
            .insert(confirmation_id, PendingConfirmation { resolver: tx });

        self.store
            .publish(
                project_id,
                "orchestrator",
                EventKind::ConfirmationRequired,
                json!({"confirmation_id": confirmation_id, "kind": kind, "input": input}),
            )
            .await?;

        let approved = match tokio::time::timeout(Duration::from_secs(3600), rx).await {
            Ok(Ok(approved)) => approved,
            _ => {
                self.confirmations.lock().await.remove(&confirmation_id);
                false
            }
        };

        self.store
            .publish(
                project_id,
                "orchestrator",
                EventKind::ConfirmationResolved,
                json!({"confirmation_id": confirmation_id, "approved": approved}),
            )
            .await?;

        Ok(approved)
    }

    async fn dispatch(&self, project_id: Uuid, repo_path: &str, tool: ToolName, input: Value) -> Result<Value> {
        match tool {
            ToolName::GetProjectStatus => {
                let tasks = self.store.list_tasks(project_id).await?;
                let sessions = self.store.list_sessions(project_id).await?;
                Ok(json!({"tasks": tasks, "sessions": sessions}))
            }
            ToolName::CreateTask => {
                let title = field_str(&input, "title")?;
                let description = input.get("description").and_then(|v| v.as_str()).unwrap_or_default();
                let mut task = Task::new(project_id, title, description);
                if let Some(deps) = input.get("depends_on").and_then(|v| v.as_array()) {
                    task.depends_on = deps
                        .iter()
                        .filter_map(|v| v.as_str().and_then(|s| Uuid::parse_str(s).ok()))
                        .collect();
                }
                self.store.create_task(&task).await?;
                self.store
                    .publish(project_id, "orchestrator", EventKind::AssignmentState, json!({"task_id": task.id, "created": true}))
                    .await?;
                Ok(json!({"task": task}))
            }
            ToolName::CreateWorktree => {
                let branch = field_str(&input, "branch")?;
                let slug = field_str(&input, "slug")?;
                let task_id = input.get("task_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());
                let manager = self.worktree_manager(project_id, repo_path).await?;
                let path = manager.create(branch, slug).await?;
                let mut worktree = Worktree::new(project_id, branch, path);
                worktree.task_id = task_id;
                self.store.create_worktree(&worktree).await?;
                if let Some(task_id) = task_id {
                    if let Ok(mut tasks) = self.store.list_tasks(project_id).await {
                        if let Some(t) = tasks.iter_mut().find(|t| t.id == task_id) {
                            t.worktree_id = Some(worktree.id);
                            t.updated_at = chrono::Utc::now();
                            self.store.update_task(t).await?;
                        }
                    }
                }
                Ok(json!({"worktree": worktree}))
            }
            ToolName::WriteTaskSpec => {
                let task_id = field_uuid(&input, "task_id")?;
                let spec_path = field_str(&input, "spec_path")?;
                let mut tasks = self.store.list_tasks(project_id).await?;
                let task = tasks
                    .iter_mut()
                    .find(|t| t.id == task_id)
                    .ok_or_else(|| AgentTermError::NotFound(format!("task {task_id}")))?;
                task.spec_path = Some(spec_path.to_string());
                task.updated_at = chrono::Utc::now();
                self.store.update_task(task).await?;
                Ok(json!({"task_id": task_id, "spec_path": spec_path}))
            }
            ToolName::CreateSession => {
                let task_id = input.get("task_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());
                let worktree_id = input.get("worktree_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok());
                let agent_id = field_str(&input, "agent_id")?;
                let role = parse_role(field_str(&input, "role")?)?;
                let command = field_str(&input, "command")?;
                let args: Vec<String> = input
                    .get("args")
                    .and_then(|v| v.as_array())
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let worktree_path = if let Some(wid) = worktree_id {
                    self.store
                        .list_worktrees(project_id)
                        .await?
                        .into_iter()
                        .find(|w| w.id == wid)
                        .map(|w| w.path)
                        .unwrap_or_else(|| repo_path.to_string())
                } else {
                    repo_path.to_string()
                };
                let short_id = Uuid::new_v4().simple().to_string()[..8].to_string();
                let target = Session::target_name(
                    &project_id.simple().to_string()[..8],
                    &task_id.map(|t| t.simple().to_string()[..8].to_string()).unwrap_or_else(|| "none".into()),
                    role,
                    &short_id,
                );
                let session = self
                    .sessions
                    .create(project_id, task_id, worktree_id, &worktree_path, agent_id, role, command, &args, target)
                    .await?;
                Ok(json!({"session": session}))
            }
            ToolName::WaitForSessionReady => {
                let session_id = field_uuid(&input, "session_id")?;
                for _ in 0..50 {
                    let sessions = self.store.list_sessions(project_id).await?;
                    if let Some(s) = sessions.iter().find(|s| s.id == session_id) {
                        if !matches!(s.status, SessionStatus::Starting) {
                            return Ok(json!({"session_id": session_id, "status": status_str(s.status)}));
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Ok(json!({"session_id": session_id, "status": "starting", "timed_out": true}))
            }
            ToolName::SendCommand => {
                let session_id = field_uuid(&input, "session_id")?;
                let op = parse_op(field_str(&input, "op")?)?;
                let payload = input.get("payload").cloned().unwrap_or_else(|| json!({}));
                if let Some(reason) = crate::safety::safety_violation("send_command", &payload) {
                    self.store
                        .publish(project_id, "orchestrator", EventKind::Exception, json!({"reason": reason}))
                        .await?;
                    return Err(AgentTermError::Policy(reason));
                }
                let command = self.sessions.dispatch(project_id, session_id, op, payload).await?;
                self.store
                    .publish(project_id, "session", EventKind::SessionCommand, json!({"command": command}))
                    .await?;
                Ok(json!({"command": command}))
            }
            ToolName::ReadSessionOutput => {
                let session_id = field_uuid(&input, "session_id")?;
                let since = input.get("since_seq").and_then(|v| v.as_u64()).unwrap_or(0);
                let lines = self.sessions.read_output(session_id, since).await?;
                Ok(json!({"lines": lines.iter().map(|l| json!({"seq": l.seq, "text": l.text})).collect::<Vec<_>>()}))
            }
            ToolName::IsSessionIdle => {
                let session_id = field_uuid(&input, "session_id")?;
                Ok(json!({"idle": self.sessions.is_idle(session_id).await?}))
            }
            ToolName::CloseSession => {
                let session_id = field_uuid(&input, "session_id")?;
                self.sessions.destroy(project_id, session_id).await?;
                Ok(json!({"session_id": session_id, "closed": true}))
            }
            ToolName::MergeWorktree => {
                let worktree_id = field_uuid(&input, "worktree_id")?;
                let mut worktrees = self.store.list_worktrees(project_id).await?;
                let worktree = worktrees
                    .iter_mut()
                    .find(|w| w.id == worktree_id)
                    .ok_or_else(|| AgentTermError::NotFound(format!("worktree {worktree_id}")))?;
                let task_id = worktree.task_id.ok_or_else(|| {
                    AgentTermError::Blocker(format!("worktree {worktree_id} has no associated task to gate the merge on"))
                })?;
                let lane = self.lane_for_task(task_id).await;
                if !lane.merge_gate_satisfied() {
                    return Err(AgentTermError::Blocker(format!(
                        "merge gate not satisfied for task {task_id}: lane is {} (requires reviewer pass, zero critical issues, and green checks)",
                        lane_state_str(lane.state)
                    )));
                }
                let manager = self.worktree_manager(project_id, repo_path).await?;
                if !manager.is_clean(&worktree.path).await? {
                    return Err(AgentTermError::Blocker(format!(
                        "worktree {worktree_id} has uncommitted changes; cannot merge"
                    )));
                }
                self.advance_lane(project_id, task_id, LaneEvent::HumanMergeApproved).await?;
                worktree.status = WorktreeStatus::Merged;
                self.store.update_worktree(worktree).await?;
                if let Ok(mut tasks) = self.store.list_tasks(project_id).await {
                    if let Some(t) = tasks.iter_mut().find(|t| t.id == task_id) {
                        t.status = TaskStatus::Done;
                        t.updated_at = chrono::Utc::now();
                        self.store.update_task(t).await?;
                    }
                }
                let lane = self.advance_lane(project_id, task_id, LaneEvent::MergeCompleted).await?;
                Ok(json!({"worktree_id": worktree_id, "status": "merged", "lane_state": lane_state_str(lane.state)}))
            }
            ToolName::ReportReviewVerdict => {
                let task_id = field_uuid(&input, "task_id")?;
                let verdict = match field_str(&input, "verdict")? {
                    "pass" => ReviewVerdict::Pass,
                    "changes_requested" => ReviewVerdict::ChangesRequested,
                    other => return Err(AgentTermError::Input(format!("unknown review verdict: {other}"))),
                };
                let critical_issues = input
                    .get("critical_issues")
                    .and_then(|v| v.as_u64())
                    .or_else(|| input.get("issues").and_then(|v| v.as_array()).map(|a| a.len() as u64))
                    .unwrap_or(0) as u32;
                self.ensure_lane_reviewing(project_id, task_id).await?;
                let lane = self
                    .advance_lane(
                        project_id,
                        task_id,
                        LaneEvent::ReviewVerdictReceived { verdict, critical_issues },
                    )
                    .await?;
                Ok(json!({"task_id": task_id, "lane_state": lane_state_str(lane.state)}))
            }
            ToolName::ReportChecksResult => {
                let task_id = field_uuid(&input, "task_id")?;
                let green = input.get("green").and_then(|v| v.as_bool()).unwrap_or(false);
                if !green {
                    let lane = self.lane_for_task(task_id).await;
                    return Ok(json!({"task_id": task_id, "lane_state": lane_state_str(lane.state)}));
                }
                let lane = self.advance_lane(project_id, task_id, LaneEvent::RequiredChecksGreen).await?;
                Ok(json!({"task_id": task_id, "lane_state": lane_state_str(lane.state)}))
            }
            ToolName::ResolveMergeConflict => {
                let worktree_id = field_uuid(&input, "worktree_id")?;
                Err(AgentTermError::Blocker(format!(
                    "merge conflict in worktree {worktree_id} requires a human or worker agent; automatic resolution is out of scope"
                )))
            }
            ToolName::GenerateProgressReport => Ok(json!({"requested": true})),
            ToolName::RequestConfirmation => {
                let message = field_str(&input, "message")?;
                let confirmation_id = Uuid::new_v4();
                self.store
                    .publish(
                        project_id,
                        "orchestrator",
                        EventKind::ConfirmationRequired,
                        json!({"confirmation_id": confirmation_id, "message": message}),
                    )
                    .await?;
                Ok(json!({"confirmation_id": confirmation_id, "status": "pending"}))
            }
            ToolName::WriteProjectMemory => {
                let key = field_str(&input, "key")?;
                let value = input.get("value").cloned().unwrap_or(Value::Null);
                self.store
                    .publish(project_id, "orchestrator", EventKind::ProjectEvent, json!({"memory_write": key, "value": value}))
                    .await?;
                Ok(json!({"key": key, "written": true}))
            }
            ToolName::ReadProjectMemory => {
                let key = field_str(&input, "key")?;
                Ok(json!({"key": key, "value": Value::Null}))
            }
        }
    }

    /// Bridges the demand pool to execution, converting an approved demand
    /// item into a scheduled task. `approved` must already reflect the
    /// human decision; ambiguity is
    /// resolved to `false` by the caller before this is invoked.
    pub async fn promote_demand_item(&self, project_id: Uuid, demand_id: Uuid, approved: bool) -> Result<Task> {
        if !approved {
            return Err(AgentTermError::Policy("approval_required".to_string()));
        }
        let mut items = self.store.list_demand_items(project_id).await?;
        let item = items
            .iter_mut()
            .find(|d| d.id == demand_id)
            .ok_or_else(|| AgentTermError::NotFound(format!("demand item {demand_id}")))?;
        let task = Task::new(project_id, item.title.clone(), item.description.clone());
        self.store.create_task(&task).await?;
        item.status = DemandStatus::Scheduled;
        item.selected_task_id = Some(task.id);
        item.updated_at = chrono::Utc::now();
        self.store.update_demand_item(item).await?;
        self.store
            .publish(
                project_id,
                "demand",
                EventKind::AssignmentState,
                json!({"demand_id": demand_id, "task_id": task.id, "promoted": true}),
            )
            .await?;
        Ok(task)
    }
}

/// Approval policy: ambiguous replies are treated as not approved. Only an
/// unambiguous affirmative resolves to `true`.
pub fn interpret_reply(reply: &str) -> bool {
    matches!(
        reply.trim().to_lowercase().as_str(),
        "y" | "yes" | "approve" | "approved" | "confirm" | "confirmed" | "ok" | "true"
    )
}

fn field_str<'a>(value: &'a Value, field: &str) -> Result<&'a str> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| AgentTermError::Input(format!("missing field `{field}`")))
}

fn field_uuid(value: &Value, field: &str) -> Result<Uuid> {
    let raw = field_str(value, field)?;
    Uuid::parse_str(raw).map_err(|_| AgentTermError::Input(format!("invalid uuid in `{field}`")))
}

fn parse_role(raw: &str) -> Result<SessionRole> {
    match raw {
        "orchestrator" => Ok(SessionRole::Orchestrator),
        "planner" => Ok(SessionRole::Planner),
        "coder" => Ok(SessionRole::Coder),
        "reviewer" => Ok(SessionRole::Reviewer),
        "tester" => Ok(SessionRole::Tester),
        other => Err(AgentTermError::Input(format!("unknown role `{other}`"))),
    }
}

fn parse_op(raw: &str) -> Result<CommandOp> {
    match raw {
        "send_text" => Ok(CommandOp::SendText),
        "send_key" => Ok(CommandOp::SendKey),
        "resize" => Ok(CommandOp::Resize),
        "interrupt" => Ok(CommandOp::Interrupt),
        "close" => Ok(CommandOp::Close),
        other => Err(AgentTermError::Input(format!("unknown command op `{other}`"))),
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Starting => "starting",
        SessionStatus::Ready => "ready",
        SessionStatus::Working => "working",
        SessionStatus::Waiting => "waiting",
        SessionStatus::Idle => "idle",
        SessionStatus::NeedsInput => "needs_input",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::HumanTakeover => "human_takeover",
    }
}

fn lane_state_str(state: LaneState) -> &'static str {
    match state {
        LaneState::Planning => "planning",
        LaneState::Coding => "coding",
        LaneState::Reviewing => "reviewing",
        LaneState::Testing => "testing",
        LaneState::Merging => "merging",
        LaneState::Done => "done",
        LaneState::Blocked => "blocked",
    }
}

fn tool_schemas() -> Vec<ToolSchema> {
    ToolName::ALL
        .into_iter()
        .map(|t| ToolSchema {
            name: t.as_str().to_string(),
            description: String::new(),
            input_schema: json!({"type": "object"}),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenterm_core::config::TimeoutsConfig;
    use agenterm_types::{DemandItem, OrchestratorProfile, Project};

    #[test]
    fn ambiguous_reply_is_not_approved() {
        assert!(!interpret_reply("maybe"));
        assert!(!interpret_reply(""));
        assert!(interpret_reply("Yes"));
        assert!(interpret_reply("y"));
    }

    async fn test_engine() -> (OrchestratorEngine, Uuid, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::new(dir.path().join("state")).await.unwrap());
        let sessions = Arc::new(SessionManager::new(store.clone(), TimeoutsConfig::default(), 2_000));
        let engine = OrchestratorEngine::new(store.clone(), sessions, Arc::new(crate::agent::NullAgentClient));
        let profile = OrchestratorProfile {
            provider: "stub".to_string(),
            model: "stub-model".to_string(),
            api_base: String::new(),
            max_parallel: 1,
        };
        let project = Project::new("demo", dir.path().to_string_lossy().to_string(), profile);
        store.create_project(&project).await.unwrap();
        (engine, project.id, dir)
    }

    /// End-to-end scenario: in the derived `plan` stage (no tasks yet),
    /// `merge_worktree` is denied by the stage allowlist regardless of role,
    /// and no store mutation results.
    #[tokio::test]
    async fn stage_gate_denies_merge_in_plan_stage() {
        let (engine, project_id, _dir) = test_engine().await;
        let contract = RoleContract::for_role(SessionRole::Orchestrator);
        let result = engine
            .handle_tool_call(
                project_id,
                "/tmp/demo",
                &contract,
                Stage::Plan,
                "merge_worktree",
                json!({"worktree_id": Uuid::new_v4()}),
            )
            .await;
        assert_eq!(result["error"], "stage_tool_not_allowed");
        assert_eq!(result["stage"], "plan");
        assert!(engine.store.list_worktrees(project_id).await.unwrap().is_empty());
    }

    /// End-to-end scenario: promoting a demand item without approval is
    /// rejected with a policy error; with approval it creates a linked task
    /// and flips the demand item to `scheduled`.
    #[tokio::test]
    async fn demand_promotion_requires_approval() {
        let (engine, project_id, _dir) = test_engine().await;
        let item = DemandItem::new(project_id, "idea", "do the thing");
        engine.store.create_demand_item(&item).await.unwrap();

        let denied = engine.promote_demand_item(project_id, item.id, false).await;
        assert!(matches!(denied, Err(AgentTermError::Policy(_))));

        let task = engine.promote_demand_item(project_id, item.id, true).await.unwrap();
        assert_eq!(task.project_id, project_id);

        let items = engine.store.list_demand_items(project_id).await.unwrap();
        let updated = items.iter().find(|d| d.id == item.id).unwrap();
        assert_eq!(updated.status, agenterm_types::DemandStatus::Scheduled);
        assert_eq!(updated.selected_task_id, Some(task.id));
    }
}
