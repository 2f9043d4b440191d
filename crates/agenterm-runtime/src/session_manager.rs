//! Session manager: owns the mapping from a `Session` entity to its live
//! `TerminalGateway` process, drives the command queue state machine, and
//! enforces the human-takeover lock. One instance per running engine,
//! shared across all projects.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use agenterm_core::config::TimeoutsConfig;
use agenterm_core::error::{AgentTermError, Result};
use agenterm_core::store::Store;
use agenterm_types::{
    Command, CommandOp, CommandStatus, EventKind, Exception, Session, SessionRole, SessionStatus,
};
use serde_json::json;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::gateway::{GatewayError, OutputChunk, TerminalGateway};
use crate::queue::{backoff_delay, decide, QueueDecision, QueueTimeouts};
use crate::scrollback::ScrollbackLine;

impl From<GatewayError> for AgentTermError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound(id) => AgentTermError::NotFound(format!("session {id}")),
            GatewayError::ReadinessTimeout(id) => {
                AgentTermError::Transient(format!("session {id} readiness timeout"))
            }
            GatewayError::Spawn(e) => AgentTermError::Fatal(e.to_string()),
        }
    }
}

pub struct SessionManager {
    store: Arc<Store>,
    gateway: Arc<TerminalGateway>,
    timeouts: TimeoutsConfig,
    queue_timeouts: QueueTimeouts,
    inflight: RwLock<HashMap<Uuid, Instant>>,
    session_projects: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, timeouts: TimeoutsConfig, scrollback_lines: usize) -> Self {
        let (output_tx, output_rx) = tokio::sync::mpsc::unbounded_channel::<OutputChunk>();
        let session_projects = Arc::new(RwLock::new(HashMap::new()));
        spawn_output_forwarder(store.clone(), session_projects.clone(), output_rx);
        Self {
            gateway: Arc::new(TerminalGateway::new(timeouts.clone(), scrollback_lines, output_tx)),
            store,
            queue_timeouts: QueueTimeouts {
                t_ack: Duration::from_millis(timeouts.command_ack_ms),
                t_complete: Duration::from_millis(timeouts.command_complete_ms),
            },
            timeouts,
            inflight: RwLock::new(HashMap::new()),
            session_projects,
        }
    }

    /// Spawns a session's backing process, records it, and waits for
    /// readiness in the background. Returns as soon as the `Session` row
    /// exists with status `starting`; callers poll status or subscribe to
    /// events to observe `ready`.
    pub async fn create(
        &self,
        project_id: Uuid,
        task_id: Option<Uuid>,
        worktree_id: Option<Uuid>,
        worktree_path: &str,
        agent_id: &str,
        role: SessionRole,
        command: &str,
        args: &[String],
        multiplexer_target: String,
    ) -> Result<Session> {
        let id = self
            .gateway
            .spawn(command, args, std::path::Path::new(worktree_path))
            .await?;
        self.session_projects.write().await.insert(id, project_id);

        let session = Session {
            id,
            project_id,
            task_id,
            worktree_id,
            multiplexer_target,
            agent_id: agent_id.to_string(),
            role,
            status: SessionStatus::Starting,
            human_attached: false,
            created_at: chrono::Utc::now(),
            last_activity_at: chrono::Utc::now(),
        };
        self.store.create_session(&session).await?;

        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let readiness_timeout = self.timeouts.readiness_timeout_ms;
        tokio::spawn(async move {
            match gateway.await_ready(id).await {
                Ok(()) => {
                    if let Ok(mut sessions) = store.list_sessions(project_id).await {
                        if let Some(s) = sessions.iter_mut().find(|s| s.id == id) {
                            s.status = SessionStatus::Ready;
                            s.last_activity_at = chrono::Utc::now();
                            let _ = store.update_session(s).await;
                            let _ = store
                                .publish(
                                    project_id,
                                    "session",
                                    EventKind::RunState,
                                    json!({"session_id": id, "status": "ready"}),
                                )
                                .await;
                        }
                    }
                }
                Err(_) => {
                    let exception = Exception::new(
                        project_id,
                        "readiness_timeout",
                        "blocker",
                        format!("session {id} did not become ready within {readiness_timeout}ms"),
                        json!({"session_id": id}),
                    );
                    let _ = store.create_exception(&exception).await;
                    let _ = store
                        .publish(
                            project_id,
                            "session",
                            EventKind::Exception,
                            json!({"session_id": id, "exception_id": exception.id}),
                        )
                        .await;
                }
            }
        });

        Ok(session)
    }

    /// Enforces the single-inflight-command-per-session invariant, enqueues
    /// the command, and drives it through the queue state machine in a
    /// background task until it completes, fails, or times out.
    pub async fn dispatch(&self, project_id: Uuid, session_id: Uuid, op: CommandOp, payload: serde_json::Value) -> Result<Command> {
        let session = self
            .store
            .list_sessions(project_id)
            .await?
            .into_iter()
            .find(|s| s.id == session_id)
            .ok_or_else(|| AgentTermError::NotFound(format!("session {session_id}")))?;

        if session.human_attached && !matches!(op, CommandOp::Interrupt) {
            return Err(AgentTermError::Policy(
                "session is under human takeover; agent commands are blocked".to_string(),
            ));
        }

        let mut command = Command::new(session_id, op, payload);
        self.store
            .enqueue_command_if_no_inflight(project_id, &command)
            .await?;
        command.status = CommandStatus::Sent;
        self.issue(&command).await?;
        command.issued_at = chrono::Utc::now();
        self.store.update_command(project_id, &command).await?;

        let store = self.store.clone();
        let gateway = self.gateway.clone();
        let queue_timeouts = QueueTimeouts {
            t_ack: self.queue_timeouts.t_ack,
            t_complete: self.queue_timeouts.t_complete,
        };
        let mut command = command.clone();
        tokio::spawn(async move {
            drive_command(store, gateway, project_id, session_id, &mut command, &queue_timeouts).await;
        });

        Ok(command)
    }

    async fn issue(&self, command: &Command) -> Result<()> {
        match command.op {
            CommandOp::SendText => {
                let text = command
                    .payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                self.gateway.send_text(command.session_id, text).await?;
            }
            CommandOp::SendKey => {
                let key = command
                    .payload
                    .get("key")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                self.gateway.send_key(command.session_id, key).await?;
            }
            CommandOp::Resize => {
                let cols = command.payload.get("cols").and_then(|v| v.as_u64()).unwrap_or(80) as u16;
                let rows = command.payload.get("rows").and_then(|v| v.as_u64()).unwrap_or(24) as u16;
                self.gateway.resize(command.session_id, cols, rows).await?;
            }
            CommandOp::Interrupt => {
                self.gateway.interrupt(command.session_id).await?;
            }
            CommandOp::Close => {
                self.gateway.close(command.session_id).await?;
            }
        }
        Ok(())
    }

    pub async fn read_output(&self, session_id: Uuid, since: u64) -> Result<Vec<ScrollbackLine>> {
        Ok(self.gateway.read_since(session_id, since).await?)
    }

    pub async fn is_idle(&self, session_id: Uuid) -> Result<bool> {
        Ok(matches!(self.gateway.status(session_id).await?, SessionStatus::Idle))
    }

    /// Sets or clears the human-takeover lock. While set, only `interrupt`
    /// commands may be dispatched to this session.
    pub async fn set_takeover(&self, project_id: Uuid, session_id: Uuid, attached: bool) -> Result<()> {
        let mut sessions = self.store.list_sessions(project_id).await?;
        let session = sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| AgentTermError::NotFound(format!("session {session_id}")))?;
        session.human_attached = attached;
        session.status = if attached {
            SessionStatus::HumanTakeover
        } else {
            SessionStatus::Ready
        };
        session.last_activity_at = chrono::Utc::now();
        self.store.update_session(session).await?;
        self.store
            .publish(
                project_id,
                "session",
                EventKind::RunState,
                json!({"session_id": session_id, "human_attached": attached}),
            )
            .await?;
        Ok(())
    }

    pub async fn destroy(&self, project_id: Uuid, session_id: Uuid) -> Result<()> {
        self.gateway.close(session_id).await?;
        let mut sessions = self.store.list_sessions(project_id).await?;
        if let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) {
            session.status = SessionStatus::Completed;
            self.store.update_session(session).await?;
        }
        self.session_projects.write().await.remove(&session_id);
        Ok(())
    }

    /// Periodic sweep (spawned by the composition root): reclassifies every
    /// tracked session's idle/working/needs-input status and persists
    /// transitions. One tick covers all projects' sessions.
    pub async fn reclassify_all(&self, project_id: Uuid) -> Result<()> {
        let mut sessions = self.store.list_sessions(project_id).await?;
        for session in sessions.iter_mut() {
            if matches!(session.status, SessionStatus::Completed | SessionStatus::Failed | SessionStatus::HumanTakeover) {
                continue;
            }
            let next = self.gateway.reclassify(session.id).await?;
            if next != session.status {
                session.status = next;
                session.last_activity_at = chrono::Utc::now();
                self.store.update_session(session).await?;
                self.store
                    .publish(
                        project_id,
                        "session",
                        EventKind::RunState,
                        json!({"session_id": session.id, "status": status_label(next)}),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}

/// Forwards every flushed gateway output chunk to its owning project's
/// event log as a `session_output` event, so terminal output becomes
/// observable on the event bus within a flush interval.
fn spawn_output_forwarder(
    store: Arc<Store>,
    session_projects: Arc<RwLock<HashMap<Uuid, Uuid>>>,
    mut output_rx: mpsc::UnboundedReceiver<OutputChunk>,
) {
    tokio::spawn(async move {
        while let Some(chunk) = output_rx.recv().await {
            let project_id = match session_projects.read().await.get(&chunk.session_id).copied() {
                Some(id) => id,
                None => continue,
            };
            let _ = store
                .publish(
                    project_id,
                    "session",
                    EventKind::SessionOutput,
                    json!({
                        "session_id": chunk.session_id,
                        "seq": chunk.seq,
                        "text": chunk.text,
                        "stream": if chunk.is_stderr { "stderr" } else { "stdout" },
                    }),
                )
                .await;
        }
    });
}

fn status_label(status: SessionStatus) -> &'static str {
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

async fn drive_command(
    store: Arc<Store>,
    gateway: Arc<TerminalGateway>,
    project_id: Uuid,
    session_id: Uuid,
    command: &mut Command,
    timeouts: &QueueTimeouts,
) {
    let sent_at = Instant::now();
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = match gateway.status(session_id).await {
            Ok(s) => s,
            Err(_) => break,
        };
        let output_observed = matches!(status, SessionStatus::Working | SessionStatus::NeedsInput);
        let readiness_regained = matches!(status, SessionStatus::Ready | SessionStatus::Idle | SessionStatus::NeedsInput);

        let decision = decide(command, sent_at.elapsed(), output_observed, readiness_regained, timeouts);
        match decision {
            QueueDecision::Wait => continue,
            QueueDecision::Ack => {
                command.status = CommandStatus::Acked;
                command.acked_at = Some(chrono::Utc::now());
                let _ = store.update_command(project_id, command).await;
            }
            QueueDecision::Complete => {
                command.status = CommandStatus::Completed;
                command.completed_at = Some(chrono::Utc::now());
                let _ = store.update_command(project_id, command).await;
                break;
            }
            QueueDecision::Retry => {
                command.attempts += 1;
                tokio::time::sleep(backoff_delay(command.attempts - 1)).await;
                command.status = CommandStatus::Sent;
                let _ = store.update_command(project_id, command).await;
            }
            QueueDecision::GiveUp => {
                command.status = CommandStatus::Failed;
                command.error = Some("command did not complete after retries".to_string());
                let _ = store.update_command(project_id, command).await;
                let exception = Exception::new(
                    project_id,
                    "command_dispatch",
                    "blocker",
                    format!("command {} on session {session_id} timed out", command.id),
                    json!({"session_id": session_id, "command_id": command.id}),
                );
                let _ = store.create_exception(&exception).await;
                let _ = store
                    .publish(
                        project_id,
                        "session",
                        EventKind::Exception,
                        json!({"session_id": session_id, "exception_id": exception.id}),
                    )
                    .await;
                if let Ok(mut sessions) = store.list_sessions(project_id).await {
                    if let Some(s) = sessions.iter_mut().find(|s| s.id == session_id) {
                        s.status = SessionStatus::Failed;
                        s.last_activity_at = chrono::Utc::now();
                        let _ = store.update_session(s).await;
                        let _ = store
                            .publish(
                                project_id,
                                "session",
                                EventKind::RunState,
                                json!({"session_id": session_id, "status": "failed"}),
                            )
                            .await;
                    }
                }
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::status_label;
    use agenterm_types::SessionStatus;

    #[test]
    fn status_labels_are_snake_case() {
        assert_eq!(status_label(SessionStatus::NeedsInput), "needs_input");
        assert_eq!(status_label(SessionStatus::HumanTakeover), "human_takeover");
    }
}
