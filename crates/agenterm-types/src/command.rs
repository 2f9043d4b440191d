use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandOp {
    SendText,
    SendKey,
    Resize,
    Interrupt,
    Close,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Queued,
    Sent,
    Acked,
    Completed,
    Failed,
    Timeout,
}

impl CommandStatus {
    /// At most one command per session may carry status `sent` or `acked`.
    pub fn is_inflight(self) -> bool {
        matches!(self, CommandStatus::Sent | CommandStatus::Acked)
    }
}

/// Exactly one command per session may be in `{sent,acked}` at any time
/// (single-inflight invariant). Retries <= 2 with exponential backoff; on
/// exhaustion the command becomes `failed` and an `exception` event is
/// emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub session_id: Uuid,
    pub op: CommandOp,
    pub payload: Value,
    pub status: CommandStatus,
    pub issued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}

impl Command {
    pub fn new(session_id: Uuid, op: CommandOp, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            op,
            payload,
            status: CommandStatus::Queued,
            issued_at: Utc::now(),
            acked_at: None,
            completed_at: None,
            error: None,
            attempts: 0,
        }
    }

    pub const MAX_RETRIES: u32 = 2;
}
