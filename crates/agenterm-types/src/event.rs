use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunState,
    StageState,
    LaneState,
    AssignmentState,
    SessionCommand,
    SessionOutput,
    ConfirmationRequired,
    ConfirmationResolved,
    Exception,
    ProjectEvent,
}

/// `{seq(per-project monotonic), project_id, channel, kind, payload, ts}`.
/// Unknown payload fields must be ignored by consumers; schemas per kind are
/// fixed but additive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: u64,
    pub project_id: Uuid,
    pub channel: String,
    pub kind: EventKind,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}
