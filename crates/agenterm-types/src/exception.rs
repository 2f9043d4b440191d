use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionStatus {
    Open,
    Resolved,
}

/// Created by the gateway or orchestrator on blockers; resolved by human
/// action only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exception {
    pub id: Uuid,
    pub project_id: Uuid,
    pub category: String,
    pub severity: String,
    pub message: String,
    pub context: Value,
    pub status: ExceptionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Exception {
    pub fn new(
        project_id: Uuid,
        category: impl Into<String>,
        severity: impl Into<String>,
        message: impl Into<String>,
        context: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            category: category.into(),
            severity: severity.into(),
            message: message.into(),
            context,
            status: ExceptionStatus::Open,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }
}
