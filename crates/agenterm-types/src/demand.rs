use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DemandStatus {
    Captured,
    Triaged,
    Shortlisted,
    Scheduled,
    Done,
    Rejected,
}

/// Isolated from execution: execution tools cannot mutate demand; demand
/// tools cannot create sessions. Only `promote` bridges the two lanes and
/// requires explicit user approval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandItem {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: DemandStatus,
    pub priority: i32,
    pub impact: u8,
    pub effort: u8,
    pub risk: u8,
    pub urgency: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DemandItem {
    pub fn new(project_id: Uuid, title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            title: title.into(),
            description: description.into(),
            status: DemandStatus::Captured,
            priority: 0,
            impact: 1,
            effort: 1,
            risk: 1,
            urgency: 1,
            tags: Vec::new(),
            selected_task_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}
