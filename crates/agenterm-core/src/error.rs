//! Error taxonomy: InputError, PolicyError, CapacityError, TransientError,
//! BlockerError, FatalError. Every surfaced error carries a machine-readable
//! category and a human-readable message.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Input,
    Policy,
    Capacity,
    Transient,
    Blocker,
    Fatal,
}

#[derive(thiserror::Error, Debug)]
pub enum AgentTermError {
    #[error("input error: {0}")]
    Input(String),
    #[error("policy error: {0}")]
    Policy(String),
    #[error("capacity error: {0}")]
    Capacity(String),
    #[error("transient error: {0}")]
    Transient(String),
    #[error("blocker: {0}")]
    Blocker(String),
    #[error("fatal error: {0}")]
    Fatal(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl AgentTermError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AgentTermError::Input(_) | AgentTermError::NotFound(_) | AgentTermError::Conflict(_) => {
                ErrorCategory::Input
            }
            AgentTermError::Policy(_) => ErrorCategory::Policy,
            AgentTermError::Capacity(_) => ErrorCategory::Capacity,
            AgentTermError::Transient(_) => ErrorCategory::Transient,
            AgentTermError::Blocker(_) => ErrorCategory::Blocker,
            AgentTermError::Fatal(_) | AgentTermError::Io(_) | AgentTermError::Serialization(_) => {
                ErrorCategory::Fatal
            }
        }
    }
}

/// Serializes as `{category, message}` for tool-result/REST/exception-event
/// boundaries, exposing the category discriminant alongside the message.
impl Serialize for AgentTermError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AgentTermError", 2)?;
        state.serialize_field("category", &self.category())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

pub type Result<T> = std::result::Result<T, AgentTermError>;
