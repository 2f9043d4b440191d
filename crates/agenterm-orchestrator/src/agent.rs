//! The LLM is modeled as a function-calling oracle: a pluggable
//! [`AgentClient`] that turns a conversation plus a tool schema into a
//! lazy, finite, non-restartable sequence of envelopes. The specific
//! provider and wire format are out of scope; this crate only depends on
//! the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// One element of the streamed round-trip. `Done` terminates the sequence
/// for this invocation; `Error` aborts it. Cancellation aborts the
/// underlying network call and the stream simply stops yielding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEnvelope {
    Token { text: String },
    ToolCall { id: String, name: String, input: Value },
    ToolResult { id: String, output: Value },
    Done,
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// A single LLM round-trip's worth of streamed envelopes, finite and
/// non-restartable: the caller drains it exactly once.
pub type AgentStream = std::pin::Pin<Box<dyn futures::Stream<Item = AgentEnvelope> + Send>>;

#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Sends the conversation history plus the admitted tool schema and
    /// returns the streamed reply. Implementations own cancellation,
    /// retries, and provider-specific wire formats.
    async fn invoke(&self, history: &[Turn], tools: &[ToolSchema]) -> AgentStream;
}

/// Deterministic stub used by tests and by `agenterm-engine run` when no
/// provider is configured: immediately emits `Done` with no tool calls.
pub struct NullAgentClient;

#[async_trait]
impl AgentClient for NullAgentClient {
    async fn invoke(&self, _history: &[Turn], _tools: &[ToolSchema]) -> AgentStream {
        Box::pin(futures::stream::once(async { AgentEnvelope::Done }))
    }
}
