//! Orchestrator engine and review loop controller.

pub mod agent;
pub mod engine;
pub mod review;
pub mod safety;
pub mod sidecar_client;
pub mod stage;
pub mod tools;

pub use agent::{AgentClient, AgentEnvelope, AgentStream, NullAgentClient, Role, ToolSchema, Turn};
pub use engine::{interpret_reply, OrchestratorEngine};
pub use review::{Lane, LaneCommand, LaneEvent, LaneState, ReviewVerdict, MAX_REVIEW_CYCLES};
pub use safety::safety_violation;
pub use sidecar_client::{CircuitBreaker, CircuitState, SidecarAgentClient, SidecarConfig};
pub use stage::{derive_stage, Stage};
pub use tools::{is_admitted, stage_allows, RoleContract, ToolName};
