//! Progress reporter plus the REST and SSE surface: the concrete axum
//! binding for projects, tasks, worktrees, sessions, and the orchestrator.

use std::sync::Arc;

use agenterm_core::config::ConfigStore;
use agenterm_core::store::Store;
use agenterm_orchestrator::OrchestratorEngine;
use agenterm_runtime::session_manager::SessionManager;

mod http;
pub mod progress;

pub use http::serve;

/// Single bearer token auth. `None` disables auth (local dev only).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub sessions: Arc<SessionManager>,
    pub engine: Arc<OrchestratorEngine>,
    pub config: Arc<ConfigStore>,
    pub api_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        store: Arc<Store>,
        sessions: Arc<SessionManager>,
        engine: Arc<OrchestratorEngine>,
        config: Arc<ConfigStore>,
        api_token: Option<String>,
    ) -> Self {
        Self {
            store,
            sessions,
            engine,
            config,
            api_token: api_token.map(|t| t.into()),
        }
    }
}
