//! Default [`crate::agent::AgentClient`] implementation: an HTTP sidecar
//! process reached over `reqwest`, guarded by a circuit breaker. Grounded on
//! the sidecar manager's request/response shape and failure-handling
//! policy: cooldown-then-half-open recovery, operation timeouts, and
//! rate-limit/quota string-sniffing that pauses the circuit rather than
//! retrying immediately.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tracing::warn;

use crate::agent::{AgentClient, AgentEnvelope, AgentStream, ToolSchema, Turn};

/// Circuit breaker state for resilience against a flaky or overloaded
/// sidecar process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub base_url: String,
    pub max_failures: u32,
    pub cooldown: Duration,
    pub operation_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:0".to_string(),
            max_failures: 3,
            cooldown: Duration::from_secs(30),
            operation_timeout: Duration::from_secs(300),
        }
    }
}

pub struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    config: SidecarConfig,
}

impl CircuitBreaker {
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            config,
        }
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = CircuitState::Closed;
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        if self.failure_count >= self.config.max_failures {
            warn!("circuit breaker opened after {} failures", self.failure_count);
            self.state = CircuitState::Open;
        }
    }

    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if self.last_failure.is_some_and(|t| t.elapsed() >= self.config.cooldown) {
                    self.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// Talks to an agent-runner sidecar process over HTTP. Streams tokens and
/// tool calls back as [`AgentEnvelope`]s; a tripped circuit short-circuits
/// to a single `Error` envelope without attempting the request.
pub struct SidecarAgentClient {
    client: reqwest::Client,
    config: SidecarConfig,
    circuit: Mutex<CircuitBreaker>,
}

impl SidecarAgentClient {
    pub fn new(config: SidecarConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.operation_timeout)
            .build()
            .expect("reqwest client builder");
        Self {
            client,
            circuit: Mutex::new(CircuitBreaker::new(config.clone())),
            config,
        }
    }

    fn is_rate_limited(body: &str) -> bool {
        let lower = body.to_lowercase();
        lower.contains("rate limit") || lower.contains("quota") || lower.contains("429")
    }
}

#[async_trait]
impl AgentClient for SidecarAgentClient {
    async fn invoke(&self, history: &[Turn], tools: &[ToolSchema]) -> AgentStream {
        {
            let mut circuit = self.circuit.lock().expect("circuit breaker mutex poisoned");
            if !circuit.can_execute() {
                return Box::pin(futures::stream::once(async {
                    AgentEnvelope::Error {
                        message: "sidecar circuit breaker is open".to_string(),
                    }
                }));
            }
        }

        let url = format!("{}/invoke", self.config.base_url);
        let body = json!({"history": history, "tools": tools});

        let response = self.client.post(&url).json(&body).send().await;

        let response = match response {
            Ok(r) => r,
            Err(e) => {
                self.circuit.lock().expect("circuit breaker mutex poisoned").record_failure();
                return Box::pin(futures::stream::once(async move {
                    AgentEnvelope::Error { message: e.to_string() }
                }));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            {
                let mut circuit = self.circuit.lock().expect("circuit breaker mutex poisoned");
                if Self::is_rate_limited(&text) {
                    circuit.record_failure();
                } else if status.is_server_error() {
                    circuit.record_failure();
                }
            }
            return Box::pin(futures::stream::once(async move {
                AgentEnvelope::Error {
                    message: format!("sidecar returned {status}: {text}"),
                }
            }));
        }

        self.circuit.lock().expect("circuit breaker mutex poisoned").record_success();

        let byte_stream = response.bytes_stream();
        let envelopes = byte_stream.filter_map(|chunk| async move {
            let chunk = chunk.ok()?;
            let text = String::from_utf8_lossy(&chunk).into_owned();
            serde_json::from_str::<AgentEnvelope>(text.trim()).ok()
        });

        Box::pin(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_opens_after_max_failures() {
        let mut cb = CircuitBreaker::new(SidecarConfig {
            max_failures: 2,
            ..Default::default()
        });
        assert!(cb.can_execute());
        cb.record_failure();
        assert_eq!(cb.state, CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state, CircuitState::Open);
        assert!(!cb.can_execute());
    }

    #[test]
    fn circuit_recovers_after_cooldown() {
        let mut cb = CircuitBreaker::new(SidecarConfig {
            max_failures: 1,
            cooldown: Duration::from_millis(0),
            ..Default::default()
        });
        cb.record_failure();
        assert_eq!(cb.state, CircuitState::Open);
        assert!(cb.can_execute());
        assert_eq!(cb.state, CircuitState::HalfOpen);
    }
}
