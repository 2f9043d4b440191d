//! Per-session command queue state machine. Pure transition function,
//! grounded on `orchestrator/scheduler.rs`'s style of keeping scheduling
//! decisions as side-effect-free functions the caller drives.
//!
//! `queued -> sent (write issued) -> acked (first byte observed, or t_ack
//! elapsed with grace) -> completed (readiness regained, or op is
//! fire-and-forget) | failed | timeout`. On `failed`/`timeout` with
//! `attempts < 2`, requeue with exponential backoff (200ms, 800ms). On
//! final failure, the caller emits an `exception`.

use std::time::Duration;

use agenterm_types::{Command, CommandOp, CommandStatus};

/// Backoff delay before the Nth retry (0-indexed attempt number just spent).
pub fn backoff_delay(attempts: u32) -> Duration {
    match attempts {
        0 => Duration::from_millis(200),
        _ => Duration::from_millis(800),
    }
}

pub struct QueueTimeouts {
    pub t_ack: Duration,
    pub t_complete: Duration,
}

impl Default for QueueTimeouts {
    fn default() -> Self {
        Self {
            t_ack: Duration::from_secs(2),
            t_complete: Duration::from_secs(10),
        }
    }
}

/// Outcome of one polling tick over a `sent`/`acked` command.
#[derive(Debug, PartialEq, Eq)]
pub enum QueueDecision {
    /// Stay in the current status; nothing to do yet.
    Wait,
    /// Move to `acked` (first output byte observed, or ack grace elapsed).
    Ack,
    /// Move to `completed`.
    Complete,
    /// Retry: caller should re-send and bump `attempts`.
    Retry,
    /// Exhausted retries: move to `failed`/`timeout` and surface an exception.
    GiveUp,
}

/// Decides the next step for a `sent` or `acked` command given elapsed time
/// since issue and whether new output bytes have arrived.
pub fn decide(
    command: &Command,
    elapsed_since_sent: Duration,
    output_observed_since_sent: bool,
    readiness_regained: bool,
    timeouts: &QueueTimeouts,
) -> QueueDecision {
    // resize is fire-and-forget: completes as soon as it's sent.
    if matches!(command.op, CommandOp::Resize) && command.status == CommandStatus::Sent {
        return QueueDecision::Complete;
    }

    match command.status {
        CommandStatus::Sent => {
            if output_observed_since_sent {
                return QueueDecision::Ack;
            }
            if elapsed_since_sent >= timeouts.t_ack {
                // grace: treat ack-timeout as an ack rather than a failure.
                return QueueDecision::Ack;
            }
            if elapsed_since_sent >= timeouts.t_complete {
                retry_or_give_up(command)
            } else {
                QueueDecision::Wait
            }
        }
        CommandStatus::Acked => {
            if readiness_regained {
                QueueDecision::Complete
            } else if elapsed_since_sent >= timeouts.t_complete {
                retry_or_give_up(command)
            } else {
                QueueDecision::Wait
            }
        }
        _ => QueueDecision::Wait,
    }
}

fn retry_or_give_up(command: &Command) -> QueueDecision {
    if command.attempts < Command::MAX_RETRIES {
        QueueDecision::Retry
    } else {
        QueueDecision::GiveUp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agenterm_types::CommandOp;
    use serde_json::json;
    use uuid::Uuid;

    fn sent_command(attempts: u32) -> Command {
        let mut c = Command::new(Uuid::new_v4(), CommandOp::SendText, json!({"text": "x"}));
        c.status = CommandStatus::Sent;
        c.attempts = attempts;
        c
    }

    #[test]
    fn acks_on_output() {
        let cmd = sent_command(0);
        let decision = decide(&cmd, Duration::from_millis(100), true, false, &QueueTimeouts::default());
        assert_eq!(decision, QueueDecision::Ack);
    }

    #[test]
    fn acks_on_grace_timeout_without_output() {
        let cmd = sent_command(0);
        let decision = decide(&cmd, Duration::from_secs(3), false, false, &QueueTimeouts::default());
        assert_eq!(decision, QueueDecision::Ack);
    }

    #[test]
    fn retries_then_gives_up_after_two_attempts() {
        let timeouts = QueueTimeouts::default();
        let mut cmd = sent_command(0);
        cmd.status = CommandStatus::Acked;
        let decision = decide(&cmd, Duration::from_secs(11), false, false, &timeouts);
        assert_eq!(decision, QueueDecision::Retry);

        cmd.attempts = Command::MAX_RETRIES;
        let decision = decide(&cmd, Duration::from_secs(11), false, false, &timeouts);
        assert_eq!(decision, QueueDecision::GiveUp);
    }

    #[test]
    fn resize_completes_immediately() {
        let mut cmd = sent_command(0);
        cmd.op = CommandOp::Resize;
        let decision = decide(&cmd, Duration::from_millis(1), false, false, &QueueTimeouts::default());
        assert_eq!(decision, QueueDecision::Complete);
    }

    #[test]
    fn backoff_grows_exponentially_across_two_retries() {
        assert_eq!(backoff_delay(0), Duration::from_millis(200));
        assert_eq!(backoff_delay(1), Duration::from_millis(800));
    }
}
