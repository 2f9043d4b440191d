//! Review loop controller. Modeled as a pure state+event+command reducer,
//! so the state machine is unit-testable without any I/O:
//!
//! ```text
//! planning -> coding <-> reviewing -> (pass) -> testing -> merging -> done
//!                                  -> (changes_requested) -> coding
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneState {
    Planning,
    Coding,
    Reviewing,
    Testing,
    Merging,
    Done,
    /// Cycle bound exhausted or an unresolvable blocker; a human must act.
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Pass,
    ChangesRequested,
}

#[derive(Debug, Clone)]
pub enum LaneEvent {
    /// Worker emitted a commit with `[READY_FOR_REVIEW]`, or a done-marker
    /// file was observed.
    WorkerReadyForReview,
    ReviewVerdictReceived { verdict: ReviewVerdict, critical_issues: u32 },
    RequiredChecksGreen,
    HumanMergeApproved,
    MergeCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneCommand {
    DispatchWorker,
    DispatchReviewer,
    RunRequiredChecks,
    RequestMergeApproval,
    PerformMerge,
    EmitExceptionAndBlock { reason: String },
}

/// Hard bound: at most 20 code<->review cycles per lane.
pub const MAX_REVIEW_CYCLES: u32 = 20;

#[derive(Debug, Clone)]
pub struct Lane {
    pub state: LaneState,
    pub review_cycles: u32,
    pub checks_green: bool,
    pub merge_approved: bool,
}

impl Lane {
    pub fn new() -> Self {
        Self {
            state: LaneState::Planning,
            review_cycles: 0,
            checks_green: false,
            merge_approved: false,
        }
    }

    /// Pure transition: given the current lane and an incoming event,
    /// returns the next lane state plus the commands the caller (session
    /// manager / worktree manager / orchestrator glue) should execute as a
    /// result. Never performs I/O itself.
    pub fn apply(&self, event: LaneEvent) -> (Lane, Vec<LaneCommand>) {
        let mut next = self.clone();
        let mut commands = Vec::new();

        match (self.state, event) {
            (LaneState::Planning, LaneEvent::WorkerReadyForReview) => {
                // Planning transitions to coding implicitly once a worker is
                // dispatched by the caller; treat the first ready-for-review
                // signal while planning as already having coded.
                next.state = LaneState::Reviewing;
                commands.push(LaneCommand::DispatchReviewer);
            }
            (LaneState::Coding, LaneEvent::WorkerReadyForReview) => {
                next.state = LaneState::Reviewing;
                commands.push(LaneCommand::DispatchReviewer);
            }
            (LaneState::Reviewing, LaneEvent::ReviewVerdictReceived { verdict, critical_issues }) => {
                next.review_cycles += 1;
                if next.review_cycles > MAX_REVIEW_CYCLES {
                    next.state = LaneState::Blocked;
                    commands.push(LaneCommand::EmitExceptionAndBlock {
                        reason: format!("review loop exceeded {MAX_REVIEW_CYCLES} cycles"),
                    });
                } else {
                    match verdict {
                        ReviewVerdict::Pass if critical_issues == 0 => {
                            next.state = LaneState::Testing;
                            commands.push(LaneCommand::RunRequiredChecks);
                        }
                        ReviewVerdict::Pass => {
                            // Pass verdict but open critical issues still
                            // block the merge gate.
                            next.state = LaneState::Coding;
                            commands.push(LaneCommand::DispatchWorker);
                        }
                        ReviewVerdict::ChangesRequested => {
                            next.state = LaneState::Coding;
                            commands.push(LaneCommand::DispatchWorker);
                        }
                    }
                }
            }
            (LaneState::Testing, LaneEvent::RequiredChecksGreen) => {
                next.checks_green = true;
                next.state = LaneState::Merging;
                commands.push(LaneCommand::RequestMergeApproval);
            }
            (LaneState::Merging, LaneEvent::HumanMergeApproved) => {
                next.merge_approved = true;
                commands.push(LaneCommand::PerformMerge);
            }
            (LaneState::Merging, LaneEvent::MergeCompleted) => {
                next.state = LaneState::Done;
            }
            _ => {
                // No-op transition: event does not apply to the current
                // state. The caller should treat this as a logic error at
                // the glue layer, not surface it to the user.
            }
        }

        (next, commands)
    }

    /// Merge gate: reviewer verdict pass, zero open critical issues, and
    /// required checks green.
    pub fn merge_gate_satisfied(&self) -> bool {
        matches!(self.state, LaneState::Merging) && self.checks_green
    }
}

impl Default for Lane {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_done() {
        let mut lane = Lane::new();
        let (next, cmds) = lane.apply(LaneEvent::WorkerReadyForReview);
        assert_eq!(next.state, LaneState::Reviewing);
        assert_eq!(cmds, vec![LaneCommand::DispatchReviewer]);
        lane = next;

        let (next, cmds) = lane.apply(LaneEvent::ReviewVerdictReceived {
            verdict: ReviewVerdict::Pass,
            critical_issues: 0,
        });
        assert_eq!(next.state, LaneState::Testing);
        assert_eq!(cmds, vec![LaneCommand::RunRequiredChecks]);
        lane = next;

        let (next, _) = lane.apply(LaneEvent::RequiredChecksGreen);
        assert_eq!(next.state, LaneState::Merging);
        lane = next;

        let (next, cmds) = lane.apply(LaneEvent::HumanMergeApproved);
        assert!(cmds.contains(&LaneCommand::PerformMerge));
        lane = next;

        let (next, _) = lane.apply(LaneEvent::MergeCompleted);
        assert_eq!(next.state, LaneState::Done);
    }

    #[test]
    fn changes_requested_returns_to_coding() {
        let mut lane = Lane::new();
        lane.state = LaneState::Reviewing;
        let (next, cmds) = lane.apply(LaneEvent::ReviewVerdictReceived {
            verdict: ReviewVerdict::ChangesRequested,
            critical_issues: 2,
        });
        assert_eq!(next.state, LaneState::Coding);
        assert_eq!(cmds, vec![LaneCommand::DispatchWorker]);
    }

    #[test]
    fn exhausting_cycles_blocks_the_lane() {
        let mut lane = Lane::new();
        lane.state = LaneState::Reviewing;
        lane.review_cycles = MAX_REVIEW_CYCLES;
        let (next, cmds) = lane.apply(LaneEvent::ReviewVerdictReceived {
            verdict: ReviewVerdict::ChangesRequested,
            critical_issues: 1,
        });
        assert_eq!(next.state, LaneState::Blocked);
        assert!(matches!(cmds[0], LaneCommand::EmitExceptionAndBlock { .. }));
    }

    #[test]
    fn merge_gate_requires_green_checks() {
        let mut lane = Lane::new();
        lane.state = LaneState::Merging;
        assert!(!lane.merge_gate_satisfied());
        lane.checks_green = true;
        assert!(lane.merge_gate_satisfied());
    }
}
