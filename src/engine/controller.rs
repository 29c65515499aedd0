//! Phase controller
//!
//! Synchronous commit-reveal state machine. It owns the current phase and the
//! single in-flight attempt slot, and is driven by two inputs: block ticks and
//! inclusion verdicts. It never performs I/O; the runner executes its decisions.
//!
//! Per tick at most one phase transition happens:
//!
//! | phase                 | tick action                                         |
//! |-----------------------|-----------------------------------------------------|
//! | Idle                  | submit commit, move to CommitSubmitted              |
//! | CommitSubmitted       | advance if included, else resubmit when slot free   |
//! | CommitIncluded        | start the commitment age wait                       |
//! | AwaitingCommitmentAge | once the age has elapsed submit register            |
//! | RegisterSubmitted     | advance if included, else resubmit when slot free   |
//! | Registered            | done                                                |

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::engine::tracker::{RejectionAction, RejectionPolicy};
use crate::error::EngineError;
use crate::types::{BundleAttempt, BundleKind, InclusionVerdict, Phase};

/// What the runner should do after a block tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Build and submit a bundle for this attempt
    Submit(BundleAttempt),
    Wait(WaitReason),
    /// Terminal phase reached
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitReason {
    /// An attempt for the current phase is still awaiting its verdict
    InFlight { target_block: u64 },
    CommitmentAge { remaining: Duration },
    /// The tick was spent on a phase transition
    Advanced { to: Phase },
    /// Height not above the last processed block
    StaleBlock,
}

/// Effect of a verdict on the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictOutcome {
    /// Inclusion recorded; the phase advances on the next tick
    Recorded,
    /// Slot cleared; the next tick resubmits
    Retry,
    /// Verdict for an attempt that is no longer in flight
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inclusion {
    pub block: u64,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub block: u64,
}

#[derive(Debug)]
pub struct PhaseController {
    phase: Phase,
    in_flight: Option<BundleAttempt>,
    commit_inclusion: Option<Inclusion>,
    register_inclusion: Option<Inclusion>,
    min_commitment_age: Duration,
    last_block: Option<u64>,
    next_attempt_id: u64,
    rejections: RejectionPolicy,
    transitions: Vec<PhaseTransition>,
}

impl PhaseController {
    pub fn new(min_commitment_age: Duration, max_identical_rejections: u32) -> Self {
        Self {
            phase: Phase::Idle,
            in_flight: None,
            commit_inclusion: None,
            register_inclusion: None,
            min_commitment_age,
            last_block: None,
            next_attempt_id: 1,
            rejections: RejectionPolicy::new(max_identical_rejections),
            transitions: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn in_flight(&self) -> Option<&BundleAttempt> {
        self.in_flight.as_ref()
    }

    pub fn commit_inclusion(&self) -> Option<Inclusion> {
        self.commit_inclusion
    }

    pub fn register_inclusion(&self) -> Option<Inclusion> {
        self.register_inclusion
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    /// Earliest instant a register bundle may be submitted
    pub fn register_ready_at(&self) -> Option<Instant> {
        self.commit_inclusion
            .map(|inclusion| inclusion.at + self.min_commitment_age)
    }

    /// React to a new block. Bundles target `block + 1`.
    pub fn on_block(&mut self, block: u64, now: Instant) -> Decision {
        if self.phase.is_terminal() {
            return Decision::Done;
        }
        if let Some(last) = self.last_block {
            if block <= last {
                debug!(
                    block,
                    last_block = last,
                    "Ignoring block at or below last processed height"
                );
                return Decision::Wait(WaitReason::StaleBlock);
            }
        }
        self.last_block = Some(block);

        match self.phase {
            Phase::Idle => self.submit(block, now, Some(Phase::CommitSubmitted)),
            Phase::CommitSubmitted => {
                if self.commit_inclusion.is_some() {
                    self.advance(Phase::CommitIncluded, block)
                } else {
                    self.resubmit_when_free(block, now)
                }
            }
            Phase::CommitIncluded => {
                if let Some(ready_at) = self.register_ready_at() {
                    info!(
                        block,
                        wait_secs = ready_at.saturating_duration_since(now).as_secs(),
                        "Waiting for minimum commitment age before registering"
                    );
                }
                self.advance(Phase::AwaitingCommitmentAge, block)
            }
            Phase::AwaitingCommitmentAge => match self.register_ready_at() {
                Some(ready_at) if now >= ready_at => {
                    self.submit(block, now, Some(Phase::RegisterSubmitted))
                }
                Some(ready_at) => Decision::Wait(WaitReason::CommitmentAge {
                    remaining: ready_at - now,
                }),
                // Unreachable through on_verdict; refuse to register without a commit
                None => Decision::Wait(WaitReason::CommitmentAge {
                    remaining: self.min_commitment_age,
                }),
            },
            Phase::RegisterSubmitted => {
                if self.register_inclusion.is_some() {
                    self.advance(Phase::Registered, block);
                    Decision::Done
                } else {
                    self.resubmit_when_free(block, now)
                }
            }
            Phase::Registered => Decision::Done,
        }
    }

    /// Apply the verdict of `attempt`. Errors are fatal escalations.
    pub fn on_verdict(
        &mut self,
        attempt: &BundleAttempt,
        verdict: &InclusionVerdict,
        now: Instant,
    ) -> Result<VerdictOutcome, EngineError> {
        match &self.in_flight {
            Some(current) if current.id == attempt.id => {}
            _ => {
                debug!(
                    attempt = attempt.id,
                    target_block = attempt.target_block,
                    verdict = %verdict,
                    "Ignoring stale verdict"
                );
                return Ok(VerdictOutcome::Stale);
            }
        }
        self.in_flight = None;

        info!(
            attempt = attempt.id,
            kind = %attempt.kind,
            target_block = attempt.target_block,
            phase = %self.phase,
            verdict = %verdict,
            "Bundle verdict"
        );

        match verdict {
            InclusionVerdict::Included => {
                self.rejections.reset();
                let inclusion = Inclusion {
                    block: attempt.target_block,
                    at: now,
                };
                let slot = match attempt.kind {
                    BundleKind::Commit => &mut self.commit_inclusion,
                    BundleKind::Register => &mut self.register_inclusion,
                };
                // Included is sticky: the first inclusion wins
                if slot.is_none() {
                    *slot = Some(inclusion);
                }
                Ok(VerdictOutcome::Recorded)
            }
            InclusionVerdict::NotIncluded => {
                self.rejections.reset();
                Ok(VerdictOutcome::Retry)
            }
            InclusionVerdict::AccountNonceTooLow => Err(EngineError::Escalated {
                phase: self.phase,
                target_block: attempt.target_block,
                reason: "account nonce already consumed by another transaction".to_string(),
            }),
            InclusionVerdict::Error(reason) => match self.rejections.observe(reason) {
                RejectionAction::Retry => {
                    warn!(
                        attempt = attempt.id,
                        target_block = attempt.target_block,
                        reason = %reason,
                        streak = self.rejections.streak(),
                        "Relay rejected bundle, retrying on next block"
                    );
                    Ok(VerdictOutcome::Retry)
                }
                RejectionAction::Escalate(reason) => Err(EngineError::Escalated {
                    phase: self.phase,
                    target_block: attempt.target_block,
                    reason,
                }),
            },
        }
    }

    fn resubmit_when_free(&mut self, block: u64, now: Instant) -> Decision {
        match &self.in_flight {
            Some(attempt) => Decision::Wait(WaitReason::InFlight {
                target_block: attempt.target_block,
            }),
            None => self.submit(block, now, None),
        }
    }

    fn submit(&mut self, block: u64, now: Instant, then: Option<Phase>) -> Decision {
        let Some(kind) = BundleKind::for_phase(self.phase) else {
            return Decision::Wait(WaitReason::StaleBlock);
        };
        let attempt = BundleAttempt {
            id: self.next_attempt_id,
            target_block: block + 1,
            phase: self.phase,
            kind,
            submitted_at: now,
        };
        self.next_attempt_id += 1;
        self.in_flight = Some(attempt.clone());

        if let Some(next) = then {
            self.advance(next, block);
        }
        Decision::Submit(attempt)
    }

    fn advance(&mut self, to: Phase, block: u64) -> Decision {
        let from = self.phase;
        debug_assert_eq!(from.next(), Some(to), "phases only move one step forward");
        self.phase = to;
        self.transitions.push(PhaseTransition { from, to, block });
        info!(from = %from, to = %to, block, "Phase transition");
        Decision::Wait(WaitReason::Advanced { to })
    }
}
