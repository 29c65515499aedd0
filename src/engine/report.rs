use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::controller::{PhaseController, PhaseTransition};
use crate::types::{BundleAttempt, BundleKind, InclusionVerdict, Phase, Registration};

/// One bundle submission as reported to the user
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub id: u64,
    pub kind: BundleKind,
    pub phase: Phase,
    pub target_block: u64,
    pub submitted_at: DateTime<Utc>,
    pub verdict: Option<InclusionVerdict>,
}

/// Outcome of a completed registration run
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReport {
    pub correlation_id: String,
    pub name: String,
    pub owner: String,
    pub final_phase: Phase,
    pub commit_block: Option<u64>,
    pub register_block: Option<u64>,
    pub transitions: Vec<PhaseTransition>,
    pub attempts: Vec<AttemptRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RegistrationReport {
    pub fn new(registration: &Registration, correlation_id: &str) -> Self {
        let now = Utc::now();
        Self {
            correlation_id: correlation_id.to_string(),
            name: registration.name.clone(),
            owner: registration.owner.to_string(),
            final_phase: Phase::Idle,
            commit_block: None,
            register_block: None,
            transitions: Vec::new(),
            attempts: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn record_submission(&mut self, attempt: &BundleAttempt) {
        self.attempts.push(AttemptRecord {
            id: attempt.id,
            kind: attempt.kind,
            phase: attempt.phase,
            target_block: attempt.target_block,
            submitted_at: Utc::now(),
            verdict: None,
        });
    }

    pub fn record_verdict(&mut self, attempt: &BundleAttempt, verdict: &InclusionVerdict) {
        if let Some(record) = self.attempts.iter_mut().find(|r| r.id == attempt.id) {
            record.verdict = Some(verdict.clone());
        }
    }

    pub fn submissions(&self, kind: BundleKind) -> usize {
        self.attempts.iter().filter(|a| a.kind == kind).count()
    }

    pub(crate) fn finish(mut self, controller: &PhaseController) -> Self {
        self.final_phase = controller.phase();
        self.commit_block = controller.commit_inclusion().map(|i| i.block);
        self.register_block = controller.register_inclusion().map(|i| i.block);
        self.transitions = controller.transitions().to_vec();
        self.finished_at = Utc::now();
        self
    }
}
