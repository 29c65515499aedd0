use thiserror::Error;

use crate::types::Phase;

/// Failure reported by one of the external collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("Registrar call failed: {0}")]
    Registrar(String),
    #[error("Signer failed: {0}")]
    Signer(String),
    #[error("Relay request failed: {0}")]
    Relay(String),
    #[error("Ledger connection failed: {0}")]
    Ledger(String),
}

/// Reasons a registration cannot start. Nothing has been submitted when these occur.
#[derive(Debug, Error)]
pub enum PreconditionError {
    #[error("Name {name:?} should be at least {min} characters long")]
    NameTooShort { name: String, min: usize },
    #[error("{name} is not available")]
    NameUnavailable { name: String },
    #[error("Registration duration must be greater than zero")]
    InvalidDuration,
    #[error("Preflight query failed: {0}")]
    Collaborator(#[from] CollaboratorError),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("No bundle is defined for phase {0}")]
    NoBundleForPhase(Phase),
    #[error("Signing failed: {0}")]
    Signing(#[from] CollaboratorError),
}

/// Fatal conditions that stop the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),
    #[error("Escalated in phase {phase} at target block {target_block}: {reason}")]
    Escalated {
        phase: Phase,
        target_block: u64,
        reason: String,
    },
    #[error("Block feed closed (last block {last_block:?})")]
    FeedClosed { last_block: Option<u64> },
    #[error("Block feed subscription failed: {0}")]
    Subscribe(CollaboratorError),
    #[error("Bundle build failed: {0}")]
    Build(#[from] BuildError),
}
