//! Registration engine
//!
//! Drives the commit-reveal protocol one block at a time. The engine is split
//! along the path a bundle takes:
//!
//! - **feed**: block-height stream with stall and gap detection
//! - **controller**: the phase state machine, pure and synchronous
//! - **builder**: signs the commit or register bundle for a phase
//! - **relay**: submits a bundle and resolves it to a verdict
//! - **tracker**: classifies relay responses and decides when rejections escalate
//! - **runner**: the event loop tying the pieces together
//! - **report**: the record returned on success

pub mod builder;
pub mod controller;
pub mod feed;
pub mod relay;
pub mod report;
pub mod runner;
pub mod tracker;

pub use builder::{BundleBuilder, FeeParams};
pub use controller::{Decision, PhaseController, PhaseTransition, VerdictOutcome, WaitReason};
pub use feed::{BlockFeed, Subscription};
pub use relay::{PendingSubmission, RelaySubmitter};
pub use report::{AttemptRecord, RegistrationReport};
pub use runner::{register, Collaborators, RegistrationEngine};
pub use tracker::{classify, RejectionAction, RejectionPolicy};
