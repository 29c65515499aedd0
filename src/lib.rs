// ENS Bundler Library - commit-reveal name registration through a private relay
// This exposes the engine and its collaborators for the binary and for testing

pub mod config;
pub mod engine;
pub mod error;
pub mod external;
pub mod preflight;
pub mod sim;
pub mod telemetry;
pub mod types;

// Re-export key types for easy access
pub use config::BundlerConfig;
pub use engine::{register, Collaborators, RegistrationEngine, RegistrationReport};
pub use error::{BuildError, CollaboratorError, EngineError, PreconditionError};
pub use external::{BlockSource, BundleHandle, RegistrarProxy, RelayClient, Signer};
pub use preflight::RegistrationRequest;
pub use sim::{SimConfig, SimOutcome, SimulatedNetwork};
pub use telemetry::{create_registration_span, generate_correlation_id, init_telemetry};
pub use types::{
    Address, BundleAttempt, BundleKind, Commitment, InclusionVerdict, Phase, Registration, Wei,
    B256,
};
