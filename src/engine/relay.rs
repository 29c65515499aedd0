// Relay submitter - sends bundles and resolves them into inclusion verdicts

use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::tracker::classify;
use crate::external::{BundleHandle, RelayClient};
use crate::types::{BundleAttempt, InclusionVerdict, SignedBundle};

#[derive(Clone)]
pub struct RelaySubmitter {
    client: Arc<dyn RelayClient>,
}

impl RelaySubmitter {
    pub fn new(client: Arc<dyn RelayClient>) -> Self {
        Self { client }
    }

    /// Send `bundle` for its target block. Transport failures do not raise; they
    /// surface as an `Error` verdict when the pending submission is awaited.
    pub async fn submit(&self, bundle: SignedBundle, attempt: BundleAttempt) -> PendingSubmission {
        debug!(
            attempt = attempt.id,
            kind = %bundle.kind,
            target_block = bundle.target_block,
            "Sending bundle to relay"
        );
        let state = match self
            .client
            .send_bundle(&bundle.transactions, bundle.target_block)
            .await
        {
            Ok(handle) => PendingState::Sent(handle),
            Err(e) => {
                warn!(
                    attempt = attempt.id,
                    target_block = bundle.target_block,
                    error = %e,
                    "Relay refused bundle"
                );
                PendingState::Refused(e.to_string())
            }
        };
        PendingSubmission { attempt, state }
    }
}

enum PendingState {
    Sent(Box<dyn BundleHandle>),
    Refused(String),
}

/// A bundle handed to the relay whose verdict is not yet known
pub struct PendingSubmission {
    attempt: BundleAttempt,
    state: PendingState,
}

impl PendingSubmission {
    /// Wait until the relay settles the target block
    pub async fn wait(self) -> (BundleAttempt, InclusionVerdict) {
        let verdict = match self.state {
            PendingState::Sent(mut handle) => classify(&handle.wait().await),
            PendingState::Refused(reason) => InclusionVerdict::Error(reason),
        };
        (self.attempt, verdict)
    }
}
