// Registration runner - feeds block ticks and verdicts into the phase controller
// and carries out its decisions

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, Instrument};

use crate::config::BundlerConfig;
use crate::engine::builder::BundleBuilder;
use crate::engine::controller::{Decision, PhaseController};
use crate::engine::feed::BlockFeed;
use crate::engine::relay::RelaySubmitter;
use crate::engine::report::RegistrationReport;
use crate::error::EngineError;
use crate::external::{BlockSource, RegistrarProxy, RelayClient, Signer};
use crate::preflight::{self, RegistrationRequest};
use crate::telemetry::{create_registration_span, generate_correlation_id};
use crate::types::{BundleAttempt, Commitment, InclusionVerdict, Registration};

type VerdictFuture = Pin<Box<dyn Future<Output = (BundleAttempt, InclusionVerdict)> + Send>>;

/// Handles to every external collaborator the engine needs
#[derive(Clone)]
pub struct Collaborators {
    pub blocks: Arc<dyn BlockSource>,
    pub registrar: Arc<dyn RegistrarProxy>,
    pub signer: Arc<dyn Signer>,
    pub relay: Arc<dyn RelayClient>,
}

impl Collaborators {
    /// Use a single backend that plays every role
    pub fn from_backend<N>(backend: &N) -> Self
    where
        N: BlockSource + RegistrarProxy + Signer + RelayClient + Clone + 'static,
    {
        Self {
            blocks: Arc::new(backend.clone()),
            registrar: Arc::new(backend.clone()),
            signer: Arc::new(backend.clone()),
            relay: Arc::new(backend.clone()),
        }
    }
}

enum Event {
    Block(Option<u64>),
    Verdict(BundleAttempt, InclusionVerdict),
}

pub struct RegistrationEngine {
    feed: BlockFeed,
    builder: BundleBuilder,
    submitter: RelaySubmitter,
    max_identical_rejections: u32,
}

impl RegistrationEngine {
    pub fn new(collaborators: &Collaborators, config: &BundlerConfig) -> Self {
        Self {
            feed: BlockFeed::new(
                Arc::clone(&collaborators.blocks),
                config.engine.stall_threshold(),
            ),
            builder: BundleBuilder::from_config(
                Arc::clone(&collaborators.registrar),
                Arc::clone(&collaborators.signer),
                config,
            ),
            submitter: RelaySubmitter::new(Arc::clone(&collaborators.relay)),
            max_identical_rejections: config.engine.max_identical_rejections,
        }
    }

    /// Run the commit-reveal protocol to completion.
    ///
    /// Returns once the name is registered or a fatal condition occurs. The block
    /// feed subscription is released on every exit path.
    pub async fn run(
        &self,
        registration: &Registration,
        commitment: &Commitment,
    ) -> Result<RegistrationReport, EngineError> {
        let correlation_id = generate_correlation_id();
        let span = create_registration_span(&registration.name, &correlation_id);
        self.drive(registration, commitment, &correlation_id)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        registration: &Registration,
        commitment: &Commitment,
        correlation_id: &str,
    ) -> Result<RegistrationReport, EngineError> {
        let mut subscription = self.feed.subscribe().await?;
        let mut controller = PhaseController::new(
            registration.min_commitment_age,
            self.max_identical_rejections,
        );
        let mut report = RegistrationReport::new(registration, correlation_id);
        let mut pending: Option<VerdictFuture> = None;

        info!(
            owner = %registration.owner,
            duration = registration.duration,
            price = %registration.price,
            min_commitment_age_secs = registration.min_commitment_age.as_secs(),
            "Starting registration"
        );

        loop {
            // Verdicts first, so a resolved slot is cleared before the next tick is processed
            let event = tokio::select! {
                biased;
                (attempt, verdict) = next_verdict(&mut pending) => Event::Verdict(attempt, verdict),
                block = subscription.next() => Event::Block(block),
            };

            match event {
                Event::Verdict(attempt, verdict) => {
                    pending = None;
                    report.record_verdict(&attempt, &verdict);
                    controller.on_verdict(&attempt, &verdict, Instant::now())?;
                }
                Event::Block(None) => {
                    return Err(EngineError::FeedClosed {
                        last_block: subscription.last_block(),
                    });
                }
                Event::Block(Some(block)) => match controller.on_block(block, Instant::now()) {
                    Decision::Submit(attempt) => {
                        let bundle = self.builder.build(
                            attempt.phase,
                            registration,
                            commitment,
                            attempt.target_block,
                        )?;
                        info!(
                            attempt = attempt.id,
                            kind = %attempt.kind,
                            target_block = attempt.target_block,
                            "Submitting bundle"
                        );
                        report.record_submission(&attempt);
                        let submitter = self.submitter.clone();
                        pending = Some(Box::pin(async move {
                            submitter.submit(bundle, attempt).await.wait().await
                        }));
                    }
                    Decision::Wait(reason) => {
                        debug!(block, reason = ?reason, phase = %controller.phase(), "Waiting");
                    }
                    Decision::Done => {
                        subscription.close();
                        let report = report.finish(&controller);
                        info!(
                            commit_block = ?report.commit_block,
                            register_block = ?report.register_block,
                            attempts = report.attempts.len(),
                            "Registered successfully"
                        );
                        return Ok(report);
                    }
                },
            }
        }
    }
}

async fn next_verdict(pending: &mut Option<VerdictFuture>) -> (BundleAttempt, InclusionVerdict) {
    match pending.as_mut() {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

/// Preflight the request, then run the engine. Nothing is submitted if preflight fails.
pub async fn register(
    collaborators: &Collaborators,
    config: &BundlerConfig,
    request: &RegistrationRequest,
) -> Result<RegistrationReport, EngineError> {
    let (registration, commitment) = preflight::prepare(
        request,
        collaborators.registrar.as_ref(),
        collaborators.signer.as_ref(),
        &config.registrar,
        preflight::generate_secret(),
    )
    .await?;

    RegistrationEngine::new(collaborators, config)
        .run(&registration, &commitment)
        .await
}
