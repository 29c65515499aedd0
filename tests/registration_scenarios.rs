// End-to-end registration scenarios against the in-process simulated network
// All tests run on paused tokio time, so block intervals and the commitment
// age wait complete instantly while keeping their ordering.

use std::time::Duration;

use ens_bundler::engine::RegistrationEngine;
use ens_bundler::preflight::{self, RegistrationRequest};
use ens_bundler::sim::InclusionRecord;
use ens_bundler::{
    register, BundleKind, BundlerConfig, Collaborators, EngineError, Phase, PreconditionError,
    SimConfig, SimOutcome, SimulatedNetwork, B256,
};

fn network_with(script: Vec<SimOutcome>) -> SimulatedNetwork {
    SimulatedNetwork::new(SimConfig {
        relay_script: script,
        ..SimConfig::default()
    })
}

fn commit_inclusion(network: &SimulatedNetwork) -> InclusionRecord {
    network
        .inclusions()
        .into_iter()
        .find(|inclusion| inclusion.kind == BundleKind::Commit)
        .expect("commit was never included")
}

#[tokio::test(start_paused = true)]
async fn test_commit_retried_then_registered() {
    // First commit bundle is dropped, the second lands, register lands first try
    let network = network_with(vec![SimOutcome::Drop]);
    let collaborators = Collaborators::from_backend(&network);

    let report = register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("sharebazaari"),
    )
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Registered);
    assert_eq!(network.submissions().len(), 3);
    assert_eq!(report.attempts.len(), 3);
    assert_eq!(report.submissions(BundleKind::Commit), 2);
    assert_eq!(report.submissions(BundleKind::Register), 1);
    assert_eq!(
        network.owner_of("sharebazaari"),
        Some(network.config().owner)
    );
    assert_eq!(report.commit_block, Some(commit_inclusion(&network).block));
}

#[tokio::test(start_paused = true)]
async fn test_phases_visited_in_protocol_order() {
    let network = network_with(vec![SimOutcome::Drop, SimOutcome::Drop]);
    let collaborators = Collaborators::from_backend(&network);

    let report = register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("ordered"),
    )
    .await
    .unwrap();

    let visited: Vec<Phase> = std::iter::once(Phase::Idle)
        .chain(report.transitions.iter().map(|t| t.to))
        .collect();
    assert_eq!(visited, Phase::ALL.to_vec());

    let blocks: Vec<u64> = report.transitions.iter().map(|t| t.block).collect();
    assert!(blocks.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_name_submits_nothing() {
    let network = SimulatedNetwork::new(SimConfig {
        taken_names: vec!["vitalik".to_string()],
        ..SimConfig::default()
    });
    let collaborators = Collaborators::from_backend(&network);

    let err = register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("Vitalik"),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Precondition(PreconditionError::NameUnavailable { .. })
    ));
    assert!(network.submissions().is_empty());
    assert_eq!(network.unsubscribe_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_rejections_are_retried() {
    let busy = || SimOutcome::Reject("relay busy".to_string());
    let network = network_with(vec![busy(), busy(), busy()]);
    let collaborators = Collaborators::from_backend(&network);

    let report = register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("persistent"),
    )
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Registered);
    assert_eq!(report.submissions(BundleKind::Commit), 4);
    assert_eq!(report.submissions(BundleKind::Register), 1);

    // Commit advanced only after the fourth attempt's target block
    let fourth = &report.attempts[3];
    assert_eq!(fourth.kind, BundleKind::Commit);
    assert_eq!(report.commit_block, Some(fourth.target_block));
    assert!(report.attempts[..3]
        .iter()
        .all(|a| matches!(a.verdict, Some(ens_bundler::InclusionVerdict::Error(_)))));
}

#[tokio::test(start_paused = true)]
async fn test_register_waits_for_commitment_age() {
    let network = SimulatedNetwork::new(SimConfig {
        min_commitment_age: Duration::from_secs(60),
        block_interval: Duration::from_secs(12),
        relay_script: vec![SimOutcome::Drop, SimOutcome::Drop, SimOutcome::Drop],
        ..SimConfig::default()
    });
    let collaborators = Collaborators::from_backend(&network);

    register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("patient"),
    )
    .await
    .unwrap();

    let committed = commit_inclusion(&network);
    let first_register = network
        .submissions()
        .into_iter()
        .find(|s| s.kind == Some(BundleKind::Register))
        .unwrap();
    assert!(first_register.submitted_at >= committed.at + Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_feed_closed_once_after_success() {
    let network = network_with(vec![]);
    let collaborators = Collaborators::from_backend(&network);

    register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("tidy"),
    )
    .await
    .unwrap();
    let submitted = network.submissions().len();
    let height = network.height();

    assert_eq!(network.unsubscribe_calls(), 1);

    // The producer is gone: no more blocks and no further submissions
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(network.height(), height);
    assert_eq!(network.submissions().len(), submitted);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_feed_is_fatal() {
    let network = SimulatedNetwork::new(SimConfig {
        start_block: 100,
        halt_after_block: Some(103),
        relay_script: vec![SimOutcome::Drop; 10],
        ..SimConfig::default()
    });
    let collaborators = Collaborators::from_backend(&network);

    let err = register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("stranded"),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        EngineError::FeedClosed {
            last_block: Some(103)
        }
    ));
    assert_eq!(network.unsubscribe_calls(), 1);
    assert!(network.owner_of("stranded").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_consumed_nonce_escalates() {
    let network = network_with(vec![SimOutcome::NonceTooLow]);
    let collaborators = Collaborators::from_backend(&network);

    let err = register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("raced"),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        EngineError::Escalated {
            phase: Phase::CommitSubmitted,
            ..
        }
    ));
    assert_eq!(network.submissions().len(), 1);
    assert_eq!(network.unsubscribe_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_rejection_escalates() {
    let network = network_with(vec![SimOutcome::Reject(
        "insufficient funds for gas * price + value".to_string(),
    )]);
    let collaborators = Collaborators::from_backend(&network);

    let err = register(
        &collaborators,
        &BundlerConfig::default(),
        &RegistrationRequest::new("broke"),
    )
    .await
    .unwrap_err();

    match err {
        EngineError::Escalated { reason, .. } => assert!(reason.contains("insufficient funds")),
        other => panic!("expected escalation, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_identical_rejections_escalate() {
    let mut config = BundlerConfig::default();
    config.engine.max_identical_rejections = 3;
    let stuck = || SimOutcome::Reject("gas price below minimum".to_string());
    let network = network_with(vec![stuck(), stuck(), stuck(), stuck()]);
    let collaborators = Collaborators::from_backend(&network);

    let err = register(&collaborators, &config, &RegistrationRequest::new("stuck"))
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Escalated { .. }));
    assert_eq!(network.submissions().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_engine_with_prepared_registration() {
    let network = network_with(vec![]);
    let collaborators = Collaborators::from_backend(&network);
    let config = BundlerConfig::default();
    let secret = B256([7; 32]);

    let (registration, commitment) = preflight::prepare(
        &RegistrationRequest::new("prepared").with_duration(86_400 * 28),
        collaborators.registrar.as_ref(),
        collaborators.signer.as_ref(),
        &config.registrar,
        secret,
    )
    .await
    .unwrap();

    // Recomputing the commitment yields the same value
    let (_, again) = preflight::prepare(
        &RegistrationRequest::new("prepared").with_duration(86_400 * 28),
        collaborators.registrar.as_ref(),
        collaborators.signer.as_ref(),
        &config.registrar,
        secret,
    )
    .await
    .unwrap();
    assert_eq!(commitment, again);

    let report = RegistrationEngine::new(&collaborators, &config)
        .run(&registration, &commitment)
        .await
        .unwrap();

    assert_eq!(report.name, "prepared");
    assert_eq!(report.final_phase, Phase::Registered);
    assert!(network.owner_of("prepared").is_some());
}
