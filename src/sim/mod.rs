//! In-process simulated network
//!
//! Plays every external role at once: a ledger producing blocks on a fixed
//! interval, a registrar that enforces the minimum commitment age, a private
//! relay whose per-bundle outcome can be scripted, and a deterministic signer.
//! Used by the CLI and by end-to-end tests.

mod chain;

pub use chain::{InclusionRecord, SimOutcome, SubmissionRecord, COMMIT_SELECTOR, REGISTER_SELECTOR};

use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::RegistrarConfig;
use crate::error::CollaboratorError;
use crate::external::{BlockSource, BundleHandle, RegistrarProxy, RelayClient, Signer};
use crate::types::{
    Address, Commitment, Registration, RelayResolution, RelayResponse, SignedTransaction,
    TransactionRequest, Wei, B256,
};
use chain::{commitment_for, kind_of, rent_price, ChainState, QueuedBundle, RegisterCall};

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub controller: Address,
    /// Account controlled by the simulated signer
    pub owner: Address,
    pub block_interval: Duration,
    pub min_commitment_age: Duration,
    /// Height before the first simulated block
    pub start_block: u64,
    pub price_per_year: Wei,
    /// Names registered before the simulation starts
    pub taken_names: Vec<String>,
    /// Outcomes for successive bundles; once exhausted every bundle is included
    pub relay_script: Vec<SimOutcome>,
    /// Drop the feed connection after producing this block
    pub halt_after_block: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            controller: RegistrarConfig::default().controller_address,
            owner: Address([0xa1; 20]),
            block_interval: Duration::from_secs(12),
            min_commitment_age: Duration::from_secs(60),
            start_block: 8_000_000,
            price_per_year: 5_000_000_000_000_000, // 0.005 ether
            taken_names: Vec::new(),
            relay_script: Vec::new(),
            halt_after_block: None,
        }
    }
}

struct Shared {
    config: SimConfig,
    state: Mutex<ChainState>,
    subscribers: Mutex<Vec<mpsc::Sender<u64>>>,
    producer: Mutex<Option<JoinHandle<()>>>,
    unsubscribe_calls: AtomicU32,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct SimulatedNetwork {
    shared: Arc<Shared>,
}

impl SimulatedNetwork {
    pub fn new(config: SimConfig) -> Self {
        let state = ChainState::new(config.start_block, config.relay_script.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
                subscribers: Mutex::new(Vec::new()),
                producer: Mutex::new(None),
                unsubscribe_calls: AtomicU32::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.shared.config
    }

    pub fn height(&self) -> u64 {
        lock(&self.shared.state).height
    }

    /// Every bundle the relay received, in order
    pub fn submissions(&self) -> Vec<SubmissionRecord> {
        lock(&self.shared.state).submissions.clone()
    }

    /// Every transaction that landed on chain, in order
    pub fn inclusions(&self) -> Vec<InclusionRecord> {
        lock(&self.shared.state).inclusions.clone()
    }

    pub fn owner_of(&self, name: &str) -> Option<Address> {
        lock(&self.shared.state).registered.get(name).copied()
    }

    pub fn unsubscribe_calls(&self) -> u32 {
        self.shared.unsubscribe_calls.load(Ordering::SeqCst)
    }

    /// Produce one block: settle bundles targeting it, then notify subscribers
    pub fn mine_block(&self) -> u64 {
        Self::mine(&self.shared)
    }

    fn mine(shared: &Shared) -> u64 {
        let now = Instant::now();
        let height = {
            let mut state = lock(&shared.state);
            state.height += 1;
            let height = state.height;
            let bundles = state.queued.remove(&height).unwrap_or_default();
            for bundle in bundles {
                let response = state.settle(
                    &bundle.transactions,
                    height,
                    now,
                    shared.config.min_commitment_age,
                    shared.config.price_per_year,
                );
                trace!(block = height, response = ?response, "Settled bundle");
                let _ = bundle.responder.send(response);
            }
            height
        };

        lock(&shared.subscribers).retain(|subscriber| {
            !matches!(
                subscriber.try_send(height),
                Err(mpsc::error::TrySendError::Closed(_))
            )
        });
        height
    }

    fn start_producer(&self) {
        let mut producer = lock(&self.shared.producer);
        if producer.is_some() {
            return;
        }
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let interval = self.shared.config.block_interval;
        let halt_after = self.shared.config.halt_after_block;

        *producer = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                let height = Self::mine(&shared);
                if halt_after.is_some_and(|last| height >= last) {
                    debug!(block = height, "Simulated ledger connection dropped");
                    lock(&shared.subscribers).clear();
                    lock(&shared.state).abandon_queued();
                    break;
                }
            }
        }));
    }
}

#[async_trait]
impl BlockSource for SimulatedNetwork {
    async fn subscribe(&self) -> Result<mpsc::Receiver<u64>, CollaboratorError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        lock(&self.shared.subscribers).push(tx);
        self.start_producer();
        Ok(rx)
    }

    fn unsubscribe_all(&self) {
        self.shared.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.subscribers).clear();
        if let Some(producer) = lock(&self.shared.producer).take() {
            producer.abort();
        }
        lock(&self.shared.state).abandon_queued();
    }
}

#[async_trait]
impl RegistrarProxy for SimulatedNetwork {
    fn address(&self) -> Address {
        self.shared.config.controller
    }

    async fn available(&self, name: &str) -> Result<bool, CollaboratorError> {
        let taken = self.shared.config.taken_names.iter().any(|n| n == name)
            || lock(&self.shared.state).registered.contains_key(name);
        Ok(!taken)
    }

    async fn rent_price(&self, _name: &str, duration: u64) -> Result<Wei, CollaboratorError> {
        Ok(rent_price(self.shared.config.price_per_year, duration))
    }

    async fn min_commitment_age(&self) -> Result<Duration, CollaboratorError> {
        Ok(self.shared.config.min_commitment_age)
    }

    async fn make_commitment(
        &self,
        name: &str,
        owner: Address,
        secret: B256,
        resolver: Address,
        addr: Address,
    ) -> Result<Commitment, CollaboratorError> {
        Ok(commitment_for(name, owner, secret, resolver, addr))
    }

    fn encode_commit(&self, commitment: &Commitment) -> Vec<u8> {
        let mut data = COMMIT_SELECTOR.to_vec();
        data.extend_from_slice(&commitment.0 .0);
        data
    }

    fn encode_register(&self, registration: &Registration) -> Vec<u8> {
        let call = RegisterCall {
            name: registration.name.clone(),
            owner: registration.owner,
            duration: registration.duration,
            secret: registration.secret,
            resolver: registration.resolver,
            addr: registration.owner,
        };
        let mut data = REGISTER_SELECTOR.to_vec();
        // Serializing plain strings and integers cannot fail
        data.extend(serde_json::to_vec(&call).unwrap_or_default());
        data
    }
}

#[derive(Serialize)]
struct SignedEnvelope<'a> {
    from: Address,
    nonce: u64,
    request: &'a TransactionRequest,
}

impl Signer for SimulatedNetwork {
    fn address(&self) -> Address {
        self.shared.config.owner
    }

    fn sign_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<SignedTransaction, CollaboratorError> {
        let envelope = SignedEnvelope {
            from: self.shared.config.owner,
            nonce: lock(&self.shared.state).nonce,
            request,
        };
        let raw =
            serde_json::to_vec(&envelope).map_err(|e| CollaboratorError::Signer(e.to_string()))?;
        Ok(SignedTransaction {
            request: request.clone(),
            raw,
        })
    }
}

struct SimBundleHandle {
    receiver: Option<oneshot::Receiver<RelayResponse>>,
}

#[async_trait]
impl BundleHandle for SimBundleHandle {
    async fn wait(&mut self) -> RelayResponse {
        match self.receiver.take() {
            Some(receiver) => receiver.await.unwrap_or_else(|_| RelayResponse::timed_out()),
            None => RelayResponse::timed_out(),
        }
    }
}

#[async_trait]
impl RelayClient for SimulatedNetwork {
    async fn send_bundle(
        &self,
        transactions: &[SignedTransaction],
        target_block: u64,
    ) -> Result<Box<dyn BundleHandle>, CollaboratorError> {
        if transactions.is_empty() {
            return Err(CollaboratorError::Relay("empty bundle".to_string()));
        }

        let (responder, receiver) = oneshot::channel();
        let mut state = lock(&self.shared.state);
        state.submissions.push(SubmissionRecord {
            kind: kind_of(transactions),
            target_block,
            submitted_at: Instant::now(),
        });

        if target_block <= state.height {
            let _ = responder.send(RelayResponse::resolved(
                RelayResolution::BlockPassedWithoutInclusion,
            ));
        } else {
            state.queued.entry(target_block).or_default().push(QueuedBundle {
                transactions: transactions.to_vec(),
                responder,
            });
        }

        Ok(Box::new(SimBundleHandle {
            receiver: Some(receiver),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_produces_blocks_on_interval() {
        let network = SimulatedNetwork::new(SimConfig {
            start_block: 10,
            ..SimConfig::default()
        });
        let mut blocks = network.subscribe().await.unwrap();

        let started = Instant::now();
        assert_eq!(blocks.recv().await, Some(11));
        assert_eq!(blocks.recv().await, Some(12));
        assert!(started.elapsed() >= Duration::from_secs(24));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_feed() {
        let network = SimulatedNetwork::new(SimConfig::default());
        let mut blocks = network.subscribe().await.unwrap();
        assert!(blocks.recv().await.is_some());

        network.unsubscribe_all();
        assert_eq!(blocks.recv().await, None);
        assert_eq!(network.unsubscribe_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_closes_feed() {
        let network = SimulatedNetwork::new(SimConfig {
            start_block: 0,
            halt_after_block: Some(2),
            ..SimConfig::default()
        });
        let mut blocks = network.subscribe().await.unwrap();
        assert_eq!(blocks.recv().await, Some(1));
        assert_eq!(blocks.recv().await, Some(2));
        assert_eq!(blocks.recv().await, None);
    }

    #[tokio::test]
    async fn test_bundle_for_past_block_is_not_included() {
        let network = SimulatedNetwork::new(SimConfig {
            start_block: 100,
            ..SimConfig::default()
        });
        let tx = network
            .sign_transaction(&TransactionRequest {
                chain_id: 5,
                to: network.config().controller,
                data: network.encode_commit(&Commitment(B256([1; 32]))),
                value: 0,
                gas_limit: 60_000,
                max_fee_per_gas: 3,
                max_priority_fee_per_gas: 2,
            })
            .unwrap();

        let mut handle = network.send_bundle(&[tx], 100).await.unwrap();
        assert_eq!(
            handle.wait().await.resolution,
            Some(RelayResolution::BlockPassedWithoutInclusion)
        );
    }

    #[tokio::test]
    async fn test_mined_block_settles_queued_bundle() {
        let network = SimulatedNetwork::new(SimConfig {
            start_block: 100,
            ..SimConfig::default()
        });
        let commitment = Commitment(B256([1; 32]));
        let tx = network
            .sign_transaction(&TransactionRequest {
                chain_id: 5,
                to: network.config().controller,
                data: network.encode_commit(&commitment),
                value: 0,
                gas_limit: 60_000,
                max_fee_per_gas: 3,
                max_priority_fee_per_gas: 2,
            })
            .unwrap();

        let mut handle = network.send_bundle(&[tx], 101).await.unwrap();
        assert_eq!(network.mine_block(), 101);
        assert_eq!(
            handle.wait().await.resolution,
            Some(RelayResolution::BundleIncluded)
        );
        assert_eq!(network.inclusions().len(), 1);
        assert_eq!(network.inclusions()[0].block, 101);
    }

    #[tokio::test]
    async fn test_taken_names_are_unavailable() {
        let network = SimulatedNetwork::new(SimConfig {
            taken_names: vec!["vitalik".to_string()],
            ..SimConfig::default()
        });
        assert!(!network.available("vitalik").await.unwrap());
        assert!(network.available("sharebazaari").await.unwrap());
    }
}
