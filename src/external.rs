//! External collaborator abstractions
//!
//! The engine talks to the ledger, the registrar contract, the signing wallet and
//! the private relay only through these traits, so the state machine can be
//! driven by the in-process simulation or by scripted test doubles.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::CollaboratorError;
use crate::types::{
    Address, Commitment, Registration, RelayResponse, SignedTransaction, TransactionRequest, Wei,
    B256,
};

/// Source of new-block notifications
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Start delivering block heights, one message per new block.
    /// The channel closes when the underlying connection drops.
    async fn subscribe(&self) -> Result<mpsc::Receiver<u64>, CollaboratorError>;

    /// Remove every listener and release the connection
    fn unsubscribe_all(&self);
}

/// Registrar controller contract proxy
#[async_trait]
pub trait RegistrarProxy: Send + Sync {
    /// Contract address the register and commit calls are sent to
    fn address(&self) -> Address;

    async fn available(&self, name: &str) -> Result<bool, CollaboratorError>;

    async fn rent_price(&self, name: &str, duration: u64) -> Result<Wei, CollaboratorError>;

    async fn min_commitment_age(&self) -> Result<Duration, CollaboratorError>;

    async fn make_commitment(
        &self,
        name: &str,
        owner: Address,
        secret: B256,
        resolver: Address,
        addr: Address,
    ) -> Result<Commitment, CollaboratorError>;

    /// Calldata for `commit(commitment)`
    fn encode_commit(&self, commitment: &Commitment) -> Vec<u8>;

    /// Calldata for `registerWithConfig(name, owner, duration, secret, resolver, owner)`
    fn encode_register(&self, registration: &Registration) -> Vec<u8>;
}

/// Opaque signing capability
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;

    fn sign_transaction(
        &self,
        request: &TransactionRequest,
    ) -> Result<SignedTransaction, CollaboratorError>;
}

/// Private relay client
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn send_bundle(
        &self,
        transactions: &[SignedTransaction],
        target_block: u64,
    ) -> Result<Box<dyn BundleHandle>, CollaboratorError>;
}

/// Handle for a bundle sent to the relay
#[async_trait]
pub trait BundleHandle: Send {
    /// Resolves once the relay has settled the target block
    async fn wait(&mut self) -> RelayResponse;
}
