// Simulated ledger state: registrar storage, account nonce and the relay's bundle queue

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::types::{
    Address, BundleKind, Commitment, RelayResolution, RelayResponse, SignedTransaction, Wei, B256,
};

/// `commit(bytes32)`
pub const COMMIT_SELECTOR: [u8; 4] = [0xf1, 0x4f, 0xcb, 0xc8];
/// `registerWithConfig(string,address,uint256,bytes32,address,address)`
pub const REGISTER_SELECTOR: [u8; 4] = [0xf7, 0xa1, 0x69, 0x63];

const SECONDS_PER_YEAR: u64 = 31_536_000;

/// How the simulated relay settles the next bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOutcome {
    /// Include the bundle if its transactions execute
    Include,
    /// Let the target block pass without the bundle
    Drop,
    /// Reject with an explicit relay error
    Reject(String),
    NonceTooLow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RegisterCall {
    pub name: String,
    pub owner: Address,
    pub duration: u64,
    pub secret: B256,
    pub resolver: Address,
    pub addr: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub kind: Option<BundleKind>,
    pub target_block: u64,
    pub submitted_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionRecord {
    pub kind: BundleKind,
    pub block: u64,
    pub at: Instant,
}

pub(crate) struct QueuedBundle {
    pub transactions: Vec<SignedTransaction>,
    pub responder: oneshot::Sender<RelayResponse>,
}

pub(crate) struct ChainState {
    pub height: u64,
    pub nonce: u64,
    pub commitments: HashMap<B256, Instant>,
    pub registered: HashMap<String, Address>,
    pub script: VecDeque<SimOutcome>,
    pub queued: BTreeMap<u64, Vec<QueuedBundle>>,
    pub submissions: Vec<SubmissionRecord>,
    pub inclusions: Vec<InclusionRecord>,
}

impl ChainState {
    pub fn new(start_block: u64, script: Vec<SimOutcome>) -> Self {
        Self {
            height: start_block,
            nonce: 0,
            commitments: HashMap::new(),
            registered: HashMap::new(),
            script: script.into(),
            queued: BTreeMap::new(),
            submissions: Vec::new(),
            inclusions: Vec::new(),
        }
    }

    /// Settle one bundle at `block` according to the next scripted outcome
    pub fn settle(
        &mut self,
        transactions: &[SignedTransaction],
        block: u64,
        now: Instant,
        min_commitment_age: Duration,
        price_per_year: Wei,
    ) -> RelayResponse {
        match self.script.pop_front().unwrap_or(SimOutcome::Include) {
            SimOutcome::Drop => {
                RelayResponse::resolved(RelayResolution::BlockPassedWithoutInclusion)
            }
            SimOutcome::Reject(reason) => RelayResponse::failed(reason),
            SimOutcome::NonceTooLow => RelayResponse::resolved(RelayResolution::AccountNonceTooLow),
            SimOutcome::Include => {
                // Bundles are atomic: check every transaction before applying any
                let mut effects = Vec::with_capacity(transactions.len());
                for tx in transactions {
                    match self.check(tx, now, min_commitment_age, price_per_year) {
                        Ok(effect) => effects.push(effect),
                        Err(reason) => {
                            return RelayResponse::failed(format!(
                                "bundle simulation failed: {reason}"
                            ));
                        }
                    }
                }
                for effect in effects {
                    let kind = match effect {
                        Effect::Commit(commitment) => {
                            self.commitments.entry(commitment).or_insert(now);
                            BundleKind::Commit
                        }
                        Effect::Register { name, owner } => {
                            self.registered.insert(name, owner);
                            BundleKind::Register
                        }
                    };
                    self.nonce += 1;
                    self.inclusions.push(InclusionRecord { kind, block, at: now });
                }
                RelayResponse::resolved(RelayResolution::BundleIncluded)
            }
        }
    }

    fn check(
        &self,
        tx: &SignedTransaction,
        now: Instant,
        min_commitment_age: Duration,
        price_per_year: Wei,
    ) -> Result<Effect, String> {
        let data = &tx.request.data;
        if data.len() < 4 {
            return Err("missing function selector".to_string());
        }
        let (selector, args) = data.split_at(4);

        if selector == COMMIT_SELECTOR {
            let word: [u8; 32] = args
                .try_into()
                .map_err(|_| "malformed commitment".to_string())?;
            return Ok(Effect::Commit(B256(word)));
        }

        if selector == REGISTER_SELECTOR {
            let call: RegisterCall =
                serde_json::from_slice(args).map_err(|e| format!("malformed register call: {e}"))?;
            let commitment =
                commitment_for(&call.name, call.owner, call.secret, call.resolver, call.addr);
            let committed_at = self
                .commitments
                .get(&commitment.0)
                .ok_or_else(|| "commitment not found".to_string())?;
            if now.saturating_duration_since(*committed_at) < min_commitment_age {
                return Err("commitment too new".to_string());
            }
            if self.registered.contains_key(&call.name) {
                return Err(format!("{} not available", call.name));
            }
            if tx.request.value < rent_price(price_per_year, call.duration) {
                return Err("insufficient value for rent price".to_string());
            }
            return Ok(Effect::Register {
                name: call.name,
                owner: call.owner,
            });
        }

        Err("unknown function selector".to_string())
    }

    /// Resolve every queued bundle without inclusion, e.g. when the producer stops
    pub fn abandon_queued(&mut self) {
        for (_, bundles) in std::mem::take(&mut self.queued) {
            for bundle in bundles {
                let _ = bundle.responder.send(RelayResponse::timed_out());
            }
        }
    }
}

enum Effect {
    Commit(B256),
    Register { name: String, owner: Address },
}

pub(crate) fn rent_price(price_per_year: Wei, duration: u64) -> Wei {
    price_per_year.saturating_mul(Wei::from(duration)) / Wei::from(SECONDS_PER_YEAR)
}

/// Registrar commitment: digest of the label hash, owner, resolver, addr and secret
pub(crate) fn commitment_for(
    name: &str,
    owner: Address,
    secret: B256,
    resolver: Address,
    addr: Address,
) -> Commitment {
    let label = Sha256::digest(name.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(label);
    hasher.update(owner.0);
    hasher.update(resolver.0);
    hasher.update(addr.0);
    hasher.update(secret.0);
    Commitment(B256(hasher.finalize().into()))
}

pub(crate) fn kind_of(transactions: &[SignedTransaction]) -> Option<BundleKind> {
    let data = &transactions.first()?.request.data;
    match data.get(..4)? {
        s if s == COMMIT_SELECTOR => Some(BundleKind::Commit),
        s if s == REGISTER_SELECTOR => Some(BundleKind::Register),
        _ => None,
    }
}
