// Core data model for the commit-reveal registration flow

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Amount of native currency in wei
pub type Wei = u128;

pub const GWEI: Wei = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HexParseError {
    #[error("missing 0x prefix")]
    MissingPrefix,
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("invalid hex: {0}")]
    Invalid(#[from] hex::FromHexError),
}

fn encode_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn decode_hex<const N: usize>(input: &str) -> Result<[u8; N], HexParseError> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .ok_or(HexParseError::MissingPrefix)?;
    if digits.len() != N * 2 {
        return Err(HexParseError::WrongLength {
            expected: N,
            actual: digits.len() / 2,
        });
    }

    let mut out = [0u8; N];
    hex::decode_to_slice(digits, &mut out)?;
    Ok(out)
}

/// 20-byte account or contract address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(pub [u8; 20]);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl FromStr for Address {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex::<20>(s).map(Address)
    }
}

impl TryFrom<String> for Address {
    type Error = HexParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

/// 32-byte word, used for secrets and commitments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct B256(pub [u8; 32]);

impl fmt::Display for B256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_hex(&self.0))
    }
}

impl FromStr for B256 {
    type Err = HexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex::<32>(s).map(B256)
    }
}

impl TryFrom<String> for B256 {
    type Error = HexParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<B256> for String {
    fn from(word: B256) -> Self {
        word.to_string()
    }
}

/// Immutable registration parameters, fixed before the engine starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub secret: B256,
    pub owner: Address,
    pub resolver: Address,
    /// Requested rental duration in seconds
    pub duration: u64,
    /// Value attached to the register transaction, buffer included
    pub price: Wei,
    pub min_commitment_age: Duration,
}

/// Commitment value as computed by the registrar; reused for every commit resubmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Commitment(pub B256);

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Protocol phase. Ordering follows the protocol; phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    CommitSubmitted,
    CommitIncluded,
    AwaitingCommitmentAge,
    RegisterSubmitted,
    Registered,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Idle,
        Phase::CommitSubmitted,
        Phase::CommitIncluded,
        Phase::AwaitingCommitmentAge,
        Phase::RegisterSubmitted,
        Phase::Registered,
    ];

    /// The phase that follows this one, `None` for the terminal phase
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Idle => Some(Phase::CommitSubmitted),
            Phase::CommitSubmitted => Some(Phase::CommitIncluded),
            Phase::CommitIncluded => Some(Phase::AwaitingCommitmentAge),
            Phase::AwaitingCommitmentAge => Some(Phase::RegisterSubmitted),
            Phase::RegisterSubmitted => Some(Phase::Registered),
            Phase::Registered => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Registered)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Idle => "idle",
            Phase::CommitSubmitted => "commit-submitted",
            Phase::CommitIncluded => "commit-included",
            Phase::AwaitingCommitmentAge => "awaiting-commitment-age",
            Phase::RegisterSubmitted => "register-submitted",
            Phase::Registered => "registered",
        };
        f.write_str(label)
    }
}

/// Which registrar call a bundle carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BundleKind {
    Commit,
    Register,
}

impl BundleKind {
    /// The bundle a submission made from `phase` must carry
    pub fn for_phase(phase: Phase) -> Option<BundleKind> {
        match phase {
            Phase::Idle | Phase::CommitSubmitted => Some(BundleKind::Commit),
            Phase::AwaitingCommitmentAge | Phase::RegisterSubmitted => Some(BundleKind::Register),
            Phase::CommitIncluded | Phase::Registered => None,
        }
    }
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleKind::Commit => f.write_str("commit"),
            BundleKind::Register => f.write_str("register"),
        }
    }
}

/// One submission of a bundle for one target block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleAttempt {
    pub id: u64,
    pub target_block: u64,
    /// Phase the controller was in when it decided to submit
    pub phase: Phase,
    pub kind: BundleKind,
    pub submitted_at: Instant,
}

/// Classified outcome of a bundle attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InclusionVerdict {
    Included,
    NotIncluded,
    AccountNonceTooLow,
    Error(String),
}

impl fmt::Display for InclusionVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InclusionVerdict::Included => f.write_str("included"),
            InclusionVerdict::NotIncluded => f.write_str("not-included"),
            InclusionVerdict::AccountNonceTooLow => f.write_str("account-nonce-too-low"),
            InclusionVerdict::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Resolution codes reported by the relay once the target block is settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayResolution {
    BundleIncluded,
    BlockPassedWithoutInclusion,
    /// The signer nonce is ahead of the chain; another submitter resolved it first
    AccountNonceTooHigh,
    AccountNonceTooLow,
}

/// Raw relay answer for one bundle, before classification
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelayResponse {
    pub resolution: Option<RelayResolution>,
    pub error: Option<String>,
}

impl RelayResponse {
    pub fn resolved(resolution: RelayResolution) -> Self {
        Self {
            resolution: Some(resolution),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            resolution: None,
            error: Some(reason.into()),
        }
    }

    /// The relay stopped answering before the target block resolved
    pub fn timed_out() -> Self {
        Self::default()
    }
}

/// Unsigned EIP-1559 transaction descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub chain_id: u64,
    pub to: Address,
    pub data: Vec<u8>,
    pub value: Wei,
    pub gas_limit: u64,
    pub max_fee_per_gas: Wei,
    pub max_priority_fee_per_gas: Wei,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub request: TransactionRequest,
    pub raw: Vec<u8>,
}

/// Ordered transactions submitted together for a single target block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBundle {
    pub kind: BundleKind,
    pub target_block: u64,
    pub transactions: Vec<SignedTransaction>,
}
