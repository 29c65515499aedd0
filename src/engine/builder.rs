// Bundle builder - turns the current phase into a signed single-transaction bundle

use std::sync::Arc;

use crate::config::{BundlerConfig, FeesConfig};
use crate::error::BuildError;
use crate::external::{RegistrarProxy, Signer};
use crate::types::{
    BundleKind, Commitment, Phase, Registration, SignedBundle, TransactionRequest, Wei,
};

/// Fixed gas parameters for every bundle of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeParams {
    pub max_fee_per_gas: Wei,
    pub max_priority_fee_per_gas: Wei,
    pub commit_gas_limit: u64,
    pub register_gas_limit: u64,
}

impl From<&FeesConfig> for FeeParams {
    fn from(fees: &FeesConfig) -> Self {
        Self {
            max_fee_per_gas: fees.max_fee_per_gas(),
            max_priority_fee_per_gas: fees.max_priority_fee_per_gas(),
            commit_gas_limit: fees.commit_gas_limit,
            register_gas_limit: fees.register_gas_limit,
        }
    }
}

pub struct BundleBuilder {
    registrar: Arc<dyn RegistrarProxy>,
    signer: Arc<dyn Signer>,
    chain_id: u64,
    fees: FeeParams,
}

impl BundleBuilder {
    pub fn new(
        registrar: Arc<dyn RegistrarProxy>,
        signer: Arc<dyn Signer>,
        chain_id: u64,
        fees: FeeParams,
    ) -> Self {
        Self {
            registrar,
            signer,
            chain_id,
            fees,
        }
    }

    pub fn from_config(
        registrar: Arc<dyn RegistrarProxy>,
        signer: Arc<dyn Signer>,
        config: &BundlerConfig,
    ) -> Self {
        Self::new(
            registrar,
            signer,
            config.registrar.chain_id,
            FeeParams::from(&config.fees),
        )
    }

    /// Unsigned transaction a bundle built from `phase` carries
    pub fn transaction_for(
        &self,
        phase: Phase,
        registration: &Registration,
        commitment: &Commitment,
    ) -> Result<TransactionRequest, BuildError> {
        let kind = BundleKind::for_phase(phase).ok_or(BuildError::NoBundleForPhase(phase))?;
        let (data, value, gas_limit) = match kind {
            BundleKind::Commit => (
                self.registrar.encode_commit(commitment),
                0,
                self.fees.commit_gas_limit,
            ),
            BundleKind::Register => (
                self.registrar.encode_register(registration),
                registration.price,
                self.fees.register_gas_limit,
            ),
        };

        Ok(TransactionRequest {
            chain_id: self.chain_id,
            to: self.registrar.address(),
            data,
            value,
            gas_limit,
            max_fee_per_gas: self.fees.max_fee_per_gas,
            max_priority_fee_per_gas: self.fees.max_priority_fee_per_gas,
        })
    }

    /// Build and sign the bundle for `phase` addressed to `target_block`.
    /// Never mutates the registration; repeated calls encode identical calldata and value.
    pub fn build(
        &self,
        phase: Phase,
        registration: &Registration,
        commitment: &Commitment,
        target_block: u64,
    ) -> Result<SignedBundle, BuildError> {
        let request = self.transaction_for(phase, registration, commitment)?;
        let kind = BundleKind::for_phase(phase).ok_or(BuildError::NoBundleForPhase(phase))?;
        let signed = self.signer.sign_transaction(&request)?;

        tracing::debug!(
            kind = %kind,
            target_block = target_block,
            gas_limit = request.gas_limit,
            value = %request.value,
            "Built bundle"
        );

        Ok(SignedBundle {
            kind,
            target_block,
            transactions: vec![signed],
        })
    }
}
