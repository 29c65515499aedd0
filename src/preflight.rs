// Preflight - validates the request and fixes every registration parameter
// before the first bundle is built

use tracing::info;

use crate::config::RegistrarConfig;
use crate::error::PreconditionError;
use crate::external::{RegistrarProxy, Signer};
use crate::types::{Commitment, Registration, Wei, B256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRequest {
    pub name: String,
    /// Falls back to the configured default duration
    pub duration: Option<u64>,
}

impl RegistrationRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: u64) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Normalized form of a name label
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// 32 random bytes used to blind the commitment
pub fn generate_secret() -> B256 {
    B256(rand::random())
}

/// Quoted price plus the configured buffer against price movement
pub fn buffered_price(quote: Wei, buffer_percent: u32) -> Wei {
    quote.saturating_mul(100 + Wei::from(buffer_percent)) / 100
}

/// Check preconditions and assemble the immutable registration and its commitment
pub async fn prepare(
    request: &RegistrationRequest,
    registrar: &dyn RegistrarProxy,
    signer: &dyn Signer,
    config: &RegistrarConfig,
    secret: B256,
) -> Result<(Registration, Commitment), PreconditionError> {
    let name = normalize_name(&request.name);
    if name.chars().count() < config.min_name_length {
        return Err(PreconditionError::NameTooShort {
            name,
            min: config.min_name_length,
        });
    }

    let duration = request.duration.unwrap_or(config.default_duration_secs);
    if duration == 0 {
        return Err(PreconditionError::InvalidDuration);
    }

    if !registrar.available(&name).await? {
        return Err(PreconditionError::NameUnavailable { name });
    }

    let quote = registrar.rent_price(&name, duration).await?;
    let price = buffered_price(quote, config.price_buffer_percent);
    let min_commitment_age = registrar.min_commitment_age().await?;

    let owner = signer.address();
    let resolver = config.resolver_address;
    let commitment = registrar
        .make_commitment(&name, owner, secret, resolver, owner)
        .await?;

    info!(
        name = %name,
        owner = %owner,
        duration,
        quote = %quote,
        price = %price,
        min_commitment_age_secs = min_commitment_age.as_secs(),
        commitment = %commitment,
        "Prepared registration"
    );

    Ok((
        Registration {
            name,
            secret,
            owner,
            resolver,
            duration,
            price,
            min_commitment_age,
        },
        commitment,
    ))
}
