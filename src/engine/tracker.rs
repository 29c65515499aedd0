// Inclusion tracking - maps relay answers to verdicts and decides which rejections are fatal

use regex::Regex;

use crate::types::{InclusionVerdict, RelayResolution, RelayResponse};

/// Rejection reasons that will never succeed on retry
const NON_RETRYABLE_PATTERNS: &[&str] = &[
    r"(?i)not available",
    r"(?i)nonce too low",
    r"(?i)nonce (already )?(used|consumed)",
    r"(?i)insufficient funds",
];

/// Classify a raw relay answer. An explicit error wins over any resolution code.
pub fn classify(response: &RelayResponse) -> InclusionVerdict {
    if let Some(reason) = &response.error {
        return InclusionVerdict::Error(reason.clone());
    }
    match response.resolution {
        Some(RelayResolution::BundleIncluded) => InclusionVerdict::Included,
        Some(RelayResolution::AccountNonceTooLow) => InclusionVerdict::AccountNonceTooLow,
        Some(RelayResolution::BlockPassedWithoutInclusion)
        | Some(RelayResolution::AccountNonceTooHigh)
        | None => InclusionVerdict::NotIncluded,
    }
}

/// What to do after a rejected attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionAction {
    Retry,
    Escalate(String),
}

/// Tracks consecutive relay rejections
#[derive(Debug)]
pub struct RejectionPolicy {
    fatal_patterns: Vec<Regex>,
    max_identical: u32,
    last_reason: Option<String>,
    streak: u32,
}

impl RejectionPolicy {
    pub fn new(max_identical: u32) -> Self {
        Self {
            fatal_patterns: NON_RETRYABLE_PATTERNS
                .iter()
                .filter_map(|pattern| Regex::new(pattern).ok())
                .collect(),
            max_identical: max_identical.max(1),
            last_reason: None,
            streak: 0,
        }
    }

    /// Record a rejection and decide whether the engine may retry
    pub fn observe(&mut self, reason: &str) -> RejectionAction {
        if self.fatal_patterns.iter().any(|re| re.is_match(reason)) {
            return RejectionAction::Escalate(format!("non-retryable rejection: {reason}"));
        }

        if self.last_reason.as_deref() == Some(reason) {
            self.streak += 1;
        } else {
            self.last_reason = Some(reason.to_string());
            self.streak = 1;
        }

        if self.streak >= self.max_identical {
            RejectionAction::Escalate(format!(
                "relay rejected {} consecutive attempts with: {reason}",
                self.streak
            ))
        } else {
            RejectionAction::Retry
        }
    }

    /// Any non-rejection verdict breaks the streak
    pub fn reset(&mut self) {
        self.last_reason = None;
        self.streak = 0;
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}
