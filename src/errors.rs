//! Error types for the LudoBet match engine
//!
//! Per-concern enums with a root error for the binary's surface. Illegal
//! game actions (wrong turn, wrong phase) are deliberately NOT errors; the
//! session ignores them without mutating state.

use crate::amount::ParseAmountError;
use thiserror::Error;

/// Root error type for ludobet operations.
#[derive(Debug, Error)]
pub enum LudoBetError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("match error: {0}")]
    Match(#[from] MatchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("missing required field: {0}")]
    MissingRequired(String),
}

/// Ledger contract errors. `Unavailable` is the retryable class; settlement
/// keeps retrying it under the already-finished idempotency guard.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance for user {user_id}: have {balance}, need {required}")]
    InsufficientBalance {
        user_id: u64,
        balance: String,
        required: String,
    },

    #[error("unknown user {0}")]
    UnknownUser(u64),

    #[error("unknown match {0}")]
    UnknownMatch(u64),

    #[error("unknown transaction {0}")]
    UnknownTransaction(u64),

    #[error("username '{0}' already taken")]
    UsernameTaken(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Transient failures that a caller should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}

/// Match creation validation errors. Rejected at the boundary, before any
/// state mutation or broadcast.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("bet amount {amount} outside allowed range [{min}, {max}]")]
    BetOutOfRange {
        amount: String,
        min: String,
        max: String,
    },

    #[error("invalid player count {0}, must be 2, 3 or 4")]
    InvalidPlayerCount(u8),

    #[error("invalid bet amount: {0}")]
    InvalidBetAmount(#[from] ParseAmountError),
}

/// Convenience alias for Results.
pub type LudoBetResult<T> = Result<T, LudoBetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LudoBetError::Ledger(LedgerError::UnknownUser(7));
        assert!(err.to_string().contains("ledger error"));
        assert!(err.to_string().contains("unknown user 7"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LedgerError::Unavailable("down".into()).is_retryable());
        assert!(!LedgerError::UnknownUser(1).is_retryable());
    }
}
