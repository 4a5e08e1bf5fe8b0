//! Engine Error Types
//!
//! Every fallible engine, ledger and book operation returns [`EngineError`].
//! Variants are grouped by [`ErrorClass`] so a transport layer can map them
//! onto responses without matching every case.

use crate::core_types::{Amount, UserId};
use thiserror::Error;

/// Engine error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    // === Input Errors ===
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // === Resource Errors ===
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Insufficient shares: required {required}, available {available}")]
    InsufficientShares { required: u64, available: u64 },

    // === Internal Errors ===
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Malformed request or unknown reference. No state change.
    Input,
    /// Not enough cash or shares. No reservation performed.
    Resource,
    /// A defect. The in-flight transaction was discarded.
    Internal,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidOrder(_)
            | EngineError::InvalidSymbol(_)
            | EngineError::InvalidAmount(_)
            | EngineError::UnknownSymbol(_)
            | EngineError::UnknownUser(_)
            | EngineError::AlreadyExists(_) => ErrorClass::Input,
            EngineError::InsufficientFunds { .. } | EngineError::InsufficientShares { .. } => {
                ErrorClass::Resource
            }
            EngineError::InvariantViolation(_) => ErrorClass::Internal,
        }
    }

    /// True for errors that indicate a bug rather than a user mistake.
    #[inline]
    pub fn is_internal(&self) -> bool {
        self.class() == ErrorClass::Internal
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        EngineError::InvariantViolation(msg.into())
    }
}
