//! Error taxonomy for the loan protocol.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::LoanState;

#[derive(Debug, Error)]
pub enum LoanError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("cannot {operation} a loan in {state} state")]
    InvalidStateTransition {
        state: LoanState,
        operation: &'static str,
    },

    #[error("investment of {requested} would exceed loan principal (remaining {remaining})")]
    FundingLimitExceeded { requested: Decimal, remaining: Decimal },

    #[error("loan not found: {0}")]
    NotFound(String),

    #[error("operation cancelled or deadline exceeded")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, LoanError>;

impl LoanError {
    /// Errors caused by the caller's input or by the loan's current state.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LoanError::Validation(_)
                | LoanError::InvalidStateTransition { .. }
                | LoanError::FundingLimitExceeded { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, LoanError::NotFound(_))
    }
}

/// Failure to hand a funding notification to its channel.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification queue is full")]
    QueueFull,

    #[error("notification queue is closed")]
    QueueClosed,

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}
