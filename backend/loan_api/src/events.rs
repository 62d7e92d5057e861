//! Outbound notification payloads.
//!
//! These are what the webhook receiver sees when a loan completes funding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// All notification kinds the service emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A loan reached its principal; sent once per investor.
    LoanFunded,
}

impl EventKind {
    /// Short identifier, also sent as the `X-Loan-Event` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoanFunded => "loan_funded",
        }
    }
}

/// A single investor notification waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundedNotification {
    pub event: EventKind,
    pub investor_id: String,
    pub loan_id: String,
    /// `None` while the loan has no agreement letter yet.
    pub agreement_reference: Option<String>,
    pub queued_at: DateTime<Utc>,
}

impl FundedNotification {
    pub fn new(investor_id: &str, loan_id: &str, agreement_reference: &str) -> Self {
        Self {
            event: EventKind::LoanFunded,
            investor_id: investor_id.to_string(),
            loan_id: loan_id.to_string(),
            agreement_reference: (!agreement_reference.is_empty())
                .then(|| agreement_reference.to_string()),
            queued_at: Utc::now(),
        }
    }
}
