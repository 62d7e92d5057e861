//! # Types
//!
//! The loan aggregate and the child records attached to it over its lifecycle.
//!
//! ## Design decisions
//!
//! ### Aggregate / child record split
//!
//! A [`Loan`] owns at most one [`Approval`], at most one [`Disbursement`] and an
//! ordered list of [`Investment`]s. Child records are validated by their own
//! constructors, independent of the loan's state; the aggregate then decides
//! whether attaching them is legal.
//!
//! ### Status as a Finite-State Machine
//!
//! [`LoanState`] enforces a strict forward-only lifecycle:
//!
//! ```text
//! Proposed ──► Approved ──► Invested ──► Disbursed
//! ```
//!
//! No skipping, no backward transitions. A failed guard leaves the aggregate
//! untouched.
//!
//! ### Money
//!
//! Amounts are [`Decimal`] restricted to [`MINOR_UNIT_SCALE`] fractional
//! digits, so the "fully funded" check is an exact equality.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::{LoanError, Result};
use crate::id;

/// Fractional digits allowed on money amounts (cents).
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Lifecycle state of a loan.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanState {
    /// Created, waiting for field validation.
    Proposed,
    /// Validated; accepting investments.
    Approved,
    /// Fully funded; waiting for disbursement.
    Invested,
    /// Funds handed to the borrower.
    Disbursed,
}

impl LoanState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "PROPOSED",
            Self::Approved => "APPROVED",
            Self::Invested => "INVESTED",
            Self::Disbursed => "DISBURSED",
        }
    }

    /// The only state reachable from `self`, if any.
    pub fn next(&self) -> Option<LoanState> {
        match self {
            Self::Proposed => Some(Self::Approved),
            Self::Approved => Some(Self::Invested),
            Self::Invested => Some(Self::Disbursed),
            Self::Disbursed => None,
        }
    }
}

impl fmt::Display for LoanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanState {
    type Err = LoanError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PROPOSED" => Ok(Self::Proposed),
            "APPROVED" => Ok(Self::Approved),
            "INVESTED" => Ok(Self::Invested),
            "DISBURSED" => Ok(Self::Disbursed),
            other => Err(LoanError::Validation(format!("unknown loan state: {other}"))),
        }
    }
}

/// Field validation of a proposed loan.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Approval {
    pub loan_id: String,
    /// Picture proving the borrower was visited.
    pub proof_picture_url: String,
    pub field_validator_id: String,
    pub approval_date: NaiveDate,
}

impl Approval {
    pub fn new(
        loan_id: &str,
        proof_picture_url: &str,
        field_validator_id: &str,
        approval_date: NaiveDate,
    ) -> Result<Self> {
        require_non_empty(loan_id, "loan ID")?;
        require_non_empty(proof_picture_url, "proof picture URL")?;
        require_non_empty(field_validator_id, "field validator ID")?;

        Ok(Self {
            loan_id: loan_id.to_string(),
            proof_picture_url: proof_picture_url.to_string(),
            field_validator_id: field_validator_id.to_string(),
            approval_date,
        })
    }
}

/// A single investor's contribution toward a loan's principal.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub id: String,
    pub loan_id: String,
    pub investor_id: String,
    pub amount: Decimal,
    pub invested_at: DateTime<Utc>,
}

impl Investment {
    pub fn new(loan_id: &str, investor_id: &str, amount: Decimal) -> Result<Self> {
        require_non_empty(loan_id, "loan ID")?;
        require_non_empty(investor_id, "investor ID")?;
        require_money(amount, "investment amount")?;

        Ok(Self {
            id: id::new_investment_id(),
            loan_id: loan_id.to_string(),
            investor_id: investor_id.to_string(),
            amount,
            invested_at: Utc::now(),
        })
    }
}

/// Hand-over of the funded principal to the borrower.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Disbursement {
    pub loan_id: String,
    /// Loan agreement signed by the borrower.
    pub agreement_document_url: String,
    pub field_officer_id: String,
    pub disbursement_date: NaiveDate,
}

impl Disbursement {
    pub fn new(
        loan_id: &str,
        agreement_document_url: &str,
        field_officer_id: &str,
        disbursement_date: NaiveDate,
    ) -> Result<Self> {
        require_non_empty(loan_id, "loan ID")?;
        require_non_empty(agreement_document_url, "agreement document URL")?;
        require_non_empty(field_officer_id, "field officer ID")?;

        Ok(Self {
            loan_id: loan_id.to_string(),
            agreement_document_url: agreement_document_url.to_string(),
            field_officer_id: field_officer_id.to_string(),
            disbursement_date,
        })
    }
}

/// Full representation of a loan and everything attached to it.
///
/// Investments are kept in funding order. Their sum never exceeds
/// `principal_amount`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: String,
    pub borrower_id: String,
    pub principal_amount: Decimal,
    /// Interest rate charged to the borrower.
    pub rate: Decimal,
    /// Return on investment paid to investors.
    pub roi: Decimal,
    pub state: LoanState,
    pub agreement_letter_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub approval: Option<Approval>,
    pub investments: Vec<Investment>,
    pub disbursement: Option<Disbursement>,
}

impl Loan {
    /// Build a new loan in `PROPOSED` state.
    pub fn new(
        borrower_id: &str,
        principal_amount: Decimal,
        rate: Decimal,
        roi: Decimal,
    ) -> Result<Self> {
        require_non_empty(borrower_id, "borrower ID")?;
        require_money(principal_amount, "principal amount")?;
        if rate < Decimal::ZERO {
            return Err(LoanError::Validation("rate cannot be negative".to_string()));
        }
        if roi < Decimal::ZERO {
            return Err(LoanError::Validation("ROI cannot be negative".to_string()));
        }

        let now = Utc::now();
        Ok(Self {
            id: id::new_loan_id(),
            borrower_id: borrower_id.to_string(),
            principal_amount,
            rate,
            roi,
            state: LoanState::Proposed,
            agreement_letter_url: None,
            created_at: now,
            updated_at: now,
            approval: None,
            investments: Vec::new(),
            disbursement: None,
        })
    }

    // ── Guards ───────────────────────────────────────────────────────

    pub fn can_approve(&self) -> Result<()> {
        self.require_state(LoanState::Proposed, "approve")
    }

    pub fn can_add_investment(&self, amount: Decimal) -> Result<()> {
        self.require_state(LoanState::Approved, "invest")?;

        let remaining = self.remaining_capacity();
        if amount > remaining {
            return Err(LoanError::FundingLimitExceeded {
                requested: amount,
                remaining,
            });
        }
        Ok(())
    }

    pub fn can_disburse(&self) -> Result<()> {
        self.require_state(LoanState::Invested, "disburse")
    }

    // ── Transitions ──────────────────────────────────────────────────

    pub fn approve(&mut self, approval: Approval) -> Result<()> {
        self.can_approve()?;

        self.state = LoanState::Approved;
        self.approval = Some(approval);
        self.touch();
        Ok(())
    }

    /// Append an investment. Moves the loan to `INVESTED` when the cumulative
    /// amount reaches the principal exactly.
    pub fn add_investment(&mut self, investment: Investment) -> Result<()> {
        self.can_add_investment(investment.amount)?;

        self.investments.push(investment);
        self.touch();

        if self.total_invested() == self.principal_amount {
            self.state = LoanState::Invested;
        }
        Ok(())
    }

    pub fn disburse(&mut self, disbursement: Disbursement) -> Result<()> {
        self.can_disburse()?;

        self.state = LoanState::Disbursed;
        self.agreement_letter_url = Some(disbursement.agreement_document_url.clone());
        self.disbursement = Some(disbursement);
        self.touch();
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn total_invested(&self) -> Decimal {
        self.investments.iter().map(|i| i.amount).sum()
    }

    pub fn remaining_capacity(&self) -> Decimal {
        self.principal_amount - self.total_invested()
    }

    /// Distinct investor IDs, in the order they first funded the loan.
    pub fn investor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for inv in &self.investments {
            if !ids.contains(&inv.investor_id) {
                ids.push(inv.investor_id.clone());
            }
        }
        ids
    }

    fn require_state(&self, expected: LoanState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(LoanError::InvalidStateTransition {
                state: self.state,
                operation,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        // Keep updated_at monotonic even if the wall clock steps backwards.
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(LoanError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

fn require_money(amount: Decimal, field: &str) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(LoanError::Validation(format!(
            "{field} must be greater than zero"
        )));
    }
    if amount.normalize().scale() > MINOR_UNIT_SCALE {
        return Err(LoanError::Validation(format!(
            "{field} has more than {MINOR_UNIT_SCALE} decimal places"
        )));
    }
    Ok(())
}
