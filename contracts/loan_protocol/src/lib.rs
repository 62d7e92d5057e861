//! # Loan Protocol
//!
//! Root crate of the peer-to-peer loan lifecycle. [`LoanProtocol`] is the
//! lifecycle coordinator; its entry points cover the full loan lifecycle:
//!
//! | Phase        | Entry Point(s)                                   |
//! |--------------|--------------------------------------------------|
//! | Proposal     | [`LoanProtocol::create_loan`]                    |
//! | Validation   | [`LoanProtocol::approve_loan`]                   |
//! | Funding      | [`LoanProtocol::add_investment`]                 |
//! | Disbursement | [`LoanProtocol::disburse_loan`]                  |
//! | Queries      | `get_loan`, `list_loans`, `list_investments`, `investment_summary` |
//!
//! ## Architecture
//!
//! State-machine rules live on [`Loan`]. Storage is behind the
//! [`LedgerStore`] trait and investor notifications behind [`Notifier`]. This
//! file only sequences them:
//!
//! 1. load the aggregate
//! 2. build and validate the child record
//! 3. apply the transition
//! 4. persist the child record
//! 5. persist the aggregate
//! 6. on the transition to `INVESTED`, notify every investor (best-effort)
//!
//! Steps 1-5 run under a per-loan lock ([`KeyedLocks`]), so concurrent
//! investments into the same loan behave as if applied one after another and
//! the funding limit can never be bypassed.

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

mod context;
mod errors;
mod id;
mod locks;
mod notify;
mod storage;
mod types;

#[cfg(test)]
mod test_funding;
#[cfg(test)]
mod test_lifecycle;

pub use context::Context;
pub use errors::{LoanError, NotifyError, Result};
pub use id::{new_investment_id, new_loan_id};
pub use locks::{KeyedLocks, DEFAULT_SHARDS};
pub use notify::{LogNotifier, Notifier};
pub use storage::{InMemoryLedgerStore, LedgerStore, Page};
pub use types::{Approval, Disbursement, Investment, Loan, LoanState, MINOR_UNIT_SCALE};

/// Investments of a loan together with how far it is funded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InvestmentSummary {
    pub investments: Vec<Investment>,
    pub total_invested: Decimal,
    pub principal_amount: Decimal,
}

pub struct LoanProtocol {
    store: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    locks: KeyedLocks,
}

impl LoanProtocol {
    pub fn new(store: Arc<dyn LedgerStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_locks(store, notifier, KeyedLocks::default())
    }

    pub fn with_locks(
        store: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            store,
            notifier,
            locks,
        }
    }

    // ─────────────────────────────────────────────────────────
    // Proposal
    // ─────────────────────────────────────────────────────────

    /// Register a new loan in `PROPOSED` state.
    ///
    /// Nothing is stored if validation fails.
    pub async fn create_loan(
        &self,
        ctx: &Context,
        borrower_id: &str,
        principal_amount: Decimal,
        rate: Decimal,
        roi: Decimal,
    ) -> Result<Loan> {
        let loan = Loan::new(borrower_id, principal_amount, rate, roi)?;

        ctx.check()?;
        self.store.save(&loan).await?;

        info!(loan_id = %loan.id, borrower_id, %principal_amount, "Loan proposed");
        Ok(loan)
    }

    // ─────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────

    pub async fn get_loan(&self, ctx: &Context, id: &str) -> Result<Loan> {
        ctx.check()?;
        self.store.get(id).await
    }

    pub async fn list_loans(
        &self,
        ctx: &Context,
        page: usize,
        page_size: usize,
    ) -> Result<Page<Loan>> {
        ctx.check()?;
        let page = self.store.list(page, page_size).await?;
        debug!("Listed {} of {} loans", page.items.len(), page.total);
        Ok(page)
    }

    pub async fn list_investments(
        &self,
        ctx: &Context,
        loan_id: &str,
    ) -> Result<Vec<Investment>> {
        ctx.check()?;
        self.store.list_investments_by_loan(loan_id).await
    }

    /// Investments of a loan plus its total invested amount and principal,
    /// read from a single snapshot.
    pub async fn investment_summary(
        &self,
        ctx: &Context,
        loan_id: &str,
    ) -> Result<InvestmentSummary> {
        ctx.check()?;
        let loan = self.store.get(loan_id).await?;
        Ok(InvestmentSummary {
            total_invested: loan.total_invested(),
            principal_amount: loan.principal_amount,
            investments: loan.investments,
        })
    }

    // ─────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────

    /// `PROPOSED -> APPROVED`.
    pub async fn approve_loan(
        &self,
        ctx: &Context,
        loan_id: &str,
        proof_picture_url: &str,
        field_validator_id: &str,
        approval_date: NaiveDate,
    ) -> Result<Loan> {
        let _guard = self.locks.lock(loan_id).await;

        ctx.check()?;
        let mut loan = self.store.get(loan_id).await?;

        let approval =
            Approval::new(loan_id, proof_picture_url, field_validator_id, approval_date)?;
        loan.approve(approval.clone())?;

        ctx.check()?;
        self.store.save_approval(&approval).await?;
        self.store.save(&loan).await?;

        info!(loan_id, field_validator_id, "Loan approved");
        Ok(loan)
    }

    /// Record an investment into an `APPROVED` loan.
    ///
    /// Rejects, without recording anything, an amount that would push the
    /// total above the principal. When the total reaches the principal
    /// exactly the loan moves to `INVESTED` and every investor is notified.
    pub async fn add_investment(
        &self,
        ctx: &Context,
        loan_id: &str,
        investor_id: &str,
        amount: Decimal,
    ) -> Result<Investment> {
        let (loan, investment) = {
            let _guard = self.locks.lock(loan_id).await;

            ctx.check()?;
            let mut loan = self.store.get(loan_id).await?;

            let investment = Investment::new(loan_id, investor_id, amount)?;
            loan.add_investment(investment.clone())?;

            ctx.check()?;
            self.store.save_investment(&investment).await?;
            self.store.save(&loan).await?;

            info!(
                loan_id,
                investment_id = %investment.id,
                investor_id,
                %amount,
                total_invested = %loan.total_invested(),
                state = %loan.state,
                "Investment recorded"
            );
            (loan, investment)
        };

        // Only the call that completed funding gets here with INVESTED; any
        // later call fails the APPROVED guard above.
        if loan.state == LoanState::Invested {
            self.notify_investors(&loan).await;
        }

        Ok(investment)
    }

    /// `INVESTED -> DISBURSED`.
    pub async fn disburse_loan(
        &self,
        ctx: &Context,
        loan_id: &str,
        agreement_document_url: &str,
        field_officer_id: &str,
        disbursement_date: NaiveDate,
    ) -> Result<Loan> {
        let _guard = self.locks.lock(loan_id).await;

        ctx.check()?;
        let mut loan = self.store.get(loan_id).await?;

        let disbursement = Disbursement::new(
            loan_id,
            agreement_document_url,
            field_officer_id,
            disbursement_date,
        )?;
        loan.disburse(disbursement.clone())?;

        ctx.check()?;
        self.store.save_disbursement(&disbursement).await?;
        self.store.save(&loan).await?;

        info!(loan_id, field_officer_id, "Loan disbursed");
        Ok(loan)
    }

    // ─────────────────────────────────────────────────────────
    // Notifications
    // ─────────────────────────────────────────────────────────

    /// Notify each distinct investor once. Failures are logged and dropped;
    /// they never undo the funding.
    async fn notify_investors(&self, loan: &Loan) {
        let agreement = loan.agreement_letter_url.as_deref().unwrap_or_default();
        let investors = loan.investor_ids();
        info!(loan_id = %loan.id, investors = investors.len(), "Loan fully funded");

        for investor_id in &investors {
            if let Err(e) = self.notifier.notify(investor_id, &loan.id, agreement).await {
                warn!(loan_id = %loan.id, investor_id = investor_id.as_str(), "Failed to notify investor: {e}");
            }
        }
    }
}
