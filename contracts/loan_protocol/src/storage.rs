//! # Storage
//!
//! The ledger store holds the authoritative copy of every loan plus side
//! indexes for the child records:
//!
//! | Index            | Key             | Value                      |
//! |------------------|-----------------|----------------------------|
//! | `loans`          | loan ID         | full [`Loan`] snapshot     |
//! | `order`          | insertion index | loan ID (stable list order)|
//! | `approvals`      | loan ID         | [`Approval`]               |
//! | `investments`    | investment ID   | [`Investment`]             |
//! | `disbursements`  | loan ID         | [`Disbursement`]           |
//!
//! ## Locking
//!
//! [`InMemoryLedgerStore`] keeps all of the above behind one
//! `tokio::sync::RwLock`. Every mutating call holds the write lock for its
//! whole read-modify-write; every read holds the read lock and clones a
//! snapshot out. A reader therefore sees either the state before or after a
//! given call, never a half-applied one.
//!
//! Callers get owned snapshots. Mutating a returned [`Loan`] has no effect
//! until it is passed back through [`LedgerStore::save`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::{LoanError, Result};
use crate::types::{Approval, Disbursement, Investment, Loan};

/// One page of loans plus the total number stored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert or replace the full loan snapshot.
    async fn save(&self, loan: &Loan) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Loan>;

    /// 1-based pagination. `page` or `page_size` of zero returns everything;
    /// a page past the end is empty, not an error.
    async fn list(&self, page: usize, page_size: usize) -> Result<Page<Loan>>;

    async fn save_approval(&self, approval: &Approval) -> Result<()>;

    async fn save_investment(&self, investment: &Investment) -> Result<()>;

    async fn save_disbursement(&self, disbursement: &Disbursement) -> Result<()>;

    /// Investments of a loan, in funding order.
    async fn list_investments_by_loan(&self, loan_id: &str) -> Result<Vec<Investment>>;

    async fn get_investment(&self, id: &str) -> Result<Investment>;

    async fn get_approval(&self, loan_id: &str) -> Result<Option<Approval>>;

    async fn get_disbursement(&self, loan_id: &str) -> Result<Option<Disbursement>>;
}

// ── In-memory implementation ─────────────────────────────────────────

#[derive(Default)]
struct Ledger {
    loans: HashMap<String, Loan>,
    order: Vec<String>,
    approvals: HashMap<String, Approval>,
    investments: HashMap<String, Investment>,
    disbursements: HashMap<String, Disbursement>,
}

impl Ledger {
    fn loan_mut(&mut self, id: &str) -> Result<&mut Loan> {
        self.loans
            .get_mut(id)
            .ok_or_else(|| LoanError::NotFound(id.to_string()))
    }
}

/// Process-local store. Contents are lost when the process exits.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Ledger>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn save(&self, loan: &Loan) -> Result<()> {
        let mut ledger = self.inner.write().await;
        if ledger.loans.insert(loan.id.clone(), loan.clone()).is_none() {
            ledger.order.push(loan.id.clone());
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Loan> {
        let ledger = self.inner.read().await;
        ledger
            .loans
            .get(id)
            .cloned()
            .ok_or_else(|| LoanError::NotFound(id.to_string()))
    }

    async fn list(&self, page: usize, page_size: usize) -> Result<Page<Loan>> {
        let ledger = self.inner.read().await;
        let total = ledger.order.len();

        let ids: &[String] = if page == 0 || page_size == 0 {
            &ledger.order
        } else {
            let start = (page - 1).saturating_mul(page_size);
            if start >= total {
                &[]
            } else {
                let end = start.saturating_add(page_size).min(total);
                &ledger.order[start..end]
            }
        };

        let items = ids
            .iter()
            .filter_map(|id| ledger.loans.get(id).cloned())
            .collect();
        Ok(Page { items, total })
    }

    async fn save_approval(&self, approval: &Approval) -> Result<()> {
        let mut ledger = self.inner.write().await;
        ledger.loan_mut(&approval.loan_id)?.approval = Some(approval.clone());
        ledger
            .approvals
            .insert(approval.loan_id.clone(), approval.clone());
        Ok(())
    }

    async fn save_investment(&self, investment: &Investment) -> Result<()> {
        let mut ledger = self.inner.write().await;
        let loan = ledger.loan_mut(&investment.loan_id)?;
        match loan.investments.iter_mut().find(|i| i.id == investment.id) {
            Some(existing) => *existing = investment.clone(),
            None => loan.investments.push(investment.clone()),
        }
        ledger
            .investments
            .insert(investment.id.clone(), investment.clone());
        Ok(())
    }

    async fn save_disbursement(&self, disbursement: &Disbursement) -> Result<()> {
        let mut ledger = self.inner.write().await;
        ledger.loan_mut(&disbursement.loan_id)?.disbursement = Some(disbursement.clone());
        ledger
            .disbursements
            .insert(disbursement.loan_id.clone(), disbursement.clone());
        Ok(())
    }

    async fn list_investments_by_loan(&self, loan_id: &str) -> Result<Vec<Investment>> {
        let ledger = self.inner.read().await;
        ledger
            .loans
            .get(loan_id)
            .map(|loan| loan.investments.clone())
            .ok_or_else(|| LoanError::NotFound(loan_id.to_string()))
    }

    async fn get_investment(&self, id: &str) -> Result<Investment> {
        let ledger = self.inner.read().await;
        ledger
            .investments
            .get(id)
            .cloned()
            .ok_or_else(|| LoanError::NotFound(id.to_string()))
    }

    async fn get_approval(&self, loan_id: &str) -> Result<Option<Approval>> {
        let ledger = self.inner.read().await;
        if !ledger.loans.contains_key(loan_id) {
            return Err(LoanError::NotFound(loan_id.to_string()));
        }
        Ok(ledger.approvals.get(loan_id).cloned())
    }

    async fn get_disbursement(&self, loan_id: &str) -> Result<Option<Disbursement>> {
        let ledger = self.inner.read().await;
        if !ledger.loans.contains_key(loan_id) {
            return Err(LoanError::NotFound(loan_id.to_string()));
        }
        Ok(ledger.disbursements.get(loan_id).cloned())
    }
}
