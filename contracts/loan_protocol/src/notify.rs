//! Funding-complete notifications.
//!
//! The protocol calls [`Notifier::notify`] once per investor when a loan
//! becomes fully funded. Delivery is best-effort: the caller logs and drops
//! any error.

use async_trait::async_trait;
use tracing::info;

use crate::errors::NotifyError;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        investor_id: &str,
        loan_id: &str,
        agreement_reference: &str,
    ) -> Result<(), NotifyError>;
}

/// Writes the notification to the log and always succeeds.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        investor_id: &str,
        loan_id: &str,
        agreement_reference: &str,
    ) -> Result<(), NotifyError> {
        info!(
            investor_id,
            loan_id, agreement_reference, "Notifying investor: loan fully funded"
        );
        Ok(())
    }
}
