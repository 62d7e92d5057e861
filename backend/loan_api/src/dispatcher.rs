//! Background delivery of funding notifications.
//!
//! The protocol hands notifications to [`DispatchNotifier`], which only
//! enqueues them. A single long-running [`run`] task drains the queue and
//! POSTs each one through [`webhook::deliver`], so a slow receiver never holds
//! up an investment request.

use std::sync::Arc;

use async_trait::async_trait;
use loan_protocol::{Notifier, NotifyError};
use reqwest::Client;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::events::FundedNotification;
use crate::webhook;

/// [`Notifier`] that enqueues onto a bounded channel without waiting.
#[derive(Clone)]
pub struct DispatchNotifier {
    tx: mpsc::Sender<FundedNotification>,
}

/// Create a notifier and the queue its worker reads from.
pub fn channel(capacity: usize) -> (DispatchNotifier, mpsc::Receiver<FundedNotification>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (DispatchNotifier { tx }, rx)
}

#[async_trait]
impl Notifier for DispatchNotifier {
    async fn notify(
        &self,
        investor_id: &str,
        loan_id: &str,
        agreement_reference: &str,
    ) -> Result<(), NotifyError> {
        let notification = FundedNotification::new(investor_id, loan_id, agreement_reference);
        self.tx.try_send(notification).map_err(|e| match e {
            TrySendError::Full(_) => NotifyError::QueueFull,
            TrySendError::Closed(_) => NotifyError::QueueClosed,
        })
    }
}

pub struct DispatcherState {
    pub client: Client,
    pub webhook_url: String,
    pub max_attempts: u32,
}

/// Deliver queued notifications until shutdown.
///
/// On cancellation the queue is closed and whatever is already in it is still
/// delivered; the caller bounds how long that may take.
pub async fn run(
    state: Arc<DispatcherState>,
    mut rx: mpsc::Receiver<FundedNotification>,
    shutdown: CancellationToken,
) {
    info!("Notification dispatcher started, target: {}", state.webhook_url);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(notification) => dispatch_one(&state, &notification).await,
                None => {
                    info!("Notification queue closed");
                    return;
                }
            },
        }
    }

    rx.close();
    let mut drained = 0usize;
    while let Some(notification) = rx.recv().await {
        dispatch_one(&state, &notification).await;
        drained += 1;
    }
    info!("Notification dispatcher stopped ({drained} drained on shutdown)");
}

async fn dispatch_one(state: &DispatcherState, notification: &FundedNotification) {
    let lag = chrono::Utc::now() - notification.queued_at;
    if lag.num_seconds() > 60 {
        warn!(
            "Notification for investor {} waited {}s in queue",
            notification.investor_id,
            lag.num_seconds()
        );
    }

    match webhook::deliver(
        &state.client,
        &state.webhook_url,
        notification,
        state.max_attempts,
    )
    .await
    {
        Ok(()) => debug!(
            "Notified investor {} about loan {}",
            notification.investor_id, notification.loan_id
        ),
        Err(e) => error!(
            "Dropping notification for investor {} on loan {}: {e}",
            notification.investor_id, notification.loan_id
        ),
    }
}
