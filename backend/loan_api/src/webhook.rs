//! Webhook client that POSTs funding notifications to an external receiver.
//!
//! ## Resilience
//!
//! * Transport errors, `429 Too Many Requests` and `5xx` responses are retried
//!   with exponential back-off, capped at [`MAX_BACKOFF_MS`].
//! * Any other non-success status is a hard failure and is not retried.
//! * At most `max_attempts` requests are made for a single notification.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::errors::{Result, ServiceError};
use crate::events::FundedNotification;

const INITIAL_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 5_000;

/// Header carrying [`crate::events::EventKind::as_str`].
pub const EVENT_HEADER: &str = "X-Loan-Event";

/// Deliver one notification, retrying transient failures.
pub async fn deliver(
    client: &Client,
    url: &str,
    notification: &FundedNotification,
    max_attempts: u32,
) -> Result<()> {
    let mut backoff = INITIAL_BACKOFF_MS;
    let mut attempt = 1;

    loop {
        let response = client
            .post(url)
            .header(EVENT_HEADER, notification.event.as_str())
            .json(notification)
            .send()
            .await;

        let failure = match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    "Delivered {} for investor {} (attempt {attempt})",
                    notification.event.as_str(),
                    notification.investor_id
                );
                return Ok(());
            }
            Ok(resp) if is_retryable(resp.status()) => {
                ServiceError::Webhook(format!("receiver answered {}", resp.status()))
            }
            Ok(resp) => {
                return Err(ServiceError::Webhook(format!(
                    "receiver answered {}",
                    resp.status()
                )));
            }
            Err(e) => ServiceError::Http(e),
        };

        if attempt >= max_attempts {
            return Err(failure);
        }
        warn!("Webhook delivery failed (attempt {attempt}/{max_attempts}, retry in {backoff}ms): {failure}");
        tokio::time::sleep(Duration::from_millis(backoff)).await;
        backoff = (backoff * 2).min(MAX_BACKOFF_MS);
        attempt += 1;
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}
