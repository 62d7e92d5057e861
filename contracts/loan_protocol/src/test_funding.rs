use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::invariants::{assert_all_loan_invariants, assert_not_over_funded};
use crate::test_notifications::RecordingNotifier;
use crate::{Context, InMemoryLedgerStore, KeyedLocks, LoanError, LoanProtocol, LoanState};

fn setup(shards: usize) -> (Arc<LoanProtocol>, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let protocol = LoanProtocol::with_locks(
        Arc::new(InMemoryLedgerStore::new()),
        notifier.clone(),
        KeyedLocks::new(shards),
    );
    (Arc::new(protocol), notifier)
}

async fn approved_loan(protocol: &LoanProtocol, principal: Decimal) -> String {
    let ctx = Context::background();
    let loan = protocol
        .create_loan(&ctx, "borrower-1", principal, dec!(0.1), dec!(0.08))
        .await
        .unwrap();
    protocol
        .approve_loan(&ctx, &loan.id, "proof.jpg", "validator-1", Utc::now().date_naive())
        .await
        .unwrap();
    loan.id
}

/// Fire one `add_investment` per amount concurrently and collect the results.
async fn invest_concurrently(
    protocol: &Arc<LoanProtocol>,
    loan_id: &str,
    amounts: &[Decimal],
) -> Vec<Result<Decimal, LoanError>> {
    let handles: Vec<_> = amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| {
            let protocol = protocol.clone();
            let loan_id = loan_id.to_string();
            let amount = *amount;
            tokio::spawn(async move {
                protocol
                    .add_investment(&Context::background(), &loan_id, &format!("investor-{i}"), amount)
                    .await
                    .map(|inv| inv.amount)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for h in handles {
        results.push(h.await.unwrap());
    }
    results
}

#[tokio::test]
async fn test_exact_funding_across_many_small_investments() {
    let (protocol, _) = setup(8);
    let ctx = Context::background();
    let loan_id = approved_loan(&protocol, dec!(1)).await;

    for _ in 0..9 {
        protocol.add_investment(&ctx, &loan_id, "i1", dec!(0.1)).await.unwrap();
        let loan = protocol.get_loan(&ctx, &loan_id).await.unwrap();
        assert_eq!(loan.state, LoanState::Approved);
    }
    protocol.add_investment(&ctx, &loan_id, "i1", dec!(0.1)).await.unwrap();

    let loan = protocol.get_loan(&ctx, &loan_id).await.unwrap();
    assert_eq!(loan.state, LoanState::Invested);
    assert_eq!(loan.total_invested(), dec!(1));
}

#[tokio::test]
async fn test_rejected_investment_is_not_recorded() {
    let (protocol, _) = setup(8);
    let ctx = Context::background();
    let loan_id = approved_loan(&protocol, dec!(1000)).await;

    protocol.add_investment(&ctx, &loan_id, "i1", dec!(600)).await.unwrap();
    let err = protocol
        .add_investment(&ctx, &loan_id, "i2", dec!(401))
        .await
        .unwrap_err();
    assert!(matches!(err, LoanError::FundingLimitExceeded { .. }));

    let investments = protocol.list_investments(&ctx, &loan_id).await.unwrap();
    assert_eq!(investments.len(), 1);
    let loan = protocol.get_loan(&ctx, &loan_id).await.unwrap();
    assert_eq!(loan.state, LoanState::Approved);
    assert_eq!(loan.remaining_capacity(), dec!(400));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_investments_never_over_fund() {
    let (protocol, _) = setup(8);
    let loan_id = approved_loan(&protocol, dec!(1000)).await;

    // 15 x 70 = 1050: exactly 14 fit, one must be rejected.
    let amounts = vec![dec!(70); 15];
    let results = invest_concurrently(&protocol, &loan_id, &amounts).await;

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(LoanError::FundingLimitExceeded { .. })))
        .count();
    assert_eq!(ok, 14);
    assert_eq!(rejected, 1);

    let loan = protocol
        .get_loan(&Context::background(), &loan_id)
        .await
        .unwrap();
    assert_eq!(loan.total_invested(), dec!(980));
    assert_eq!(loan.state, LoanState::Approved);
    assert_all_loan_invariants(&loan);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_investments_fill_exactly_once() {
    let (protocol, notifier) = setup(1);
    let loan_id = approved_loan(&protocol, dec!(1000)).await;

    let amounts = vec![dec!(100); 25];
    let results = invest_concurrently(&protocol, &loan_id, &amounts).await;

    let accepted: Decimal = results.iter().filter_map(|r| r.as_ref().ok()).sum();
    assert_eq!(accepted, dec!(1000));
    // Everything after the tenth sees a funded loan.
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            r,
            Err(LoanError::InvalidStateTransition { state: LoanState::Invested, .. })
                | Err(LoanError::FundingLimitExceeded { .. })
        ));
    }

    let loan = protocol
        .get_loan(&Context::background(), &loan_id)
        .await
        .unwrap();
    assert_eq!(loan.state, LoanState::Invested);
    assert_eq!(loan.investments.len(), 10);
    // Exactly one call completed the funding, so each investor hears once.
    assert_eq!(notifier.sent().len(), 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_over_funding() {
    let (protocol, _) = setup(4);
    let loan_id = approved_loan(&protocol, dec!(500)).await;

    let reader = {
        let protocol = protocol.clone();
        let loan_id = loan_id.clone();
        tokio::spawn(async move {
            let ctx = Context::background();
            for _ in 0..200 {
                let loan = protocol.get_loan(&ctx, &loan_id).await.unwrap();
                assert_not_over_funded(&loan);
                tokio::task::yield_now().await;
            }
        })
    };

    let amounts: Vec<Decimal> = (1..=40).map(|i| Decimal::from(i % 7 + 5)).collect();
    invest_concurrently(&protocol, &loan_id, &amounts).await;
    reader.await.unwrap();

    let loan = protocol
        .get_loan(&Context::background(), &loan_id)
        .await
        .unwrap();
    assert_all_loan_invariants(&loan);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_loans_fund_in_parallel() {
    let (protocol, _) = setup(16);
    let a = approved_loan(&protocol, dec!(300)).await;
    let b = approved_loan(&protocol, dec!(300)).await;

    let thirds = [dec!(100), dec!(100), dec!(100)];
    let halves = [dec!(150), dec!(150), dec!(150)];
    let (ra, rb) = tokio::join!(
        invest_concurrently(&protocol, &a, &thirds),
        invest_concurrently(&protocol, &b, &halves),
    );
    assert!(ra.iter().all(|r| r.is_ok()));
    assert_eq!(rb.iter().filter(|r| r.is_ok()).count(), 2);

    let ctx = Context::background();
    for id in [&a, &b] {
        let loan = protocol.get_loan(&ctx, id).await.unwrap();
        assert_eq!(loan.state, LoanState::Invested);
        assert_all_loan_invariants(&loan);
    }
}
