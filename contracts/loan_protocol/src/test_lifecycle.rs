use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use crate::invariants::{assert_all_loan_invariants, assert_loan_progression};
use crate::test_notifications::setup;
use crate::{Context, InMemoryLedgerStore, LedgerStore, LoanError, LoanProtocol, LoanState, LogNotifier};

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[tokio::test]
async fn test_full_lifecycle() {
    let (protocol, notifier) = setup();
    let ctx = Context::background();

    let proposed = protocol
        .create_loan(&ctx, "borrower-1", dec!(1000), dec!(0.1), dec!(0.08))
        .await
        .unwrap();
    assert_eq!(proposed.state, LoanState::Proposed);
    assert_all_loan_invariants(&proposed);

    let approved = protocol
        .approve_loan(&ctx, &proposed.id, "p.jpg", "v1", today())
        .await
        .unwrap();
    assert_eq!(approved.state, LoanState::Approved);
    let approval = approved.approval.as_ref().unwrap();
    assert_eq!(approval.proof_picture_url, "p.jpg");
    assert_eq!(approval.field_validator_id, "v1");
    assert_loan_progression(&proposed, &approved);

    protocol
        .add_investment(&ctx, &proposed.id, "i1", dec!(600))
        .await
        .unwrap();
    let partial = protocol.get_loan(&ctx, &proposed.id).await.unwrap();
    assert_eq!(partial.state, LoanState::Approved);
    assert!(notifier.sent().is_empty());
    assert_loan_progression(&approved, &partial);

    protocol
        .add_investment(&ctx, &proposed.id, "i2", dec!(400))
        .await
        .unwrap();
    let invested = protocol.get_loan(&ctx, &proposed.id).await.unwrap();
    assert_eq!(invested.state, LoanState::Invested);
    assert_eq!(invested.total_invested(), dec!(1000));
    assert_eq!(notifier.investors(), vec!["i1", "i2"]);
    assert_loan_progression(&partial, &invested);

    let disbursed = protocol
        .disburse_loan(&ctx, &proposed.id, "a.pdf", "o1", today())
        .await
        .unwrap();
    assert_eq!(disbursed.state, LoanState::Disbursed);
    assert_eq!(disbursed.agreement_letter_url.as_deref(), Some("a.pdf"));
    let disbursement = disbursed.disbursement.as_ref().unwrap();
    assert_eq!(disbursement.field_officer_id, "o1");
    assert_loan_progression(&invested, &disbursed);

    // The stored copy matches what the coordinator returned.
    assert_eq!(protocol.get_loan(&ctx, &proposed.id).await.unwrap(), disbursed);
}

#[tokio::test]
async fn test_invalid_loan_is_not_stored() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let protocol = LoanProtocol::new(store.clone(), Arc::new(LogNotifier));
    let ctx = Context::background();

    let cases = [
        ("", dec!(1000), dec!(0.1), dec!(0.08)),
        ("b", dec!(0), dec!(0.1), dec!(0.08)),
        ("b", dec!(-100), dec!(0.1), dec!(0.08)),
        ("b", dec!(1000), dec!(-0.1), dec!(0.08)),
        ("b", dec!(1000), dec!(0.1), dec!(-0.08)),
    ];
    for (borrower, principal, rate, roi) in cases {
        let err = protocol
            .create_loan(&ctx, borrower, principal, rate, roi)
            .await
            .unwrap_err();
        assert!(matches!(err, LoanError::Validation(_)), "got {err:?}");
    }

    assert_eq!(store.list(0, 0).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_out_of_order_operations_fail_and_leave_loan_unchanged() {
    let (protocol, _) = setup();
    let ctx = Context::background();
    let loan = protocol
        .create_loan(&ctx, "borrower-1", dec!(1000), dec!(0.1), dec!(0.08))
        .await
        .unwrap();

    // Invest and disburse before approval.
    let err = protocol
        .add_investment(&ctx, &loan.id, "i1", dec!(100))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoanError::InvalidStateTransition { state: LoanState::Proposed, .. }
    ));
    let err = protocol
        .disburse_loan(&ctx, &loan.id, "a.pdf", "o1", today())
        .await
        .unwrap_err();
    assert!(matches!(err, LoanError::InvalidStateTransition { .. }));
    assert_eq!(protocol.get_loan(&ctx, &loan.id).await.unwrap(), loan);

    protocol
        .approve_loan(&ctx, &loan.id, "p.jpg", "v1", today())
        .await
        .unwrap();
    let approved = protocol.get_loan(&ctx, &loan.id).await.unwrap();

    // Approving twice fails cleanly instead of double-applying.
    let err = protocol
        .approve_loan(&ctx, &loan.id, "p2.jpg", "v2", today())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoanError::InvalidStateTransition { state: LoanState::Approved, .. }
    ));

    // Disbursing a partially funded loan fails.
    protocol
        .add_investment(&ctx, &loan.id, "i1", dec!(100))
        .await
        .unwrap();
    let err = protocol
        .disburse_loan(&ctx, &loan.id, "a.pdf", "o1", today())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoanError::InvalidStateTransition { state: LoanState::Approved, .. }
    ));

    let current = protocol.get_loan(&ctx, &loan.id).await.unwrap();
    assert_eq!(current.approval, approved.approval);
    assert!(current.disbursement.is_none());
    assert_eq!(current.investments.len(), 1);
}

#[tokio::test]
async fn test_child_validation_errors() {
    let (protocol, _) = setup();
    let ctx = Context::background();
    let loan = protocol
        .create_loan(&ctx, "borrower-1", dec!(1000), dec!(0.1), dec!(0.08))
        .await
        .unwrap();

    let err = protocol
        .approve_loan(&ctx, &loan.id, "", "v1", today())
        .await
        .unwrap_err();
    assert!(matches!(err, LoanError::Validation(_)));
    assert_eq!(
        protocol.get_loan(&ctx, &loan.id).await.unwrap().state,
        LoanState::Proposed
    );

    protocol
        .approve_loan(&ctx, &loan.id, "p.jpg", "v1", today())
        .await
        .unwrap();

    for (investor, amount) in [("", dec!(10)), ("i1", dec!(0)), ("i1", dec!(-5)), ("i1", dec!(0.001))] {
        let err = protocol
            .add_investment(&ctx, &loan.id, investor, amount)
            .await
            .unwrap_err();
        assert!(matches!(err, LoanError::Validation(_)), "got {err:?}");
    }
    assert!(protocol
        .list_investments(&ctx, &loan.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unknown_loan_is_not_found() {
    let (protocol, _) = setup();
    let ctx = Context::background();

    assert!(protocol.get_loan(&ctx, "loan_nope").await.unwrap_err().is_not_found());
    assert!(protocol
        .approve_loan(&ctx, "loan_nope", "p.jpg", "v1", today())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(protocol
        .add_investment(&ctx, "loan_nope", "i1", dec!(10))
        .await
        .unwrap_err()
        .is_not_found());
    assert!(protocol
        .disburse_loan(&ctx, "loan_nope", "a.pdf", "o1", today())
        .await
        .unwrap_err()
        .is_not_found());
    assert!(protocol
        .list_investments(&ctx, "loan_nope")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_cancelled_context_does_no_work() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let protocol = LoanProtocol::new(store.clone(), Arc::new(LogNotifier));
    let live = Context::background();
    let loan = protocol
        .create_loan(&live, "borrower-1", dec!(1000), dec!(0.1), dec!(0.08))
        .await
        .unwrap();

    let token = CancellationToken::new();
    let cancelled = Context::new(token.clone());
    token.cancel();

    assert!(matches!(
        protocol
            .create_loan(&cancelled, "borrower-2", dec!(1000), dec!(0.1), dec!(0.08))
            .await,
        Err(LoanError::Cancelled)
    ));
    assert!(matches!(
        protocol
            .approve_loan(&cancelled, &loan.id, "p.jpg", "v1", today())
            .await,
        Err(LoanError::Cancelled)
    ));
    assert!(matches!(
        protocol.get_loan(&cancelled, &loan.id).await,
        Err(LoanError::Cancelled)
    ));

    assert_eq!(store.list(0, 0).await.unwrap().total, 1);
    assert_eq!(store.get(&loan.id).await.unwrap().state, LoanState::Proposed);
}

#[tokio::test]
async fn test_list_loans_pagination() {
    let (protocol, _) = setup();
    let ctx = Context::background();
    for i in 0..15 {
        protocol
            .create_loan(&ctx, &format!("borrower-{i}"), dec!(100), dec!(0.1), dec!(0.08))
            .await
            .unwrap();
    }

    let page = protocol.list_loans(&ctx, 2, 10).await.unwrap();
    assert_eq!(page.items.len(), 5);
    assert_eq!(page.total, 15);

    let beyond = protocol.list_loans(&ctx, 5, 10).await.unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 15);

    let all = protocol.list_loans(&ctx, 0, 0).await.unwrap();
    assert_eq!(all.items.len(), 15);
    let first_page = protocol.list_loans(&ctx, 1, 10).await.unwrap();
    assert_eq!(first_page.items[..], all.items[..10]);
}

#[tokio::test]
async fn test_investment_summary() {
    let (protocol, _) = setup();
    let ctx = Context::background();
    let loan = protocol
        .create_loan(&ctx, "borrower-1", dec!(1000), dec!(0.1), dec!(0.08))
        .await
        .unwrap();
    protocol
        .approve_loan(&ctx, &loan.id, "p.jpg", "v1", today())
        .await
        .unwrap();
    protocol.add_investment(&ctx, &loan.id, "i1", dec!(250.25)).await.unwrap();
    protocol.add_investment(&ctx, &loan.id, "i2", dec!(100)).await.unwrap();

    let summary = protocol.investment_summary(&ctx, &loan.id).await.unwrap();
    assert_eq!(summary.total_invested, dec!(350.25));
    assert_eq!(summary.principal_amount, dec!(1000));
    let investors: Vec<_> = summary.investments.iter().map(|i| i.investor_id.as_str()).collect();
    assert_eq!(investors, vec!["i1", "i2"]);
}
