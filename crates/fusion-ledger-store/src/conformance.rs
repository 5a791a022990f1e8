//! Behaviour every backend must share. Each backend's test module calls
//! these against a fresh store.

use std::sync::Arc;

use fusion_ledger_core::{
    ExternalUserId, PurchaseOutcome, SpendOutcome, TransactionType, UserId,
};

use crate::{reconcile_all, reconcile_user, verify_user, Store, StoreError};

async fn new_user(store: &dyn Store, subject: &str) -> UserId {
    store
        .ensure_user(&ExternalUserId::new(subject).unwrap())
        .await
        .unwrap()
        .id
}

async fn assert_consistent(store: &dyn Store, user_id: &UserId) {
    let snapshot = verify_user(store, user_id).await.unwrap();
    assert!(
        snapshot.is_consistent(),
        "projection drifted: {snapshot:?}"
    );
}

pub async fn purchase_then_spend(store: &dyn Store) {
    let user = new_user(store, "user_purchase_spend").await;
    assert_eq!(store.balance(&user).await.unwrap(), 0);

    let outcome = store
        .purchase(&user, 20, "pay_abc", "Standard Pack")
        .await
        .unwrap();
    assert!(matches!(outcome, PurchaseOutcome::Applied(_)));
    assert_eq!(store.balance(&user).await.unwrap(), 20);

    let outcome = store.spend(&user, 5, "fusion").await.unwrap();
    assert!(outcome.is_posted());
    assert_eq!(outcome.balance(), 15);
    assert_eq!(store.balance(&user).await.unwrap(), 15);

    let log = store.list_transactions(&user, 10, 0).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log.iter().map(|t| t.amount).sum::<i64>(), 15);
    assert_consistent(store, &user).await;
}

pub async fn insufficient_funds_writes_nothing(store: &dyn Store) {
    let user = new_user(store, "user_broke").await;

    let outcome = store.spend(&user, 1, "fusion").await.unwrap();
    assert_eq!(
        outcome,
        SpendOutcome::InsufficientCredits {
            balance: 0,
            required: 1
        }
    );
    assert_eq!(store.balance(&user).await.unwrap(), 0);
    assert!(store.list_transactions(&user, 10, 0).await.unwrap().is_empty());
}

pub async fn refund_after_failed_generation(store: &dyn Store) {
    let user = new_user(store, "user_refund").await;
    store.adjust(&user, 10, "test credits").await.unwrap();

    let debit = match store.spend(&user, 1, "fusion generation").await.unwrap() {
        SpendOutcome::Posted(posted) => posted,
        other => panic!("spend rejected: {other:?}"),
    };
    assert_eq!(debit.balance, 9);

    let refund = store
        .refund(&user, 1, "refund for failed fusion generation", None)
        .await
        .unwrap();
    assert_eq!(refund.balance, 10);

    let log = store.list_transactions(&user, 10, 0).await.unwrap();
    let amounts: Vec<_> = log.iter().map(|t| (t.transaction_type, t.amount)).collect();
    assert_eq!(
        amounts,
        vec![
            (TransactionType::Refund, 1),
            (TransactionType::Usage, -1),
            (TransactionType::Adjustment, 10),
        ]
    );
    assert_consistent(store, &user).await;
}

pub async fn purchase_is_idempotent(store: &dyn Store) {
    let user = new_user(store, "user_webhook_replay").await;

    let first = store
        .purchase(&user, 20, "cs_test_replayed", "Standard Pack")
        .await
        .unwrap();
    let second = store
        .purchase(&user, 20, "cs_test_replayed", "Standard Pack")
        .await
        .unwrap();

    assert!(!first.is_duplicate());
    assert!(second.is_duplicate());
    assert_eq!(first.transaction_id(), second.transaction_id());
    assert_eq!(second.balance(), 20);
    assert_eq!(store.balance(&user).await.unwrap(), 20);
    assert_eq!(store.list_transactions(&user, 10, 0).await.unwrap().len(), 1);

    // The same reference for a different user is a different payment.
    let other = new_user(store, "user_other_payer").await;
    let outcome = store
        .purchase(&other, 20, "cs_test_replayed", "Standard Pack")
        .await
        .unwrap();
    assert!(!outcome.is_duplicate());
}

pub async fn projection_rejects_direct_writes(store: &dyn Store) {
    let user = new_user(store, "user_direct_write").await;
    store.purchase(&user, 20, "pay_direct", "pack").await.unwrap();

    let err = store.write_balance(&user, 500).await.unwrap_err();
    assert!(matches!(
        err,
        StoreError::ProjectionMismatch {
            expected: 20,
            attempted: 500,
            ..
        }
    ));
    assert_eq!(store.balance(&user).await.unwrap(), 20);

    store.write_balance(&user, 20).await.unwrap();
    assert_eq!(store.balance(&user).await.unwrap(), 20);
}

pub async fn drift_repair(store: &dyn Store) {
    let user = new_user(store, "user_drifted").await;
    store.purchase(&user, 10, "pay_drift", "Starter Pack").await.unwrap();
    store.overwrite_balance_unchecked(&user, 50).await.unwrap();

    let snapshot = verify_user(store, &user).await.unwrap();
    assert_eq!(snapshot.cached_balance, 50);
    assert_eq!(snapshot.calculated_balance, 10);
    assert_eq!(snapshot.transaction_count, 1);

    let correction = reconcile_user(store, &user).await.unwrap().unwrap();
    assert_eq!(correction.user_id, user);
    assert_eq!(correction.old_balance, 50);
    assert_eq!(correction.new_balance, 10);
    assert_eq!(store.balance(&user).await.unwrap(), 10);

    assert!(reconcile_user(store, &user).await.unwrap().is_none());
}

pub async fn reconcile_all_is_idempotent(store: &dyn Store) {
    let healthy = new_user(store, "user_healthy").await;
    let drifted = new_user(store, "user_corrupt").await;
    store.purchase(&healthy, 20, "pay_h", "pack").await.unwrap();
    store.purchase(&drifted, 20, "pay_d", "pack").await.unwrap();
    store.spend(&drifted, 3, "fusion").await.unwrap();
    store.overwrite_balance_unchecked(&drifted, 0).await.unwrap();

    let first = reconcile_all(store).await.unwrap();
    assert_eq!(first.users_checked, 2);
    assert_eq!(first.corrections.len(), 1);
    assert_eq!(first.corrections[0].user_id, drifted);
    assert_eq!(first.corrections[0].old_balance, 0);
    assert_eq!(first.corrections[0].new_balance, 17);

    let second = reconcile_all(store).await.unwrap();
    assert!(second.is_clean());
    assert_eq!(store.balance(&drifted).await.unwrap(), 17);
}

pub async fn users_are_provisioned_once(store: &dyn Store) {
    let subject = ExternalUserId::new("user_first_sight").unwrap();
    assert!(store.find_user(&subject).await.unwrap().is_none());

    let first = store.ensure_user(&subject).await.unwrap();
    let second = store.ensure_user(&subject).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.credits_balance, 0);

    let found = store.find_user(&subject).await.unwrap().unwrap();
    assert_eq!(found.id, first.id);
    assert_eq!(store.get_user(&first.id).await.unwrap().unwrap().external_id, subject);
    assert_eq!(store.list_user_ids().await.unwrap(), vec![first.id]);
}

pub async fn transactions_list_newest_first(store: &dyn Store) {
    let user = new_user(store, "user_history").await;
    for i in 1..=3 {
        store
            .purchase(&user, i, &format!("pay_{i}"), &format!("Purchase {i}"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let all = store.list_transactions(&user, 10, 0).await.unwrap();
    let descriptions: Vec<_> = all.iter().map(|t| t.description.as_str()).collect();
    assert_eq!(descriptions, vec!["Purchase 3", "Purchase 2", "Purchase 1"]);

    let page = store.list_transactions(&user, 1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].description, "Purchase 2");

    let fetched = store.get_transaction(&all[0].id).await.unwrap().unwrap();
    assert_eq!(fetched, all[0]);
}

pub async fn linked_refunds(store: &dyn Store) {
    let user = new_user(store, "user_linked_refund").await;
    store.purchase(&user, 5, "pay_link", "pack").await.unwrap();
    let SpendOutcome::Posted(debit) = store.spend(&user, 2, "fusion").await.unwrap() else {
        panic!("spend rejected");
    };

    let refund = store
        .refund(&user, 2, "refund for failed fusion generation", Some(debit.transaction.id))
        .await
        .unwrap();
    assert_eq!(refund.balance, 5);
    assert_eq!(
        refund.transaction.reverses_transaction_id,
        Some(debit.transaction.id)
    );

    // Retried refund for the same debit must not mint credits.
    let err = store
        .refund(&user, 1, "retried refund", Some(debit.transaction.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidReversal(_)));

    // A purchase cannot be "reversed" by a refund.
    let purchase_id = store
        .list_transactions(&user, 10, 0)
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.transaction_type == TransactionType::Purchase)
        .unwrap()
        .id;
    let err = store
        .refund(&user, 1, "bogus", Some(purchase_id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidReversal(_)));
    assert_eq!(store.balance(&user).await.unwrap(), 5);
    assert_consistent(store, &user).await;
}

pub async fn negative_adjustment_is_guarded(store: &dyn Store) {
    let user = new_user(store, "user_adjusted").await;
    store.adjust(&user, 3, "support grant").await.unwrap();

    let rejected = store.adjust(&user, -4, "clawback").await.unwrap();
    assert_eq!(
        rejected,
        SpendOutcome::InsufficientCredits {
            balance: 3,
            required: 4
        }
    );

    let accepted = store.adjust(&user, -3, "clawback").await.unwrap();
    assert_eq!(accepted.balance(), 0);
    assert_consistent(store, &user).await;
}

pub async fn unknown_user_is_not_found(store: &dyn Store) {
    let ghost = UserId::generate();
    assert!(matches!(
        store.spend(&ghost, 1, "fusion").await,
        Err(StoreError::NotFound { entity: "user", .. })
    ));
    assert!(matches!(
        store.snapshot(&ghost).await,
        Err(StoreError::NotFound { .. })
    ));
    assert!(store.get_user(&ghost).await.unwrap().is_none());
}

pub async fn concurrent_spends_never_overdraw(store: Arc<dyn Store>) {
    let user = new_user(store.as_ref(), "user_two_tabs").await;
    store.purchase(&user, 1, "pay_single", "one credit").await.unwrap();

    let attempts = (0..2).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.spend(&user, 1, "fusion").await.unwrap() })
    });
    let outcomes: Vec<SpendOutcome> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let posted = outcomes.iter().filter(|o| o.is_posted()).count();
    assert_eq!(posted, 1, "exactly one spend must win: {outcomes:?}");
    assert_eq!(store.balance(&user).await.unwrap(), 0);

    // Many concurrent writers against a larger balance.
    store.purchase(&user, 10, "pay_ten", "ten credits").await.unwrap();
    let attempts = (0..25).map(|_| {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.spend(&user, 1, "fusion").await.unwrap() })
    });
    let posted = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(Result::unwrap)
        .filter(SpendOutcome::is_posted)
        .count();
    assert_eq!(posted, 10);
    assert_eq!(store.balance(&user).await.unwrap(), 0);
    assert_consistent(store.as_ref(), &user).await;
}
