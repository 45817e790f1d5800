//! Contract tests for `MessageStorage` implementations.
//!
//! Every check goes through `Arc<dyn MessageStorage>` so another backend can
//! reuse the suite by swapping the constructor.

use proptest::prelude::*;
use std::sync::Arc;

use outbox_bus::adapters::{InMemoryMessageStorage, InMemoryTransaction};
use outbox_bus::domain::foundation::Timestamp;
use outbox_bus::domain::message::{MessageKind, MessageStatus, NewMessage, StatusUpdate};
use outbox_bus::ports::{
    MessageKey, MessageStorage, RetryQuery, SearchFilter, StorageError, TransactionContext,
    TransactionState,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

fn storage() -> Arc<dyn MessageStorage> {
    Arc::new(InMemoryMessageStorage::new())
}

fn published(msg_id: &str) -> NewMessage {
    NewMessage::scheduled("test", "orders.placed", msg_id, "{}", "{}")
}

fn key(msg_id: &str) -> MessageKey<'_> {
    MessageKey::new("test", "orders.placed", msg_id)
}

fn aged(msg_id: &str, age_secs: u64) -> NewMessage {
    let mut message = published(msg_id);
    message.create_time = Timestamp::now().minus_secs(age_secs);
    message
}

fn retry_query() -> RetryQuery {
    RetryQuery {
        batch_size: 10,
        older_than_secs: 60,
        max_retry_count: 3,
        environment: "test".to_string(),
    }
}

// =============================================================================
// Leasing
// =============================================================================

#[tokio::test]
async fn concurrent_try_lock_grants_exactly_one_lease() {
    let storage = storage();
    let id = storage.save_published(&published("m1"), None).await.unwrap();

    let mut attempts = tokio::task::JoinSet::new();
    for _ in 0..16 {
        let storage = storage.clone();
        let id = id.clone();
        attempts.spawn(async move {
            storage
                .try_lock(MessageKind::Published, &id, Timestamp::now().plus_secs(60))
                .await
                .unwrap()
        });
    }

    let mut granted = 0;
    while let Some(result) = attempts.join_next().await {
        if result.unwrap() {
            granted += 1;
        }
    }
    assert_eq!(granted, 1);
}

#[tokio::test]
async fn elapsed_lease_can_be_taken_over() {
    let storage = storage();
    let id = storage.save_published(&published("m1"), None).await.unwrap();

    assert!(storage
        .try_lock(MessageKind::Published, &id, Timestamp::now().minus_secs(1))
        .await
        .unwrap());
    assert!(storage
        .try_lock(MessageKind::Published, &id, Timestamp::now().plus_secs(60))
        .await
        .unwrap());
    assert!(!storage
        .try_lock(MessageKind::Published, &id, Timestamp::now().plus_secs(60))
        .await
        .unwrap());
}

#[tokio::test]
async fn status_update_releases_the_lease() {
    let storage = storage();
    let id = storage.save_published(&published("m1"), None).await.unwrap();
    storage
        .try_lock(MessageKind::Published, &id, Timestamp::now().plus_secs(60))
        .await
        .unwrap();

    storage
        .update_status(MessageKind::Published, &id, StatusUpdate::failed(1))
        .await
        .unwrap();

    let record = storage
        .find_by_id(MessageKind::Published, &id)
        .await
        .unwrap()
        .unwrap();
    assert!(!record.is_locking);
    assert!(record.lock_end.is_none());
    assert_eq!(record.retry_count, 1);
}

#[tokio::test]
async fn succeeded_records_reject_further_transitions() {
    let storage = storage();
    let id = storage.save_published(&published("m1"), None).await.unwrap();
    storage
        .update_status(
            MessageKind::Published,
            &id,
            StatusUpdate::succeeded(1, Timestamp::now().plus_hours(1)),
        )
        .await
        .unwrap();

    let result = storage
        .update_status(MessageKind::Published, &id, StatusUpdate::failed(2))
        .await;

    assert!(matches!(result, Err(StorageError::InvalidTransition { .. })));
}

// =============================================================================
// Uniqueness and transactions
// =============================================================================

#[tokio::test]
async fn received_uniqueness_includes_the_handler() {
    let storage = storage();
    storage
        .save_received(&published("m1").for_handler("receipts"))
        .await
        .unwrap();
    storage
        .save_received(&published("m1").for_handler("audit"))
        .await
        .unwrap();

    let duplicate = storage
        .save_received(&published("m1").for_handler("receipts"))
        .await;

    assert!(matches!(duplicate, Err(StorageError::Duplicate { .. })));
}

#[tokio::test]
async fn transactional_insert_is_visible_only_after_commit() {
    let storage = storage();
    let tx = InMemoryTransaction::begin();
    let context = tx.context();

    storage
        .save_published(&published("m1"), Some(&*context))
        .await
        .unwrap();
    assert!(!storage.is_committed(key("m1")).await.unwrap());

    tx.commit().unwrap();
    assert!(storage.is_committed(key("m1")).await.unwrap());
}

#[tokio::test]
async fn rolled_back_insert_never_appears() {
    let storage = storage();
    let tx = InMemoryTransaction::begin();
    let context = tx.context();

    storage
        .save_published(&published("m1"), Some(&*context))
        .await
        .unwrap();
    drop(tx);

    assert!(!storage.is_committed(key("m1")).await.unwrap());
    assert!(storage.find_published_by_msg_id(key("m1")).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_transactions_commit_one_copy_of_a_msg_id() {
    let storage = storage();
    let first = InMemoryTransaction::begin();
    let second = InMemoryTransaction::begin();
    let first_context = first.context();
    let second_context = second.context();

    storage
        .save_published(&published("m1"), Some(&*first_context))
        .await
        .unwrap();
    storage
        .save_published(&published("m1"), Some(&*second_context))
        .await
        .unwrap();

    first.commit().unwrap();
    let rejected = second.commit();

    assert!(matches!(rejected, Err(StorageError::Duplicate { .. })));
    assert_eq!(second_context.state(), TransactionState::RolledBack);
    let page = storage
        .search(MessageKind::Published, &SearchFilter::new("test"), 0, 10)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn msg_id_lookups_do_not_cross_environments() {
    let storage = storage();
    let mut elsewhere = published("m1");
    elsewhere.environment = "staging".to_string();
    storage.save_published(&elsewhere, None).await.unwrap();

    assert!(storage.find_published_by_msg_id(key("m1")).await.unwrap().is_none());
    assert!(!storage.is_committed(key("m1")).await.unwrap());
    assert!(storage
        .find_published_by_msg_id(MessageKey::new("staging", "orders.placed", "m1"))
        .await
        .unwrap()
        .is_some());
}

// =============================================================================
// Retry and expiry queries
// =============================================================================

#[tokio::test]
async fn retry_candidates_are_old_retryable_and_under_ceiling() {
    let storage = storage();
    let oldest = storage.save_published(&aged("oldest", 600), None).await.unwrap();
    let older = storage.save_published(&aged("older", 300), None).await.unwrap();
    storage.save_published(&aged("young", 5), None).await.unwrap();
    let exhausted = storage.save_published(&aged("exhausted", 900), None).await.unwrap();
    storage
        .update_status(MessageKind::Published, &exhausted, StatusUpdate::failed(3))
        .await
        .unwrap();
    let mut delayed = aged("delayed", 900);
    delayed.delay_at = Some(Timestamp::now().plus_secs(3600));
    storage.save_published(&delayed, None).await.unwrap();

    let candidates = storage
        .retry_candidates(MessageKind::Published, &retry_query())
        .await
        .unwrap();

    let ids: Vec<_> = candidates.iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec![oldest, older]);
}

#[tokio::test]
async fn retry_candidates_respect_batch_size() {
    let storage = storage();
    for i in 0..5 {
        storage
            .save_published(&aged(&format!("m{i}"), 600 - i), None)
            .await
            .unwrap();
    }

    let query = RetryQuery {
        batch_size: 2,
        ..retry_query()
    };
    let candidates = storage
        .retry_candidates(MessageKind::Published, &query)
        .await
        .unwrap();

    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].msg_id, "m0");
}

#[tokio::test]
async fn delete_expired_only_removes_expired_successes() {
    let storage = storage();
    let expired = storage.save_published(&published("expired"), None).await.unwrap();
    storage
        .update_status(
            MessageKind::Published,
            &expired,
            StatusUpdate::succeeded(1, Timestamp::now().minus_secs(1)),
        )
        .await
        .unwrap();
    let fresh = storage.save_published(&published("fresh"), None).await.unwrap();
    storage
        .update_status(
            MessageKind::Published,
            &fresh,
            StatusUpdate::succeeded(1, Timestamp::now().plus_hours(1)),
        )
        .await
        .unwrap();
    storage.save_published(&aged("stuck", 86_400 * 30), None).await.unwrap();

    let deleted = storage.delete_expired(MessageKind::Published).await.unwrap();

    assert_eq!(deleted, 1);
    assert!(storage.find_by_id(MessageKind::Published, &expired).await.unwrap().is_none());
    assert!(storage.find_published_by_msg_id(key("stuck")).await.unwrap().is_some());
}

#[tokio::test]
async fn search_is_newest_first_and_scoped_to_environment() {
    let storage = storage();
    storage.save_published(&aged("old", 100), None).await.unwrap();
    storage.save_published(&aged("new", 1), None).await.unwrap();
    let mut elsewhere = published("elsewhere");
    elsewhere.environment = "staging".to_string();
    storage.save_published(&elsewhere, None).await.unwrap();

    let page = storage
        .search(MessageKind::Published, &SearchFilter::new("test"), 0, 10)
        .await
        .unwrap();

    let msg_ids: Vec<_> = page.iter().map(|r| r.msg_id.as_str()).collect();
    assert_eq!(msg_ids, vec!["new", "old"]);
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn status_counts_account_for_every_record(outcomes in prop::collection::vec(0u8..3, 0..20)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let storage = storage();
            for (i, outcome) in outcomes.iter().enumerate() {
                let id = storage
                    .save_published(&published(&format!("m{i}")), None)
                    .await
                    .unwrap();
                let update = match outcome {
                    0 => None,
                    1 => Some(StatusUpdate::failed(1)),
                    _ => Some(StatusUpdate::succeeded(1, Timestamp::now().plus_hours(1))),
                };
                if let Some(update) = update {
                    storage
                        .update_status(MessageKind::Published, &id, update)
                        .await
                        .unwrap();
                }
            }

            let counts = storage
                .status_counts(MessageKind::Published, "test")
                .await
                .unwrap();
            let total: u64 = counts.values().sum();
            prop_assert_eq!(total, outcomes.len() as u64);
            prop_assert_eq!(
                counts[&MessageStatus::Failed],
                outcomes.iter().filter(|o| **o == 1).count() as u64
            );
            Ok(())
        })?;
    }
}
