//! Repository contract tests against the in-process adapter.
//!
//! The same scenarios run against network engines in `backend_integration.rs`.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use algoledger::{
    BackendSelector, InMemoryStore, LedgerConfig, SelectionRepository, TypeCount,
    UniqueRequestRepository, UsageCount,
};
use std::sync::Arc;

fn store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}

#[tokio::test]
async fn test_total_tracks_adds() {
    common::total_tracks_adds(store()).await;
}

#[tokio::test]
async fn test_usage_counts_are_ranked() {
    common::usage_counts_are_ranked(store()).await;
}

#[tokio::test]
async fn test_details_are_ordered() {
    common::details_are_ordered(store()).await;
}

#[tokio::test]
async fn test_tied_usage_ranks_bytewise() {
    common::tied_usage_ranks_bytewise(store()).await;
}

#[tokio::test]
async fn test_tied_types_rank_bytewise() {
    common::tied_types_rank_bytewise(store()).await;
}

#[tokio::test]
async fn test_duplicate_prompt_is_rejected() {
    common::duplicate_prompt_is_rejected(store()).await;
}

#[tokio::test]
async fn test_requests_are_newest_first() {
    common::requests_are_newest_first(store()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_adds_are_not_lost() {
    let store = store();
    common::concurrent_adds_are_not_lost(Arc::clone(&store) as Arc<dyn SelectionRepository>, 100)
        .await;
    assert_eq!(store.total().await.unwrap(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_create_one() {
    let store = store();
    common::concurrent_duplicates_create_one(
        Arc::clone(&store) as Arc<dyn UniqueRequestRepository>,
        32,
    )
    .await;
    assert_eq!(store.request_count().unwrap(), 1);
}

// Exact-value scenarios; these need an empty store.

#[tokio::test]
async fn test_scenario_three_selections() {
    let repo = store();
    repo.add_selection("A", "p1").await.unwrap();
    repo.add_selection("B", "p2").await.unwrap();
    repo.add_selection("A", "p3").await.unwrap();

    assert_eq!(repo.total().await.unwrap(), 3);
    assert_eq!(
        repo.usage_counts().await.unwrap(),
        vec![UsageCount::new("A", 2), UsageCount::new("B", 1)]
    );
}

#[tokio::test]
async fn test_scenario_duplicate_classification() {
    let repo = store();
    assert!(repo.add_unique_request("Classify X", "Classification").await.unwrap());
    assert!(!repo.add_unique_request("classify   x", "Classification").await.unwrap());

    assert_eq!(
        repo.count_by_type().await.unwrap(),
        vec![TypeCount::new("Classification", 1)]
    );
}

#[tokio::test]
async fn test_empty_store_reports() {
    let repo = store();
    assert_eq!(repo.total().await.unwrap(), 0);
    assert!(repo.usage_counts().await.unwrap().is_empty());
    assert!(repo.detailed_by_algorithm().await.unwrap().is_empty());
    assert!(repo.get_all_requests().await.unwrap().is_empty());
    assert!(repo.get_requests_by_type("NLP").await.unwrap().is_empty());
    assert!(repo.count_by_type().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_selector_hands_out_one_in_memory_store() {
    let selector = BackendSelector::new(LedgerConfig::default());

    for prompt in ["a", "b", "c"] {
        selector
            .selections()
            .await
            .unwrap()
            .add_selection("SVM", prompt)
            .await
            .unwrap();
    }

    let repo = selector.selections().await.unwrap();
    assert_eq!(repo.total().await.unwrap(), 3);
}
