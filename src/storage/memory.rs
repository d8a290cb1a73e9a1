//! In-process adapter.
//!
//! Keeps both logs in process memory behind `RwLock`s. Writers take the write
//! lock for the whole check-and-append, so concurrent callers observe one
//! total order and readers always see a consistent snapshot. Records sharing
//! a timestamp are reported newest insert first.
//!
//! The store is only useful as a shared instance: construct it once and hand
//! out clones of the `Arc`. A fresh store per request would make every count
//! look reset. [`crate::storage::BackendSelector`] does this for you.

use crate::models::{AlgorithmGroup, Selection, TypeCount, UniqueRequest, UsageCount};
use crate::storage::normalize_prompt;
use crate::storage::traits::{SelectionRepository, UniqueRequestRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Volatile store for tests, demos and single-process deployments.
///
/// # Example
///
/// ```rust,ignore
/// use algoledger::InMemoryStore;
/// use std::sync::Arc;
///
/// let store = Arc::new(InMemoryStore::new());
/// store.add_selection("KNN", "find similar rows").await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    selections: RwLock<Vec<Selection>>,
    requests: RwLock<Vec<StoredRequest>>,
}

/// A unique request together with its dedup key.
#[derive(Debug, Clone)]
struct StoredRequest {
    normalized: String,
    request: UniqueRequest,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored unique requests.
    ///
    /// # Errors
    ///
    /// Returns an error if a writer panicked while holding the lock.
    pub fn request_count(&self) -> Result<usize> {
        Ok(self.read_requests()?.len())
    }

    fn read_selections(&self) -> Result<RwLockReadGuard<'_, Vec<Selection>>> {
        self.selections
            .read()
            .map_err(|e| Error::operation("memory_read_selections", e))
    }

    fn write_selections(&self) -> Result<RwLockWriteGuard<'_, Vec<Selection>>> {
        self.selections
            .write()
            .map_err(|e| Error::operation("memory_write_selections", e))
    }

    fn read_requests(&self) -> Result<RwLockReadGuard<'_, Vec<StoredRequest>>> {
        self.requests
            .read()
            .map_err(|e| Error::operation("memory_read_requests", e))
    }

    fn write_requests(&self) -> Result<RwLockWriteGuard<'_, Vec<StoredRequest>>> {
        self.requests
            .write()
            .map_err(|e| Error::operation("memory_write_requests", e))
    }

    /// Clones the matching requests and orders them newest first.
    fn collect_requests(&self, algorithm_type: Option<&str>) -> Result<Vec<UniqueRequest>> {
        let mut out: Vec<UniqueRequest> = self
            .read_requests()?
            .iter()
            .rev()
            .filter(|stored| algorithm_type.is_none_or(|t| stored.request.algorithm_type == t))
            .map(|stored| stored.request.clone())
            .collect();
        UniqueRequest::sort_newest_first(&mut out);
        Ok(out)
    }
}

#[async_trait]
impl SelectionRepository for InMemoryStore {
    async fn add_selection(&self, algorithm: &str, prompt: &str) -> Result<()> {
        self.write_selections()?
            .push(Selection::new(algorithm, prompt));
        Ok(())
    }

    async fn usage_counts(&self) -> Result<Vec<UsageCount>> {
        Ok(UsageCount::tally(self.read_selections()?.iter()))
    }

    async fn total(&self) -> Result<u64> {
        Ok(self.read_selections()?.len() as u64)
    }

    async fn detailed_by_algorithm(&self) -> Result<Vec<AlgorithmGroup>> {
        let snapshot: Vec<Selection> = self.read_selections()?.iter().rev().cloned().collect();
        Ok(AlgorithmGroup::group(snapshot))
    }
}

#[async_trait]
impl UniqueRequestRepository for InMemoryStore {
    async fn add_unique_request(&self, prompt: &str, algorithm_type: &str) -> Result<bool> {
        let normalized = normalize_prompt(prompt);
        let mut requests = self.write_requests()?;

        // Linear scan is fine at the scale this store is meant for.
        if requests.iter().any(|stored| stored.normalized == normalized) {
            return Ok(false);
        }

        requests.push(StoredRequest {
            normalized,
            request: UniqueRequest::new(prompt, algorithm_type),
        });
        Ok(true)
    }

    async fn get_requests_by_type(&self, algorithm_type: &str) -> Result<Vec<UniqueRequest>> {
        self.collect_requests(Some(algorithm_type))
    }

    async fn get_all_requests(&self) -> Result<Vec<UniqueRequest>> {
        self.collect_requests(None)
    }

    async fn count_by_type(&self) -> Result<Vec<TypeCount>> {
        let requests = self.read_requests()?;
        Ok(TypeCount::tally(
            requests
                .iter()
                .map(|stored| stored.request.algorithm_type.as_str()),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_selection_scenario() {
        let store = InMemoryStore::new();
        store.add_selection("A", "p1").await.unwrap();
        store.add_selection("B", "p2").await.unwrap();
        store.add_selection("A", "p3").await.unwrap();

        assert_eq!(store.total().await.unwrap(), 3);
        assert_eq!(
            store.usage_counts().await.unwrap(),
            vec![UsageCount::new("A", 2), UsageCount::new("B", 1)]
        );
    }

    #[tokio::test]
    async fn test_detailed_by_algorithm_newest_first() {
        let store = InMemoryStore::new();
        store.add_selection("A", "first").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.add_selection("A", "second").await.unwrap();

        let groups = store.detailed_by_algorithm().await.unwrap();

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);
        assert_eq!(groups[0].items[0].prompt, "second");
        assert_eq!(groups[0].items[1].prompt, "first");
    }

    #[tokio::test]
    async fn test_unique_request_dedups_on_normalized_prompt() {
        let store = InMemoryStore::new();

        assert!(
            store
                .add_unique_request("Classify X", "Classification")
                .await
                .unwrap()
        );
        assert!(
            !store
                .add_unique_request("classify   x", "Classification")
                .await
                .unwrap()
        );

        let all = store.get_all_requests().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].prompt, "Classify X");
        assert_eq!(
            store.count_by_type().await.unwrap(),
            vec![TypeCount::new("Classification", 1)]
        );
    }

    #[tokio::test]
    async fn test_get_requests_by_type_filters() {
        let store = InMemoryStore::new();
        store.add_unique_request("p1", "NLP").await.unwrap();
        store.add_unique_request("p2", "Regression").await.unwrap();
        store.add_unique_request("p3", "NLP").await.unwrap();

        let nlp = store.get_requests_by_type("NLP").await.unwrap();
        assert_eq!(nlp.len(), 2);
        assert!(nlp.iter().all(|r| r.algorithm_type == "NLP"));
        assert!(store.get_requests_by_type("Vision").await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_selections_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let algorithm = if i % 2 == 0 { "even" } else { "odd" };
                    store.add_selection(algorithm, &format!("prompt {i}")).await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.total().await.unwrap(), 100);
        let counts = store.usage_counts().await.unwrap();
        assert_eq!(counts.iter().map(|c| c.count).sum::<u64>(), 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_requests_create_one_record() {
        let store = Arc::new(InMemoryStore::new());

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let store = Arc::clone(&store);
                let prompt = if i % 2 == 0 { "Same Prompt" } else { "same   prompt" };
                tokio::spawn(async move { store.add_unique_request(prompt, "Other").await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(store.request_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_equal_timestamps_report_newest_insert_first() {
        let store = InMemoryStore::new();
        let now = chrono::Utc::now();
        for prompt in ["first", "second"] {
            store
                .selections
                .write()
                .unwrap()
                .push(Selection::at("A", prompt, now));
            store.requests.write().unwrap().push(StoredRequest {
                normalized: prompt.to_string(),
                request: UniqueRequest::at(prompt, "NLP", now),
            });
        }

        let groups = store.detailed_by_algorithm().await.unwrap();
        let prompts: Vec<_> = groups[0].items.iter().map(|i| i.prompt.as_str()).collect();
        assert_eq!(prompts, ["second", "first"]);

        let requests = store.get_all_requests().await.unwrap();
        let prompts: Vec<_> = requests.iter().map(|r| r.prompt.as_str()).collect();
        assert_eq!(prompts, ["second", "first"]);
    }

    #[test]
    fn test_poisoned_lock_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let poisoner = Arc::clone(&store);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.requests.write().unwrap();
            panic!("writer died");
        })
        .join();

        assert!(matches!(
            store.request_count(),
            Err(Error::OperationFailed { ref operation, .. }) if operation == "memory_read_requests"
        ));
    }
}
