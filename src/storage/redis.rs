//! Redis adapter.
//!
//! Treats Redis as a plain key-value cache: no modules, no secondary indexes.
//!
//! # Keys
//!
//! | Key | Value |
//! |-----|-------|
//! | `{prefix}:selection:{uuid}` | JSON [`Selection`] |
//! | `{prefix}:unique_request:{sha256(normalized prompt)}` | JSON [`UniqueRequest`] plus `seq` |
//!
//! # Known gap
//!
//! [`SelectionRepository::usage_counts`], [`SelectionRepository::total`] and
//! [`SelectionRepository::detailed_by_algorithm`] return empty results. The
//! selection log is unbounded and a cache has no secondary index to group it
//! by; answering would mean scanning the whole keyspace on every report.
//! Writes still succeed, so switching the selector to another backend loses
//! nothing going forward. A warning is logged the first time a caller hits
//! the gap.
//!
//! Unique requests are bounded by the number of distinct prompts. Inserts use
//! `SET NX` on the content-hash key, and the read operations fold a `SCAN`
//! over the `unique_request` prefix client-side. Each stored request carries
//! a UUIDv7 `seq` so requests sharing a timestamp list newest insert first.

use crate::models::{AlgorithmGroup, Selection, TypeCount, UniqueRequest, UsageCount};
use crate::storage::prompt_key;
use crate::storage::traits::{SelectionRepository, UniqueRequestRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};

/// Keys fetched per `SCAN`/`MGET` round trip.
const SCAN_BATCH: usize = 200;

/// Stored form of a unique request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoredRequest {
    /// Insert sequence; empty for values written without one.
    #[serde(default)]
    seq: String,
    #[serde(flatten)]
    request: UniqueRequest,
}

/// Redis-backed store implementing both repository contracts.
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    gap_logged: AtomicBool,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server is unreachable.
    pub async fn connect(connection_url: &str, prefix: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(connection_url)
            .map_err(|e| Error::operation("redis_connect", e))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| Error::operation("redis_connect", e))?;

        Ok(Self {
            conn,
            prefix: prefix.into(),
            gap_logged: AtomicBool::new(false),
        })
    }

    fn selection_key(&self, id: &uuid::Uuid) -> String {
        format!("{}:selection:{id}", self.prefix)
    }

    fn request_key(&self, prompt: &str) -> String {
        format!("{}:unique_request:{}", self.prefix, prompt_key(prompt))
    }

    fn request_pattern(&self) -> String {
        format!("{}:unique_request:*", self.prefix)
    }

    /// Looks up the stored request for a prompt, matching on its normalized form.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis cannot be reached or the value is corrupt.
    pub async fn find_request(&self, prompt: &str) -> Result<Option<UniqueRequest>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.request_key(prompt))
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::operation("redis_find_request", e))?;

        Ok(raw
            .map(|json| decode_request(&json))
            .transpose()?
            .map(|stored| stored.request))
    }

    fn note_gap(&self, operation: &'static str) {
        if !self.gap_logged.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                backend = "redis",
                operation,
                "Selection aggregates are not supported by the cache backend; \
                 returning empty results"
            );
        }
    }

    /// Loads every stored unique request with a cursor scan.
    async fn scan_requests(&self) -> Result<Vec<UniqueRequest>> {
        let mut conn = self.conn.clone();
        let pattern = self.request_pattern();
        let mut cursor: u64 = 0;
        let mut out = Vec::new();

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| Error::operation("redis_scan_requests", e))?;

            if !keys.is_empty() {
                // A key may expire or be purged between SCAN and MGET.
                let values: Vec<Option<String>> = redis::cmd("MGET")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| Error::operation("redis_scan_requests", e))?;
                for json in values.into_iter().flatten() {
                    out.push(decode_request(&json)?);
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(newest_insert_first(out))
    }
}

#[async_trait]
impl SelectionRepository for RedisStore {
    async fn add_selection(&self, algorithm: &str, prompt: &str) -> Result<()> {
        let selection = Selection::new(algorithm, prompt);
        let json = serde_json::to_string(&selection)
            .map_err(|e| Error::operation("redis_encode_selection", e))?;
        let mut conn = self.conn.clone();

        redis::cmd("SET")
            .arg(self.selection_key(&uuid::Uuid::now_v7()))
            .arg(json)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| Error::operation("redis_add_selection", e))
    }

    async fn usage_counts(&self) -> Result<Vec<UsageCount>> {
        self.note_gap("usage_counts");
        Ok(Vec::new())
    }

    async fn total(&self) -> Result<u64> {
        self.note_gap("total");
        Ok(0)
    }

    async fn detailed_by_algorithm(&self) -> Result<Vec<AlgorithmGroup>> {
        self.note_gap("detailed_by_algorithm");
        Ok(Vec::new())
    }
}

#[async_trait]
impl UniqueRequestRepository for RedisStore {
    async fn add_unique_request(&self, prompt: &str, algorithm_type: &str) -> Result<bool> {
        let stored = StoredRequest {
            seq: uuid::Uuid::now_v7().to_string(),
            request: UniqueRequest::new(prompt, algorithm_type),
        };
        let json = serde_json::to_string(&stored)
            .map_err(|e| Error::operation("redis_encode_request", e))?;
        let mut conn = self.conn.clone();

        // SET NX replies OK when it wrote and nil when the key existed.
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.request_key(prompt))
            .arg(json)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::operation("redis_add_unique_request", e))?;

        let created = reply.is_some();
        if created {
            tracing::info!(
                backend = "redis",
                algorithm_type,
                prompt_len = prompt.len(),
                "Recorded unique request"
            );
        }
        Ok(created)
    }

    async fn get_requests_by_type(&self, algorithm_type: &str) -> Result<Vec<UniqueRequest>> {
        let mut requests = self.scan_requests().await?;
        requests.retain(|r| r.algorithm_type == algorithm_type);
        Ok(requests)
    }

    async fn get_all_requests(&self) -> Result<Vec<UniqueRequest>> {
        self.scan_requests().await
    }

    async fn count_by_type(&self) -> Result<Vec<TypeCount>> {
        let requests = self.scan_requests().await?;
        Ok(TypeCount::tally(
            requests.iter().map(|r| r.algorithm_type.as_str()),
        ))
    }
}

fn decode_request(json: &str) -> Result<StoredRequest> {
    serde_json::from_str(json).map_err(|e| Error::operation("redis_decode_request", e))
}

/// Orders by `created_at` desc, then insert sequence desc.
fn newest_insert_first(mut stored: Vec<StoredRequest>) -> Vec<UniqueRequest> {
    stored.sort_by_key(|s| (Reverse(s.request.created_at), Reverse(s.seq.clone())));
    stored.into_iter().map(|s| s.request).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_request_without_seq() {
        let request = UniqueRequest::new("Detect fraud", "Anomaly Detection");
        let json = serde_json::to_string(&request).unwrap();

        let stored = decode_request(&json).unwrap();

        assert_eq!(stored.request, request);
        assert!(stored.seq.is_empty());
    }

    #[test]
    fn test_equal_timestamps_list_newest_insert_first() {
        let now = chrono::Utc::now();
        let mut stored: Vec<_> = ["first", "second", "third"]
            .into_iter()
            .map(|prompt| StoredRequest {
                seq: uuid::Uuid::now_v7().to_string(),
                request: UniqueRequest::at(prompt, "NLP", now),
            })
            .collect();
        // SCAN returns keys in hash order.
        stored.swap(0, 1);

        let ordered = newest_insert_first(stored);

        let prompts: Vec<_> = ordered.iter().map(|r| r.prompt.as_str()).collect();
        assert_eq!(prompts, ["third", "second", "first"]);
    }

    #[test]
    fn test_decode_request_rejects_garbage() {
        assert!(matches!(
            decode_request("{not json"),
            Err(Error::OperationFailed { ref operation, .. }) if operation == "redis_decode_request"
        ));
    }
}
