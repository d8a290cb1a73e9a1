//! `MongoDB` adapter.
//!
//! Aggregations run server-side as pipelines. Uniqueness of unique requests
//! is enforced by a unique index on `prompt_normalized`, created lazily on
//! first use. Re-creating an identical index is a no-op on the server; an
//! existing index on the same keys with other options fails startup, since
//! it may not enforce uniqueness.
//!
//! Rows sharing a timestamp come back newest insert first (`_id` desc).
//!
//! # Collections
//!
//! | Collection | Indexes |
//! |------------|---------|
//! | `selections` | none |
//! | `unique_requests` | unique `prompt_normalized`; `algorithm_type, created_at` |

use crate::models::{AlgorithmGroup, SelectionDetail, TypeCount, UniqueRequest, UsageCount};
use crate::storage::normalize_prompt;
use crate::storage::traits::{SelectionRepository, UniqueRequestRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{Bson, DateTime as BsonDateTime, Document, doc};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use tokio::sync::OnceCell;

/// Server error code for a duplicate key on a unique index.
const DUPLICATE_KEY: i32 = 11000;
/// Another client is building the same index.
const INDEX_BUILD_IN_PROGRESS: i32 = 68;
/// `IndexOptionsConflict` and `IndexKeySpecsConflict`.
const INDEX_CONFLICT_CODES: [i32; 2] = [85, 86];

/// How `ensure_indexes` treats a failed `createIndexes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexFailure {
    /// A concurrent build of the same index; the server finishes it.
    Racing,
    /// The keys are indexed with other options.
    Conflict,
    Other,
}

impl IndexFailure {
    fn classify(code: Option<i32>) -> Self {
        match code {
            Some(INDEX_BUILD_IN_PROGRESS) => Self::Racing,
            Some(code) if INDEX_CONFLICT_CODES.contains(&code) => Self::Conflict,
            _ => Self::Other,
        }
    }
}

/// `MongoDB`-backed store implementing both repository contracts.
pub struct MongoStore {
    selections: Collection<Document>,
    requests: Collection<Document>,
    indexes: OnceCell<()>,
}

impl MongoStore {
    /// Connects to `MongoDB` and selects the database.
    ///
    /// The driver connects lazily; this validates the URI only.
    ///
    /// # Errors
    ///
    /// Returns an error if the URI cannot be parsed.
    pub async fn connect(uri: &str, database: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| Error::operation("mongodb_connect", e))?;
        Ok(Self::from_database(&client.database(database)))
    }

    /// Wraps an existing database handle.
    #[must_use]
    pub fn from_database(db: &Database) -> Self {
        Self {
            selections: db.collection("selections"),
            requests: db.collection("unique_requests"),
            indexes: OnceCell::new(),
        }
    }

    /// Creates the unique-request indexes once per process.
    async fn ensure_indexes(&self) -> Result<()> {
        self.indexes
            .get_or_try_init(|| async {
                let unique = IndexModel::builder()
                    .keys(doc! { "prompt_normalized": 1 })
                    .options(
                        IndexOptions::builder()
                            .unique(true)
                            .name("prompt_normalized_unique".to_string())
                            .build(),
                    )
                    .build();
                let by_type = IndexModel::builder()
                    .keys(doc! { "algorithm_type": 1, "created_at": -1 })
                    .build();

                for model in [unique, by_type] {
                    let Err(e) = self.requests.create_index(model).await else {
                        continue;
                    };
                    match IndexFailure::classify(command_code(&e)) {
                        IndexFailure::Racing => {
                            tracing::debug!(error = %e, "MongoDB index build already running");
                        },
                        IndexFailure::Conflict => {
                            tracing::error!(
                                error = %e,
                                "unique_requests has a conflicting index on its keys"
                            );
                            return Err(Error::operation(
                                "mongodb_create_index",
                                format!("conflicting index on unique_requests: {e}"),
                            ));
                        },
                        IndexFailure::Other => {
                            return Err(Error::operation("mongodb_create_index", e));
                        },
                    }
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn collect(
        collection: &Collection<Document>,
        pipeline: Vec<Document>,
        operation: &'static str,
    ) -> Result<Vec<Document>> {
        collection
            .aggregate(pipeline)
            .await
            .map_err(|e| Error::operation(operation, &e))?
            .try_collect()
            .await
            .map_err(|e| Error::operation(operation, e))
    }

    async fn find_requests(&self, filter: Document) -> Result<Vec<UniqueRequest>> {
        let docs: Vec<Document> = self
            .requests
            .find(filter)
            .sort(doc! { "created_at": -1, "_id": -1 })
            .await
            .map_err(|e| Error::operation("mongodb_find_requests", &e))?
            .try_collect()
            .await
            .map_err(|e| Error::operation("mongodb_find_requests", e))?;

        docs.iter().map(request_from_doc).collect()
    }
}

#[async_trait]
impl SelectionRepository for MongoStore {
    async fn add_selection(&self, algorithm: &str, prompt: &str) -> Result<()> {
        self.selections
            .insert_one(doc! {
                "algorithm": algorithm,
                "prompt": prompt,
                "created_at": BsonDateTime::now(),
            })
            .await
            .map_err(|e| Error::operation("mongodb_add_selection", e))?;
        Ok(())
    }

    async fn usage_counts(&self) -> Result<Vec<UsageCount>> {
        let pipeline = vec![
            doc! { "$group": { "_id": "$algorithm", "count": { "$sum": 1 } } },
            doc! { "$project": { "_id": 0, "algorithm": "$_id", "count": 1 } },
            doc! { "$sort": { "count": -1, "algorithm": 1 } },
        ];
        let docs = Self::collect(&self.selections, pipeline, "mongodb_usage_counts").await?;

        docs.iter()
            .map(|d| Ok(UsageCount::new(get_str(d, "algorithm")?, get_count(d)?)))
            .collect()
    }

    async fn total(&self) -> Result<u64> {
        self.selections
            .count_documents(doc! {})
            .await
            .map_err(|e| Error::operation("mongodb_total", e))
    }

    async fn detailed_by_algorithm(&self) -> Result<Vec<AlgorithmGroup>> {
        // $push preserves the order documents arrive in, so sort first.
        let pipeline = vec![
            doc! { "$sort": { "created_at": -1, "_id": -1 } },
            doc! { "$group": {
                "_id": "$algorithm",
                "count": { "$sum": 1 },
                "items": { "$push": {
                    "algorithm": "$algorithm",
                    "prompt": "$prompt",
                    "created_at": "$created_at",
                } },
            } },
            doc! { "$project": { "_id": 0, "algorithm": "$_id", "count": 1, "items": 1 } },
            doc! { "$sort": { "count": -1, "algorithm": 1 } },
        ];
        let docs = Self::collect(&self.selections, pipeline, "mongodb_detailed").await?;

        docs.iter()
            .map(|d| {
                let items = d
                    .get_array("items")
                    .map_err(|e| Error::operation("mongodb_decode_group", e))?
                    .iter()
                    .map(|item| match item {
                        Bson::Document(item) => Ok(SelectionDetail {
                            algorithm: get_str(item, "algorithm")?,
                            prompt: get_str(item, "prompt")?,
                            created_at: get_time(item)?,
                        }),
                        other => Err(Error::operation(
                            "mongodb_decode_group",
                            format!("unexpected item {other}"),
                        )),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(AlgorithmGroup {
                    algorithm: get_str(d, "algorithm")?,
                    count: get_count(d)?,
                    items,
                })
            })
            .collect()
    }
}

#[async_trait]
impl UniqueRequestRepository for MongoStore {
    async fn add_unique_request(&self, prompt: &str, algorithm_type: &str) -> Result<bool> {
        self.ensure_indexes().await?;

        let result = self
            .requests
            .insert_one(doc! {
                "prompt": prompt,
                "prompt_normalized": normalize_prompt(prompt),
                "algorithm_type": algorithm_type,
                "created_at": BsonDateTime::now(),
            })
            .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    backend = "mongodb",
                    algorithm_type,
                    prompt_len = prompt.len(),
                    "Recorded unique request"
                );
                Ok(true)
            },
            Err(e) if is_duplicate_key(&e) => Ok(false),
            Err(e) => Err(Error::operation("mongodb_add_unique_request", e)),
        }
    }

    async fn get_requests_by_type(&self, algorithm_type: &str) -> Result<Vec<UniqueRequest>> {
        self.find_requests(doc! { "algorithm_type": algorithm_type })
            .await
    }

    async fn get_all_requests(&self) -> Result<Vec<UniqueRequest>> {
        self.find_requests(doc! {}).await
    }

    async fn count_by_type(&self) -> Result<Vec<TypeCount>> {
        let pipeline = vec![
            doc! { "$group": { "_id": "$algorithm_type", "count": { "$sum": 1 } } },
            doc! { "$project": { "_id": 0, "algorithm_type": "$_id", "count": 1 } },
            doc! { "$sort": { "count": -1, "algorithm_type": 1 } },
        ];
        let docs = Self::collect(&self.requests, pipeline, "mongodb_count_by_type").await?;

        docs.iter()
            .map(|d| Ok(TypeCount::new(get_str(d, "algorithm_type")?, get_count(d)?)))
            .collect()
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}

fn command_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(ce) => Some(ce.code),
        _ => None,
    }
}

fn get_str(d: &Document, key: &str) -> Result<String> {
    d.get_str(key)
        .map(str::to_string)
        .map_err(|e| Error::operation("mongodb_decode", format!("{key}: {e}")))
}

/// `$sum` yields Int32 until it overflows, then Int64.
fn get_count(d: &Document) -> Result<u64> {
    let count = match d.get("count") {
        Some(Bson::Int32(n)) => i64::from(*n),
        Some(Bson::Int64(n)) => *n,
        other => {
            return Err(Error::operation(
                "mongodb_decode",
                format!("count: unexpected {other:?}"),
            ));
        },
    };
    u64::try_from(count).map_err(|e| Error::operation("mongodb_decode", e))
}

fn get_time(d: &Document) -> Result<DateTime<Utc>> {
    let millis = d
        .get_datetime("created_at")
        .map_err(|e| Error::operation("mongodb_decode", format!("created_at: {e}")))?
        .timestamp_millis();
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        Error::operation("mongodb_decode", format!("created_at: {millis} out of range"))
    })
}

fn request_from_doc(d: &Document) -> Result<UniqueRequest> {
    Ok(UniqueRequest::at(
        get_str(d, "prompt")?,
        get_str(d, "algorithm_type")?,
        get_time(d)?,
    ))
}
