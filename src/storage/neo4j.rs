//! Neo4j adapter.
//!
//! Each record is a labeled node: `(:Selection)` and `(:UniqueRequest)`.
//! Timestamps are stored as epoch milliseconds. Each node also carries a
//! `seq` (a UUIDv7 string) so rows sharing a millisecond come back newest
//! insert first. Count tie-breaks are re-ranked client-side: Cypher compares
//! strings by UTF-16 code unit, the other adapters compare bytes.
//!
//! Uniqueness is enforced by a property constraint on
//! `UniqueRequest.prompt_normalized`, created lazily. Inserts still check for
//! an existing node first so the common duplicate case never reaches the
//! constraint; when two callers race past the check, the loser's `CREATE`
//! violates the constraint and is reported as `Ok(false)`.

use crate::models::{AlgorithmGroup, Selection, TypeCount, UniqueRequest, UsageCount};
use crate::storage::normalize_prompt;
use crate::storage::traits::{SelectionRepository, UniqueRequestRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{Graph, Query, Row, query};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::OnceCell;

const CONSTRAINT: &str = "CREATE CONSTRAINT unique_request_prompt IF NOT EXISTS \
     FOR (r:UniqueRequest) REQUIRE r.prompt_normalized IS UNIQUE";
const TYPE_INDEX: &str = "CREATE INDEX unique_request_type IF NOT EXISTS \
     FOR (r:UniqueRequest) ON (r.algorithm_type)";
const SELECTION_INDEX: &str = "CREATE INDEX selection_algorithm IF NOT EXISTS \
     FOR (s:Selection) ON (s.algorithm)";

/// Neo4j-backed store implementing both repository contracts.
pub struct Neo4jStore {
    graph: Graph,
    schema: OnceCell<()>,
}

impl Neo4jStore {
    /// Connects to Neo4j over bolt.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or authentication fails.
    pub async fn connect(uri: &str, user: &str, password: &SecretString) -> Result<Self> {
        let graph = Graph::new(uri, user, password.expose_secret())
            .await
            .map_err(|e| Error::operation("neo4j_connect", e))?;
        Ok(Self {
            graph,
            schema: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema
            .get_or_try_init(|| async {
                for statement in [CONSTRAINT, TYPE_INDEX, SELECTION_INDEX] {
                    match self.graph.run(query(statement)).await {
                        Ok(()) => {},
                        Err(e) if is_already_exists(&e.to_string()) => {
                            tracing::debug!(error = %e, "Neo4j schema object already exists");
                        },
                        Err(e) => return Err(Error::operation("neo4j_create_schema", e)),
                    }
                }
                tracing::debug!(backend = "neo4j", "Schema ready");
                Ok(())
            })
            .await
            .map(|_| ())
    }

    async fn rows(&self, q: Query, operation: &'static str) -> Result<Vec<Row>> {
        let mut stream = self
            .graph
            .execute(q)
            .await
            .map_err(|e| Error::operation(operation, e))?;
        let mut rows = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| Error::operation(operation, e))?
        {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn query_requests(&self, q: Query) -> Result<Vec<UniqueRequest>> {
        self.rows(q, "neo4j_get_requests")
            .await?
            .iter()
            .map(|row| {
                Ok(UniqueRequest::at(
                    get::<String>(row, "prompt")?,
                    get::<String>(row, "algorithm_type")?,
                    get_time(row)?,
                ))
            })
            .collect()
    }
}

#[async_trait]
impl SelectionRepository for Neo4jStore {
    async fn add_selection(&self, algorithm: &str, prompt: &str) -> Result<()> {
        self.graph
            .run(
                query(
                    "CREATE (:Selection {algorithm: $algorithm, prompt: $prompt, \
                     created_at: $created_at, seq: $seq})",
                )
                .param("algorithm", algorithm)
                .param("prompt", prompt)
                .param("created_at", Utc::now().timestamp_millis())
                .param("seq", next_seq()),
            )
            .await
            .map_err(|e| Error::operation("neo4j_add_selection", e))
    }

    async fn usage_counts(&self) -> Result<Vec<UsageCount>> {
        let rows = self
            .rows(
                query(
                    "MATCH (s:Selection) RETURN s.algorithm AS algorithm, count(s) AS count \
                     ORDER BY count DESC, algorithm ASC",
                ),
                "neo4j_usage_counts",
            )
            .await?;

        let mut counts = rows
            .iter()
            .map(|row| Ok(UsageCount::new(get::<String>(row, "algorithm")?, get_count(row)?)))
            .collect::<Result<Vec<_>>>()?;
        UsageCount::rank(&mut counts);
        Ok(counts)
    }

    async fn total(&self) -> Result<u64> {
        let rows = self
            .rows(
                query("MATCH (s:Selection) RETURN count(s) AS count"),
                "neo4j_total",
            )
            .await?;
        rows.first().map_or(Ok(0), get_count)
    }

    async fn detailed_by_algorithm(&self) -> Result<Vec<AlgorithmGroup>> {
        let rows = self
            .rows(
                query(
                    "MATCH (s:Selection) RETURN s.algorithm AS algorithm, s.prompt AS prompt, \
                     s.created_at AS created_at ORDER BY created_at DESC, s.seq DESC",
                ),
                "neo4j_detailed",
            )
            .await?;

        let selections = rows
            .iter()
            .map(|row| {
                Ok(Selection::at(
                    get::<String>(row, "algorithm")?,
                    get::<String>(row, "prompt")?,
                    get_time(row)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AlgorithmGroup::group(selections))
    }
}

#[async_trait]
impl UniqueRequestRepository for Neo4jStore {
    async fn add_unique_request(&self, prompt: &str, algorithm_type: &str) -> Result<bool> {
        self.ensure_schema().await?;
        let normalized = normalize_prompt(prompt);

        let existing = self
            .rows(
                query(
                    "MATCH (r:UniqueRequest {prompt_normalized: $normalized}) \
                     RETURN count(r) AS count",
                )
                .param("normalized", normalized.as_str()),
                "neo4j_find_request",
            )
            .await?;
        if existing.first().map_or(Ok(0), get_count)? > 0 {
            return Ok(false);
        }

        let created = self
            .graph
            .run(
                query(
                    "CREATE (:UniqueRequest {prompt: $prompt, prompt_normalized: $normalized, \
                     algorithm_type: $algorithm_type, created_at: $created_at, seq: $seq})",
                )
                .param("prompt", prompt)
                .param("normalized", normalized.as_str())
                .param("algorithm_type", algorithm_type)
                .param("created_at", Utc::now().timestamp_millis())
                .param("seq", next_seq()),
            )
            .await;

        match created {
            Ok(()) => {
                tracing::info!(
                    backend = "neo4j",
                    algorithm_type,
                    prompt_len = prompt.len(),
                    "Recorded unique request"
                );
                Ok(true)
            },
            Err(e) if is_constraint_violation(&e.to_string()) => Ok(false),
            Err(e) => Err(Error::operation("neo4j_add_unique_request", e)),
        }
    }

    async fn get_requests_by_type(&self, algorithm_type: &str) -> Result<Vec<UniqueRequest>> {
        self.query_requests(
            query(
                "MATCH (r:UniqueRequest {algorithm_type: $algorithm_type}) \
                 RETURN r.prompt AS prompt, r.algorithm_type AS algorithm_type, \
                 r.created_at AS created_at ORDER BY created_at DESC, r.seq DESC",
            )
            .param("algorithm_type", algorithm_type),
        )
        .await
    }

    async fn get_all_requests(&self) -> Result<Vec<UniqueRequest>> {
        self.query_requests(query(
            "MATCH (r:UniqueRequest) RETURN r.prompt AS prompt, \
             r.algorithm_type AS algorithm_type, r.created_at AS created_at \
             ORDER BY created_at DESC, r.seq DESC",
        ))
        .await
    }

    async fn count_by_type(&self) -> Result<Vec<TypeCount>> {
        let rows = self
            .rows(
                query(
                    "MATCH (r:UniqueRequest) RETURN r.algorithm_type AS algorithm_type, \
                     count(r) AS count ORDER BY count DESC, algorithm_type ASC",
                ),
                "neo4j_count_by_type",
            )
            .await?;

        let mut counts = rows
            .iter()
            .map(|row| {
                Ok(TypeCount::new(get::<String>(row, "algorithm_type")?, get_count(row)?))
            })
            .collect::<Result<Vec<_>>>()?;
        TypeCount::rank(&mut counts);
        Ok(counts)
    }
}

/// Insert sequence; UUIDv7 strings sort in creation order.
fn next_seq() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn is_already_exists(message: &str) -> bool {
    message.contains("EquivalentSchemaRuleAlreadyExists")
        || message.contains("already exists")
}

fn is_constraint_violation(message: &str) -> bool {
    message.contains("ConstraintValidationFailed") || message.contains("already exists with label")
}

fn get<T: serde::de::DeserializeOwned>(row: &Row, key: &str) -> Result<T> {
    row.get::<T>(key)
        .map_err(|e| Error::operation("neo4j_decode", format!("{key}: {e}")))
}

fn get_count(row: &Row) -> Result<u64> {
    let count: i64 = get(row, "count")?;
    u64::try_from(count).map_err(|e| Error::operation("neo4j_decode", e))
}

fn get_time(row: &Row) -> Result<DateTime<Utc>> {
    let millis: i64 = get(row, "created_at")?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        Error::operation("neo4j_decode", format!("created_at: {millis} out of range"))
    })
}
