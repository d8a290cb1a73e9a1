//! Cassandra adapter.
//!
//! The `cdrs` driver is synchronous. Every driver call, including the
//! initial connect, runs on a dedicated [`BlockingPool`] so a slow cluster
//! ties up pool workers rather than async executor threads, and a saturated
//! pool fails fast with [`Error::BulkheadFull`].
//!
//! # Tables
//!
//! | Table | Primary key | Notes |
//! |-------|-------------|-------|
//! | `selections` | `id` (UUIDv7 text) | |
//! | `unique_requests` | `prompt_normalized` | `seq` (UUIDv7 text); index on `algorithm_type` |
//!
//! Timestamps are stored as `bigint` epoch milliseconds. Scans come back in
//! token order, so rows are sorted client-side: newest first, with the UUIDv7
//! breaking ties on a shared millisecond in favor of the latest insert.
//! Uniqueness uses a
//! lightweight transaction (`INSERT ... IF NOT EXISTS`) keyed on the
//! normalized prompt. The query language has no general `GROUP BY`, so
//! aggregates fold full-table scans client-side.

use crate::models::{AlgorithmGroup, Selection, TypeCount, UniqueRequest, UsageCount};
use crate::storage::bulkhead::{BlockingPool, BulkheadConfig};
use crate::storage::normalize_prompt;
use crate::storage::traits::{SelectionRepository, UniqueRequestRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use cdrs::authenticators::NoneAuthenticator;
use cdrs::cluster::session::{Session, new as new_session};
use cdrs::cluster::{ClusterTcpConfig, NodeTcpConfigBuilder, TcpConnectionPool};
use cdrs::frame::Frame;
use cdrs::load_balancing::RoundRobin;
use cdrs::query::{QueryExecutor, QueryValues};
use cdrs::types::IntoRustByName;
use cdrs::types::rows::Row;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::OnceCell;

type CassandraSession = Session<RoundRobin<TcpConnectionPool<NoneAuthenticator>>>;

/// Connection settings for [`CassandraStore::connect`].
#[derive(Debug, Clone)]
pub struct CassandraSettings {
    /// `host:port` contact points.
    pub contact_points: Vec<String>,
    /// Keyspace holding both tables.
    pub keyspace: String,
    /// `SimpleStrategy` replication factor used when creating the keyspace.
    pub replication_factor: u32,
    /// Blocking pool sizing.
    pub bulkhead: BulkheadConfig,
}

/// Cassandra-backed store implementing both repository contracts.
pub struct CassandraStore {
    session: Arc<CassandraSession>,
    pool: BlockingPool,
    keyspace: String,
    replication_factor: u32,
    schema: OnceCell<()>,
}

impl CassandraStore {
    /// Starts the blocking pool and opens a session to the cluster.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] if the keyspace is not a plain identifier or
    ///   no contact points are given
    /// - [`Error::OperationFailed`] if no contact point accepts a connection
    pub async fn connect(settings: CassandraSettings) -> Result<Self> {
        validate_keyspace(&settings.keyspace)?;
        if settings.contact_points.is_empty() {
            return Err(Error::InvalidInput(
                "cassandra requires at least one contact point".to_string(),
            ));
        }

        let pool = BlockingPool::new("cassandra", settings.bulkhead)?;
        let contact_points = settings.contact_points.clone();
        let session: CassandraSession = pool
            .run("cassandra_connect", move || {
                let nodes = contact_points
                    .iter()
                    .map(|addr| NodeTcpConfigBuilder::new(addr, NoneAuthenticator {}).build())
                    .collect();
                new_session(&ClusterTcpConfig(nodes), RoundRobin::new())
                    .map_err(|e| Error::operation("cassandra_connect", e))
            })
            .await?;

        tracing::info!(
            backend = "cassandra",
            contact_points = ?settings.contact_points,
            keyspace = %settings.keyspace,
            "Connected"
        );

        Ok(Self {
            session: Arc::new(session),
            pool,
            keyspace: settings.keyspace,
            replication_factor: settings.replication_factor.max(1),
            schema: OnceCell::new(),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema
            .get_or_try_init(|| async {
                let session = Arc::clone(&self.session);
                let statements = schema_statements(&self.keyspace, self.replication_factor);
                self.pool
                    .run("cassandra_create_schema", move || {
                        for statement in &statements {
                            match session.query(statement.as_str()) {
                                Ok(_) => {},
                                Err(e) if is_already_exists(&e.to_string()) => {
                                    tracing::debug!(
                                        error = %e,
                                        "Cassandra schema object already exists"
                                    );
                                },
                                Err(e) => {
                                    return Err(Error::operation("cassandra_create_schema", e));
                                },
                            }
                        }
                        Ok(())
                    })
                    .await?;
                tracing::debug!(backend = "cassandra", "Schema ready");
                Ok::<(), Error>(())
            })
            .await
            .map(|_| ())
    }

    /// Runs a statement on the pool and returns its rows.
    async fn select(
        &self,
        operation: &'static str,
        cql: String,
        values: Option<QueryValues>,
    ) -> Result<Vec<Row>> {
        self.ensure_schema().await?;
        let session = Arc::clone(&self.session);
        self.pool
            .run(operation, move || {
                let frame = match values {
                    Some(values) => session.query_with_values(cql.as_str(), values),
                    None => session.query(cql.as_str()),
                }
                .map_err(|e| Error::operation(operation, e))?;
                rows_of(&frame, operation)
            })
            .await
    }

    async fn load_requests(&self, algorithm_type: Option<&str>) -> Result<Vec<UniqueRequest>> {
        let (cql, values) = match algorithm_type {
            Some(t) => (
                format!(
                    "SELECT prompt, algorithm_type, created_at, seq FROM {}.unique_requests \
                     WHERE algorithm_type = ?",
                    self.keyspace
                ),
                Some(cdrs::query_values!(t.to_string())),
            ),
            None => (
                format!(
                    "SELECT prompt, algorithm_type, created_at, seq FROM {}.unique_requests",
                    self.keyspace
                ),
                None,
            ),
        };

        let rows = self.select("cassandra_get_requests", cql, values).await?;
        let requests = rows
            .iter()
            .map(|row| {
                let request = UniqueRequest::at(
                    get::<String>(row, "prompt")?,
                    get::<String>(row, "algorithm_type")?,
                    get_time(row)?,
                );
                Ok((get_seq(row, "seq")?, request))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(newest_insert_first(requests, |r| r.created_at))
    }

    async fn load_selections(&self) -> Result<Vec<Selection>> {
        let cql = format!(
            "SELECT id, algorithm, prompt, created_at FROM {}.selections",
            self.keyspace
        );
        let rows = self.select("cassandra_scan_selections", cql, None).await?;
        let selections = rows
            .iter()
            .map(|row| {
                let selection = Selection::at(
                    get::<String>(row, "algorithm")?,
                    get::<String>(row, "prompt")?,
                    get_time(row)?,
                );
                Ok((get_seq(row, "id")?, selection))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(newest_insert_first(selections, |s| s.created_at))
    }
}

#[async_trait]
impl SelectionRepository for CassandraStore {
    async fn add_selection(&self, algorithm: &str, prompt: &str) -> Result<()> {
        let cql = format!(
            "INSERT INTO {}.selections (id, algorithm, prompt, created_at) VALUES (?, ?, ?, ?)",
            self.keyspace
        );
        let values = cdrs::query_values!(
            uuid::Uuid::now_v7().to_string(),
            algorithm.to_string(),
            prompt.to_string(),
            Utc::now().timestamp_millis()
        );
        self.select("cassandra_add_selection", cql, Some(values))
            .await
            .map(|_| ())
    }

    async fn usage_counts(&self) -> Result<Vec<UsageCount>> {
        let selections = self.load_selections().await?;
        Ok(UsageCount::tally(&selections))
    }

    async fn total(&self) -> Result<u64> {
        let cql = format!("SELECT COUNT(*) AS count FROM {}.selections", self.keyspace);
        let rows = self.select("cassandra_total", cql, None).await?;
        let count: i64 = match rows.first() {
            Some(row) => get(row, "count")?,
            None => 0,
        };
        u64::try_from(count).map_err(|e| Error::operation("cassandra_total", e))
    }

    async fn detailed_by_algorithm(&self) -> Result<Vec<AlgorithmGroup>> {
        Ok(AlgorithmGroup::group(self.load_selections().await?))
    }
}

#[async_trait]
impl UniqueRequestRepository for CassandraStore {
    async fn add_unique_request(&self, prompt: &str, algorithm_type: &str) -> Result<bool> {
        let cql = format!(
            "INSERT INTO {}.unique_requests \
             (prompt_normalized, prompt, algorithm_type, created_at, seq) \
             VALUES (?, ?, ?, ?, ?) IF NOT EXISTS",
            self.keyspace
        );
        let values = cdrs::query_values!(
            normalize_prompt(prompt),
            prompt.to_string(),
            algorithm_type.to_string(),
            Utc::now().timestamp_millis(),
            uuid::Uuid::now_v7().to_string()
        );

        let rows = self
            .select("cassandra_add_unique_request", cql, Some(values))
            .await?;
        let applied = match rows.first() {
            Some(row) => get::<bool>(row, "[applied]")?,
            None => {
                return Err(Error::operation(
                    "cassandra_add_unique_request",
                    "conditional insert returned no [applied] row",
                ));
            },
        };

        if applied {
            tracing::info!(
                backend = "cassandra",
                algorithm_type,
                prompt_len = prompt.len(),
                "Recorded unique request"
            );
        }
        Ok(applied)
    }

    async fn get_requests_by_type(&self, algorithm_type: &str) -> Result<Vec<UniqueRequest>> {
        self.load_requests(Some(algorithm_type)).await
    }

    async fn get_all_requests(&self) -> Result<Vec<UniqueRequest>> {
        self.load_requests(None).await
    }

    async fn count_by_type(&self) -> Result<Vec<TypeCount>> {
        let requests = self.load_requests(None).await?;
        Ok(TypeCount::tally(
            requests.iter().map(|r| r.algorithm_type.as_str()),
        ))
    }
}

fn schema_statements(keyspace: &str, replication_factor: u32) -> Vec<String> {
    vec![
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH REPLICATION = \
             {{'class': 'SimpleStrategy', 'replication_factor': {replication_factor}}}"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.selections (\
             id text PRIMARY KEY, algorithm text, prompt text, created_at bigint)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.unique_requests (\
             prompt_normalized text PRIMARY KEY, prompt text, algorithm_type text, \
             created_at bigint, seq text)"
        ),
        format!("ALTER TABLE {keyspace}.unique_requests ADD IF NOT EXISTS seq text"),
        format!(
            "CREATE INDEX IF NOT EXISTS unique_requests_type_idx \
             ON {keyspace}.unique_requests (algorithm_type)"
        ),
    ]
}

/// Keyspace names are spliced into statements, so only plain identifiers pass.
fn validate_keyspace(keyspace: &str) -> Result<()> {
    let valid = !keyspace.is_empty()
        && keyspace.len() <= 48
        && keyspace.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && keyspace.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "invalid cassandra keyspace '{keyspace}'"
        )))
    }
}

/// Index creation with `IF NOT EXISTS` still fails on some server versions
/// when an index with another name covers the column; the server only says
/// so in the message text.
fn is_already_exists(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already exists")
        || message.contains("duplicate index")
        || message.contains("conflicts with an existing column")
}

/// Sorts rows by `created_at` desc, then by insert sequence desc.
fn newest_insert_first<T>(
    mut rows: Vec<(String, T)>,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    rows.sort_by(|(a_seq, a), (b_seq, b)| {
        created_at(b)
            .cmp(&created_at(a))
            .then_with(|| b_seq.cmp(a_seq))
    });
    rows.into_iter().map(|(_, row)| row).collect()
}

fn rows_of(frame: &Frame, operation: &'static str) -> Result<Vec<Row>> {
    let body = frame
        .get_body()
        .map_err(|e| Error::operation(operation, e))?;
    // Writes answer with a Void body, which has no rows.
    Ok(body.into_rows().unwrap_or_default())
}

fn get<T>(row: &Row, column: &str) -> Result<T>
where
    Row: IntoRustByName<T>,
{
    row.get_r_by_name(column)
        .map_err(|e| Error::operation("cassandra_decode", format!("{column}: {e}")))
}

fn get_time(row: &Row) -> Result<DateTime<Utc>> {
    let millis: i64 = get(row, "created_at")?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        Error::operation("cassandra_decode", format!("created_at: {millis} out of range"))
    })
}

/// Rows written before the `seq` column existed read as the empty string.
fn get_seq(row: &Row, column: &str) -> Result<String> {
    let seq: Option<String> = row
        .get_by_name(column)
        .map_err(|e| Error::operation("cassandra_decode", format!("{column}: {e}")))?;
    Ok(seq.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("algoledger", true; "default")]
    #[test_case("ledger2", true; "digits")]
    #[test_case("", false; "empty")]
    #[test_case("2fast", false; "leading digit")]
    #[test_case("ks; DROP KEYSPACE x", false; "injection")]
    #[test_case("has-dash", false; "dash")]
    fn test_validate_keyspace(keyspace: &str, ok: bool) {
        assert_eq!(validate_keyspace(keyspace).is_ok(), ok);
    }

    // Matched on message text: a server upgrade that rewords this error
    // turns schema setup into a hard failure and lands here first.
    #[test_case("Index unique_requests_type_idx already exists", true; "named index")]
    #[test_case("Cannot add duplicate index on column algorithm_type", true; "duplicate")]
    #[test_case("seq conflicts with an existing column", true; "column")]
    #[test_case("Keyspace algoledger does not exist", false; "missing keyspace")]
    fn test_is_already_exists(message: &str, expected: bool) {
        assert_eq!(is_already_exists(message), expected);
    }

    #[test]
    fn test_schema_statements() {
        let statements = schema_statements("ledger", 3);
        assert_eq!(statements.len(), 5);
        assert!(statements.iter().all(|s| s.contains("IF NOT EXISTS")));
        assert!(statements[0].contains("'replication_factor': 3"));
        assert!(statements[2].contains("prompt_normalized text PRIMARY KEY"));
        assert!(statements[3].contains("ADD IF NOT EXISTS seq text"));
    }

    #[test]
    fn test_newest_insert_first_breaks_timestamp_ties() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(1);
        let first = uuid::Uuid::now_v7().to_string();
        let second = uuid::Uuid::now_v7().to_string();
        let rows = vec![
            (second.clone(), Selection::at("A", "second", now)),
            (String::new(), Selection::at("A", "old", earlier)),
            (first, Selection::at("A", "first", now)),
        ];

        let sorted = newest_insert_first(rows, |s| s.created_at);

        let prompts: Vec<_> = sorted.iter().map(|s| s.prompt.as_str()).collect();
        assert_eq!(prompts, ["second", "first", "old"]);
    }
}
