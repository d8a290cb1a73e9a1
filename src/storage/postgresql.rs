//! PostgreSQL adapter.
//!
//! Schema (tables plus secondary indexes) is created lazily on first use.
//! Uniqueness of unique requests comes from a `UNIQUE` constraint on
//! `prompt_normalized`; a violation is reported as `Ok(false)`.
//!
//! Name tie-breaks use `COLLATE "C"` so ranking is byte-wise, whatever the
//! database's default collation. Rows sharing a timestamp come back newest
//! insert first (`id DESC`).

use crate::models::{AlgorithmGroup, Selection, TypeCount, UniqueRequest, UsageCount};
use crate::storage::normalize_prompt;
use crate::storage::traits::{SelectionRepository, UniqueRequestRepository};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{
    Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use tokio::sync::OnceCell;
use tokio_postgres::NoTls;
use tokio_postgres::error::SqlState;

/// Schema statements, applied in order. Each one is idempotent on its own.
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS selections (
        id BIGSERIAL PRIMARY KEY,
        algorithm TEXT NOT NULL,
        prompt TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_selections_algorithm ON selections (algorithm)",
    "CREATE INDEX IF NOT EXISTS idx_selections_created_at ON selections (created_at DESC)",
    r"
    CREATE TABLE IF NOT EXISTS unique_requests (
        id BIGSERIAL PRIMARY KEY,
        prompt TEXT NOT NULL,
        prompt_normalized TEXT NOT NULL UNIQUE,
        algorithm_type TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_unique_requests_type ON unique_requests (algorithm_type)",
    "CREATE INDEX IF NOT EXISTS idx_unique_requests_created_at \
     ON unique_requests (created_at DESC)",
];

const USAGE_COUNTS_SQL: &str = "SELECT algorithm, COUNT(*) AS count FROM selections \
     GROUP BY algorithm ORDER BY count DESC, algorithm COLLATE \"C\" ASC";

const COUNT_BY_TYPE_SQL: &str = "SELECT algorithm_type, COUNT(*) AS count FROM unique_requests \
     GROUP BY algorithm_type ORDER BY count DESC, algorithm_type COLLATE \"C\" ASC";

/// PostgreSQL-backed store implementing both repository contracts.
pub struct PostgresStore {
    pool: Pool,
    schema: OnceCell<()>,
}

impl PostgresStore {
    /// Creates a connection pool for the given URL.
    ///
    /// Connections are opened on demand; a bad host surfaces on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created from the URL.
    pub fn new(connection_url: &str, max_connections: usize) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(connection_url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(PoolConfig::new(max_connections.max(1)));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::operation("create_postgres_pool", e))?;

        Ok(Self {
            pool,
            schema: OnceCell::new(),
        })
    }

    async fn client(&self) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::operation("get_postgres_connection", e))
    }

    /// Returns a client, creating the schema first if this process has not.
    async fn ready_client(&self) -> Result<Object> {
        let client = self.client().await?;
        self.schema
            .get_or_try_init(|| Self::create_schema(&client))
            .await?;
        Ok(client)
    }

    async fn create_schema(client: &Object) -> Result<()> {
        for statement in SCHEMA {
            match client.batch_execute(statement).await {
                Ok(()) => {},
                // IF NOT EXISTS still races on the catalog when two
                // processes create the same object at once.
                Err(e) if is_already_exists(&e) => {
                    tracing::debug!(error = %e, "PostgreSQL schema object already exists");
                },
                Err(e) => return Err(Error::operation("postgres_create_schema", e)),
            }
        }
        tracing::debug!(backend = "postgres", "Schema ready");
        Ok(())
    }

    async fn query_requests(
        &self,
        algorithm_type: Option<&str>,
    ) -> Result<Vec<UniqueRequest>> {
        let client = self.ready_client().await?;
        let rows = match algorithm_type {
            Some(t) => {
                client
                    .query(
                        "SELECT prompt, algorithm_type, created_at FROM unique_requests \
                         WHERE algorithm_type = $1 ORDER BY created_at DESC, id DESC",
                        &[&t],
                    )
                    .await
            },
            None => {
                client
                    .query(
                        "SELECT prompt, algorithm_type, created_at FROM unique_requests \
                         ORDER BY created_at DESC, id DESC",
                        &[],
                    )
                    .await
            },
        }
        .map_err(|e| Error::operation("postgres_get_requests", e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let created_at: DateTime<Utc> = row.get("created_at");
                UniqueRequest::at(
                    row.get::<_, String>("prompt"),
                    row.get::<_, String>("algorithm_type"),
                    created_at,
                )
            })
            .collect())
    }
}

#[async_trait]
impl SelectionRepository for PostgresStore {
    async fn add_selection(&self, algorithm: &str, prompt: &str) -> Result<()> {
        let client = self.ready_client().await?;
        let now = Utc::now();
        client
            .execute(
                "INSERT INTO selections (algorithm, prompt, created_at) VALUES ($1, $2, $3)",
                &[&algorithm, &prompt, &now],
            )
            .await
            .map_err(|e| Error::operation("postgres_add_selection", e))?;
        Ok(())
    }

    async fn usage_counts(&self) -> Result<Vec<UsageCount>> {
        let client = self.ready_client().await?;
        let rows = client
            .query(USAGE_COUNTS_SQL, &[])
            .await
            .map_err(|e| Error::operation("postgres_usage_counts", e))?;

        rows.iter()
            .map(|row| {
                let count: i64 = row.get("count");
                Ok(UsageCount::new(row.get::<_, String>("algorithm"), to_count(count)?))
            })
            .collect()
    }

    async fn total(&self) -> Result<u64> {
        let client = self.ready_client().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM selections", &[])
            .await
            .map_err(|e| Error::operation("postgres_total", e))?;
        to_count(row.get(0))
    }

    async fn detailed_by_algorithm(&self) -> Result<Vec<AlgorithmGroup>> {
        let client = self.ready_client().await?;
        let rows = client
            .query(
                "SELECT algorithm, prompt, created_at FROM selections \
                 ORDER BY created_at DESC, id DESC",
                &[],
            )
            .await
            .map_err(|e| Error::operation("postgres_detailed", e))?;

        let selections = rows
            .iter()
            .map(|row| {
                let created_at: DateTime<Utc> = row.get("created_at");
                Selection::at(
                    row.get::<_, String>("algorithm"),
                    row.get::<_, String>("prompt"),
                    created_at,
                )
            })
            .collect();
        Ok(AlgorithmGroup::group(selections))
    }
}

#[async_trait]
impl UniqueRequestRepository for PostgresStore {
    async fn add_unique_request(&self, prompt: &str, algorithm_type: &str) -> Result<bool> {
        let client = self.ready_client().await?;
        let normalized = normalize_prompt(prompt);
        let now = Utc::now();

        let result = client
            .execute(
                "INSERT INTO unique_requests \
                 (prompt, prompt_normalized, algorithm_type, created_at) \
                 VALUES ($1, $2, $3, $4)",
                &[&prompt, &normalized, &algorithm_type, &now],
            )
            .await;

        match result {
            Ok(_) => {
                tracing::info!(
                    backend = "postgres",
                    algorithm_type,
                    prompt_len = prompt.len(),
                    "Recorded unique request"
                );
                Ok(true)
            },
            Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => Ok(false),
            Err(e) => Err(Error::operation("postgres_add_unique_request", e)),
        }
    }

    async fn get_requests_by_type(&self, algorithm_type: &str) -> Result<Vec<UniqueRequest>> {
        self.query_requests(Some(algorithm_type)).await
    }

    async fn get_all_requests(&self) -> Result<Vec<UniqueRequest>> {
        self.query_requests(None).await
    }

    async fn count_by_type(&self) -> Result<Vec<TypeCount>> {
        let client = self.ready_client().await?;
        let rows = client
            .query(COUNT_BY_TYPE_SQL, &[])
            .await
            .map_err(|e| Error::operation("postgres_count_by_type", e))?;

        rows.iter()
            .map(|row| {
                let count: i64 = row.get("count");
                Ok(TypeCount::new(row.get::<_, String>("algorithm_type"), to_count(count)?))
            })
            .collect()
    }
}

/// Errors raised when a concurrent creator won the race for a schema object.
fn is_already_exists(err: &tokio_postgres::Error) -> bool {
    err.code().is_some_and(|code| {
        code == &SqlState::DUPLICATE_TABLE
            || code == &SqlState::DUPLICATE_OBJECT
            || code == &SqlState::UNIQUE_VIOLATION
    })
}

fn to_count(count: i64) -> Result<u64> {
    u64::try_from(count).map_err(|e| Error::operation("postgres_decode_count", e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_creation_is_lazy() {
        // No server is contacted until the first query.
        let store = PostgresStore::new("postgresql://localhost:1/none", 2);
        assert!(store.is_ok());
    }

    #[test]
    fn test_schema_is_idempotent_sql() {
        for statement in SCHEMA {
            assert!(statement.contains("IF NOT EXISTS"), "{statement}");
        }
        assert!(SCHEMA.iter().any(|s| s.contains("prompt_normalized TEXT NOT NULL UNIQUE")));
    }

    #[test]
    fn test_rank_queries_break_ties_bytewise() {
        for sql in [USAGE_COUNTS_SQL, COUNT_BY_TYPE_SQL] {
            assert!(sql.contains("count DESC"), "{sql}");
            assert!(sql.contains("COLLATE \"C\" ASC"), "{sql}");
        }
    }

    #[test]
    fn test_to_count_rejects_negative() {
        assert_eq!(to_count(7).unwrap(), 7);
        assert!(to_count(-1).is_err());
    }
}
