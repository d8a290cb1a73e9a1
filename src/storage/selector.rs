//! Backend selection.
//!
//! [`BackendSelector`] maps a [`BackendType`] to a live adapter. Each adapter
//! is built at most once per selector and shared by every caller afterwards,
//! so the in-memory store behaves as a process-wide singleton when the
//! selector is. Every adapter implements both repository contracts, and both
//! accessors for one backend hand out the same instance.
//!
//! ```text
//! BackendSelector
//!   ├── selections()          → Arc<dyn SelectionRepository>
//!   ├── unique_requests()     → Arc<dyn UniqueRequestRepository>
//!   ├── selections_for(t)     → explicit backend
//!   └── unique_requests_for(t)
//! ```
//!
//! Backends compiled out by Cargo features fail with
//! [`Error::FeatureNotEnabled`] naming the feature to enable.

use crate::config::{BackendType, LedgerConfig};
use crate::storage::memory::InMemoryStore;
use crate::storage::traits::{SelectionRepository, UniqueRequestRepository};
use crate::{Error, Result};
use std::sync::Arc;
#[cfg(any(
    feature = "mongodb",
    feature = "postgres",
    feature = "redis",
    feature = "neo4j",
    feature = "cassandra"
))]
use tokio::sync::OnceCell;

#[cfg(feature = "cassandra")]
use crate::storage::cassandra::{CassandraSettings, CassandraStore};
#[cfg(feature = "mongodb")]
use crate::storage::mongodb::MongoStore;
#[cfg(feature = "neo4j")]
use crate::storage::neo4j::Neo4jStore;
#[cfg(feature = "postgres")]
use crate::storage::postgresql::PostgresStore;
#[cfg(feature = "redis")]
use crate::storage::redis::RedisStore;

/// Hands out one shared adapter per backend.
pub struct BackendSelector {
    config: LedgerConfig,
    memory: Arc<InMemoryStore>,
    #[cfg(feature = "mongodb")]
    mongodb: OnceCell<Arc<MongoStore>>,
    #[cfg(feature = "postgres")]
    postgres: OnceCell<Arc<PostgresStore>>,
    #[cfg(feature = "redis")]
    redis: OnceCell<Arc<RedisStore>>,
    #[cfg(feature = "neo4j")]
    neo4j: OnceCell<Arc<Neo4jStore>>,
    #[cfg(feature = "cassandra")]
    cassandra: OnceCell<Arc<CassandraStore>>,
}

/// Both contracts for one backend, backed by the same instance.
#[derive(Clone)]
struct Handles {
    selections: Arc<dyn SelectionRepository>,
    requests: Arc<dyn UniqueRequestRepository>,
}

impl Handles {
    fn of<T>(store: Arc<T>) -> Self
    where
        T: SelectionRepository + UniqueRequestRepository + 'static,
    {
        Self {
            selections: Arc::clone(&store) as Arc<dyn SelectionRepository>,
            requests: store,
        }
    }
}

impl BackendSelector {
    /// Creates a selector. No connection is opened until an adapter is requested.
    #[must_use]
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            memory: Arc::new(InMemoryStore::new()),
            #[cfg(feature = "mongodb")]
            mongodb: OnceCell::new(),
            #[cfg(feature = "postgres")]
            postgres: OnceCell::new(),
            #[cfg(feature = "redis")]
            redis: OnceCell::new(),
            #[cfg(feature = "neo4j")]
            neo4j: OnceCell::new(),
            #[cfg(feature = "cassandra")]
            cassandra: OnceCell::new(),
        }
    }

    /// Returns the configured backend.
    #[must_use]
    pub const fn backend(&self) -> BackendType {
        self.config.backend
    }

    /// Returns the selection repository for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is compiled out or cannot connect.
    pub async fn selections(&self) -> Result<Arc<dyn SelectionRepository>> {
        self.selections_for(self.config.backend).await
    }

    /// Returns the unique-request repository for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is compiled out or cannot connect.
    pub async fn unique_requests(&self) -> Result<Arc<dyn UniqueRequestRepository>> {
        self.unique_requests_for(self.config.backend).await
    }

    /// Returns the selection repository for an explicit backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is compiled out or cannot connect.
    pub async fn selections_for(
        &self,
        backend: BackendType,
    ) -> Result<Arc<dyn SelectionRepository>> {
        Ok(self.handles(backend).await?.selections)
    }

    /// Returns the unique-request repository for an explicit backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is compiled out or cannot connect.
    pub async fn unique_requests_for(
        &self,
        backend: BackendType,
    ) -> Result<Arc<dyn UniqueRequestRepository>> {
        Ok(self.handles(backend).await?.requests)
    }

    async fn handles(&self, backend: BackendType) -> Result<Handles> {
        match backend {
            BackendType::InMemory => Ok(Handles::of(Arc::clone(&self.memory))),
            BackendType::MongoDb => self.mongodb().await,
            BackendType::Postgres => self.postgres().await,
            BackendType::Redis => self.redis().await,
            BackendType::Neo4j => self.neo4j().await,
            BackendType::Cassandra => self.cassandra().await,
        }
    }

    #[cfg(feature = "mongodb")]
    async fn mongodb(&self) -> Result<Handles> {
        let settings = &self.config.mongodb;
        let store = self
            .mongodb
            .get_or_try_init(|| async {
                let store = MongoStore::connect(&settings.uri, &settings.database).await?;
                tracing::info!(
                    backend = "mongodb",
                    database = %settings.database,
                    "Created backend"
                );
                Ok::<_, Error>(Arc::new(store))
            })
            .await?;
        Ok(Handles::of(Arc::clone(store)))
    }

    #[cfg(not(feature = "mongodb"))]
    #[allow(clippy::unused_async)]
    async fn mongodb(&self) -> Result<Handles> {
        Err(not_enabled(BackendType::MongoDb))
    }

    #[cfg(feature = "postgres")]
    async fn postgres(&self) -> Result<Handles> {
        let settings = &self.config.postgres;
        let store = self
            .postgres
            .get_or_try_init(|| async {
                let store = PostgresStore::new(&settings.url, settings.max_connections)?;
                tracing::info!(
                    backend = "postgres",
                    max_connections = settings.max_connections,
                    "Created backend"
                );
                Ok::<_, Error>(Arc::new(store))
            })
            .await?;
        Ok(Handles::of(Arc::clone(store)))
    }

    #[cfg(not(feature = "postgres"))]
    #[allow(clippy::unused_async)]
    async fn postgres(&self) -> Result<Handles> {
        Err(not_enabled(BackendType::Postgres))
    }

    #[cfg(feature = "redis")]
    async fn redis(&self) -> Result<Handles> {
        let settings = &self.config.redis;
        let store = self
            .redis
            .get_or_try_init(|| async {
                let store =
                    RedisStore::connect(&settings.url, settings.key_prefix.clone()).await?;
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.key_prefix,
                    "Created backend"
                );
                Ok::<_, Error>(Arc::new(store))
            })
            .await?;
        Ok(Handles::of(Arc::clone(store)))
    }

    #[cfg(not(feature = "redis"))]
    #[allow(clippy::unused_async)]
    async fn redis(&self) -> Result<Handles> {
        Err(not_enabled(BackendType::Redis))
    }

    #[cfg(feature = "neo4j")]
    async fn neo4j(&self) -> Result<Handles> {
        let settings = &self.config.neo4j;
        let store = self
            .neo4j
            .get_or_try_init(|| async {
                let store =
                    Neo4jStore::connect(&settings.uri, &settings.user, &settings.password).await?;
                tracing::info!(backend = "neo4j", uri = %settings.uri, "Created backend");
                Ok::<_, Error>(Arc::new(store))
            })
            .await?;
        Ok(Handles::of(Arc::clone(store)))
    }

    #[cfg(not(feature = "neo4j"))]
    #[allow(clippy::unused_async)]
    async fn neo4j(&self) -> Result<Handles> {
        Err(not_enabled(BackendType::Neo4j))
    }

    #[cfg(feature = "cassandra")]
    async fn cassandra(&self) -> Result<Handles> {
        let settings = CassandraSettings {
            contact_points: self.config.cassandra.contact_points.clone(),
            keyspace: self.config.cassandra.keyspace.clone(),
            replication_factor: self.config.cassandra.replication_factor,
            bulkhead: self.config.bulkhead.clone(),
        };
        let store = self
            .cassandra
            .get_or_try_init(|| async move {
                let store = CassandraStore::connect(settings).await?;
                Ok::<_, Error>(Arc::new(store))
            })
            .await?;
        Ok(Handles::of(Arc::clone(store)))
    }

    #[cfg(not(feature = "cassandra"))]
    #[allow(clippy::unused_async)]
    async fn cassandra(&self) -> Result<Handles> {
        Err(not_enabled(BackendType::Cassandra))
    }
}

#[cfg(not(all(
    feature = "mongodb",
    feature = "postgres",
    feature = "redis",
    feature = "neo4j",
    feature = "cassandra"
)))]
fn not_enabled(backend: BackendType) -> Error {
    Error::FeatureNotEnabled(backend.feature().unwrap_or(backend.as_str()).to_string())
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSelector")
            .field("backend", &self.config.backend)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_is_shared() {
        let selector = BackendSelector::new(LedgerConfig::default());

        let first = selector.selections().await.unwrap();
        first.add_selection("K-Means", "cluster customers").await.unwrap();

        let second = selector.selections().await.unwrap();
        assert_eq!(second.total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_both_contracts_share_one_store() {
        let selector = BackendSelector::new(LedgerConfig::default());

        let requests = selector.unique_requests().await.unwrap();
        assert!(requests.add_unique_request("Detect fraud", "Anomaly Detection").await.unwrap());

        let again = selector.unique_requests_for(BackendType::InMemory).await.unwrap();
        assert!(!again.add_unique_request("detect   FRAUD", "Anomaly Detection").await.unwrap());
        assert_eq!(again.get_all_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_separate_selectors_are_isolated() {
        let a = BackendSelector::new(LedgerConfig::default());
        let b = BackendSelector::new(LedgerConfig::default());

        a.selections().await.unwrap().add_selection("SVM", "p").await.unwrap();
        assert_eq!(b.selections().await.unwrap().total().await.unwrap(), 0);
    }

    #[cfg(not(feature = "cassandra"))]
    #[tokio::test]
    async fn test_disabled_backend_names_feature() {
        let selector = BackendSelector::new(LedgerConfig::default());
        let err = selector
            .selections_for(BackendType::Cassandra)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::FeatureNotEnabled(ref f) if f == "cassandra"));
    }
}
