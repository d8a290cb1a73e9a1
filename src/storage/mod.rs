//! Storage layer abstraction.
//!
//! Two contracts, [`SelectionRepository`] and [`UniqueRequestRepository`],
//! with one adapter per storage engine:
//!
//! | Adapter | Engine | Feature | Uniqueness | Aggregation |
//! |---------|--------|---------|------------|-------------|
//! | [`InMemoryStore`] | process memory | always | check + insert under one lock | client-side |
//! | `MongoStore` | `MongoDB` | `mongodb` | unique index | pipeline |
//! | `PostgresStore` | PostgreSQL | `postgres` | `UNIQUE` constraint | `GROUP BY` |
//! | `RedisStore` | Redis | `redis` | `SET NX` on content hash | scan fold (requests only) |
//! | `Neo4jStore` | Neo4j | `neo4j` | property constraint | Cypher `count` |
//! | `CassandraStore` | Cassandra | `cassandra` | `IF NOT EXISTS` | scan fold |
//!
//! [`BackendSelector`] picks one at runtime from configuration.

// Dropping a pooled connection a few statements early buys nothing.
#![allow(clippy::significant_drop_tightening)]

pub mod bulkhead;
pub mod memory;
pub mod normalize;
pub mod selector;
pub mod traits;

#[cfg(feature = "cassandra")]
pub mod cassandra;
#[cfg(feature = "mongodb")]
pub mod mongodb;
#[cfg(feature = "neo4j")]
pub mod neo4j;
#[cfg(feature = "postgres")]
pub mod postgresql;
#[cfg(feature = "redis")]
pub mod redis;

pub use bulkhead::{BlockingPool, BulkheadConfig};
pub use memory::InMemoryStore;
pub use normalize::{normalize_prompt, prompt_key};
pub use selector::BackendSelector;
pub use traits::{SelectionRepository, UniqueRequestRepository};

#[cfg(feature = "cassandra")]
pub use self::cassandra::{CassandraSettings, CassandraStore};
#[cfg(feature = "mongodb")]
pub use self::mongodb::MongoStore;
#[cfg(feature = "neo4j")]
pub use self::neo4j::Neo4jStore;
#[cfg(feature = "postgres")]
pub use self::postgresql::PostgresStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
