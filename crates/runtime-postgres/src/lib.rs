//! PostgreSQL backend for the distributed task-processing runtime.
//!
//! Provides the three pieces `runtime-worker` needs to run against a real
//! database: [`PgQueueProtocol`] (the claim/heartbeat/complete/dead-letter
//! protocol), [`PgConnectionPool`] (a thin `ConnectionPool` wrapper over
//! `sqlx::PgPool`), and [`PgHealthProbe`].
//!
//! # Schema
//!
//! See [`schema::SCHEMA_SQL`] for the `processing_queue` table definition.
//! This crate does not run migrations; apply the schema however the
//! embedding application already manages its database.

pub mod health;
pub mod pool;
pub mod queue;
pub mod schema;

pub use health::PgHealthProbe;
pub use pool::PgConnectionPool;
pub use queue::PgQueueProtocol;
pub use schema::SCHEMA_SQL;
