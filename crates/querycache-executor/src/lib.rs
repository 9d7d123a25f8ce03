//! Query executors
//!
//! The cache never talks to a database itself: it calls a [`QueryExecutor`]
//! on a miss. This crate provides the trait, a mock for tests and demos, and
//! a PostgreSQL executor.
//!
//! ## Features
//!
//! Enable database support via Cargo features:
//! - `postgres` - PostgreSQL support (plain and TLS connections)

pub mod executor;
pub mod mock;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use executor::{database_from_uri, ExecutorError, QueryExecutor};
pub use mock::MockExecutor;

#[cfg(feature = "postgres")]
pub use postgres::PostgresExecutor;
