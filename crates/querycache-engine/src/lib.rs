//! QueryCache engine
//!
//! The [`Database`] facade: runs queries through a [`QueryExecutor`] with the
//! cache in front and remembers which entries the current session touched.
//!
//! [`QueryExecutor`]: querycache_executor::QueryExecutor

pub mod database;

pub use database::{Database, QueryError};
