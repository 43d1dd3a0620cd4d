//! Storage layer for the pgscale daemon.
//!
//! Provides the DuckDB-backed statistics engine with:
//! - Schema and built-in statistics views
//! - Read-only or read-write database access
//! - One transaction per query, cells rendered as text

mod cells;
mod schema;
mod statsbase;

pub use schema::{BUILTIN_VIEWS, SCHEMA_VERSION};
pub use statsbase::{AccessMode, StatsBase};
