//! pgscale daemon library - host side of the statistics bridge.
//!
//! This library provides:
//! - Configuration loading (`pgscale.toml`)
//! - DuckDB-backed statistics engine implementing the query executor
//! - The loopback TCP server loop
//! - Background worker registration and shutdown wiring

pub mod config;
pub mod server;
pub mod storage;
pub mod worker;
