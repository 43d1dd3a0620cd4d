//! The seam between the bridge and the host's data engine.
//!
//! The host implements [`QueryExecutor`]; the bridge only ever hands it
//! query text built from a validated [`crate::router::QueryId`].

use thiserror::Error;

use crate::result_set::ResultSet;

/// Error type for query execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The query failed; only the current request is affected.
    #[error("query failed: {0}")]
    Query(String),

    /// The engine is in a state the bridge cannot continue from.
    #[error("engine unavailable: {0}")]
    Fatal(String),
}

impl ExecutorError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExecutorError::Fatal(_))
    }
}

/// Runs one query in its own consistent-read transaction.
///
/// Implementations must begin the transaction, materialize every row and
/// release the transaction before returning. Nothing is held across calls.
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, query: &str) -> Result<ResultSet, ExecutorError>;
}

impl<F> QueryExecutor for F
where
    F: Fn(&str) -> Result<ResultSet, ExecutorError> + Send + Sync,
{
    fn execute(&self, query: &str) -> Result<ResultSet, ExecutorError> {
        self(query)
    }
}
