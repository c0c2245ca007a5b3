//! Error taxonomy for the dump pipeline.
//!
//! One variant per failure class. Nothing is retried by the core; every
//! error halts the run and surfaces at the CLI boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DumpError {
    /// Configuration problems, surfaced before any database access.
    #[error("config error: {0}")]
    Config(String),

    /// Schema introspection failures: missing table, missing primary key,
    /// metadata queries gone wrong.
    #[error("schema error: {0}")]
    Schema(String),

    /// Query execution or row decoding failures.
    #[error("query error: {0}")]
    Query(String),

    /// A value the formatter refuses to render as SQL, such as NULL in a
    /// non-nullable column or a driver type outside the supported set.
    #[error("data invariant violated: {0}")]
    DataInvariant(String),

    /// Buffer or spill-file write failure. The rows buffer latches the
    /// first of these and reports it at the end of the run.
    #[error("write error: {0}")]
    Write(#[from] std::io::Error),

    /// The run was cancelled through the [`CancelToken`](crate::cancel::CancelToken).
    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DumpError>;
