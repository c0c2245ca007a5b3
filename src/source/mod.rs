//! Row sources: the seam between the engine and a concrete database.
//!
//! The engine and catalog only ever talk to a [`RowSource`]; the live
//! implementation wraps the `mysql` driver, while tests run against the
//! deterministic in-memory source.

mod memory;
mod mysql;

pub use memory::*;
pub use mysql::*;

use ahash::AHashMap;

use crate::cancel::CancelToken;
use crate::error::Result;
use crate::value::SqlValue;

/// One result row: column name to scalar value.
pub type Row = AHashMap<String, SqlValue>;

/// A queryable database.
///
/// `params` bind to `?` placeholders in order. Implementations must check
/// the cancellation token before touching the wire and must map every
/// driver value into the closed [`SqlValue`] union.
pub trait RowSource {
    fn query(&self, cancel: &CancelToken, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;
}
