//! Core abstractions for engine-neutral table copying.
//!
//! - [`schema`]: table, column and index metadata
//! - [`value`]: SQL cell values, rows and batches
//! - [`traits`]: the source, target, type mapper and logger ports
//!
//! Drivers in `source` and `target` implement these ports; the orchestrator
//! only ever sees the traits, which lets it run against in-memory ports in
//! tests.

pub mod schema;
pub mod traits;
pub mod value;

pub use schema::{group_index_rows, Column, Index, IndexColumn, IndexColumnRow, Table};
pub use traits::{
    IndexFailure, MigrationLogger, SourceDatabase, TargetDatabase, TypeMapper, TypeMapping,
};
pub use value::{Batch, Row, SqlValue};
