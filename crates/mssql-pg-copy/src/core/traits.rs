//! Port traits consumed by the orchestrator.
//!
//! - [`SourceDatabase`]: reads schema and row batches from the source engine
//! - [`TargetDatabase`]: creates tables and indexes and writes row batches
//! - [`TypeMapper`]: translates a source column into a target type expression
//! - [`MigrationLogger`]: receives progress and outcome messages
//!
//! The orchestrator is generic over all four, so it never names a concrete
//! engine. Each database port owns exactly one connection between `connect`
//! and `disconnect`; `disconnect` on a port that never connected is a no-op.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{MigrateError, Result};

use super::schema::{Column, Index, Table};
use super::value::Batch;

/// Read schema and data from a source database.
#[async_trait]
pub trait SourceDatabase: Send {
    /// Open the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Close the connection if one is open.
    async fn disconnect(&mut self) -> Result<()>;

    /// List base tables in source-defined order.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Read the structural description of one table: columns in ordinal
    /// order, primary key in key order, and non-PK indexes.
    async fn read_table_schema(&mut self, table: &str) -> Result<Table>;

    /// Count the rows currently in a table.
    async fn count_rows(&mut self, table: &str) -> Result<u64>;

    /// Read up to `limit` rows starting at `offset`.
    ///
    /// Values are returned positionally in the order of `columns`. An empty
    /// batch means the table has no rows at or past `offset`.
    async fn read_batch(
        &mut self,
        table: &str,
        columns: &[Column],
        offset: u64,
        limit: usize,
    ) -> Result<Batch>;

    /// Get the database type identifier (e.g., "mssql").
    fn db_type(&self) -> &str;
}

/// A single index that could not be created.
#[derive(Debug)]
pub struct IndexFailure {
    /// Source index name.
    pub index: String,
    /// Why creation failed.
    pub error: MigrateError,
}

/// Write schema and data to a target database.
#[async_trait]
pub trait TargetDatabase: Send {
    /// Open the connection.
    async fn connect(&mut self) -> Result<()>;

    /// Close the connection if one is open.
    async fn disconnect(&mut self) -> Result<()>;

    /// Create a table, including its primary key, using the type mapper for
    /// every column.
    async fn create_table(&mut self, table: &Table) -> Result<()>;

    /// Insert a batch of rows inside the currently open transaction.
    ///
    /// Returns the number of rows written.
    async fn insert_batch(&mut self, table: &str, columns: &[String], rows: Batch) -> Result<u64>;

    /// Create one secondary index.
    async fn create_index(&mut self, table: &str, index: &Index) -> Result<()>;

    /// Create every index for a table.
    ///
    /// A failing index never stops the remaining ones; failures are
    /// collected and returned in index order.
    async fn create_indexes(&mut self, table: &str, indexes: &[Index]) -> Vec<IndexFailure> {
        let mut failures = Vec::new();
        for index in indexes {
            if let Err(error) = self.create_index(table, index).await {
                failures.push(IndexFailure {
                    index: index.name.clone(),
                    error,
                });
            }
        }
        failures
    }

    /// Begin a transaction.
    async fn begin_transaction(&mut self) -> Result<()>;

    /// Commit the open transaction.
    async fn commit_transaction(&mut self) -> Result<()>;

    /// Roll back the open transaction.
    async fn rollback_transaction(&mut self) -> Result<()>;

    /// Count the rows currently in a target table.
    async fn count_rows(&mut self, table: &str) -> Result<u64>;

    /// Get the database type identifier (e.g., "postgres").
    fn db_type(&self) -> &str;
}

/// Maps source column definitions to target type expressions.
pub trait TypeMapper: Send + Sync {
    /// Map a column definition, reporting whether the mapping loses
    /// information.
    fn map_column(&self, col: &Column) -> TypeMapping;

    /// Map a column definition to its target type expression.
    fn map_type(&self, col: &Column) -> String {
        self.map_column(col).target_type
    }
}

impl<T: TypeMapper + ?Sized> TypeMapper for Arc<T> {
    fn map_column(&self, col: &Column) -> TypeMapping {
        (**self).map_column(col)
    }
}

/// Result of mapping a column type from source to target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapping {
    /// Target type string (e.g., "VARCHAR(255)", "BIGINT").
    pub target_type: String,
    /// Whether this mapping loses data or precision.
    pub is_lossy: bool,
    /// Warning message for lossy mappings.
    pub warning: Option<String>,
}

impl TypeMapping {
    /// Create a lossless type mapping.
    pub fn lossless(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: false,
            warning: None,
        }
    }

    /// Create a lossy type mapping with a warning.
    pub fn lossy(target_type: impl Into<String>, warning: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            is_lossy: true,
            warning: Some(warning.into()),
        }
    }
}

/// Receives human-readable migration messages.
///
/// Purely observational: nothing a logger does may influence control flow.
pub trait MigrationLogger: Send + Sync {
    fn info(&self, message: &str);
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}
