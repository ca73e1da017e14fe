//! Per-table outcomes and run-level statistics.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Stage of the per-table state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStage {
    SchemaRead,
    TableCreate,
    DataTransfer,
    IndexCreate,
}

impl fmt::Display for TableStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableStage::SchemaRead => "schema read",
            TableStage::TableCreate => "table create",
            TableStage::DataTransfer => "data transfer",
            TableStage::IndexCreate => "index create",
        };
        f.write_str(name)
    }
}

/// A table-scoped failure: the stage that failed and why.
#[derive(Debug)]
pub struct TableFailure {
    pub stage: TableStage,
    pub error: MigrateError,
}

impl TableFailure {
    /// Adapter for `map_err` that tags an error with `stage`.
    pub fn at(stage: TableStage) -> impl FnOnce(MigrateError) -> TableFailure {
        move |error| TableFailure { stage, error }
    }
}

impl fmt::Display for TableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.error)
    }
}

/// Outcome of migrating exactly one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub table_name: String,

    /// Rows copied; always 0 when `success` is false, even if some batches
    /// were committed before the failure.
    pub rows_migrated: u64,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<TableStage>,

    /// Elapsed time from table start, in seconds.
    pub duration_seconds: f64,
}

impl MigrationResult {
    pub fn success(table_name: impl Into<String>, rows_migrated: u64, elapsed: Duration) -> Self {
        Self {
            table_name: table_name.into(),
            rows_migrated,
            success: true,
            error: None,
            failed_stage: None,
            duration_seconds: elapsed.as_secs_f64(),
        }
    }

    pub fn failure(table_name: impl Into<String>, failure: &TableFailure, elapsed: Duration) -> Self {
        Self {
            table_name: table_name.into(),
            rows_migrated: 0,
            success: false,
            error: Some(failure.error.to_string()),
            failed_stage: Some(failure.stage),
            duration_seconds: elapsed.as_secs_f64(),
        }
    }

    /// Fold a tagged per-table outcome into a result.
    pub fn from_outcome(
        table_name: impl Into<String>,
        outcome: &std::result::Result<u64, TableFailure>,
        elapsed: Duration,
    ) -> Self {
        match outcome {
            Ok(rows) => Self::success(table_name, *rows, elapsed),
            Err(failure) => Self::failure(table_name, failure, elapsed),
        }
    }
}

/// Run-level accumulator of [`MigrationResult`]s. Append-only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigrationStatistics {
    /// Tables that completed successfully.
    pub tables_processed: usize,

    /// Rows migrated across successful tables only.
    pub total_rows: u64,

    /// Failed table names in completion order.
    pub failed_tables: Vec<String>,

    /// Every result in completion order.
    pub results: Vec<MigrationResult>,
}

impl MigrationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one table's outcome.
    pub fn add_result(&mut self, result: MigrationResult) {
        if result.success {
            self.tables_processed += 1;
            self.total_rows += result.rows_migrated;
        } else {
            self.failed_tables.push(result.table_name.clone());
        }
        self.results.push(result);
    }

    /// Number of tables for which a result was recorded.
    pub fn tables_attempted(&self) -> usize {
        self.results.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_tables.is_empty()
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
