//! Migration orchestrator - per-table state machine and batch transfer.
//!
//! Tables are migrated one at a time in source order. Each table runs
//! SchemaRead, TableCreate, DataTransfer and IndexCreate in sequence; a
//! failure in any of the first three ends that table with a failed
//! [`MigrationResult`] and the run moves on to the next table. Index
//! failures are logged per index and never fail the table.
//!
//! Every batch is its own target transaction. When a later batch fails,
//! earlier batches of the same table stay committed while the table is
//! reported with 0 rows migrated.
//!
//! The row count is taken once before pagination and pages are read with
//! unordered OFFSET/FETCH, so results are only exact against a source that
//! is not being written during the run.

mod stats;

pub use stats::{MigrationResult, MigrationStatistics, TableFailure, TableStage};

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::{Config, DEFAULT_BATCH_SIZE};
use crate::core::{Batch, MigrationLogger, SourceDatabase, Table, TargetDatabase, TypeMapper};
use crate::error::Result;
use crate::logging::TracingLogger;
use crate::source::MssqlSource;
use crate::target::PostgresTarget;
use crate::typemap::MssqlToPostgresMapper;

/// Progress observation emitted after every committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub table: String,
    pub rows_done: u64,
    pub rows_total: u64,
    /// Percentage of `rows_total`, capped at 100.
    pub percent: f64,
}

impl ProgressUpdate {
    fn new(table: &str, rows_done: u64, rows_total: u64) -> Self {
        let percent = if rows_total == 0 {
            100.0
        } else {
            (rows_done as f64 / rows_total as f64 * 100.0).min(100.0)
        };
        Self {
            table: table.to_string(),
            rows_done,
            rows_total,
            percent,
        }
    }
}

/// Source vs target row count for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountCheck {
    pub table: String,
    /// `None` when the source table could not be counted.
    pub source_rows: Option<u64>,
    /// `None` when the target table could not be counted.
    pub target_rows: Option<u64>,
    pub matches: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connection test result for both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Orchestrator wired to the MSSQL and PostgreSQL drivers.
pub type MssqlToPostgresOrchestrator =
    Orchestrator<MssqlSource, PostgresTarget, Arc<MssqlToPostgresMapper>, TracingLogger>;

/// Drives a full copy from a source port to a target port.
pub struct Orchestrator<S, T, M, L> {
    source: S,
    target: T,
    mapper: M,
    logger: L,
    batch_size: usize,
    create_indexes: bool,
    progress_tx: Option<mpsc::UnboundedSender<ProgressUpdate>>,
}

impl MssqlToPostgresOrchestrator {
    /// Build an orchestrator with concrete drivers from configuration.
    ///
    /// No connection is opened until a run starts.
    pub fn from_config(config: &Config) -> Self {
        let mapper = Arc::new(MssqlToPostgresMapper);
        let source = MssqlSource::new(config.source.clone());
        let target = PostgresTarget::new(config.target.clone(), mapper.clone());

        Orchestrator::new(source, target, mapper, TracingLogger)
            .with_batch_size(config.migration.get_batch_size())
            .with_create_indexes(config.migration.create_indexes)
    }
}

impl<S, T, M, L> Orchestrator<S, T, M, L>
where
    S: SourceDatabase,
    T: TargetDatabase,
    M: TypeMapper,
    L: MigrationLogger,
{
    pub fn new(source: S, target: T, mapper: M, logger: L) -> Self {
        Self {
            source,
            target,
            mapper,
            logger,
            batch_size: DEFAULT_BATCH_SIZE,
            create_indexes: true,
            progress_tx: None,
        }
    }

    /// Set rows per batch. Values below 1 are raised to 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Enable or disable the IndexCreate stage.
    pub fn with_create_indexes(mut self, create_indexes: bool) -> Self {
        self.create_indexes = create_indexes;
        self
    }

    /// Set progress channel for updates.
    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Run the migration.
    ///
    /// Connection failures and errors outside a table's stages abort the
    /// run. Both sides are disconnected on every path.
    pub async fn execute(&mut self) -> Result<MigrationStatistics> {
        let outcome = self.migrate_all().await;
        if let Err(ref e) = outcome {
            self.logger.error(&format!("Migration aborted: {}", e));
        }
        self.disconnect_all().await;
        outcome
    }

    /// Compare source and target row counts for every source table.
    pub async fn validate(&mut self) -> Result<Vec<RowCountCheck>> {
        let outcome = self.validate_all().await;
        self.disconnect_all().await;
        outcome
    }

    /// Connect to each side independently and report latency and errors.
    pub async fn health_check(&mut self) -> HealthCheckResult {
        let start = Instant::now();
        let source = self.source.connect().await;
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let target = self.target.connect().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        self.disconnect_all().await;

        let source_connected = source.is_ok();
        let target_connected = target.is_ok();
        HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error: source.err().map(|e| e.to_string()),
            target_connected,
            target_latency_ms,
            target_error: target.err().map(|e| e.to_string()),
            healthy: source_connected && target_connected,
        }
    }

    async fn connect_all(&mut self) -> Result<()> {
        self.source.connect().await?;
        self.logger
            .info(&format!("Connected to source ({})", self.source.db_type()));
        self.target.connect().await?;
        self.logger
            .info(&format!("Connected to target ({})", self.target.db_type()));
        Ok(())
    }

    async fn disconnect_all(&mut self) {
        if let Err(e) = self.source.disconnect().await {
            self.logger
                .warning(&format!("Error disconnecting from source: {}", e));
        }
        if let Err(e) = self.target.disconnect().await {
            self.logger
                .warning(&format!("Error disconnecting from target: {}", e));
        }
    }

    async fn migrate_all(&mut self) -> Result<MigrationStatistics> {
        let run_start = Instant::now();
        self.connect_all().await?;

        let tables = self.source.list_tables().await?;
        self.logger
            .info(&format!("Found {} tables to migrate", tables.len()));

        let mut stats = MigrationStatistics::new();
        for name in &tables {
            let result = self.migrate_table(name).await;
            stats.add_result(result);
        }

        self.logger.info(&format!(
            "Migration finished in {:.2}s: {} tables succeeded, {} failed, {} rows",
            run_start.elapsed().as_secs_f64(),
            stats.tables_processed,
            stats.failed_tables.len(),
            stats.total_rows
        ));
        if stats.has_failures() {
            self.logger
                .warning(&format!("Failed tables: {}", stats.failed_tables.join(", ")));
        }

        Ok(stats)
    }

    async fn migrate_table(&mut self, name: &str) -> MigrationResult {
        let start = Instant::now();
        self.logger.info(&format!("Migrating table {}", name));

        let outcome = self.run_table_stages(name).await;
        let result = MigrationResult::from_outcome(name, &outcome, start.elapsed());

        match outcome {
            Ok(rows) => self.logger.info(&format!(
                "{}: {} rows in {:.2}s",
                name, rows, result.duration_seconds
            )),
            Err(failure) => self.logger.error(&format!(
                "{}: {} after {:.2}s",
                name, failure, result.duration_seconds
            )),
        }
        result
    }

    async fn run_table_stages(&mut self, name: &str) -> std::result::Result<u64, TableFailure> {
        let table = self
            .source
            .read_table_schema(name)
            .await
            .map_err(TableFailure::at(TableStage::SchemaRead))?;

        self.warn_lossy_columns(&table);
        self.target
            .create_table(&table)
            .await
            .map_err(TableFailure::at(TableStage::TableCreate))?;

        let rows = self
            .transfer_data(&table)
            .await
            .map_err(TableFailure::at(TableStage::DataTransfer))?;

        self.build_indexes(&table).await;
        Ok(rows)
    }

    fn warn_lossy_columns(&self, table: &Table) {
        for col in &table.columns {
            let mapping = self.mapper.map_column(col);
            if !mapping.is_lossy {
                continue;
            }
            if let Some(warning) = mapping.warning {
                self.logger.warning(&format!("{}: {}", table.name, warning));
            }
        }
    }

    /// Copy all rows of `table` in batches; returns the rows copied.
    async fn transfer_data(&mut self, table: &Table) -> Result<u64> {
        let total = self.source.count_rows(&table.name).await?;
        if total == 0 {
            self.logger.info(&format!("{}: no rows to copy", table.name));
            return Ok(0);
        }

        let columns = table.column_names();
        let mut offset: u64 = 0;

        while offset < total {
            let batch = self
                .source
                .read_batch(&table.name, &table.columns, offset, self.batch_size)
                .await?;
            if batch.is_empty() {
                break;
            }

            let read = batch.len();
            self.write_batch(&table.name, &columns, batch).await?;
            offset += read as u64;
            self.report_progress(&table.name, offset, total);

            if read < self.batch_size {
                break;
            }
        }

        Ok(offset)
    }

    /// Insert one batch inside its own transaction.
    async fn write_batch(&mut self, table: &str, columns: &[String], batch: Batch) -> Result<()> {
        self.target.begin_transaction().await?;

        let written = match self.target.insert_batch(table, columns, batch).await {
            Ok(_) => self.target.commit_transaction().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            if let Err(rollback) = self.target.rollback_transaction().await {
                self.logger
                    .warning(&format!("{}: rollback failed: {}", table, rollback));
            }
            return Err(e);
        }
        Ok(())
    }

    fn report_progress(&self, table: &str, rows_done: u64, rows_total: u64) {
        let update = ProgressUpdate::new(table, rows_done, rows_total);
        self.logger.info(&format!(
            "{}: {}/{} rows ({:.1}%)",
            table, rows_done, rows_total, update.percent
        ));
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(update);
        }
    }

    async fn build_indexes(&mut self, table: &Table) {
        if !self.create_indexes || table.indexes.is_empty() {
            return;
        }

        let failures = self
            .target
            .create_indexes(&table.name, &table.indexes)
            .await;
        for failure in &failures {
            self.logger.warning(&format!(
                "{}: failed to create index {}: {}",
                table.name, failure.index, failure.error
            ));
        }

        self.logger.info(&format!(
            "{}: created {}/{} indexes",
            table.name,
            table.indexes.len().saturating_sub(failures.len()),
            table.indexes.len()
        ));
    }

    async fn validate_all(&mut self) -> Result<Vec<RowCountCheck>> {
        self.connect_all().await?;
        let tables = self.source.list_tables().await?;

        let mut checks = Vec::with_capacity(tables.len());
        for table in tables {
            let mut errors = Vec::new();
            let source_rows = match self.source.count_rows(&table).await {
                Ok(n) => Some(n),
                Err(e) => {
                    errors.push(format!("source: {}", e));
                    None
                }
            };
            let target_rows = match self.target.count_rows(&table).await {
                Ok(n) => Some(n),
                Err(e) => {
                    errors.push(format!("target: {}", e));
                    None
                }
            };
            let matches = source_rows.is_some() && target_rows == source_rows;

            if matches {
                self.logger.info(&format!(
                    "{}: {} rows (match)",
                    table,
                    count_text(source_rows)
                ));
            } else {
                self.logger.warning(&format!(
                    "{}: source={} target={} (MISMATCH)",
                    table,
                    count_text(source_rows),
                    count_text(target_rows)
                ));
            }

            checks.push(RowCountCheck {
                table,
                source_rows,
                target_rows,
                matches,
                error: (!errors.is_empty()).then(|| errors.join("; ")),
            });
        }

        Ok(checks)
    }
}

/// Render an optional row count, `missing` when it could not be read.
fn count_text(count: Option<u64>) -> String {
    count.map_or_else(|| "missing".to_string(), |n| n.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_update_percent() {
        let update = ProgressUpdate::new("Employees", 10000, 25000);
        assert!((update.percent - 40.0).abs() < 1e-9);

        let update = ProgressUpdate::new("Employees", 30000, 25000);
        assert_eq!(update.percent, 100.0);
    }

    #[test]
    fn test_from_config_applies_migration_settings() {
        let yaml = r#"
source:
  host: localhost
  database: Union
  user: sa
  password: secret
target:
  host: localhost
  database: Union
  user: postgres
  password: secret
  ssl_mode: disable
migration:
  batch_size: 250
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let orchestrator = MssqlToPostgresOrchestrator::from_config(&config);
        assert_eq!(orchestrator.batch_size(), 250);
        assert_eq!(orchestrator.source().db_type(), "mssql");
        assert_eq!(orchestrator.target().db_type(), "postgres");
    }
}
