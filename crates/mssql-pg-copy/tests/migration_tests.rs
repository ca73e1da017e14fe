//! Orchestrator scenarios over in-memory source and target ports.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mssql_pg_copy::core::{Batch, Column, Index, IndexColumn, IndexFailure, Row, SqlValue, Table};
use mssql_pg_copy::{
    MigrateError, MigrationLogger, MssqlToPostgresMapper, Orchestrator, Result, SourceDatabase,
    TableStage, TargetDatabase,
};
use tokio::sync::mpsc;

// ============================================================================
// In-memory ports
// ============================================================================

#[derive(Default)]
struct MockSource {
    order: Vec<String>,
    tables: HashMap<String, (Table, Vec<Row>)>,
    count_override: HashMap<String, u64>,
    schema_failures: HashSet<String>,
    count_failures: HashSet<String>,
    fail_connect: bool,
    fail_list: bool,
    connected: bool,
    disconnect_calls: usize,
    /// (table, offset, limit, columns requested)
    reads: Vec<(String, u64, usize, Vec<String>)>,
}

impl MockSource {
    fn new() -> Self {
        Self::default()
    }

    fn with_table(mut self, table: Table, rows: Vec<Row>) -> Self {
        self.order.push(table.name.clone());
        self.tables.insert(table.name.clone(), (table, rows));
        self
    }

    fn reads_for(&self, table: &str) -> Vec<&(String, u64, usize, Vec<String>)> {
        self.reads.iter().filter(|r| r.0 == table).collect()
    }
}

#[async_trait]
impl SourceDatabase for MockSource {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(MigrateError::connection("source", "login failed for user 'sa'"));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnect_calls += 1;
        self.connected = false;
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        if self.fail_list {
            return Err(MigrateError::SchemaExtraction("catalog unavailable".into()));
        }
        Ok(self.order.clone())
    }

    async fn read_table_schema(&mut self, table: &str) -> Result<Table> {
        if self.schema_failures.contains(table) {
            return Err(MigrateError::SchemaExtraction(format!("cannot read {}", table)));
        }
        self.tables
            .get(table)
            .map(|(t, _)| t.clone())
            .ok_or_else(|| MigrateError::SchemaExtraction(format!("no table {}", table)))
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        if self.count_failures.contains(table) {
            return Err(MigrateError::SchemaExtraction(format!("permission denied on {}", table)));
        }
        if let Some(n) = self.count_override.get(table) {
            return Ok(*n);
        }
        Ok(self.tables.get(table).map_or(0, |(_, rows)| rows.len() as u64))
    }

    async fn read_batch(
        &mut self,
        table: &str,
        columns: &[Column],
        offset: u64,
        limit: usize,
    ) -> Result<Batch> {
        assert!(self.connected, "read_batch on a disconnected source");
        self.reads.push((
            table.to_string(),
            offset,
            limit,
            columns.iter().map(|c| c.name.clone()).collect(),
        ));

        let rows = match self.tables.get(table) {
            Some((_, rows)) => rows,
            None => return Ok(Vec::new()),
        };
        let start = (offset as usize).min(rows.len());
        let end = (start + limit).min(rows.len());
        Ok(rows[start..end].to_vec())
    }

    fn db_type(&self) -> &str {
        "mock-source"
    }
}

#[derive(Default)]
struct MockTarget {
    committed: BTreeMap<String, Vec<Row>>,
    pending: Vec<(String, Vec<Row>)>,
    in_transaction: bool,
    fail_connect: bool,
    create_failures: HashSet<String>,
    /// Fail the Nth insert (0-based) into the named table.
    insert_failure: Option<(String, usize)>,
    /// Fail the Nth commit (0-based) of the named table's batches.
    commit_failure: Option<(String, usize)>,
    fail_rollback: bool,
    /// Extra failures reported by `create_indexes` beyond the real ones.
    phantom_index_failures: usize,
    failing_indexes: HashSet<String>,
    commit_attempts: HashMap<String, usize>,
    created_indexes: Vec<(String, String)>,
    inserts: Vec<(String, usize)>,
    inserted_columns: Vec<Vec<String>>,
    commits: usize,
    rollbacks: usize,
    connected: bool,
    disconnect_calls: usize,
}

impl MockTarget {
    fn new() -> Self {
        Self::default()
    }

    fn batch_sizes(&self, table: &str) -> Vec<usize> {
        self.inserts
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, n)| *n)
            .collect()
    }

    fn committed_rows(&self, table: &str) -> usize {
        self.committed.get(table).map_or(0, |rows| rows.len())
    }
}

#[async_trait]
impl TargetDatabase for MockTarget {
    async fn connect(&mut self) -> Result<()> {
        if self.fail_connect {
            return Err(MigrateError::connection("target", "connection refused"));
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.disconnect_calls += 1;
        self.connected = false;
        Ok(())
    }

    async fn create_table(&mut self, table: &Table) -> Result<()> {
        if self.create_failures.contains(&table.name) {
            return Err(MigrateError::transfer(&table.name, "relation cannot be created"));
        }
        self.committed.entry(table.name.clone()).or_default();
        Ok(())
    }

    async fn insert_batch(&mut self, table: &str, columns: &[String], rows: Batch) -> Result<u64> {
        assert!(self.in_transaction, "insert outside a transaction");

        let attempt = self.inserts.iter().filter(|(t, _)| t == table).count();
        self.inserts.push((table.to_string(), rows.len()));
        self.inserted_columns.push(columns.to_vec());

        if let Some((failing_table, n)) = &self.insert_failure {
            if failing_table == table && *n == attempt {
                return Err(MigrateError::transfer(table, "duplicate key value"));
            }
        }

        let count = rows.len() as u64;
        self.pending.push((table.to_string(), rows));
        Ok(count)
    }

    async fn create_index(&mut self, table: &str, index: &Index) -> Result<()> {
        if self.failing_indexes.contains(&index.name) {
            return Err(MigrateError::transfer(table, "column does not exist"));
        }
        self.created_indexes
            .push((table.to_string(), index.name.clone()));
        Ok(())
    }

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
        for i in 0..self.phantom_index_failures {
            failures.push(IndexFailure {
                index: format!("ghost_{}", i),
                error: MigrateError::transfer(table, "reported without a matching index"),
            });
        }
        failures
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        assert!(!self.in_transaction, "nested transaction");
        self.in_transaction = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        if let Some(table) = self.pending.first().map(|(t, _)| t.clone()) {
            let attempt = self.commit_attempts.entry(table.clone()).or_default();
            let n = *attempt;
            *attempt += 1;
            if let Some((failing_table, fail_at)) = &self.commit_failure {
                if *failing_table == table && *fail_at == n {
                    return Err(MigrateError::transfer(&table, "could not serialize access"));
                }
            }
        }
        for (table, rows) in self.pending.drain(..) {
            self.committed.entry(table).or_default().extend(rows);
        }
        self.in_transaction = false;
        self.commits += 1;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.pending.clear();
        self.in_transaction = false;
        self.rollbacks += 1;
        if self.fail_rollback {
            return Err(MigrateError::connection("target", "connection reset during rollback"));
        }
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        self.committed
            .get(table)
            .map(|rows| rows.len() as u64)
            .ok_or_else(|| MigrateError::transfer(table, "relation does not exist"))
    }

    fn db_type(&self) -> &str {
        "mock-target"
    }
}

#[derive(Clone, Default)]
struct RecordingLogger {
    entries: Arc<Mutex<Vec<(&'static str, String)>>>,
}

impl RecordingLogger {
    fn messages(&self, level: &str) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl MigrationLogger for RecordingLogger {
    fn info(&self, message: &str) {
        self.entries.lock().unwrap().push(("info", message.to_string()));
    }

    fn warning(&self, message: &str) {
        self.entries
            .lock()
            .unwrap()
            .push(("warning", message.to_string()));
    }

    fn error(&self, message: &str) {
        self.entries.lock().unwrap().push(("error", message.to_string()));
    }
}

type TestOrchestrator = Orchestrator<MockSource, MockTarget, MssqlToPostgresMapper, RecordingLogger>;

fn orchestrator(
    source: MockSource,
    target: MockTarget,
    batch_size: usize,
) -> (TestOrchestrator, RecordingLogger) {
    let logger = RecordingLogger::default();
    let orchestrator = Orchestrator::new(source, target, MssqlToPostgresMapper, logger.clone())
        .with_batch_size(batch_size);
    (orchestrator, logger)
}

fn table(name: &str) -> Table {
    let mut table = Table::new(name);
    table.columns = vec![
        Column::new("Id", "int").not_null(),
        Column::new("Name", "nvarchar").with_max_length(100),
    ];
    table.primary_key = vec!["Id".to_string()];
    table
}

fn rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| vec![SqlValue::I32(i as i32), SqlValue::String(format!("name-{}", i))])
        .collect()
}

fn index(name: &str, column: &str) -> Index {
    Index {
        name: name.to_string(),
        columns: vec![IndexColumn {
            name: column.to_string(),
            descending: false,
        }],
        is_unique: false,
    }
}

// ============================================================================
// End-to-end run
// ============================================================================

#[tokio::test]
async fn test_employees_and_departments() {
    let source = MockSource::new()
        .with_table(table("Employees"), rows(25_000))
        .with_table(table("Departments"), Vec::new());
    let (mut orch, _logger) = orchestrator(source, MockTarget::new(), 10_000);

    let stats = orch.execute().await.unwrap();

    assert_eq!(stats.tables_processed, 2);
    assert!(stats.failed_tables.is_empty());
    assert_eq!(stats.total_rows, 25_000);

    let employees = &stats.results[0];
    assert_eq!(employees.table_name, "Employees");
    assert!(employees.success);
    assert_eq!(employees.rows_migrated, 25_000);

    let departments = &stats.results[1];
    assert_eq!(departments.table_name, "Departments");
    assert!(departments.success);
    assert_eq!(departments.rows_migrated, 0);

    let target = orch.target();
    assert_eq!(target.batch_sizes("Employees"), vec![10_000, 10_000, 5_000]);
    assert!(target.batch_sizes("Departments").is_empty());
    assert_eq!(target.committed_rows("Employees"), 25_000);
    assert_eq!(target.commits, 3);
    assert!(orch.source().reads_for("Departments").is_empty());

    assert!(!orch.source().connected);
    assert!(!orch.target().connected);
    assert_eq!(orch.source().disconnect_calls, 1);
    assert_eq!(orch.target().disconnect_calls, 1);
}

#[tokio::test]
async fn test_batches_follow_table_column_order() {
    let source = MockSource::new().with_table(table("Employees"), rows(3));
    let (mut orch, _) = orchestrator(source, MockTarget::new(), 2);

    orch.execute().await.unwrap();

    let reads = orch.source().reads_for("Employees");
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[0].3, vec!["Id".to_string(), "Name".to_string()]);
    assert_eq!((reads[0].1, reads[0].2), (0, 2));
    assert_eq!((reads[1].1, reads[1].2), (2, 2));
    assert_eq!(
        orch.target().inserted_columns[0],
        vec!["Id".to_string(), "Name".to_string()]
    );
}

#[tokio::test]
async fn test_batch_count_is_ceiling_of_rows_over_batch_size() {
    for (total, batch) in [(1usize, 1usize), (9, 3), (10, 3), (7, 10), (10_001, 10_000)] {
        let source = MockSource::new().with_table(table("T"), rows(total));
        let (mut orch, _) = orchestrator(source, MockTarget::new(), batch);

        let stats = orch.execute().await.unwrap();
        let sizes = orch.target().batch_sizes("T");

        assert_eq!(sizes.len(), total.div_ceil(batch), "N={} B={}", total, batch);
        let (last, full) = sizes.split_last().unwrap();
        assert!(full.iter().all(|n| *n == batch));
        assert_eq!(*last, total - batch * ((total - 1) / batch));
        assert_eq!(stats.results[0].rows_migrated, total as u64);
    }
}

#[tokio::test]
async fn test_short_read_ends_transfer() {
    let mut source = MockSource::new().with_table(table("Shrinking"), rows(40));
    // count taken before rows were deleted
    source.count_override.insert("Shrinking".into(), 100);
    let (mut orch, _) = orchestrator(source, MockTarget::new(), 30);

    let stats = orch.execute().await.unwrap();

    assert!(stats.results[0].success);
    assert_eq!(stats.results[0].rows_migrated, 40);
    assert_eq!(orch.source().reads_for("Shrinking").len(), 2);
}

#[tokio::test]
async fn test_empty_read_ends_transfer() {
    let mut source = MockSource::new().with_table(table("Vanished"), rows(20));
    source.count_override.insert("Vanished".into(), 50);
    let (mut orch, _) = orchestrator(source, MockTarget::new(), 10);

    let stats = orch.execute().await.unwrap();

    // third read returns nothing
    assert_eq!(orch.source().reads_for("Vanished").len(), 3);
    assert_eq!(stats.results[0].rows_migrated, 20);
}

// ============================================================================
// Table-scoped failures
// ============================================================================

#[tokio::test]
async fn test_failed_batch_reports_zero_rows_but_keeps_committed_batches() {
    let source = MockSource::new()
        .with_table(table("Employees"), rows(25_000))
        .with_table(table("Projects"), rows(5));
    let mut target = MockTarget::new();
    target.insert_failure = Some(("Employees".into(), 1));
    let (mut orch, logger) = orchestrator(source, target, 10_000);

    let stats = orch.execute().await.unwrap();

    let employees = &stats.results[0];
    assert!(!employees.success);
    assert_eq!(employees.rows_migrated, 0);
    assert_eq!(employees.failed_stage, Some(TableStage::DataTransfer));
    assert!(employees.error.as_deref().unwrap().contains("duplicate key"));

    // The first batch was committed before the failure and is not undone.
    let target = orch.target();
    assert_eq!(target.committed_rows("Employees"), 10_000);
    assert_eq!(target.rollbacks, 1);
    assert_eq!(target.batch_sizes("Employees"), vec![10_000, 10_000]);

    // The run moves on to the next table.
    assert!(stats.results[1].success);
    assert_eq!(stats.results[1].rows_migrated, 5);
    assert_eq!(stats.failed_tables, vec!["Employees".to_string()]);
    assert_eq!(stats.total_rows, 5);
    assert_eq!(stats.tables_processed + stats.failed_tables.len(), 2);

    assert!(logger
        .messages("error")
        .iter()
        .any(|m| m.starts_with("Employees:")));
}

#[tokio::test]
async fn test_failed_commit_rolls_back_that_batch() {
    let source = MockSource::new()
        .with_table(table("Employees"), rows(25))
        .with_table(table("Projects"), rows(5));
    let mut target = MockTarget::new();
    target.commit_failure = Some(("Employees".into(), 1));
    let (mut orch, _) = orchestrator(source, target, 10);

    let stats = orch.execute().await.unwrap();

    let employees = &stats.results[0];
    assert!(!employees.success);
    assert_eq!(employees.rows_migrated, 0);
    assert_eq!(employees.failed_stage, Some(TableStage::DataTransfer));
    assert!(employees
        .error
        .as_deref()
        .unwrap()
        .contains("could not serialize access"));

    let target = orch.target();
    assert_eq!(target.rollbacks, 1);
    assert_eq!(target.committed_rows("Employees"), 10);
    assert_eq!(target.batch_sizes("Employees"), vec![10, 10]);

    assert!(stats.results[1].success);
    assert_eq!(stats.results[1].rows_migrated, 5);
    assert_eq!(target.committed_rows("Projects"), 5);
}

#[tokio::test]
async fn test_rollback_failure_is_logged_and_commit_error_kept() {
    let source = MockSource::new()
        .with_table(table("Employees"), rows(3))
        .with_table(table("Projects"), rows(3));
    let mut target = MockTarget::new();
    target.commit_failure = Some(("Employees".into(), 1));
    target.fail_rollback = true;
    let (mut orch, logger) = orchestrator(source, target, 2);

    let stats = orch.execute().await.unwrap();

    let employees = &stats.results[0];
    assert!(!employees.success);
    assert_eq!(employees.rows_migrated, 0);
    let error = employees.error.as_deref().unwrap();
    assert!(error.contains("could not serialize access"));
    assert!(!error.contains("rollback"));

    assert!(logger
        .messages("warning")
        .iter()
        .any(|m| m.starts_with("Employees: rollback failed") && m.contains("connection reset")));
    assert_eq!(orch.target().rollbacks, 1);

    assert!(stats.results[1].success);
    assert_eq!(stats.results[1].rows_migrated, 3);
}

#[tokio::test]
async fn test_schema_read_failure_continues_with_next_table() {
    let mut source = MockSource::new()
        .with_table(table("Broken"), rows(10))
        .with_table(table("Fine"), rows(10));
    source.schema_failures.insert("Broken".into());
    let (mut orch, _) = orchestrator(source, MockTarget::new(), 100);

    let stats = orch.execute().await.unwrap();

    assert_eq!(stats.results[0].failed_stage, Some(TableStage::SchemaRead));
    assert_eq!(stats.results[0].rows_migrated, 0);
    assert!(stats.results[1].success);
    assert!(orch.target().batch_sizes("Broken").is_empty());
}

#[tokio::test]
async fn test_table_create_failure_skips_transfer() {
    let source = MockSource::new()
        .with_table(table("Reserved"), rows(10))
        .with_table(table("Fine"), rows(3));
    let mut target = MockTarget::new();
    target.create_failures.insert("Reserved".into());
    let (mut orch, _) = orchestrator(source, target, 100);

    let stats = orch.execute().await.unwrap();

    assert_eq!(stats.results[0].failed_stage, Some(TableStage::TableCreate));
    assert!(orch.source().reads_for("Reserved").is_empty());
    assert_eq!(stats.total_rows, 3);
}

// ============================================================================
// Indexes
// ============================================================================

#[tokio::test]
async fn test_index_failures_do_not_fail_table() {
    let mut employees = table("Employees");
    employees.indexes = vec![
        index("IX_Missing", "Nope"),
        index("IX_Name", "Name"),
    ];
    let source = MockSource::new().with_table(employees, rows(5));
    let mut target = MockTarget::new();
    target.failing_indexes.insert("IX_Missing".into());
    let (mut orch, logger) = orchestrator(source, target, 100);

    let stats = orch.execute().await.unwrap();

    assert!(stats.results[0].success);
    assert_eq!(stats.results[0].rows_migrated, 5);
    assert_eq!(
        orch.target().created_indexes,
        vec![("Employees".to_string(), "IX_Name".to_string())]
    );
    assert!(logger
        .messages("warning")
        .iter()
        .any(|m| m.contains("IX_Missing")));
}

#[tokio::test]
async fn test_more_index_failures_than_indexes_does_not_underflow() {
    let mut employees = table("Employees");
    employees.indexes = vec![index("IX_Name", "Name")];
    let source = MockSource::new().with_table(employees, rows(2));
    let mut target = MockTarget::new();
    target.failing_indexes.insert("IX_Name".into());
    target.phantom_index_failures = 2;
    let (mut orch, logger) = orchestrator(source, target, 100);

    let stats = orch.execute().await.unwrap();

    assert!(stats.results[0].success);
    assert!(logger
        .messages("info")
        .iter()
        .any(|m| m == "Employees: created 0/1 indexes"));
    assert_eq!(logger.messages("warning").len(), 3);
}

#[tokio::test]
async fn test_index_creation_can_be_disabled() {
    let mut employees = table("Employees");
    employees.indexes = vec![index("IX_Name", "Name")];
    let source = MockSource::new().with_table(employees, rows(5));
    let (orch, _) = orchestrator(source, MockTarget::new(), 100);
    let mut orch = orch.with_create_indexes(false);

    orch.execute().await.unwrap();

    assert!(orch.target().created_indexes.is_empty());
}

// ============================================================================
// Fatal failures
// ============================================================================

#[tokio::test]
async fn test_source_connection_failure_is_fatal_and_disconnects_both() {
    let mut source = MockSource::new().with_table(table("Employees"), rows(5));
    source.fail_connect = true;
    let (mut orch, logger) = orchestrator(source, MockTarget::new(), 100);

    let err = orch.execute().await.unwrap_err();

    assert!(matches!(err, MigrateError::Connection { ref side, .. } if side == "source"));
    assert!(!orch.target().connected);
    assert_eq!(orch.source().disconnect_calls, 1);
    assert_eq!(orch.target().disconnect_calls, 1);
    assert!(logger
        .messages("error")
        .iter()
        .any(|m| m.contains("Migration aborted")));
}

#[tokio::test]
async fn test_target_connection_failure_releases_source() {
    let source = MockSource::new().with_table(table("Employees"), rows(5));
    let mut target = MockTarget::new();
    target.fail_connect = true;
    let (mut orch, _) = orchestrator(source, target, 100);

    let err = orch.execute().await.unwrap_err();

    assert!(matches!(err, MigrateError::Connection { ref side, .. } if side == "target"));
    assert!(!orch.source().connected);
    assert_eq!(orch.source().disconnect_calls, 1);
    assert!(orch.source().reads.is_empty());
}

#[tokio::test]
async fn test_list_tables_failure_is_fatal() {
    let mut source = MockSource::new();
    source.fail_list = true;
    let (mut orch, _) = orchestrator(source, MockTarget::new(), 100);

    assert!(matches!(
        orch.execute().await,
        Err(MigrateError::SchemaExtraction(_))
    ));
    assert!(!orch.source().connected);
    assert!(!orch.target().connected);
}

// ============================================================================
// Progress, type warnings, validation and health check
// ============================================================================

#[tokio::test]
async fn test_progress_updates_after_each_batch() {
    let source = MockSource::new().with_table(table("Employees"), rows(25_000));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (orch, _) = orchestrator(source, MockTarget::new(), 10_000);
    let mut orch = orch.with_progress(tx);

    orch.execute().await.unwrap();
    drop(orch);

    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }

    let done: Vec<u64> = updates.iter().map(|u| u.rows_done).collect();
    assert_eq!(done, vec![10_000, 20_000, 25_000]);
    assert!(updates.iter().all(|u| u.rows_total == 25_000));
    assert_eq!(updates[2].percent, 100.0);
}

#[tokio::test]
async fn test_lossy_column_types_are_warned() {
    let mut places = table("Places");
    places.columns.push(Column::new("Shape", "geography"));
    let source = MockSource::new().with_table(places, Vec::new());
    let (mut orch, logger) = orchestrator(source, MockTarget::new(), 100);

    let stats = orch.execute().await.unwrap();

    assert!(stats.results[0].success);
    assert!(logger
        .messages("warning")
        .iter()
        .any(|m| m.contains("Shape") && m.contains("geography")));
}

#[tokio::test]
async fn test_validate_reports_matches_and_missing_tables() {
    let source = MockSource::new()
        .with_table(table("Employees"), rows(30))
        .with_table(table("Departments"), rows(4));
    let mut target = MockTarget::new();
    target.committed.insert("Employees".into(), rows(30));
    let (mut orch, logger) = orchestrator(source, target, 100);

    let checks = orch.validate().await.unwrap();

    assert_eq!(checks.len(), 2);
    assert!(checks[0].matches);
    assert_eq!(checks[0].target_rows, Some(30));
    assert!(!checks[1].matches);
    assert_eq!(checks[1].source_rows, Some(4));
    assert_eq!(checks[1].target_rows, None);
    assert!(checks[1].error.is_some());
    assert!(logger
        .messages("warning")
        .iter()
        .any(|m| m.contains("MISMATCH")));
    assert!(!orch.source().connected);
    assert!(!orch.target().connected);
}

#[tokio::test]
async fn test_validate_keeps_going_when_source_count_fails() {
    let mut source = MockSource::new()
        .with_table(table("Employees"), rows(30))
        .with_table(table("Departments"), rows(4))
        .with_table(table("Projects"), rows(2));
    source.count_failures.insert("Departments".into());
    let mut target = MockTarget::new();
    target.committed.insert("Employees".into(), rows(30));
    target.committed.insert("Departments".into(), rows(4));
    target.committed.insert("Projects".into(), rows(2));
    let (mut orch, _) = orchestrator(source, target, 100);

    let checks = orch.validate().await.unwrap();

    assert_eq!(checks.len(), 3);
    assert!(checks[0].matches);
    assert_eq!(checks[1].source_rows, None);
    assert_eq!(checks[1].target_rows, Some(4));
    assert!(!checks[1].matches);
    let error = checks[1].error.as_deref().unwrap();
    assert!(error.starts_with("source:"));
    assert!(error.contains("permission denied"));
    assert!(checks[2].matches);
    assert_eq!(checks[2].source_rows, Some(2));
}

#[tokio::test]
async fn test_health_check_reports_each_side() {
    let mut source = MockSource::new();
    source.fail_connect = true;
    let (mut orch, _) = orchestrator(source, MockTarget::new(), 100);

    let health = orch.health_check().await;

    assert!(!health.healthy);
    assert!(!health.source_connected);
    assert!(health.source_error.unwrap().contains("login failed"));
    assert!(health.target_connected);
    assert!(health.target_error.is_none());
    assert!(!orch.target().connected);
}
