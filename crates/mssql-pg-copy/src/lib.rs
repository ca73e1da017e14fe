//! # mssql-pg-copy
//!
//! Copies a complete MSSQL schema and its data into PostgreSQL.
//!
//! For every source table the [`Orchestrator`] reads the table description,
//! creates the table in the target with translated column types, copies the
//! rows in fixed-size batches (one transaction per batch) and rebuilds the
//! secondary indexes. A failing table is recorded and the run moves on.
//!
//! The orchestrator is generic over four ports defined in [`core`](crate::core):
//! [`SourceDatabase`], [`TargetDatabase`], [`TypeMapper`] and
//! [`MigrationLogger`]. This crate ships MSSQL, PostgreSQL, type-mapping and
//! `tracing` implementations of them.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mssql_pg_copy::{Config, MssqlToPostgresOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> mssql_pg_copy::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mut orchestrator = MssqlToPostgresOrchestrator::from_config(&config);
//!     let stats = orchestrator.execute().await?;
//!     println!("Copied {} rows", stats.total_rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod source;
pub mod target;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use crate::core::{
    Batch, Column, Index, IndexColumn, MigrationLogger, Row, SourceDatabase, SqlValue, Table,
    TargetDatabase, TypeMapper, TypeMapping,
};
pub use error::{MigrateError, Result};
pub use logging::TracingLogger;
pub use orchestrator::{
    HealthCheckResult, MigrationResult, MigrationStatistics, MssqlToPostgresOrchestrator,
    Orchestrator, ProgressUpdate, RowCountCheck, TableStage,
};
pub use source::MssqlSource;
pub use target::PostgresTarget;
pub use typemap::{mssql_to_postgres, MssqlToPostgresMapper};
