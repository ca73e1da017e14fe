//! Error types for the copy library.

use thiserror::Error;

/// Main error type for copy operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source database query error
    #[error("Source database error: {0}")]
    Source(#[from] tiberius::error::Error),

    /// Target database query error
    #[error("Target database error: {0}")]
    Target(#[from] tokio_postgres::Error),

    /// Could not establish a connection to one side of the copy
    #[error("Connection to {side} failed: {message}")]
    Connection { side: String, message: String },

    /// Operation issued on a port that has no open connection
    #[error("{0} database is not connected")]
    NotConnected(&'static str),

    /// Schema extraction failed
    #[error("Schema extraction failed: {0}")]
    SchemaExtraction(String),

    /// Data transfer failed for a specific table
    #[error("Transfer failed for table {table}: {message}")]
    Transfer { table: String, message: String },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrateError {
    /// Create a Connection error for the named side ("source" or "target").
    pub fn connection(side: impl Into<String>, message: impl ToString) -> Self {
        MigrateError::Connection {
            side: side.into(),
            message: message.to_string(),
        }
    }

    /// Create a Transfer error
    pub fn transfer(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Transfer {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for a run aborted by this error.
    ///
    /// Every fatal error maps to 1, the same code used when one or more
    /// tables fail.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for copy operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
