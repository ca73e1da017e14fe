//! Configuration validation.

use super::{AuthMethod, Config};
use crate::error::{MigrateError, Result};
use crate::target::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host is required".into()));
    }
    if config.source.database.is_empty() {
        return Err(MigrateError::Config("source.database is required".into()));
    }
    if config.source.auth == AuthMethod::SqlServer && config.source.user.is_empty() {
        return Err(MigrateError::Config(
            "source.user is required for sql_server authentication".into(),
        ));
    }
    if config.source.auth == AuthMethod::Kerberos && !cfg!(feature = "kerberos") {
        return Err(MigrateError::Config(
            "source.auth 'kerberos' requires building with the 'kerberos' feature".into(),
        ));
    }
    if config.source.r#type != "mssql" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'mssql', got '{}'",
            config.source.r#type
        )));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }
    SslMode::parse(&config.target.ssl_mode)?;

    if let Some(0) = config.migration.batch_size {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }

    Ok(())
}
