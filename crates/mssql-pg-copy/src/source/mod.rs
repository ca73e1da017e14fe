//! Source database drivers.

mod mssql;

pub use mssql::MssqlSource;
