//! Type mapping between MSSQL and PostgreSQL.

use crate::core::{Column, TypeMapper, TypeMapping};

/// MSSQL marks `varchar(max)` / `nvarchar(max)` with this length.
const MSSQL_MAX_LENGTH: i32 = -1;

/// Maps MSSQL column types to PostgreSQL type expressions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlToPostgresMapper;

impl TypeMapper for MssqlToPostgresMapper {
    fn map_column(&self, col: &Column) -> TypeMapping {
        let data_type = col.data_type.to_lowercase();
        match base_type(&data_type) {
            Some(base) => TypeMapping::lossless(refine(&data_type, base, col)),
            None => TypeMapping::lossy(
                "TEXT",
                format!(
                    "column '{}': unknown source type '{}' stored as TEXT",
                    col.name, col.data_type
                ),
            ),
        }
    }
}

/// Map an MSSQL column to its PostgreSQL type expression.
pub fn mssql_to_postgres(col: &Column) -> String {
    MssqlToPostgresMapper.map_type(col)
}

/// Base lookup, keyed by lower-cased MSSQL type name.
fn base_type(mssql_type: &str) -> Option<&'static str> {
    let pg = match mssql_type {
        // Boolean
        "bit" => "BOOLEAN",

        // Integer types
        "tinyint" => "SMALLINT",
        "smallint" => "SMALLINT",
        "int" => "INTEGER",
        "bigint" => "BIGINT",

        // Decimal/numeric
        "decimal" | "numeric" => "NUMERIC",
        "money" => "NUMERIC(19,4)",
        "smallmoney" => "NUMERIC(10,4)",

        // Floating point
        "float" => "DOUBLE PRECISION",
        "real" => "REAL",

        // String types
        "char" | "nchar" => "CHAR",
        "varchar" | "nvarchar" => "VARCHAR",
        "text" | "ntext" => "TEXT",

        // Binary types
        "binary" | "varbinary" | "image" => "BYTEA",

        // Date/time types
        "date" => "DATE",
        "time" => "TIME",
        "datetime" | "datetime2" | "smalldatetime" => "TIMESTAMP",
        "datetimeoffset" => "TIMESTAMP WITH TIME ZONE",

        // GUID
        "uniqueidentifier" => "UUID",

        // XML
        "xml" => "XML",

        _ => return None,
    };
    Some(pg)
}

/// Apply length / precision qualifiers on top of the base type.
fn refine(mssql_type: &str, base: &'static str, col: &Column) -> String {
    match mssql_type {
        "char" | "nchar" | "varchar" | "nvarchar" => match col.max_length {
            Some(MSSQL_MAX_LENGTH) => "TEXT".to_string(),
            Some(len) if len > 0 => format!("{}({})", base, len),
            _ => base.to_string(),
        },
        "decimal" | "numeric" => match (col.precision, col.scale) {
            (Some(p), Some(s)) if p > 0 && s != 0 => format!("NUMERIC({},{})", p, s),
            (Some(p), _) if p > 0 => format!("NUMERIC({})", p),
            _ => base.to_string(),
        },
        _ => base.to_string(),
    }
}
