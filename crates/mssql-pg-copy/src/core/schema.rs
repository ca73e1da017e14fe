//! Schema and metadata types for tables, columns and indexes.
//!
//! These types are the engine-neutral description of one source table that
//! flows from the source reader, through the type mapper, into the target
//! writer.

use serde::{Deserialize, Serialize};

/// Column metadata, in source ordinal order within its [`Table`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Source data type (e.g., "int", "nvarchar", "datetime2").
    pub data_type: String,

    /// Maximum length for string/binary types (-1 for max).
    pub max_length: Option<i32>,

    /// Numeric precision.
    pub precision: Option<i32>,

    /// Numeric scale.
    pub scale: Option<i32>,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Default value expression as written in the source catalog.
    pub default_value: Option<String>,
}

impl Column {
    /// Create a nullable column with no length, precision or default.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: None,
            precision: None,
            scale: None,
            is_nullable: true,
            default_value: None,
        }
    }

    pub fn with_max_length(mut self, max_length: i32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: Option<i32>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.is_nullable = false;
        self
    }
}

/// One key column of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    /// Column name.
    pub name: String,

    /// Whether the key is sorted descending.
    pub descending: bool,
}

/// Index metadata.
///
/// Column order defines the key order of the index and is kept exactly as
/// read from the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,

    /// Key columns in key order.
    pub columns: Vec<IndexColumn>,

    /// Whether the index is unique.
    pub is_unique: bool,
}

/// A single row of the source index catalog: one key column of one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumnRow {
    pub index_name: String,
    pub is_unique: bool,
    pub column_name: String,
    pub descending: bool,
}

/// Group raw index-column rows into indexes.
///
/// Indexes come out in the order their name was first seen, and each index
/// keeps its columns in the order the rows arrived. Uniqueness is taken from
/// the first row of each index.
pub fn group_index_rows<I>(rows: I) -> Vec<Index>
where
    I: IntoIterator<Item = IndexColumnRow>,
{
    let mut indexes: Vec<Index> = Vec::new();

    for row in rows {
        let column = IndexColumn {
            name: row.column_name,
            descending: row.descending,
        };

        match indexes.iter_mut().find(|idx| idx.name == row.index_name) {
            Some(index) => index.columns.push(column),
            None => indexes.push(Index {
                name: row.index_name,
                columns: vec![column],
                is_unique: row.is_unique,
            }),
        }
    }

    indexes
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,

    /// Column definitions in source ordinal order.
    pub columns: Vec<Column>,

    /// Primary key column names in key order.
    pub primary_key: Vec<String>,

    /// Non-primary key indexes.
    pub indexes: Vec<Index>,
}

impl Table {
    /// Create an empty table description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
        }
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Column names in table order, as used for positional row mapping.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
