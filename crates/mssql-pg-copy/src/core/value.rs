//! SQL value types for engine-neutral row transfer.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single cell value read from the source.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// SQL NULL of any column type.
    Null,

    /// Boolean value (bit).
    Bool(bool),

    /// 16-bit signed integer (smallint, tinyint).
    I16(i16),

    /// 32-bit signed integer (int).
    I32(i32),

    /// 64-bit signed integer (bigint).
    I64(i64),

    /// 32-bit floating point (real).
    F32(f32),

    /// 64-bit floating point (float).
    F64(f64),

    /// Character data.
    String(String),

    /// Binary data.
    Bytes(Vec<u8>),

    /// UUID/GUID value.
    Uuid(Uuid),

    /// Exact numeric value.
    Decimal(Decimal),

    /// Timestamp without timezone.
    DateTime(NaiveDateTime),

    /// Timestamp with timezone offset.
    DateTimeOffset(DateTime<FixedOffset>),

    /// Date without time component.
    Date(NaiveDate),

    /// Time without date component.
    Time(NaiveTime),
}

/// One row, positionally aligned with the table's column order.
pub type Row = Vec<SqlValue>;

/// A bounded slice of a table's rows, moved and committed as one unit.
pub type Batch = Vec<Row>;
