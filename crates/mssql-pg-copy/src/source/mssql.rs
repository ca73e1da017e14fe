//! MSSQL source over a single tiberius connection.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{Client, Config, EncryptionLevel, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{AuthMethod, SourceConfig};
use crate::core::{group_index_rows, Batch, Column, IndexColumnRow, SourceDatabase, SqlValue, Table};
use crate::error::{MigrateError, Result};

/// Largest precision `rust_decimal` can hold without loss.
const MAX_DECIMAL_PRECISION: i32 = 28;

type MssqlClient = Client<Compat<TcpStream>>;

/// MSSQL source database holding one connection between `connect` and
/// `disconnect`.
pub struct MssqlSource {
    config: SourceConfig,
    client: Option<MssqlClient>,
}

impl MssqlSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);

        match self.config.auth {
            AuthMethod::SqlServer => {
                config.authentication(tiberius::AuthMethod::sql_server(
                    &self.config.user,
                    &self.config.password,
                ));
            }
            #[cfg(feature = "kerberos")]
            AuthMethod::Kerberos => {
                config.authentication(tiberius::AuthMethod::Integrated);
            }
            // Rejected by config validation when the feature is off.
            #[cfg(not(feature = "kerberos"))]
            AuthMethod::Kerberos => {}
        }

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }

    fn client(&mut self) -> Result<&mut MssqlClient> {
        self.client.as_mut().ok_or(MigrateError::NotConnected("source"))
    }

    async fn load_columns(&mut self, table: &mut Table) -> Result<()> {
        let mut query = Query::new(
            r#"
            SELECT
                COLUMN_NAME,
                DATA_TYPE,
                CAST(CHARACTER_MAXIMUM_LENGTH AS INT),
                CAST(NUMERIC_PRECISION AS INT),
                CAST(NUMERIC_SCALE AS INT),
                CASE WHEN IS_NULLABLE = 'YES' THEN 1 ELSE 0 END,
                COLUMN_DEFAULT
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
            ORDER BY ORDINAL_POSITION
        "#,
        );
        query.bind(self.config.schema.clone());
        query.bind(table.name.clone());

        let rows = query.query(self.client()?).await?.into_first_result().await?;

        for row in rows {
            table.columns.push(Column {
                name: row.try_get::<&str, _>(0)?.unwrap_or_default().to_string(),
                data_type: row.try_get::<&str, _>(1)?.unwrap_or_default().to_string(),
                max_length: row.try_get::<i32, _>(2)?,
                precision: row.try_get::<i32, _>(3)?,
                scale: row.try_get::<i32, _>(4)?,
                is_nullable: row.try_get::<i32, _>(5)?.unwrap_or(0) == 1,
                default_value: row.try_get::<&str, _>(6)?.map(String::from),
            });
        }

        debug!("Loaded {} columns for {}", table.columns.len(), table.name);
        Ok(())
    }

    async fn load_primary_key(&mut self, table: &mut Table) -> Result<()> {
        let mut query = Query::new(
            r#"
            SELECT c.COLUMN_NAME
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE c
                ON c.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND c.TABLE_SCHEMA = tc.TABLE_SCHEMA
                AND c.TABLE_NAME = tc.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND tc.TABLE_SCHEMA = @P1
              AND tc.TABLE_NAME = @P2
            ORDER BY c.ORDINAL_POSITION
        "#,
        );
        query.bind(self.config.schema.clone());
        query.bind(table.name.clone());

        let rows = query.query(self.client()?).await?.into_first_result().await?;

        for row in rows {
            if let Some(col_name) = row.try_get::<&str, _>(0)? {
                table.primary_key.push(col_name.to_string());
            }
        }

        debug!("Primary key for {}: {:?}", table.name, table.primary_key);
        Ok(())
    }

    async fn load_indexes(&mut self, table: &mut Table) -> Result<()> {
        let mut query = Query::new(
            r#"
            SELECT
                i.name,
                i.is_unique,
                c.name,
                ic.is_descending_key
            FROM sys.indexes i
            JOIN sys.index_columns ic
                ON ic.object_id = i.object_id AND ic.index_id = i.index_id
            JOIN sys.columns c
                ON c.object_id = ic.object_id AND c.column_id = ic.column_id
            JOIN sys.tables t ON t.object_id = i.object_id
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            WHERE s.name = @P1
              AND t.name = @P2
              AND i.is_primary_key = 0
              AND i.is_hypothetical = 0
              AND i.type > 0
              AND ic.is_included_column = 0
            ORDER BY i.name, ic.key_ordinal
        "#,
        );
        query.bind(self.config.schema.clone());
        query.bind(table.name.clone());

        let rows = query.query(self.client()?).await?.into_first_result().await?;

        let mut raw = Vec::with_capacity(rows.len());
        for row in rows {
            raw.push(IndexColumnRow {
                index_name: row.try_get::<&str, _>(0)?.unwrap_or_default().to_string(),
                is_unique: row.try_get::<bool, _>(1)?.unwrap_or(false),
                column_name: row.try_get::<&str, _>(2)?.unwrap_or_default().to_string(),
                descending: row.try_get::<bool, _>(3)?.unwrap_or(false),
            });
        }
        table.indexes = group_index_rows(raw);

        debug!("Loaded {} indexes for {}", table.indexes.len(), table.name);
        Ok(())
    }
}

#[async_trait]
impl SourceDatabase for MssqlSource {
    async fn connect(&mut self) -> Result<()> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| MigrateError::connection("source", e))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| MigrateError::connection("source", e))?;

        info!(
            "Connected to MSSQL: {}:{}/{}",
            self.config.host, self.config.port, self.config.database
        );
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
            debug!("Disconnected from MSSQL");
        }
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let mut query = Query::new(
            r#"
            SELECT TABLE_NAME
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_TYPE = 'BASE TABLE'
              AND TABLE_SCHEMA = @P1
            ORDER BY TABLE_NAME
        "#,
        );
        query.bind(self.config.schema.clone());

        let rows = query.query(self.client()?).await?.into_first_result().await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(name) = row.try_get::<&str, _>(0)? {
                tables.push(name.to_string());
            }
        }

        info!(
            "Found {} tables in schema '{}'",
            tables.len(),
            self.config.schema
        );
        Ok(tables)
    }

    async fn read_table_schema(&mut self, table: &str) -> Result<Table> {
        let mut result = Table::new(table);
        self.load_columns(&mut result).await?;
        if result.columns.is_empty() {
            return Err(MigrateError::SchemaExtraction(format!(
                "table {}.{} not found or has no columns",
                self.config.schema, table
            )));
        }
        self.load_primary_key(&mut result).await?;
        self.load_indexes(&mut result).await?;
        Ok(result)
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT_BIG(*) FROM {}",
            qualified_name(&self.config.schema, table)
        );
        let row = self.client()?.simple_query(sql).await?.into_row().await?;

        let count = match row {
            Some(row) => row.try_get::<i64, _>(0)?.unwrap_or(0),
            None => 0,
        };
        Ok(count.max(0) as u64)
    }

    async fn read_batch(
        &mut self,
        table: &str,
        columns: &[Column],
        offset: u64,
        limit: usize,
    ) -> Result<Batch> {
        let plans: Vec<ColumnRead> = columns.iter().map(ColumnRead::plan).collect();
        let sql = build_batch_query(&self.config.schema, table, &plans, offset, limit);

        let rows = self
            .client()?
            .simple_query(sql)
            .await?
            .into_first_result()
            .await?;

        let mut batch = Vec::with_capacity(rows.len());
        for row in rows {
            let mut values = Vec::with_capacity(plans.len());
            for (idx, plan) in plans.iter().enumerate() {
                values.push(plan.decode.read(&row, idx)?);
            }
            batch.push(values);
        }

        debug!(
            "Read {} rows from {} at offset {}",
            batch.len(),
            table,
            offset
        );
        Ok(batch)
    }

    fn db_type(&self) -> &str {
        "mssql"
    }
}

/// Quote an MSSQL identifier with brackets.
fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn qualified_name(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// How a selected column is decoded from a tiberius row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decode {
    Bool,
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Uuid,
    Decimal,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
    Bytes,
    Text,
}

impl Decode {
    fn read(self, row: &Row, idx: usize) -> Result<SqlValue> {
        let value = match self {
            Decode::Bool => row
                .try_get::<bool, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Bool),
            Decode::U8 => row
                .try_get::<u8, _>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::I16(v as i16)),
            Decode::I16 => row
                .try_get::<i16, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::I16),
            Decode::I32 => row
                .try_get::<i32, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::I32),
            Decode::I64 => row
                .try_get::<i64, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::I64),
            Decode::F32 => row
                .try_get::<f32, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::F32),
            Decode::F64 => row
                .try_get::<f64, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::F64),
            Decode::Uuid => row
                .try_get::<Uuid, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Uuid),
            Decode::Decimal => row
                .try_get::<Decimal, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Decimal),
            Decode::DateTime => row
                .try_get::<NaiveDateTime, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::DateTime),
            Decode::DateTimeOffset => row
                .try_get::<DateTime<FixedOffset>, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::DateTimeOffset),
            Decode::Date => row
                .try_get::<NaiveDate, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Date),
            Decode::Time => row
                .try_get::<NaiveTime, _>(idx)?
                .map_or(SqlValue::Null, SqlValue::Time),
            Decode::Bytes => row
                .try_get::<&[u8], _>(idx)?
                .map_or(SqlValue::Null, |v| SqlValue::Bytes(v.to_vec())),
            Decode::Text => row
                .try_get::<&str, _>(idx)?
                .map_or(SqlValue::Null, |s| SqlValue::String(s.to_string())),
        };
        Ok(value)
    }
}

/// Select-list expression and decoder for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnRead {
    expr: String,
    decode: Decode,
}

impl ColumnRead {
    fn plan(col: &Column) -> Self {
        let ident = quote_ident(&col.name);
        let native = |decode| ColumnRead {
            expr: ident.clone(),
            decode,
        };
        let cast = |expr: String, decode| ColumnRead {
            expr: format!("{} AS {}", expr, ident),
            decode,
        };

        match col.data_type.to_lowercase().as_str() {
            "bit" => native(Decode::Bool),
            "tinyint" => native(Decode::U8),
            "smallint" => native(Decode::I16),
            "int" => native(Decode::I32),
            "bigint" => native(Decode::I64),
            "real" => native(Decode::F32),
            "float" => native(Decode::F64),
            "uniqueidentifier" => native(Decode::Uuid),
            "decimal" | "numeric" => match col.precision {
                Some(p) if p > MAX_DECIMAL_PRECISION => {
                    cast(format!("CAST({} AS VARCHAR(64))", ident), Decode::Text)
                }
                _ => native(Decode::Decimal),
            },
            // money arrives as a float on the wire
            "money" | "smallmoney" => {
                cast(format!("CAST({} AS DECIMAL(19,4))", ident), Decode::Decimal)
            }
            "datetime" | "datetime2" | "smalldatetime" => native(Decode::DateTime),
            "datetimeoffset" => native(Decode::DateTimeOffset),
            "date" => native(Decode::Date),
            "time" => native(Decode::Time),
            "binary" | "varbinary" | "image" => native(Decode::Bytes),
            "char" | "nchar" | "varchar" | "nvarchar" | "text" | "ntext" => native(Decode::Text),
            "xml" => cast(format!("CAST({} AS NVARCHAR(MAX))", ident), Decode::Text),
            "geography" | "geometry" => cast(format!("{}.STAsText()", ident), Decode::Text),
            "hierarchyid" => cast(format!("{}.ToString()", ident), Decode::Text),
            "sql_variant" => cast(format!("CAST({} AS NVARCHAR(4000))", ident), Decode::Text),
            "timestamp" | "rowversion" => {
                cast(format!("CONVERT(VARCHAR(18), {}, 1)", ident), Decode::Text)
            }
            _ => cast(format!("CAST({} AS NVARCHAR(MAX))", ident), Decode::Text),
        }
    }
}

/// Build the offset-paginated batch query.
///
/// `ORDER BY (SELECT NULL)` satisfies OFFSET/FETCH without imposing an
/// order, so pages are only stable while the source table is not written.
fn build_batch_query(
    schema: &str,
    table: &str,
    plans: &[ColumnRead],
    offset: u64,
    limit: usize,
) -> String {
    let select_list = plans
        .iter()
        .map(|p| p.expr.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT {} FROM {} ORDER BY (SELECT NULL) OFFSET {} ROWS FETCH NEXT {} ROWS ONLY",
        select_list,
        qualified_name(schema, table),
        offset,
        limit
    )
}
