//! PostgreSQL target over a single tokio-postgres connection.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::SinkExt;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::{debug, info, warn};

use super::tls::{SslMode, TlsBuilder};
use crate::config::TargetConfig;
use crate::core::{Batch, Index, SqlValue, Table, TargetDatabase, TypeMapper};
use crate::error::{MigrateError, Result};

/// PostgreSQL identifier length limit in bytes.
const PG_MAX_IDENTIFIER_LEN: usize = 63;

/// Database used to check for and create the target database.
const MAINTENANCE_DB: &str = "postgres";

/// Rows buffered before a COPY chunk is flushed.
const COPY_CHUNK_ROWS: usize = 10_000;

/// PostgreSQL target database holding one connection between `connect` and
/// `disconnect`.
pub struct PostgresTarget {
    config: TargetConfig,
    mapper: Arc<dyn TypeMapper>,
    client: Option<Client>,
    connection_task: Option<JoinHandle<()>>,
}

impl PostgresTarget {
    pub fn new(config: TargetConfig, mapper: Arc<dyn TypeMapper>) -> Self {
        Self {
            config,
            mapper,
            client: None,
            connection_task: None,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or(MigrateError::NotConnected("target"))
    }

    fn client_mut(&mut self) -> Result<&mut Client> {
        self.client.as_mut().ok_or(MigrateError::NotConnected("target"))
    }

    /// Open a connection to `dbname` and drive it on a background task.
    async fn open(&self, dbname: &str) -> Result<(Client, JoinHandle<()>)> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&self.config.host);
        pg_config.port(self.config.port);
        pg_config.dbname(dbname);
        pg_config.user(&self.config.user);
        pg_config.password(&self.config.password);

        let ssl_mode = SslMode::parse(&self.config.ssl_mode)?;
        match TlsBuilder::new(ssl_mode).build()? {
            Some(tls) => {
                let (client, connection) = pg_config
                    .connect(tls)
                    .await
                    .map_err(|e| MigrateError::connection("target", e))?;
                Ok((client, spawn_connection(connection)))
            }
            None => {
                let (client, connection) = pg_config
                    .connect(NoTls)
                    .await
                    .map_err(|e| MigrateError::connection("target", e))?;
                Ok((client, spawn_connection(connection)))
            }
        }
    }

    /// Create the target database through the maintenance database when it
    /// does not exist yet.
    async fn ensure_database(&self) -> Result<()> {
        let (client, task) = self.open(MAINTENANCE_DB).await?;

        let exists = client
            .query_opt(
                "SELECT 1 FROM pg_database WHERE datname = $1",
                &[&self.config.database],
            )
            .await?
            .is_some();

        if !exists {
            client
                .batch_execute(&format!(
                    "CREATE DATABASE {}",
                    quote_ident(&self.config.database)
                ))
                .await?;
            info!("Created database '{}'", self.config.database);
        }

        drop(client);
        if let Err(e) = task.await {
            warn!("Maintenance connection task failed: {}", e);
        }
        Ok(())
    }
}

fn spawn_connection<F>(connection: F) -> JoinHandle<()>
where
    F: Future<Output = std::result::Result<(), tokio_postgres::Error>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("PostgreSQL connection error: {}", e);
        }
    })
}

#[async_trait]
impl TargetDatabase for PostgresTarget {
    async fn connect(&mut self) -> Result<()> {
        if self.config.create_database {
            self.ensure_database().await?;
        }

        let (client, task) = self.open(&self.config.database).await?;
        client
            .batch_execute(&format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_ident(&self.config.schema)
            ))
            .await?;

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            self.config.host, self.config.port, self.config.database
        );
        self.client = Some(client);
        self.connection_task = Some(task);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // Dropping the client closes the socket and ends the connection task.
        if self.client.take().is_some() {
            debug!("Disconnected from PostgreSQL");
        }
        if let Some(task) = self.connection_task.take() {
            if let Err(e) = task.await {
                warn!("PostgreSQL connection task failed: {}", e);
            }
        }
        Ok(())
    }

    async fn create_table(&mut self, table: &Table) -> Result<()> {
        let ddl = build_create_table_sql(&self.config.schema, table, self.mapper.as_ref());
        self.client()?.batch_execute(&ddl).await?;

        debug!("Created table {}.{}", self.config.schema, table.name);
        Ok(())
    }

    async fn insert_batch(&mut self, table: &str, columns: &[String], rows: Batch) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let col_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let copy_stmt = format!(
            "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
            qualify_table(&self.config.schema, table),
            col_list
        );

        let sink = self.client()?.copy_in(copy_stmt.as_str()).await?;
        futures::pin_mut!(sink);

        let mut buf = BytesMut::with_capacity(1024 * 1024);
        let row_count = rows.len();

        for (i, row) in rows.into_iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                if j > 0 {
                    buf.put_u8(b'\t');
                }
                buf.extend_from_slice(sql_value_to_copy_text(value).as_bytes());
            }
            buf.put_u8(b'\n');

            if (i + 1) % COPY_CHUNK_ROWS == 0 || i + 1 == row_count {
                sink.send(buf.split().freeze())
                    .await
                    .map_err(|e| MigrateError::transfer(table, format!("COPY send failed: {}", e)))?;
            }
        }

        let copied = sink.finish().await?;
        Ok(copied)
    }

    async fn create_index(&mut self, table: &str, index: &Index) -> Result<()> {
        let sql = build_create_index_sql(&self.config.schema, table, index);
        self.client()?.batch_execute(&sql).await?;

        debug!("Created index {} on {}.{}", index.name, self.config.schema, table);
        Ok(())
    }

    async fn begin_transaction(&mut self) -> Result<()> {
        self.client_mut()?.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<()> {
        self.client_mut()?.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback_transaction(&mut self) -> Result<()> {
        self.client_mut()?.batch_execute("ROLLBACK").await?;
        Ok(())
    }

    async fn count_rows(&mut self, table: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {}",
            qualify_table(&self.config.schema, table)
        );
        let row = self.client()?.query_one(sql.as_str(), &[]).await?;
        let count: i64 = row.try_get(0)?;
        Ok(count.max(0) as u64)
    }

    fn db_type(&self) -> &str {
        "postgres"
    }
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Schema-qualified, quoted table name.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

/// Generate `CREATE TABLE IF NOT EXISTS` DDL, including the primary key.
pub fn build_create_table_sql(schema: &str, table: &Table, mapper: &dyn TypeMapper) -> String {
    let mut defs: Vec<String> = table
        .columns
        .iter()
        .map(|col| {
            format!(
                "    {} {} {}",
                quote_ident(&col.name),
                mapper.map_type(col),
                if col.is_nullable { "NULL" } else { "NOT NULL" }
            )
        })
        .collect();

    if table.has_pk() {
        let pk_cols: Vec<String> = table.primary_key.iter().map(|c| quote_ident(c)).collect();
        defs.push(format!("    PRIMARY KEY ({})", pk_cols.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        qualify_table(schema, &table.name),
        defs.join(",\n")
    )
}

/// Target index name: `idx_<table>_<index>`, cut to the identifier limit.
pub fn index_name(table: &str, index: &str) -> String {
    let mut name = format!("idx_{}_{}", table, index);
    if name.len() > PG_MAX_IDENTIFIER_LEN {
        let mut end = PG_MAX_IDENTIFIER_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// Generate `CREATE [UNIQUE] INDEX IF NOT EXISTS` for one index.
pub fn build_create_index_sql(schema: &str, table: &str, index: &Index) -> String {
    let cols: Vec<String> = index
        .columns
        .iter()
        .map(|c| {
            if c.descending {
                format!("{} DESC", quote_ident(&c.name))
            } else {
                quote_ident(&c.name)
            }
        })
        .collect();

    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if index.is_unique { "UNIQUE " } else { "" },
        quote_ident(&index_name(table, &index.name)),
        qualify_table(schema, table),
        cols.join(", ")
    )
}

/// Render one value in COPY text format.
fn sql_value_to_copy_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "\\N".to_string(),
        SqlValue::Bool(true) => "t".to_string(),
        SqlValue::Bool(false) => "f".to_string(),
        SqlValue::I16(n) => n.to_string(),
        SqlValue::I32(n) => n.to_string(),
        SqlValue::I64(n) => n.to_string(),
        SqlValue::F32(n) => float_text(*n as f64),
        SqlValue::F64(n) => float_text(*n),
        SqlValue::String(s) => escape_copy_text(s),
        SqlValue::Bytes(b) => format!("\\\\x{}", hex::encode(b)),
        SqlValue::Uuid(u) => u.to_string(),
        SqlValue::Decimal(d) => d.to_string(),
        SqlValue::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
        SqlValue::DateTimeOffset(dt) => dt.to_rfc3339(),
        SqlValue::Date(d) => d.to_string(),
        SqlValue::Time(t) => t.format("%H:%M:%S%.6f").to_string(),
    }
}

fn float_text(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else {
        n.to_string()
    }
}

/// Escape backslash, tab, newline and carriage return for COPY text format.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}
