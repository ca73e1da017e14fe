//! Target database drivers.

mod postgres;
mod tls;

pub use postgres::{
    build_create_index_sql, build_create_table_sql, index_name, qualify_table, quote_ident,
    PostgresTarget,
};
pub use tls::{SslMode, TlsBuilder};
