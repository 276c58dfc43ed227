use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::etl::query::SelectQuery;
use crate::model::{Row, Value};
use crate::traits::{DataSource, SourceError};

/// Reads rows from a SQLite database through a `sqlx` pool.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    pool: SqlitePool,
}

impl SqliteSource {
    /// Builds a pool from resolved connection parameters.
    ///
    /// The pool is lazy: nothing is opened until the first fetch, so an
    /// unreachable database surfaces as a failed extraction.
    pub fn connect(config: &SourceConfig) -> Result<Self, SourceError> {
        let url = config.connection_url();
        if !url.starts_with("sqlite:") {
            return Err(SourceError::Connection(format!(
                "driver '{}' is not supported, expected a sqlite: URL",
                config.driver
            )));
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_lazy(&url)
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        info!(database = %config.database, "Data source configured");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataSource for SqliteSource {
    fn source_id(&self) -> &str {
        "sqlite"
    }

    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Row>, SourceError> {
        let (sql, params) = query.to_sql();
        debug!(sql = %sql, params = params.len(), "Executing query");

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        let statement = params.into_iter().fold(sqlx::query(&sql), bind_value);
        let rows = statement.fetch_all(&mut *conn).await?;
        rows.iter().map(decode_row).collect()
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(b) => query.bind(b),
        Value::Int(i) => query.bind(i),
        Value::Float(f) => query.bind(f),
        Value::Text(s) => query.bind(s),
        // SQLite keeps dates as ISO-8601 text
        Value::Date(d) => query.bind(d.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => query.bind(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

/// Decodes by storage class. Columns declared BOOLEAN come back as `Value::Bool`;
/// BLOBs come back as text, with invalid UTF-8 replaced.
fn decode_row(row: &SqliteRow) -> Result<Row, SourceError> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let decode_err = |e: sqlx::Error| SourceError::Decode {
            column: name.to_string(),
            message: e.to_string(),
        };

        let raw = row.try_get_raw(i).map_err(decode_err)?;
        if raw.is_null() {
            out.insert(name, Value::Null);
            continue;
        }
        let storage = raw.type_info().name().to_ascii_uppercase();
        let declared = column.type_info().name().to_ascii_uppercase();

        let value = match storage.as_str() {
            "INTEGER" => {
                let i: i64 = row.try_get(i).map_err(decode_err)?;
                if declared == "BOOLEAN" {
                    Value::Bool(i != 0)
                } else {
                    Value::Int(i)
                }
            }
            "REAL" => Value::Float(row.try_get(i).map_err(decode_err)?),
            "TEXT" => Value::Text(row.try_get(i).map_err(decode_err)?),
            "BLOB" => {
                let bytes: Vec<u8> = row.try_get(i).map_err(decode_err)?;
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => {
                return Err(SourceError::Decode {
                    column: name.to_string(),
                    message: format!("unsupported storage class {}", other),
                })
            }
        };
        out.insert(name, value);
    }
    Ok(out)
}
