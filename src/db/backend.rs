//! Driver backends
//!
//! [`QueryBackend`] is the seam between the store and a concrete sqlx pool.
//! Rows come back column-by-column as JSON so callers never touch driver types.

use async_trait::async_trait;
use sqlx::mysql::MySqlRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, MySqlPool, Row as _, SqlitePool, TypeInfo, ValueRef};

use super::{Dialect, Row, SqlParam};
use crate::codec::Binary;
use crate::error::Result;

/// Something that can run one parameterised statement.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Run `sql` with positional `params`. Statements without a result set
    /// return an empty vector.
    async fn run(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>>;
}

macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                SqlParam::Null => query.bind(None::<String>),
                SqlParam::Bool(v) => query.bind(*v),
                SqlParam::Int(v) => query.bind(*v),
                SqlParam::Float(v) => query.bind(*v),
                SqlParam::Text(v) => query.bind(v.clone()),
                SqlParam::Bytes(v) => query.bind(v.clone()),
            };
        }
        query
    }};
}

#[async_trait]
impl QueryBackend for MySqlPool {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn run(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        let rows = bind_params!(sqlx::query(sql), params)
            .fetch_all(self)
            .await?;
        rows.iter().map(mysql_row).collect()
    }
}

#[async_trait]
impl QueryBackend for SqlitePool {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn run(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>> {
        let rows = bind_params!(sqlx::query(sql), params)
            .fetch_all(self)
            .await?;
        rows.iter().map(sqlite_row).collect()
    }
}

fn float(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn binary(bytes: Vec<u8>) -> serde_json::Value {
    Binary::new(bytes).to_tagged()
}

fn mysql_row(row: &MySqlRow) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            serde_json::Value::Null
        } else {
            let type_name = raw.type_info().name().to_string();
            mysql_cell(row, i, &type_name)?
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn mysql_cell(row: &MySqlRow, i: usize, type_name: &str) -> Result<serde_json::Value> {
    let value = match type_name {
        "JSON" => row.try_get::<sqlx::types::JsonValue, _>(i)?,
        "BOOLEAN" => serde_json::Value::Bool(row.try_get::<bool, _>(i)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<i64, _>(i)?.into()
        }
        name if name.ends_with("UNSIGNED") => row.try_get::<u64, _>(i)?.into(),
        "FLOAT" => float(f64::from(row.try_get::<f32, _>(i)?)),
        "DOUBLE" => float(row.try_get::<f64, _>(i)?),
        "DATETIME" | "TIMESTAMP" => {
            row.try_get::<chrono::NaiveDateTime, _>(i)?.to_string().into()
        }
        "DATE" => row.try_get::<chrono::NaiveDate, _>(i)?.to_string().into(),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => binary(row.try_get::<Vec<u8>, _>(i)?),
        // Text, decimal, time and enum columns: text when it decodes, bytes otherwise.
        _ => match row.try_get_unchecked::<String, _>(i) {
            Ok(text) => serde_json::Value::String(text),
            Err(_) => binary(row.try_get_unchecked::<Vec<u8>, _>(i)?),
        },
    };
    Ok(value)
}

fn sqlite_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            serde_json::Value::Null
        } else {
            // Storage class of this value, not the declared column type.
            let type_name = raw.type_info().name().to_string();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => row.try_get_unchecked::<i64, _>(i)?.into(),
                "REAL" | "NUMERIC" => float(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => binary(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => serde_json::Value::String(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}
