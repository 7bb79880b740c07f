//! Raw parameterized queries
//!
//! For aggregate and analytic access that has no typed accessor. Result rows
//! come back as JSON objects keyed by column name.

use crate::durable::DurableStore;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row, Sqlite, TypeInfo, ValueRef};

/// A bindable query parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &'q [SqlValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<i64>),
            SqlValue::Bool(v) => query.bind(*v),
            SqlValue::Integer(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.as_str()),
        };
    }
    query
}

fn row_to_json(row: &SqliteRow) -> Result<Value> {
    let mut object = Map::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => Value::from(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" => Value::from(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => Value::from(row.try_get_unchecked::<Vec<u8>, _>(index)?),
                _ => Value::from(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

impl DurableStore {
    /// Run a read query and return each row as a JSON object
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Value>> {
        let rows = bind_all(sqlx::query(sql), params)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_json).collect()
    }

    /// Run a statement and return the number of affected rows
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let result = bind_all(sqlx::query(sql), params)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
