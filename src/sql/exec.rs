//! Runs built statements on a connection and decodes rows into JSON records.

use super::{PgBindValue, QueryBuf};
use crate::error::AppError;
use crate::repository::Record;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, PgConnection, Postgres, Row, TypeInfo};

fn bound<'q>(q: &'q QueryBuf) -> Query<'q, Postgres, PgArguments> {
    let mut query = sqlx::query(&q.sql);
    for p in &q.params {
        query = query.bind(PgBindValue::from_json(p));
    }
    query
}

pub async fn fetch_all(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<Record>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = bound(q).fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(row_to_json).collect())
}

pub async fn fetch_optional(
    conn: &mut PgConnection,
    q: &QueryBuf,
) -> Result<Option<Record>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let row = bound(q).fetch_optional(&mut *conn).await?;
    Ok(row.as_ref().map(row_to_json))
}

/// Executes a statement and returns the affected row count.
pub async fn execute(conn: &mut PgConnection, q: &QueryBuf) -> Result<u64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "execute");
    let done = bound(q).execute(&mut *conn).await?;
    Ok(done.rows_affected())
}

/// First column of a single-row result, e.g. `COUNT(*)`.
pub async fn fetch_count(conn: &mut PgConnection, q: &QueryBuf) -> Result<i64, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "count");
    let row = bound(q).fetch_one(&mut *conn).await?;
    Ok(row.try_get::<i64, _>(0)?)
}

/// First column of every row, as text.
pub async fn fetch_strings(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<String>, AppError> {
    tracing::debug!(sql = %q.sql, params = ?q.params, "query");
    let rows = bound(q).fetch_all(&mut *conn).await?;
    rows.iter()
        .map(|r| r.try_get::<String, _>(0).map_err(AppError::from))
        .collect()
}

pub fn row_to_json(row: &PgRow) -> Record {
    row.columns()
        .iter()
        .map(|col| {
            let v = cell_to_value(row, col.ordinal(), col.type_info().name());
            (col.name().to_string(), v)
        })
        .collect()
}

fn number(n: Option<f64>) -> Value {
    n.and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn cell_to_value(row: &PgRow, idx: usize, type_name: &str) -> Value {
    let decoded: Result<Value, sqlx::Error> = match type_name {
        "INT2" => row.try_get::<Option<i16>, _>(idx).map(|v| v.map(Value::from).unwrap_or_default()),
        "INT4" => row.try_get::<Option<i32>, _>(idx).map(|v| v.map(Value::from).unwrap_or_default()),
        "INT8" => row.try_get::<Option<i64>, _>(idx).map(|v| v.map(Value::from).unwrap_or_default()),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .map(|v| number(v.map(f64::from))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx).map(number),
        "BOOL" => row.try_get::<Option<bool>, _>(idx).map(|v| v.map(Value::Bool).unwrap_or_default()),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .map(|v| v.map(|u| Value::String(u.to_string())).unwrap_or_default()),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| v.map(|d| Value::String(d.to_rfc3339())).unwrap_or_default()),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| {
                v.map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string()))
                    .unwrap_or_default()
            }),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| v.map(|d| Value::String(d.format("%Y-%m-%d").to_string())).unwrap_or_default()),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx).map(Option::unwrap_or_default),
        _ => row.try_get::<Option<String>, _>(idx).map(|v| v.map(Value::String).unwrap_or_default()),
    };
    match decoded {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(column = idx, type_name, error = %e, "undecodable column");
            Value::Null
        }
    }
}
