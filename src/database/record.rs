//! Row values as JSON maps, and the parameter binding that feeds them back in.

use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::{Arguments, Column, Decode, Postgres, Row, Type, TypeInfo};

/// A single row (or insert/update payload, or equality condition set) keyed by column name.
pub type Record = Map<String, Value>;

/// Build a [`Record`] from `(column, value)` pairs.
pub fn record<I, K>(pairs: I) -> Record
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Convert a fetched row into a JSON map, column by column.
pub fn row_to_record(row: &PgRow) -> Record {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), column_value(row, i));
    }
    map
}

fn column_value(row: &PgRow, index: usize) -> Value {
    let type_name = row.column(index).type_info().name().to_ascii_uppercase();
    match type_name.as_str() {
        "INT8" => decode::<i64>(row, index, Value::from),
        "INT4" => decode::<i32>(row, index, Value::from),
        "INT2" => decode::<i16>(row, index, Value::from),
        "BOOL" => decode::<bool>(row, index, Value::from),
        "FLOAT4" => decode::<f32>(row, index, |f| Value::from(f as f64)),
        "FLOAT8" => decode::<f64>(row, index, Value::from),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => decode::<String>(row, index, Value::from),
        "JSON" | "JSONB" => decode::<Value>(row, index, |v| v),
        "TIMESTAMPTZ" => decode::<chrono::DateTime<chrono::Utc>>(row, index, |t| Value::from(t.to_rfc3339())),
        "TIMESTAMP" => decode::<chrono::NaiveDateTime>(row, index, |t| {
            Value::from(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        }),
        "DATE" => decode::<chrono::NaiveDate>(row, index, |d| Value::from(d.to_string())),
        _ => decode::<String>(row, index, Value::from),
    }
}

fn decode<T>(row: &PgRow, index: usize, convert: impl FnOnce(T) -> Value) -> Value
where
    T: for<'r> Decode<'r, Postgres> + Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(index) {
        Ok(Some(v)) => convert(v),
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::debug!("Unable to decode column {}: {}", row.column(index).name(), e);
            Value::Null
        }
    }
}

/// Bind parameters in order. Nulls never reach here: the SQL generator
/// renders them as literals so the column type decides.
pub(crate) fn bind_values(params: &[Value]) -> PgArguments {
    let mut args = PgArguments::default();
    for v in params {
        match v {
            Value::Null => args.add(Option::<String>::None),
            Value::Bool(b) => args.add(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    args.add(i)
                } else if let Some(u) = n.as_u64() {
                    // Postgres doesn't have u64; values above i64::MAX fall back to float
                    args.add(u as f64)
                } else if let Some(f) = n.as_f64() {
                    args.add(f)
                } else {
                    args.add(n.to_string())
                }
            }
            Value::String(s) => args.add(s.clone()),
            Value::Array(_) | Value::Object(_) => args.add(sqlx::types::Json(v.clone())),
        }
    }
    args
}
