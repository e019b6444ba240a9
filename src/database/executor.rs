//! Call-style access to the query layer, plus the statement runners shared
//! with [`QueryBuilder`].

use std::time::Instant;

use sqlx::{postgres::PgRow, FromRow, PgConnection};
use tracing::{debug, warn};

use crate::database::manager::DatabaseError;
use crate::database::query_builder::{Join, QueryBuilder, SqlStatement};
use crate::database::record::{bind_values, Record};
use crate::database::tables::Table;

/// Result of a `find_by` style lookup: a single row when exactly one was
/// asked for, otherwise the full list.
#[derive(Debug, Clone, PartialEq)]
pub enum Found {
    One(Option<Record>),
    Many(Vec<Record>),
}

impl Found {
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            Found::One(row) => row.into_iter().collect(),
            Found::Many(rows) => rows,
        }
    }

    pub fn into_one(self) -> Option<Record> {
        match self {
            Found::One(row) => row,
            Found::Many(rows) => rows.into_iter().next(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Found::One(row) => row.is_none(),
            Found::Many(rows) => rows.is_empty(),
        }
    }
}

/// Stateless executor bound to one open connection (pooled connection or
/// transaction). Each call builds a fresh [`QueryBuilder`].
pub struct QueryExecutor<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> QueryExecutor<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    /// Insert a row and return its new id
    pub async fn insert(&mut self, table: &str, data: &Record) -> Result<i64, DatabaseError> {
        let table = Table::parse(table)?;
        QueryBuilder::table(table).insert(&mut *self.conn, data).await
    }

    /// Insert many rows in one statement, skipping rows that collide on `conflict_target`
    pub async fn insert_many(
        &mut self,
        table: &str,
        rows: &[Record],
        conflict_target: Option<&[&str]>,
    ) -> Result<u64, DatabaseError> {
        let table = Table::parse(table)?;
        QueryBuilder::table(table).insert_many(&mut *self.conn, rows, conflict_target).await
    }

    /// AND-ed equality lookup. `limit == Some(1)` yields [`Found::One`].
    pub async fn find_by(
        &mut self,
        table: &str,
        columns: &[&str],
        conditions: &Record,
        limit: Option<i64>,
    ) -> Result<Found, DatabaseError> {
        self.query_with_joins(table, columns, &[], conditions, limit).await
    }

    pub async fn query_with_joins(
        &mut self,
        table: &str,
        columns: &[&str],
        joins: &[Join],
        conditions: &Record,
        limit: Option<i64>,
    ) -> Result<Found, DatabaseError> {
        let mut builder = QueryBuilder::table(Table::parse(table)?)
            .select(columns.iter().copied())
            .where_all(conditions);
        for join in joins {
            builder = builder.join(join.clone());
        }

        match limit {
            Some(1) => Ok(Found::One(builder.first(&mut *self.conn).await?)),
            Some(n) => Ok(Found::Many(builder.limit(n).get(&mut *self.conn).await?)),
            None => Ok(Found::Many(builder.get(&mut *self.conn).await?)),
        }
    }

    /// Refuses to run without conditions
    pub async fn update(&mut self, table: &str, data: &Record, conditions: &Record) -> Result<bool, DatabaseError> {
        let table = Table::parse(table)?;
        QueryBuilder::table(table).where_all(conditions).update(&mut *self.conn, data).await?;
        Ok(true)
    }

    /// Refuses to run without conditions. `not_in` appends `column NOT IN (...)`.
    pub async fn delete(
        &mut self,
        table: &str,
        conditions: &Record,
        not_in: Option<(&str, &[serde_json::Value])>,
    ) -> Result<bool, DatabaseError> {
        let table = Table::parse(table)?;
        if conditions.is_empty() {
            // A NOT IN predicate alone does not scope a deletion
            return Err(DatabaseError::InvalidOperation(
                "No conditions provided for deletion. Refusing to delete all records.".to_string(),
            ));
        }
        let mut builder = QueryBuilder::table(table).where_all(conditions);
        if let Some((column, values)) = not_in {
            builder = builder.not_in(column, values.iter().cloned());
        }
        builder.delete(&mut *self.conn).await?;
        Ok(true)
    }

    pub async fn count(&mut self, table: &str, conditions: &Record) -> Result<i64, DatabaseError> {
        let table = Table::parse(table)?;
        QueryBuilder::table(table).where_all(conditions).count(&mut *self.conn).await
    }

    pub async fn exists(&mut self, table: &str, conditions: &Record) -> Result<bool, DatabaseError> {
        Ok(self.count(table, conditions).await? > 0)
    }
}

// -------------------------------------------------------------------------
// Statement runners
// -------------------------------------------------------------------------

pub(crate) async fn fetch_all(conn: &mut PgConnection, stmt: &SqlStatement) -> Result<Vec<PgRow>, DatabaseError> {
    let started = Instant::now();
    let rows = sqlx::query_with(&stmt.query, bind_values(&stmt.params))
        .fetch_all(&mut *conn)
        .await?;
    observe(stmt, started);
    Ok(rows)
}

pub(crate) async fn fetch_all_as<T>(conn: &mut PgConnection, stmt: &SqlStatement) -> Result<Vec<T>, DatabaseError>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    let started = Instant::now();
    let rows = sqlx::query_as_with::<_, T, _>(&stmt.query, bind_values(&stmt.params))
        .fetch_all(&mut *conn)
        .await?;
    observe(stmt, started);
    Ok(rows)
}

pub(crate) async fn fetch_one(conn: &mut PgConnection, stmt: &SqlStatement) -> Result<PgRow, DatabaseError> {
    let started = Instant::now();
    let row = sqlx::query_with(&stmt.query, bind_values(&stmt.params))
        .fetch_one(&mut *conn)
        .await?;
    observe(stmt, started);
    Ok(row)
}

pub(crate) async fn execute(conn: &mut PgConnection, stmt: &SqlStatement) -> Result<u64, DatabaseError> {
    let started = Instant::now();
    let result = sqlx::query_with(&stmt.query, bind_values(&stmt.params))
        .execute(&mut *conn)
        .await?;
    observe(stmt, started);
    Ok(result.rows_affected())
}

fn observe(stmt: &SqlStatement, started: Instant) {
    let settings = &crate::config::config().database;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if settings.enable_query_logging {
        debug!(sql = %stmt.query, params = stmt.params.len(), elapsed_ms, "query executed");
    }
    if settings.enable_slow_query_warning && elapsed_ms > settings.slow_query_threshold_ms {
        warn!(sql = %stmt.query, elapsed_ms, "slow query");
    }
}
