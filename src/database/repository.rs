use serde_json::json;
use sqlx::{self, postgres::PgRow, FromRow, PgPool};

use crate::database::manager::DatabaseError;
use crate::database::models::{ClassCohort, Course, EnrollmentRecord, Learner, Level};
use crate::database::query_builder::{QueryBuilder, SortDirection};
use crate::database::record::{record, Record};
use crate::database::tables::Table;

/// A table bound to a tenant pool, returning typed rows.
pub struct Repository<T> {
    table: Table,
    columns: &'static [&'static str],
    pool: PgPool,
    _phantom: std::marker::PhantomData<T>,
}

impl<T> Repository<T>
where
    T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
{
    pub fn new(table: Table, pool: PgPool) -> Self {
        Self::with_columns(table, &[], pool)
    }

    /// Restrict selects to `columns` (e.g. to keep password hashes out of reads)
    pub fn with_columns(table: Table, columns: &'static [&'static str], pool: PgPool) -> Self {
        Self {
            table,
            columns,
            pool,
            _phantom: std::marker::PhantomData,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    fn query(&self) -> QueryBuilder {
        QueryBuilder::table(self.table).select(self.columns.iter().copied())
    }

    /// Rows ordered by id, capped at the configured list limit
    pub async fn select_all(&self, limit: Option<i64>) -> Result<Vec<T>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let cap = crate::config::config().query.max_limit;
        let limit = match (limit, cap) {
            (Some(l), Some(c)) => Some(l.min(c)),
            (l, c) => l.or(c),
        };

        let mut query = self.query().order_by("id", SortDirection::Asc);
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        query.get_as::<T>(&mut conn).await
    }

    pub async fn select_where(&self, conditions: &Record) -> Result<Vec<T>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.query()
            .where_all(conditions)
            .order_by("id", SortDirection::Asc)
            .get_as::<T>(&mut conn)
            .await
    }

    pub async fn select_one(&self, id: i64) -> Result<Option<T>, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        self.query().where_eq("id", id).first_as::<T>(&mut conn).await
    }

    pub async fn select_404(&self, id: i64) -> Result<T, DatabaseError> {
        self.select_one(id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} record {} not found", self.table, id)))
    }

    pub async fn create(&self, data: &Record) -> Result<i64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        QueryBuilder::table(self.table).insert(&mut conn, data).await
    }

    pub async fn update(&self, data: &Record, conditions: &Record) -> Result<u64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        QueryBuilder::table(self.table)
            .where_all(conditions)
            .update(&mut conn, data)
            .await
    }

    pub async fn delete(&self, conditions: &Record) -> Result<u64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        QueryBuilder::table(self.table).where_all(conditions).delete(&mut conn).await
    }

    pub async fn count(&self, conditions: &Record) -> Result<i64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        QueryBuilder::table(self.table).where_all(conditions).count(&mut conn).await
    }
}

pub fn learners(pool: PgPool) -> Repository<Learner> {
    Repository::with_columns(Table::Students, &Learner::COLUMNS, pool)
}

pub fn courses(pool: PgPool) -> Repository<Course> {
    Repository::new(Table::Courses, pool)
}

pub fn classes(pool: PgPool) -> Repository<ClassCohort> {
    Repository::new(Table::Classes, pool)
}

pub fn levels(pool: PgPool) -> Repository<Level> {
    Repository::new(Table::Levels, pool)
}

pub fn enrollments(pool: PgPool) -> Repository<EnrollmentRecord> {
    Repository::new(Table::Results, pool)
}

impl Repository<Learner> {
    /// Learners whose current class is `class_id`
    pub async fn in_class(&self, class_id: i64) -> Result<Vec<Learner>, DatabaseError> {
        self.select_where(&record([("student_class", json!(class_id))])).await
    }
}
