use serde_json::Value;
use sqlx::{postgres::PgRow, FromRow, PgConnection, Row};

use crate::database::executor::{execute, fetch_all, fetch_all_as, fetch_one};
use crate::database::manager::DatabaseError;
use crate::database::record::{row_to_record, Record};
use crate::database::tables::Table;

/// Comparison operators accepted by `where_op`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
}

impl CompareOp {
    pub fn to_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Like => "LIKE",
            CompareOp::ILike => "ILIKE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
    Right,
}

impl JoinKind {
    pub fn to_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
        }
    }
}

/// A join against another allow-listed table.
///
/// `condition` is a raw SQL fragment such as
/// `staff_course_table.course = course_table.id`. It is interpolated as-is,
/// so it must only ever come from code, never from request input.
#[derive(Debug, Clone)]
pub struct Join {
    pub table: Table,
    pub condition: String,
    pub kind: JoinKind,
}

impl Join {
    pub fn new(table: Table, condition: impl Into<String>, kind: JoinKind) -> Self {
        Self { table, condition: condition.into(), kind }
    }

    pub fn inner(table: Table, condition: impl Into<String>) -> Self {
        Self::new(table, condition, JoinKind::Inner)
    }

    pub fn left(table: Table, condition: impl Into<String>) -> Self {
        Self::new(table, condition, JoinKind::Left)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Compare { column: String, op: CompareOp, value: Value },
    In { column: String, values: Vec<Value>, negated: bool },
}

/// Generated SQL plus its positional parameters (`$1`, `$2`, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub query: String,
    pub params: Vec<Value>,
}

/// Immutable query description. Every builder method consumes `self` and
/// returns the extended value, so one request's conditions can never leak
/// into another builder.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    table: Table,
    columns: Vec<String>,
    conditions: Vec<Condition>,
    joins: Vec<Join>,
    order: Vec<(String, SortDirection)>,
    limit: Option<i64>,
}

impl QueryBuilder {
    pub fn table(table: Table) -> Self {
        Self {
            table,
            columns: vec![],
            conditions: vec![],
            joins: vec![],
            order: vec![],
            limit: None,
        }
    }

    /// Resolve a caller-supplied table name against the allow-list
    pub fn from_name(name: &str) -> Result<Self, DatabaseError> {
        Ok(Self::table(Table::parse(name)?))
    }

    pub fn target(&self) -> Table {
        self.table
    }

    pub fn has_conditions(&self) -> bool {
        !self.conditions.is_empty()
    }

    /// Columns to select; empty means `*`
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(column, CompareOp::Eq, value)
    }

    pub fn where_op(mut self, column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Compare { column: column.into(), op, value: value.into() });
        self
    }

    /// AND an equality predicate for every entry of `conditions`
    pub fn where_all(mut self, conditions: &Record) -> Self {
        for (column, value) in conditions {
            self.conditions.push(Condition::Compare {
                column: column.clone(),
                op: CompareOp::Eq,
                value: value.clone(),
            });
        }
        self
    }

    pub fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        });
        self
    }

    pub fn not_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions.push(Condition::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        });
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    // ---------------------------------------------------------------------
    // SQL generation
    // ---------------------------------------------------------------------

    pub fn to_select_sql(&self) -> Result<SqlStatement, DatabaseError> {
        let mut params = Params::default();
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| quote_select_column(c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        };

        let mut parts = vec![format!("SELECT {} FROM {}", columns, self.table.quoted())];
        for join in &self.joins {
            parts.push(render_join(join)?);
        }
        if let Some(where_clause) = self.render_where(&mut params)? {
            parts.push(where_clause);
        }
        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|(c, d)| Ok(format!("{} {}", quote_column_path(c)?, d.to_sql())))
                .collect::<Result<Vec<_>, DatabaseError>>()?;
            parts.push(format!("ORDER BY {}", order.join(", ")));
        }
        if let Some(limit) = self.limit {
            if limit < 0 {
                return Err(DatabaseError::InvalidOperation("Limit must be non-negative".to_string()));
            }
            parts.push(format!("LIMIT {}", limit));
        }

        Ok(SqlStatement { query: parts.join(" "), params: params.values })
    }

    pub fn to_count_sql(&self) -> Result<SqlStatement, DatabaseError> {
        let mut params = Params::default();
        let mut parts = vec![format!("SELECT COUNT(*) AS count FROM {}", self.table.quoted())];
        for join in &self.joins {
            parts.push(render_join(join)?);
        }
        if let Some(where_clause) = self.render_where(&mut params)? {
            parts.push(where_clause);
        }
        Ok(SqlStatement { query: parts.join(" "), params: params.values })
    }

    pub fn to_insert_sql(&self, data: &Record) -> Result<SqlStatement, DatabaseError> {
        let mut stmt = self.to_insert_many_sql(std::slice::from_ref(data), None)?;
        stmt.query.push_str(" RETURNING \"id\"");
        Ok(stmt)
    }

    /// Multi-row insert. Every row must carry the same columns as the first.
    /// With a conflict target, rows colliding on it are skipped.
    pub fn to_insert_many_sql(
        &self,
        rows: &[Record],
        conflict_target: Option<&[&str]>,
    ) -> Result<SqlStatement, DatabaseError> {
        let first = rows
            .first()
            .ok_or_else(|| DatabaseError::InvalidOperation("Insert requires at least one row".to_string()))?;
        if first.is_empty() {
            return Err(DatabaseError::InvalidOperation("Insert requires at least one column".to_string()));
        }

        let columns: Vec<&String> = first.keys().collect();
        let quoted = columns
            .iter()
            .map(|c| quote_plain(c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut params = Params::default();
        let mut tuples = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != columns.len() {
                return Err(DatabaseError::InvalidOperation(
                    "All rows of a multi-row insert must have the same columns".to_string(),
                ));
            }
            let mut placeholders = Vec::with_capacity(columns.len());
            for column in &columns {
                let value = row.get(column.as_str()).ok_or_else(|| {
                    DatabaseError::InvalidOperation(format!("Row is missing column {}", column))
                })?;
                placeholders.push(params.value(value));
            }
            tuples.push(format!("({})", placeholders.join(", ")));
        }

        let mut query = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table.quoted(),
            quoted.join(", "),
            tuples.join(", ")
        );
        if let Some(target) = conflict_target {
            let target = target.iter().map(|c| quote_plain(c)).collect::<Result<Vec<_>, _>>()?;
            query.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", target.join(", ")));
        }

        Ok(SqlStatement { query, params: params.values })
    }

    pub fn to_update_sql(&self, data: &Record) -> Result<SqlStatement, DatabaseError> {
        if self.conditions.is_empty() {
            return Err(DatabaseError::InvalidOperation(
                "Update requires at least one WHERE condition.".to_string(),
            ));
        }
        if data.is_empty() {
            return Err(DatabaseError::InvalidOperation("Update requires at least one column".to_string()));
        }

        let mut params = Params::default();
        let mut set_clauses = Vec::with_capacity(data.len());
        for (column, value) in data {
            set_clauses.push(format!("{} = {}", quote_plain(column)?, params.value(value)));
        }

        let mut query = format!("UPDATE {} SET {}", self.table.quoted(), set_clauses.join(", "));
        if let Some(where_clause) = self.render_where(&mut params)? {
            query.push(' ');
            query.push_str(&where_clause);
        }
        Ok(SqlStatement { query, params: params.values })
    }

    pub fn to_delete_sql(&self) -> Result<SqlStatement, DatabaseError> {
        if self.conditions.is_empty() {
            return Err(DatabaseError::InvalidOperation(
                "No conditions provided for deletion. Refusing to delete all records.".to_string(),
            ));
        }

        let mut params = Params::default();
        let mut query = format!("DELETE FROM {}", self.table.quoted());
        if let Some(where_clause) = self.render_where(&mut params)? {
            query.push(' ');
            query.push_str(&where_clause);
        }
        Ok(SqlStatement { query, params: params.values })
    }

    fn render_where(&self, params: &mut Params) -> Result<Option<String>, DatabaseError> {
        if self.conditions.is_empty() {
            return Ok(None);
        }

        let mut clauses = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            match condition {
                Condition::Compare { column, op, value } => {
                    let column = quote_column_path(column)?;
                    let clause = match (op, value) {
                        (CompareOp::Eq, Value::Null) => format!("{} IS NULL", column),
                        (CompareOp::Neq, Value::Null) => format!("{} IS NOT NULL", column),
                        _ => format!("{} {} {}", column, op.to_sql(), params.push(value.clone())),
                    };
                    clauses.push(clause);
                }
                Condition::In { column, values, negated } => {
                    if values.is_empty() {
                        let which = if *negated { "NOT IN" } else { "IN" };
                        return Err(DatabaseError::InvalidOperation(format!(
                            "Values for {} cannot be empty.",
                            which
                        )));
                    }
                    let column = quote_column_path(column)?;
                    let placeholders: Vec<String> = values.iter().map(|v| params.push(v.clone())).collect();
                    let keyword = if *negated { "NOT IN" } else { "IN" };
                    clauses.push(format!("{} {} ({})", column, keyword, placeholders.join(", ")));
                }
            }
        }

        Ok(Some(format!("WHERE {}", clauses.join(" AND "))))
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    pub async fn get(self, conn: &mut PgConnection) -> Result<Vec<Record>, DatabaseError> {
        let stmt = self.to_select_sql()?;
        let rows = fetch_all(conn, &stmt).await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    pub async fn first(self, conn: &mut PgConnection) -> Result<Option<Record>, DatabaseError> {
        let rows = self.limit(1).get(conn).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn get_as<T>(self, conn: &mut PgConnection) -> Result<Vec<T>, DatabaseError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let stmt = self.to_select_sql()?;
        fetch_all_as::<T>(conn, &stmt).await
    }

    pub async fn first_as<T>(self, conn: &mut PgConnection) -> Result<Option<T>, DatabaseError>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        let rows = self.limit(1).get_as::<T>(conn).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn count(self, conn: &mut PgConnection) -> Result<i64, DatabaseError> {
        let stmt = self.to_count_sql()?;
        let row = fetch_one(conn, &stmt).await?;
        let count: i64 = row.try_get("count")?;
        Ok(count)
    }

    pub async fn exists(self, conn: &mut PgConnection) -> Result<bool, DatabaseError> {
        Ok(self.count(conn).await? > 0)
    }

    /// Insert one row and return its new `id`
    pub async fn insert(self, conn: &mut PgConnection, data: &Record) -> Result<i64, DatabaseError> {
        let stmt = self.to_insert_sql(data)?;
        let row = fetch_one(conn, &stmt).await?;
        let id: i64 = row.try_get("id")?;
        Ok(id)
    }

    /// Insert many rows; returns the number actually written
    pub async fn insert_many(
        self,
        conn: &mut PgConnection,
        rows: &[Record],
        conflict_target: Option<&[&str]>,
    ) -> Result<u64, DatabaseError> {
        let stmt = self.to_insert_many_sql(rows, conflict_target)?;
        execute(conn, &stmt).await
    }

    /// Returns rows affected
    pub async fn update(self, conn: &mut PgConnection, data: &Record) -> Result<u64, DatabaseError> {
        let stmt = self.to_update_sql(data)?;
        execute(conn, &stmt).await
    }

    /// Returns rows affected
    pub async fn delete(self, conn: &mut PgConnection) -> Result<u64, DatabaseError> {
        let stmt = self.to_delete_sql()?;
        execute(conn, &stmt).await
    }
}

/// Positional parameter collector
#[derive(Default)]
struct Params {
    values: Vec<Value>,
}

impl Params {
    fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    /// Placeholder for an INSERT/UPDATE value; nulls are rendered inline so
    /// the target column's type applies.
    fn value(&mut self, value: &Value) -> String {
        if value.is_null() {
            "NULL".to_string()
        } else {
            self.push(value.clone())
        }
    }
}

fn render_join(join: &Join) -> Result<String, DatabaseError> {
    if join.condition.trim().is_empty() {
        return Err(DatabaseError::InvalidOperation(format!(
            "Join on {} requires a condition",
            join.table
        )));
    }
    if join.condition.contains(';') || join.condition.contains("--") {
        return Err(DatabaseError::InvalidIdentifier(format!(
            "Invalid join condition for {}",
            join.table
        )));
    }
    Ok(format!("{} JOIN {} ON {}", join.kind.to_sql(), join.table.quoted(), join.condition))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Unqualified column, e.g. in INSERT and SET lists
fn quote_plain(column: &str) -> Result<String, DatabaseError> {
    if !is_identifier(column) {
        return Err(DatabaseError::InvalidIdentifier(format!("Invalid column name format: {}", column)));
    }
    Ok(format!("\"{}\"", column))
}

/// `column` or `table.column`; the qualifier must be an allow-listed table
fn quote_column_path(column: &str) -> Result<String, DatabaseError> {
    match column.split_once('.') {
        Some((table, name)) => {
            let table = Table::parse(table)?;
            Ok(format!("{}.{}", table.quoted(), quote_plain(name)?))
        }
        None => quote_plain(column),
    }
}

/// Select-list entry: `*`, `table.*`, a column path, optionally `AS alias`
fn quote_select_column(column: &str) -> Result<String, DatabaseError> {
    let trimmed = column.trim();
    if trimmed == "*" {
        return Ok("*".to_string());
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    let (expr, alias) = match tokens.as_slice() {
        [expr] => (*expr, None),
        [expr, kw, alias] if kw.eq_ignore_ascii_case("as") => (*expr, Some(*alias)),
        _ => {
            return Err(DatabaseError::InvalidIdentifier(format!(
                "Invalid column name format: {}",
                column
            )))
        }
    };

    let rendered = match expr.strip_suffix(".*") {
        Some(table) => {
            if alias.is_some() {
                return Err(DatabaseError::InvalidIdentifier(format!("Cannot alias {}", expr)));
            }
            format!("{}.*", Table::parse(table)?.quoted())
        }
        None => quote_column_path(expr)?,
    };

    match alias {
        Some(alias) => Ok(format!("{} AS {}", rendered, quote_plain(alias)?)),
        None => Ok(rendered),
    }
}
