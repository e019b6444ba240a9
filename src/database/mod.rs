pub mod executor;
pub mod manager;
pub mod models;
pub mod query_builder;
pub mod record;
pub mod repository;
pub mod tables;

pub use executor::{Found, QueryExecutor};
pub use manager::{DatabaseError, DatabaseManager};
pub use query_builder::{CompareOp, Join, JoinKind, QueryBuilder, SortDirection, SqlStatement};
pub use record::{record, Record};
pub use repository::Repository;
pub use tables::Table;
