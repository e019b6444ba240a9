use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One learner registered for one course in one term/year/class.
///
/// Identity is `(year, term, course, reg_no)`; `class` only scopes deletions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct EnrollmentRecord {
    pub id: i64,
    pub year: i32,
    pub term: i32,
    pub course: i64,
    pub reg_no: i64,
    pub class: i64,
}

impl EnrollmentRecord {
    /// Columns of the natural key, in the order of the unique constraint
    pub const NATURAL_KEY: [&'static str; 4] = ["year", "term", "course", "reg_no"];
}
