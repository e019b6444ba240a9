use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A student row. The password hash column is never selected into this type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Learner {
    pub id: i64,
    pub surname: Option<String>,
    pub first_name: Option<String>,
    pub middle: Option<String>,
    pub sex: Option<String>,
    pub registration_no: Option<String>,
    pub student_class: Option<i64>,
    pub level: Option<i64>,
}

impl Learner {
    pub const COLUMNS: [&'static str; 8] = [
        "id",
        "surname",
        "first_name",
        "middle",
        "sex",
        "registration_no",
        "student_class",
        "level",
    ];
}
