use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A class (cohort) of learners
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ClassCohort {
    pub id: i64,
    pub class_name: String,
    pub level: Option<i64>,
    pub form_teacher: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Level {
    pub id: i64,
    pub level_name: String,
}
