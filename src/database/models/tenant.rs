use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Directory row mapping a lookup token to a school's database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: i64,
    #[serde(skip_serializing)]
    pub token: String,
    pub database_name: String,
    pub school_name: String,
}
