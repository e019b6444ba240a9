use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, warn};

use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::Tenant;
use crate::database::query_builder::QueryBuilder;
use crate::database::tables::Table;

/// Lookup of school rows in the shared directory
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<Option<Tenant>, DatabaseError>;
    async fn find_by_database(&self, database_name: &str) -> Result<Option<Tenant>, DatabaseError>;
}

/// Directory backed by the `school_data` table of the directory database
pub struct PgTenantDirectory {
    manager: Arc<DatabaseManager>,
}

impl PgTenantDirectory {
    pub fn new(manager: Arc<DatabaseManager>) -> Self {
        Self { manager }
    }

    async fn find_where(&self, column: &str, value: &str) -> Result<Option<Tenant>, DatabaseError> {
        let pool = self.manager.directory_pool().await?;
        let mut conn = pool.acquire().await?;
        QueryBuilder::table(Table::SchoolData)
            .select(["id", "token", "database_name", "school_name"])
            .where_eq(column, value)
            .first_as::<Tenant>(&mut conn)
            .await
    }
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn find_by_token(&self, token: &str) -> Result<Option<Tenant>, DatabaseError> {
        self.find_where("token", token).await
    }

    async fn find_by_database(&self, database_name: &str) -> Result<Option<Tenant>, DatabaseError> {
        self.find_where("database_name", database_name).await
    }
}

/// A resolved school: its directory row and a pool on its database
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: Tenant,
    pub pool: PgPool,
}

/// Turns a lookup token or database name into a tenant connection.
pub struct TenantService {
    directory: Arc<dyn TenantDirectory>,
    manager: Arc<DatabaseManager>,
}

impl TenantService {
    pub fn new(directory: Arc<dyn TenantDirectory>, manager: Arc<DatabaseManager>) -> Self {
        Self { directory, manager }
    }

    /// Service reading the directory database managed by `manager`
    pub fn with_postgres_directory(manager: Arc<DatabaseManager>) -> Self {
        let directory = Arc::new(PgTenantDirectory::new(manager.clone()));
        Self::new(directory, manager)
    }

    pub async fn resolve_by_token(&self, token: &str) -> Result<TenantContext, DatabaseError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(DatabaseError::TenantNotFound("empty tenant token".to_string()));
        }

        let tenant = self.directory.find_by_token(token).await?.ok_or_else(|| {
            warn!("No school registered for the supplied token");
            DatabaseError::TenantNotFound("unknown tenant token".to_string())
        })?;
        self.connect(tenant).await
    }

    pub async fn resolve_by_database(&self, database_name: &str) -> Result<TenantContext, DatabaseError> {
        if !DatabaseManager::is_valid_db_name(database_name) {
            return Err(DatabaseError::InvalidTenantName(database_name.to_string()));
        }

        let tenant = self.directory.find_by_database(database_name).await?.ok_or_else(|| {
            warn!("No school registered for database {}", database_name);
            DatabaseError::TenantNotFound(database_name.to_string())
        })?;
        self.connect(tenant).await
    }

    async fn connect(&self, tenant: Tenant) -> Result<TenantContext, DatabaseError> {
        let pool = self.manager.tenant_pool(&tenant.database_name).await?;
        debug!("Resolved tenant {} ({})", tenant.school_name, tenant.database_name);
        Ok(TenantContext { tenant, pool })
    }
}
