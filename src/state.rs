use std::sync::Arc;

use crate::config::SecurityConfig;
use crate::database::manager::DatabaseManager;
use crate::services::tenant_service::TenantService;

/// Shared handles every request can reach
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<DatabaseManager>,
    pub tenants: Arc<TenantService>,
    pub security: SecurityConfig,
}

impl AppState {
    pub fn new(manager: Arc<DatabaseManager>, tenants: Arc<TenantService>, security: SecurityConfig) -> Self {
        Self { manager, tenants, security }
    }

    /// State reading tenants from the directory database of `manager`
    pub fn with_postgres_directory(manager: Arc<DatabaseManager>, security: SecurityConfig) -> Self {
        let tenants = Arc::new(TenantService::with_postgres_directory(manager.clone()));
        Self::new(manager, tenants, security)
    }
}
