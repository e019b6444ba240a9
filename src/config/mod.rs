use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub query: QueryConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound applied to list endpoints; `None` disables the cap.
    pub max_limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Name of the shared directory database holding `school_data`.
    pub directory_name: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
    pub enable_query_logging: bool,
    pub enable_slow_query_warning: bool,
    pub slow_query_threshold_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Shared key expected in the `x-api-key` header. Empty disables the check.
    pub api_key: String,
    /// HS256 secret for bearer tokens. Empty disables JWT verification.
    pub jwt_secret: String,
    pub enable_audit_logging: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = env::var("QUERY_MAX_LIMIT") {
            self.query.max_limit = v.parse().ok();
        }

        // Database overrides
        if let Ok(v) = env::var("DIRECTORY_DB_NAME") {
            if !v.trim().is_empty() {
                self.database.directory_name = v.trim().to_string();
            }
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_QUERY_LOGGING") {
            self.database.enable_query_logging = v.parse().unwrap_or(self.database.enable_query_logging);
        }
        if let Ok(v) = env::var("DATABASE_ENABLE_SLOW_QUERY_WARNING") {
            self.database.enable_slow_query_warning = v.parse().unwrap_or(self.database.enable_slow_query_warning);
        }
        if let Ok(v) = env::var("DATABASE_SLOW_QUERY_THRESHOLD_MS") {
            self.database.slow_query_threshold_ms = v.parse().unwrap_or(self.database.slow_query_threshold_ms);
        }

        // Security overrides
        if let Ok(v) = env::var("API_KEY") {
            self.security.api_key = v;
        }
        if let Ok(v) = env::var("JWT_SECRET_KEY") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_AUDIT_LOGGING") {
            self.security.enable_audit_logging = v.parse().unwrap_or(self.security.enable_audit_logging);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            query: QueryConfig { max_limit: Some(1000) },
            database: DatabaseConfig {
                directory_name: "school_directory".to_string(),
                max_connections: 10,
                connection_timeout: 30,
                enable_query_logging: true,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 100,
            },
            security: SecurityConfig {
                api_key: String::new(),
                jwt_secret: String::new(),
                enable_audit_logging: false,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            query: QueryConfig { max_limit: Some(500) },
            database: DatabaseConfig {
                directory_name: "school_directory".to_string(),
                max_connections: 20,
                connection_timeout: 10,
                enable_query_logging: true,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 500,
            },
            security: SecurityConfig {
                api_key: String::new(),
                jwt_secret: String::new(),
                enable_audit_logging: true,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            query: QueryConfig { max_limit: Some(200) },
            database: DatabaseConfig {
                directory_name: "school_directory".to_string(),
                max_connections: 50,
                connection_timeout: 5,
                enable_query_logging: false,
                enable_slow_query_warning: true,
                slow_query_threshold_ms: 1000,
            },
            security: SecurityConfig {
                api_key: String::new(),
                jwt_secret: String::new(),
                enable_audit_logging: true,
            },
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}
