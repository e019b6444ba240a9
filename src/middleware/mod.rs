pub mod auth;
pub mod response;
pub mod tenant;

pub use auth::{api_key_middleware, jwt_auth_middleware, AuthUser, Claims};
pub use response::{ApiResponse, ApiResult};
pub use tenant::{resolve_tenant_middleware, TenantPool};
