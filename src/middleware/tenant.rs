use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sqlx::PgPool;

use crate::error::ApiError;
use crate::state::AppState;

pub const TENANT_TOKEN_HEADER: &str = "x-tenant-token";
pub const TENANT_DB_PARAM: &str = "_db";

/// Pool on the resolved school's database, injected by [`resolve_tenant_middleware`]
#[derive(Clone)]
pub struct TenantPool(pub PgPool);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantSelector {
    Token(String),
    Database(String),
}

/// Header token wins over the `_db` query parameter.
pub fn tenant_selector(headers: &HeaderMap, query: Option<&str>) -> Option<TenantSelector> {
    let token = headers
        .get(TENANT_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(token) = token {
        return Some(TenantSelector::Token(token.to_string()));
    }

    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, value)| key == TENANT_DB_PARAM && !value.trim().is_empty())
        .map(|(_, value)| TenantSelector::Database(value.trim().to_string()))
}

/// Resolves the school for this request and injects its pool.
pub async fn resolve_tenant_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let selector = tenant_selector(request.headers(), request.uri().query())
        .ok_or_else(|| ApiError::bad_request("A school must be selected (X-Tenant-Token header or _db parameter)"))?;

    let context = match &selector {
        TenantSelector::Token(token) => state.tenants.resolve_by_token(token).await?,
        TenantSelector::Database(name) => state.tenants.resolve_by_database(name).await?,
    };

    tracing::debug!(
        "Request bound to {} ({})",
        context.tenant.school_name,
        context.tenant.database_name
    );

    request.extensions_mut().insert(TenantPool(context.pool));
    Ok(next.run(request).await)
}
