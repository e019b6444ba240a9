use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::state::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
/// Expected `iss` and `aud` of bearer tokens
pub const TOKEN_ISSUER: &str = "school-portal";

/// User identity carried in a bearer token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: i64,
    pub name: String,
    pub role: String,
}

/// Claims of the HS256 tokens issued by the portal's login service
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub data: AuthUser,
}

/// Rejects requests without the shared `x-api-key`. An unset key disables the gate.
pub async fn api_key_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let expected = &state.security.api_key;
    if expected.is_empty() {
        return Ok(next.run(request).await);
    }

    let supplied = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request("API Key is required."))?;

    // Compare digests so the comparison time does not track the common prefix
    if Sha256::digest(supplied.as_bytes()) != Sha256::digest(expected.as_bytes()) {
        tracing::warn!("Rejected request with invalid API key");
        return Err(ApiError::unauthorized("Unauthorized: Invalid API Key."));
    }

    Ok(next.run(request).await)
}

/// Verifies the bearer token when a JWT secret is configured.
pub async fn jwt_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let secret = &state.security.jwt_secret;
    if secret.is_empty() {
        return Ok(next.run(request).await);
    }

    let token = extract_jwt_from_headers(request.headers())?;
    let user = validate_jwt(&token, secret)?;

    if state.security.enable_audit_logging {
        tracing::info!(
            target: "audit",
            user_id = user.id,
            role = %user.role,
            method = %request.method(),
            path = %request.uri().path(),
            "authenticated request"
        );
    }

    Ok(next.run(request).await)
}

fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, ApiError> {
    let auth_str = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Token is required."))?;

    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::bad_request("Invalid token. Are you missing 'Bearer '?"))?;

    if token.trim().is_empty() {
        return Err(ApiError::bad_request("Token is required."));
    }
    Ok(token.trim().to_string())
}

fn validate_jwt(token: &str, secret: &str) -> Result<AuthUser, ApiError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[TOKEN_ISSUER]);
    validation.set_issuer(&[TOKEN_ISSUER]);

    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims.data)
        .map_err(|e| {
            tracing::debug!("JWT rejected: {}", e);
            ApiError::unauthorized("Invalid or expired token")
        })
}
