/**
 * Authentication Routes
 * Username/password registration and login issuing a JWT access token plus
 * an opaque, rotating refresh token.
 */
use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distr::{Alphanumeric, SampleString};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AppConfig;
use crate::db::models::{NewRefreshToken, NewUser, UserInfo};
use crate::db::StoreError;
use crate::error::ApiError;
use crate::AppState;

lazy_static::lazy_static! {
    /// Letters, digits and @ . + - _ , up to 150 characters
    static ref USERNAME_REGEX: Regex = Regex::new(r"^[\w.@+-]{1,150}$").unwrap();
}

const MIN_PASSWORD_LEN: usize = 8;

// ============================================================================
// Types
// ============================================================================

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // User ID
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RegisterResponse {
    pub user: UserInfo,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Returned by login and refresh
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Caller identity, extracted from `Authorization: Bearer <access token>`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn generate_refresh_token() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 64)
}

/// Refresh tokens are stored as SHA-256 hex digests, never in clear.
fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn create_access_token(
    config: &AppConfig,
    user_id: i64,
    username: &str,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let exp = now + Duration::minutes(config.access_token_minutes);

    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: exp.timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
}

pub fn verify_access_token(
    config: &AppConfig,
    token: &str,
) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Mint an access token and persist a fresh refresh token for the user.
async fn issue_token_pair(
    state: &AppState,
    user_id: i64,
    username: &str,
) -> Result<TokenPair, ApiError> {
    let access = create_access_token(&state.config, user_id, username).map_err(|e| {
        tracing::error!("Failed to create access token: {}", e);
        ApiError::Internal("create token".to_string())
    })?;

    match state.store.purge_refresh_tokens().await {
        Ok(0) => {}
        Ok(purged) => tracing::debug!(purged, "Purged spent refresh tokens"),
        Err(e) => tracing::warn!("Failed to purge refresh tokens: {}", e),
    }

    let refresh = generate_refresh_token();
    state
        .store
        .insert_refresh_token(NewRefreshToken {
            user_id,
            token_hash: hash_refresh_token(&refresh),
            expires_at: Utc::now() + Duration::days(state.config.refresh_token_days),
        })
        .await?;

    Ok(TokenPair { access, refresh })
}

fn validate_registration(payload: &RegisterRequest) -> Result<(), ApiError> {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }
    if !USERNAME_REGEX.is_match(&payload.username) {
        return Err(ApiError::BadRequest(
            "Username may contain only letters, digits and @/./+/-/_ characters".to_string(),
        ));
    }
    if let Some(email) = payload.email.as_deref().filter(|e| !e.is_empty()) {
        if !email.contains('@') {
            return Err(ApiError::BadRequest("Invalid email format".to_string()));
        }
    }
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = extract_bearer_token(&parts.headers).ok_or_else(|| {
            ApiError::Unauthorized("Authentication credentials were not provided.".to_string())
        })?;

        let claims = verify_access_token(&state.config, token).map_err(|e| {
            tracing::debug!("Token verification failed: {}", e);
            ApiError::Unauthorized("Invalid or expired token".to_string())
        })?;

        let id = claims
            .sub
            .parse()
            .map_err(|_| ApiError::Unauthorized("Invalid or expired token".to_string()))?;

        Ok(AuthUser {
            id,
            username: claims.username,
        })
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/auth/register/
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_registration(&payload)?;

    // bcrypt is CPU-bound; keep it off the async executor.
    let cost = state.config.bcrypt_cost;
    let password = payload.password;
    let password_hash = tokio::task::spawn_blocking(move || hash(password, cost))
        .await
        .map_err(|e| {
            tracing::error!("spawn_blocking panic during hash: {}", e);
            ApiError::Internal("process password".to_string())
        })?
        .map_err(|e| {
            tracing::error!("Failed to hash password: {}", e);
            ApiError::Internal("process password".to_string())
        })?;

    let user = state
        .store
        .create_user(NewUser {
            username: payload.username,
            email: payload.email.filter(|e| !e.is_empty()),
            password_hash,
        })
        .await
        .map_err(|e| match e {
            StoreError::Conflict(_) => {
                ApiError::Conflict("A user with that username already exists.".to_string())
            }
            other => other.into(),
        })?;

    tracing::info!(user_id = user.id, "User registered: {}", user.username);

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: UserInfo::from(&user),
        }),
    ))
}

/// POST /api/auth/login/
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required".to_string(),
        ));
    }

    let user = match state.store.find_user_by_username(&payload.username).await? {
        Some(user) => user,
        None => {
            tracing::warn!("Login attempt for unknown user: {}", payload.username);
            return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
        }
    };

    let password = payload.password;
    let password_hash = user.password_hash.clone();
    let password_ok = tokio::task::spawn_blocking(move || {
        verify(password, &password_hash).unwrap_or(false)
    })
    .await
    .unwrap_or(false);

    if !password_ok {
        tracing::warn!("Failed login attempt for: {}", user.username);
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    let tokens = issue_token_pair(&state, user.id, &user.username).await?;
    tracing::info!(user_id = user.id, "Successful login for user: {}", user.username);

    Ok(Json(tokens))
}

/// POST /api/auth/refresh/
/// Exchanges a refresh token for a new access token; the refresh token is
/// rotated and the presented one revoked.
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    if payload.refresh.is_empty() {
        return Err(ApiError::BadRequest(
            "Refresh token is required".to_string(),
        ));
    }

    let invalid = || ApiError::Unauthorized("Invalid or expired refresh token".to_string());

    let token_hash = hash_refresh_token(&payload.refresh);
    let stored = state
        .store
        .find_refresh_token(&token_hash)
        .await?
        .filter(|t| t.is_usable(Utc::now()))
        .ok_or_else(invalid)?;

    // Only the caller whose revoke flips the token may rotate it
    if !state.store.revoke_refresh_token(&token_hash).await? {
        tracing::warn!(user_id = stored.user_id, "Refresh token reused concurrently");
        return Err(invalid());
    }

    let user = state
        .store
        .find_user(stored.user_id)
        .await?
        .ok_or_else(invalid)?;

    let tokens = issue_token_pair(&state, user.id, &user.username).await?;

    Ok(Json(tokens))
}

/// POST /api/auth/logout/
/// Revokes the given refresh token and, when a valid bearer token is sent,
/// every refresh token of that user. Always succeeds.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<LogoutRequest>>,
) -> Json<LogoutResponse> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();

    if let Some(refresh_token) = payload.refresh.filter(|t| !t.is_empty()) {
        if let Err(e) = state
            .store
            .revoke_refresh_token(&hash_refresh_token(&refresh_token))
            .await
        {
            tracing::warn!("Failed to revoke refresh token: {}", e);
        }
    }

    let claims =
        extract_bearer_token(&headers).and_then(|t| verify_access_token(&state.config, t).ok());
    if let Some(user_id) = claims.and_then(|c| c.sub.parse::<i64>().ok()) {
        if let Err(e) = state.store.revoke_user_refresh_tokens(user_id).await {
            tracing::warn!(user_id, "Failed to revoke user refresh tokens: {}", e);
        }
    }

    Json(LogoutResponse { success: true })
}
