//! Authentication handlers

use axum::{extract::State, http::StatusCode, Json};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use jsonwebtoken::{encode, Header, EncodingKey};
use serde::{Deserialize, Serialize};
use chrono::{Utc, Duration};
use validator::Validate;

use crate::{AppState, AppError, AppResult};
use crate::config::Config;
use crate::extract::ApiJson;
use crate::middleware::auth::UserContext;
use crate::models::{User, UserInfo, LoginRequest, LoginResponse, RegisterRequest};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // User ID
    pub username: String, // Username at issue time
    pub exp: usize,       // Expiration timestamp
    pub iat: usize,       // Issued at
}

/// Create a new user
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<UserInfo>)> {
    req.validate()?;

    // Hash password
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| AppError::InternalError(e.to_string()))?
        .to_string();

    let user = state.store.create_user(&req.username, &password_hash).await?;

    tracing::info!("New user registered: {} ({})", user.username, user.id);

    Ok((StatusCode::CREATED, Json(user.to_info())))
}

/// Login endpoint
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let user = state.store
        .find_user_by_username(&req.username)
        .await?
        .ok_or(AppError::InvalidCredentials)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|_| AppError::InternalError("Invalid password hash".to_string()))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::InvalidCredentials)?;

    state.store.touch_last_login(user.id).await?;

    let token = issue_token(&user, &state.config)?;

    Ok(Json(LoginResponse {
        token,
        user: user.to_info(),
    }))
}

/// Current user
pub async fn me(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<Json<UserInfo>> {
    let user = state.store
        .find_user_by_id(user.user_id)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(Json(user.to_info()))
}

/// Delete own account along with every dataset it last modified
pub async fn delete_me(
    State(state): State<AppState>,
    user: UserContext,
) -> AppResult<StatusCode> {
    if !state.store.delete_user(user.user_id).await? {
        return Err(AppError::Unauthorized);
    }

    tracing::info!("User deleted: {} ({})", user.username, user.user_id);

    Ok(StatusCode::NO_CONTENT)
}

/// Generate JWT token
pub fn issue_token(user: &User, config: &Config) -> AppResult<String> {
    let now = Utc::now();
    let hours = i64::try_from(config.jwt_expiration_hours)
        .map_err(|_| AppError::InternalError("token lifetime out of range".to_string()))?;
    let exp = now + Duration::hours(hours);

    let claims = Claims {
        sub: user.id.to_string(),
        username: user.username.clone(),
        exp: exp.timestamp() as usize,
        iat: now.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes())
    ).map_err(|e| AppError::InternalError(e.to_string()))
}
