use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use whispr_db::Database;
use whispr_types::api::{
    Claims, ERR_CONFLICT, ERR_INVALID, LoginRequest, RegisterRequest, SessionResponse,
};

use crate::blocking;
use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
}

pub const MIN_PASSWORD_LEN: usize = 8;

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') || email.len() > 254 {
        return Err(ApiError::new(ERR_INVALID, "invalid email address"));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::new(ERR_INVALID, "password is too short"));
    }

    let lookup = email.clone();
    if blocking(&state, move |db| db.find_credentials(&lookup)).await?.is_some() {
        return Err(ApiError::new(ERR_CONFLICT, "email already registered"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|_| ApiError::internal("password hashing failed"))?
        .to_string();

    let mood = req.mood;
    let user = blocking(&state, move |db| {
        db.create_account(&email, &password_hash, mood.as_deref())
    })
    .await?;

    let token = create_token(&state.jwt_secret, user.id)
        .map_err(|_| ApiError::internal("token signing failed"))?;
    info!(user_id = %user.id, "registered");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            user_id: user.id,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let creds = blocking(&state, move |db| db.find_credentials(&email))
        .await?
        .ok_or_else(ApiError::unauthorized)?;

    let parsed_hash =
        PasswordHash::new(&creds.password).map_err(|_| ApiError::internal("stored hash is malformed"))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized())?;

    let user_id: Uuid = creds
        .user_id
        .parse()
        .map_err(|_| ApiError::internal("stored user id is malformed"))?;
    let token = create_token(&state.jwt_secret, user_id)
        .map_err(|_| ApiError::internal("token signing failed"))?;

    Ok(Json(SessionResponse { user_id, token }))
}

pub fn create_token(secret: &str, user_id: Uuid) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
