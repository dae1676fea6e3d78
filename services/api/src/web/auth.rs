//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for user registration, login, and logout.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use diet_assistant_core::domain::{HealthProfile, DEFAULT_SESSION_TITLE};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::port_rejection;
use crate::web::middleware::session_cookie;
use crate::web::rest::HealthPayload;
use crate::web::state::AppState;

const AUTH_SESSION_DAYS: i64 = 30;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    /// Personal Gemini API key, used when the connection supplies none.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Defaults to the standard profile when omitted.
    #[serde(default)]
    pub health: Option<HealthPayload>,
}

#[derive(Serialize, ToSchema)]
pub struct RegisterResponse {
    pub user_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    /// A fresh chat session opened for this login.
    pub session_id: Uuid,
    pub health: HealthPayload,
}

fn session_cookie_header(auth_session_id: &str, max_age: i64) -> String {
    format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        auth_session_id, max_age
    )
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /auth/register - Create a new user account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created successfully", body = RegisterResponse),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Username already taken")
    )
)]
pub async fn register_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Username and password are required".to_string(),
        ));
    }
    let health = match req.health {
        Some(payload) => {
            HealthProfile::try_from(payload).map_err(|e| (StatusCode::BAD_REQUEST, e))?
        }
        None => HealthProfile::default(),
    };

    let user_id = state
        .profiles
        .register(username, &req.password, req.api_key.as_deref(), &health)
        .await
        .map_err(port_rejection)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id })))
}

/// POST /auth/login - Login with existing account
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    // 1. Verify the credentials
    let user = state
        .profiles
        .authenticate(req.username.trim(), &req.password)
        .await
        .map_err(port_rejection)?
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "Invalid username or password".to_string(),
        ))?;

    // 2. Create the auth session
    let auth_session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::days(AUTH_SESSION_DAYS);
    state
        .auth_sessions
        .create_auth_session(&auth_session_id, user.id, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;

    // 3. Every login starts in a new chat
    let chat = state
        .sessions
        .create_session(user.id, DEFAULT_SESSION_TITLE)
        .await
        .map_err(port_rejection)?;
    info!("User {} logged in, chat session {}", user.username, chat.id);

    let cookie = session_cookie_header(
        &auth_session_id,
        Duration::days(AUTH_SESSION_DAYS).num_seconds(),
    );
    let response = LoginResponse {
        user_id: user.id,
        username: user.username.clone(),
        session_id: chat.id,
        health: HealthPayload::from(&user.health),
    };

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /auth/logout - Logout and invalidate session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let auth_session_id = session_cookie(&headers)
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    state
        .auth_sessions
        .delete_auth_session(auth_session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete auth session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout".to_string())
        })?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, session_cookie_header("", 0))],
    ))
}
