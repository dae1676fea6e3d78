//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::port_rejection;
use crate::web::auth::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use diet_assistant_core::domain::{
    ActivityLevel, ChatSession, DietaryRestriction, HealthProfile, Role, StoredTurn, UserRecord,
    DEFAULT_SESSION_TITLE,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::web::auth::register_handler,
        crate::web::auth::login_handler,
        crate::web::auth::logout_handler,
        get_profile_handler,
        update_health_handler,
        list_sessions_handler,
        create_session_handler,
        list_turns_handler,
        reset_turns_handler,
    ),
    components(
        schemas(
            RegisterRequest,
            RegisterResponse,
            LoginRequest,
            LoginResponse,
            HealthPayload,
            ProfileResponse,
            SessionResponse,
            TurnResponse,
        )
    ),
    tags(
        (name = "Diet Assistant API", description = "Profiles, chat sessions and transcripts for the diet assistant.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A health profile as exchanged with the client.
#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct HealthPayload {
    pub age: u32,
    pub weight_kg: f64,
    pub height_m: f64,
    /// One of "Sedentary", "Moderate", "Active", "Very Active".
    pub activity_level: String,
    #[serde(default)]
    pub dietary_restrictions: Vec<String>,
}

impl From<&HealthProfile> for HealthPayload {
    fn from(health: &HealthProfile) -> Self {
        Self {
            age: health.age,
            weight_kg: health.weight_kg,
            height_m: health.height_m,
            activity_level: health.activity_level.label().to_string(),
            dietary_restrictions: health
                .dietary_restrictions
                .iter()
                .map(|r| r.label().to_string())
                .collect(),
        }
    }
}

impl TryFrom<HealthPayload> for HealthProfile {
    type Error = String;

    fn try_from(payload: HealthPayload) -> Result<Self, Self::Error> {
        if !(payload.weight_kg > 0.0) || !(payload.height_m > 0.0) {
            return Err("Weight and height must be positive".to_string());
        }
        Ok(HealthProfile {
            age: payload.age,
            weight_kg: payload.weight_kg,
            height_m: payload.height_m,
            activity_level: ActivityLevel::from_str(&payload.activity_level)?,
            dietary_restrictions: payload
                .dietary_restrictions
                .iter()
                .map(|r| DietaryRestriction::from_str(r))
                .collect::<Result<_, _>>()?,
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct ProfileResponse {
    pub user_id: Uuid,
    pub username: String,
    /// Whether a personal model API key is on file. The key itself is never returned.
    pub has_api_key: bool,
    pub health: HealthPayload,
    pub bmi: Option<f64>,
}

impl From<&UserRecord> for ProfileResponse {
    fn from(user: &UserRecord) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            has_api_key: user.api_key.is_some(),
            health: HealthPayload::from(&user.health),
            bmi: user.health.bmi(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChatSession> for SessionResponse {
    fn from(session: ChatSession) -> Self {
        Self {
            session_id: session.id,
            title: session.title,
            created_at: session.created_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct TurnResponse {
    /// "user" or "assistant".
    pub role: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredTurn> for TurnResponse {
    fn from(turn: StoredTurn) -> Self {
        Self {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            }
            .to_string(),
            text: turn.text,
            created_at: turn.created_at,
        }
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Get the signed-in user's profile.
#[utoipa::path(
    get,
    path = "/profile",
    responses(
        (status = 200, description = "The user's profile", body = ProfileResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn get_profile_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user = app_state
        .profiles
        .get_user(user_id)
        .await
        .map_err(port_rejection)?;
    Ok(Json(ProfileResponse::from(&user)))
}

/// Replace the signed-in user's health profile.
#[utoipa::path(
    put,
    path = "/profile/health",
    request_body = HealthPayload,
    responses(
        (status = 204, description = "Health profile updated"),
        (status = 400, description = "Invalid health data"),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn update_health_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(payload): Json<HealthPayload>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let health = HealthProfile::try_from(payload).map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    app_state
        .profiles
        .update_health(user_id, &health)
        .await
        .map_err(port_rejection)?;
    info!("Updated health profile of user {}", user_id);
    Ok(StatusCode::NO_CONTENT)
}

/// List the signed-in user's chat sessions, most recent first.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "The user's sessions", body = [SessionResponse]),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let sessions = app_state
        .sessions
        .list_sessions(user_id)
        .await
        .map_err(port_rejection)?;
    let response: Vec<SessionResponse> = sessions.into_iter().map(SessionResponse::from).collect();
    Ok(Json(response))
}

/// Start a new, empty chat session.
#[utoipa::path(
    post,
    path = "/sessions",
    responses(
        (status = 201, description = "Session created successfully", body = SessionResponse),
        (status = 401, description = "Not signed in")
    )
)]
pub async fn create_session_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session = app_state
        .sessions
        .create_session(user_id, DEFAULT_SESSION_TITLE)
        .await
        .map_err(port_rejection)?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// The stored transcript of one session, oldest turn first.
#[utoipa::path(
    get,
    path = "/sessions/{session_id}/turns",
    params(
        ("session_id" = Uuid, Path, description = "The chat session.")
    ),
    responses(
        (status = 200, description = "The session's turns", body = [TurnResponse]),
        (status = 403, description = "The session belongs to another user"),
        (status = 404, description = "No such session")
    )
)]
pub async fn list_turns_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .owned_session(user_id, session_id)
        .await
        .map_err(port_rejection)?;
    let turns = app_state
        .messages
        .history(session_id)
        .await
        .map_err(port_rejection)?;
    let response: Vec<TurnResponse> = turns.into_iter().map(TurnResponse::from).collect();
    Ok(Json(response))
}

/// Reset a conversation: delete every turn of the session, keeping the session.
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}/turns",
    params(
        ("session_id" = Uuid, Path, description = "The chat session.")
    ),
    responses(
        (status = 204, description = "Turns deleted"),
        (status = 403, description = "The session belongs to another user"),
        (status = 404, description = "No such session")
    )
)]
pub async fn reset_turns_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    app_state
        .owned_session(user_id, session_id)
        .await
        .map_err(port_rejection)?;
    app_state
        .sessions
        .delete_all_turns(session_id)
        .await
        .map_err(port_rejection)?;
    Ok(StatusCode::NO_CONTENT)
}
