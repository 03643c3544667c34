//! Authentication Routes
//!
//! Username/password accounts with server-side sessions.
//!
//! Routes:
//! - POST /auth/signup - Create an account (first account becomes ADMIN)
//! - POST /auth/login - Verify credentials and start a session
//! - POST /auth/logout - End session
//! - GET /auth/me - Get current user info

use axum::{
    extract::{Extension, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MAX_SESSION_AGE_SECONDS;
use crate::db::{self, CreateSession, User, UserRole};
use crate::middleware::{removal_cookie, require_session, session_cookie, SessionUser};
use crate::services::NewAccount;
use crate::{AppState, Error, Result};

/// Build authentication routes.
pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Public routes
        .route("/signup", post(signup))
        .route("/login", post(login))
        // Protected routes (require session)
        .route(
            "/logout",
            post(logout).layer(middleware::from_fn_with_state(
                state.clone(),
                require_session,
            )),
        )
        .route(
            "/me",
            get(get_current_user).layer(middleware::from_fn_with_state(state, require_session)),
        )
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
    /// Must repeat `password`.
    pub confirm_password: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

/// Public view of a user account.
#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub nickname: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            role: user.role_enum(),
            username: user.username,
            email: user.email,
            nickname: user.nickname,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserInfo,
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Register a new account.
///
/// POST /auth/signup
#[axum::debug_handler]
async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> Result<impl IntoResponse> {
    if request.password != request.confirm_password {
        return Err(Error::Validation("Passwords must match.".into()));
    }

    let user = state
        .accounts
        .create_account(NewAccount {
            username: request.username,
            email: request.email,
            password: request.password,
            nickname: request.nickname,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.into(),
            message: "Registration successful! Please login.".into(),
        }),
    ))
}

/// Log in with username and password.
///
/// POST /auth/login
///
/// On success a session row is created and the signed session cookie set.
/// `remember_me` selects the long session lifetime.
#[axum::debug_handler]
async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse> {
    let user = state
        .accounts
        .verify_credential(&request.username, &request.password)
        .await?;

    let max_age_seconds = if request.remember_me {
        state.session.remember_max_age_seconds
    } else {
        state.session.max_age_seconds
    }
    .min(MAX_SESSION_AGE_SECONDS);

    let session_id = nanoid::nanoid!(32);
    db::create_session(
        &state.db,
        CreateSession {
            id: session_id.clone(),
            user_id: user.id,
            expires_at: Utc::now() + chrono::Duration::seconds(max_age_seconds as i64),
        },
    )
    .await?;

    info!(user_id = user.id, remember_me = request.remember_me, "User logged in");

    let jar = jar.add(session_cookie(&state.session, &session_id, max_age_seconds));

    Ok((
        jar,
        Json(AuthResponse {
            user: user.into(),
            message: "Logged in successfully".into(),
        }),
    ))
}

/// End the current session.
///
/// POST /auth/logout
///
/// Clears the session cookie and invalidates the session server-side.
#[axum::debug_handler]
async fn logout(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    jar: CookieJar,
) -> Result<impl IntoResponse> {
    db::delete_session(&state.db, &user.session_id).await?;

    info!(user_id = user.user_id, "User logged out");

    let jar = jar.add(removal_cookie());

    Ok((
        jar,
        Json(serde_json::json!({
            "message": "You have been logged out."
        })),
    ))
}

/// Get current authenticated user information.
///
/// GET /auth/me
#[axum::debug_handler]
async fn get_current_user(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<UserInfo>> {
    let user = db::get_user(&state.db, user.user_id).await?;
    Ok(Json(user.into()))
}
