//! Session-based authentication middleware.
//!
//! # Session Flow
//!
//! 1. User logs in with username and password
//! 2. Server creates a session row and sets the `memos_session` cookie
//! 3. Subsequent requests include the cookie, validated by this middleware
//! 4. Session expires after its lifetime or on logout
//!
//! # Security Model
//!
//! - Session IDs are cryptographically random (nanoid)
//! - The cookie carries `<id>.<hex hmac-sha256(secret, id)>`, so a cookie
//!   that was not issued by this server is rejected before any lookup
//! - Sessions are stored server-side and can be invalidated (logout)
//! - Cookie is HttpOnly, Secure (behind https), SameSite=Lax

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::config::SessionConfig;
use crate::db::{self, UserRole};
use crate::{error::Error, AppState};

type HmacSha256 = Hmac<Sha256>;

/// Session cookie name.
pub const SESSION_COOKIE_NAME: &str = "memos_session";

/// User context injected into request extensions after successful session validation.
#[derive(Clone, Debug)]
pub struct SessionUser {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
    /// Server-side session id (never logged).
    pub session_id: String,
}

impl SessionUser {
    /// Check if user has admin role.
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Middleware that requires a valid session.
///
/// Verifies the cookie signature, looks the session up, and injects
/// `SessionUser` into request extensions.
///
/// # Errors
///
/// Returns 401 Unauthorized if:
/// - No session cookie present, or its signature does not verify
/// - Session not found in database
/// - Session is expired
/// - User not found
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Error> {
    let cookie_value = jar
        .get(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_string())
        .ok_or(Error::Unauthenticated)?;

    let session_id = verify_session_cookie(&state.session.secret, &cookie_value)
        .ok_or_else(|| {
            debug!("Rejected session cookie with bad signature");
            Error::Unauthenticated
        })?;

    let session_user = validate_session(&state, session_id).await?;

    req.extensions_mut().insert(session_user);

    Ok(next.run(req).await)
}

/// Validate a session ID and return the session user.
async fn validate_session(state: &AppState, session_id: &str) -> Result<SessionUser, Error> {
    let session = db::get_session(&state.db, session_id)
        .await?
        .ok_or(Error::Unauthenticated)?;

    if session.is_expired() {
        // Clean up expired session
        let pool = state.db.clone();
        let sid = session_id.to_string();
        tokio::spawn(async move {
            let _ = db::delete_session(&pool, &sid).await;
        });
        return Err(Error::Unauthenticated);
    }

    let user = match db::get_user(&state.db, session.user_id).await {
        Ok(user) => user,
        Err(Error::NotFound(_)) => return Err(Error::Unauthenticated),
        Err(e) => return Err(e),
    };

    Ok(SessionUser {
        user_id: user.id,
        role: user.role_enum(),
        username: user.username,
        session_id: session.id,
    })
}

// ============================================================================
// Cookie signing
// ============================================================================

fn mac_for(secret: &str, session_id: &str) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(session_id.as_bytes());
    mac
}

/// Cookie value for a session id: `<id>.<hex signature>`.
pub fn sign_session_id(secret: &str, session_id: &str) -> String {
    let signature = mac_for(secret, session_id).finalize().into_bytes();
    format!("{}.{}", session_id, hex::encode(signature))
}

/// Return the session id of a cookie value if its signature verifies.
pub fn verify_session_cookie<'a>(secret: &str, cookie_value: &'a str) -> Option<&'a str> {
    let (session_id, signature) = cookie_value.rsplit_once('.')?;
    if session_id.is_empty() {
        return None;
    }

    let expected = hex::decode(signature).ok()?;
    mac_for(secret, session_id)
        .verify_slice(&expected)
        .ok()
        .map(|_| session_id)
}

/// Build the session cookie for a freshly created session.
pub fn session_cookie(config: &SessionConfig, session_id: &str, max_age_seconds: u64) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, sign_session_id(&config.secret, session_id)))
        .path("/")
        .http_only(true)
        .secure(config.secure_cookies)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age_seconds as i64))
        .build()
}

/// Build a cookie that clears the session cookie in the browser.
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, ""))
        .path("/")
        .max_age(time::Duration::seconds(0))
        .build()
}
