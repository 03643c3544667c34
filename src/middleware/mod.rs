//! Middleware for memos.
//!
//! - `session_auth` - Signed session cookie validation for every
//!   non-public route

mod session_auth;

pub use session_auth::{
    removal_cookie, require_session, session_cookie, sign_session_id, verify_session_cookie,
    SessionUser, SESSION_COOKIE_NAME,
};
