//! memos - Markdown note-taking service
//!
//! Session-authenticated memo CRUD with transactional file attachments,
//! served as a JSON API over SQLite and a flat upload directory.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod services;
pub mod state;

pub use config::config;
pub use error::{Error, Result};
pub use state::AppState;
