//! Application state for memos.
//!
//! Contains the shared state that is passed to all handlers.

use crate::config::{Config, SessionConfig};
use crate::db::{self, DbPool};
use crate::services::{AccountService, AttachmentStorageService, MemoService};
use crate::Result;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: DbPool,
    /// Account registration and credential checks.
    pub accounts: AccountService,
    /// Memo and attachment operations.
    pub memos: MemoService,
    /// Attachment byte storage.
    pub attachments: AttachmentStorageService,
    /// Session cookie settings.
    pub session: SessionConfig,
}

impl AppState {
    /// Create a new application state, initializing all services.
    ///
    /// Opens the database, applies the schema, and creates the upload
    /// directory.
    pub async fn new(config: &Config) -> Result<Self> {
        let db = db::init_pool(&config.database.url).await?;
        db::initialize_schema(&db).await?;

        let purged = db::delete_expired_sessions(&db).await?;
        if purged > 0 {
            tracing::info!("Purged {} expired sessions", purged);
        }

        let attachments = AttachmentStorageService::new(
            &config.storage.upload_folder,
            config.storage.max_upload_size,
        );
        attachments.init().await?;

        Ok(Self::from_parts(db, attachments, config))
    }

    /// Assemble state from an already initialised pool and storage.
    pub fn from_parts(db: DbPool, attachments: AttachmentStorageService, config: &Config) -> Self {
        let accounts = AccountService::new(db.clone());
        let memos = MemoService::new(
            db.clone(),
            attachments.clone(),
            config.memo.max_content_length,
        );

        Self {
            db,
            accounts,
            memos,
            attachments,
            session: config.session.clone(),
        }
    }
}
