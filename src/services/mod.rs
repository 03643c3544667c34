//! Service layer for memos.
//!
//! Contains the business logic between the HTTP handlers and the database:
//! - Accounts (registration, password hashing, credential checks)
//! - AttachmentStorage (uploaded bytes on disk, keyed by internal filename)
//! - Memos (memo CRUD with transactional attachment handling)
//! - Markdown (memo rendering and HTML sanitizing)
//! - Permissions (ownership guard)

mod accounts;
pub mod attachment_storage;
pub mod markdown;
mod memos;
pub mod permissions;

pub use accounts::{hash_password, verify_password, AccountService, NewAccount};
pub use attachment_storage::{
    AttachmentStorageService, PendingResource, SkipReason, UploadSkip, UploadedFile,
};
pub use memos::{CreatedMemo, MemoService, MemoView, NewMemo};
