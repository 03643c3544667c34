//! Memo Routes
//!
//! Memo CRUD for the signed-in user. Every route is owner-scoped.
//!
//! Routes:
//! - GET /memos - List own memos, newest first
//! - POST /memos - Create a memo (multipart, with attachments)
//! - GET /memos/:id - Get one memo
//! - PUT /memos/:id - Edit content/visibility
//! - DELETE /memos/:id - Delete a memo and its attachments

use axum::{
    extract::{Extension, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Resource, UpdateMemo, Visibility};
use crate::middleware::SessionUser;
use crate::services::{MemoView, NewMemo, UploadedFile};
use crate::{AppState, Error, Result};

/// Multipart field carrying memo text.
const CONTENT_FIELD: &str = "content";
/// Multipart field carrying the visibility.
const VISIBILITY_FIELD: &str = "visibility";
/// Multipart field carrying attachments (repeatable).
const FILES_FIELD: &str = "resource_files";

/// Build memo routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_memos).post(create_memo))
        .route("/:id", get(get_memo).put(update_memo).delete(delete_memo))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Attachment metadata as returned to clients.
#[derive(Debug, Serialize)]
pub struct ResourceResponse {
    pub id: i64,
    pub filename: String,
    pub internal_filename: String,
    pub mime_type: String,
    pub size: i64,
    pub human_size: String,
    pub is_image: bool,
    /// Download path for the bytes.
    pub url: String,
    pub created_at: DateTime<Utc>,
}

impl From<Resource> for ResourceResponse {
    fn from(resource: Resource) -> Self {
        Self {
            url: format!("/uploads/{}", resource.internal_filename),
            human_size: resource.human_size(),
            is_image: resource.is_image(),
            id: resource.id,
            filename: resource.filename,
            internal_filename: resource.internal_filename,
            mime_type: resource.mime_type,
            size: resource.size,
            created_at: resource.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MemoResponse {
    pub id: i64,
    pub content: String,
    /// Sanitized HTML rendering of `content`.
    pub html: String,
    pub visibility: Visibility,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resources: Vec<ResourceResponse>,
}

impl From<MemoView> for MemoResponse {
    fn from(view: MemoView) -> Self {
        let memo = view.memo;
        Self {
            id: memo.id,
            visibility: memo.visibility_enum(),
            content: memo.content,
            html: view.html,
            creator_id: memo.creator_id,
            created_at: memo.created_at,
            updated_at: memo.updated_at,
            resources: view.resources.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListMemosResponse {
    pub memos: Vec<MemoResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CreateMemoResponse {
    pub memo: MemoResponse,
    pub message: String,
    /// One entry per attachment that was not saved.
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemoRequest {
    pub content: String,
    #[serde(default)]
    pub visibility: Option<Visibility>,
}

// ============================================================================
// Handlers
// ============================================================================

/// List the current user's memos.
///
/// GET /memos
#[axum::debug_handler]
async fn list_memos(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ListMemosResponse>> {
    let memos: Vec<MemoResponse> = state
        .memos
        .list_memos(user.user_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();

    let total = memos.len();
    Ok(Json(ListMemosResponse { memos, total }))
}

/// Create a memo with optional attachments.
///
/// POST /memos
///
/// Accepts multipart/form-data with a `content` field, an optional
/// `visibility` field and any number of `resource_files` file fields.
/// Files that cannot be saved are reported in `warnings`; the memo is
/// still created.
#[axum::debug_handler]
async fn create_memo(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse> {
    let mut content: Option<String> = None;
    let mut visibility: Option<Visibility> = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        Error::InvalidInput(format!("Failed to read multipart field: {}", e))
    })? {
        let field_name = field.name().unwrap_or_default().to_string();

        match field_name.as_str() {
            CONTENT_FIELD => {
                content = Some(field.text().await.map_err(|e| {
                    Error::InvalidInput(format!("Failed to read memo content: {}", e))
                })?);
            }
            VISIBILITY_FIELD => {
                let raw = field.text().await.map_err(|e| {
                    Error::InvalidInput(format!("Failed to read visibility: {}", e))
                })?;
                visibility = Some(parse_visibility(&raw)?);
            }
            FILES_FIELD => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| Error::InvalidInput(format!("Failed to read file: {}", e)))?;

                // Browsers send an empty part when no file was chosen
                if filename.as_deref().unwrap_or_default().is_empty() && data.is_empty() {
                    continue;
                }

                files.push(UploadedFile {
                    filename,
                    content_type,
                    data,
                });
            }
            _ => continue,
        }
    }

    let content = content
        .ok_or_else(|| Error::Validation("Memo content cannot be empty.".into()))?;

    let created = state
        .memos
        .create_memo(user.user_id, NewMemo { content, visibility }, files)
        .await?;

    let warnings: Vec<String> = created.skipped.iter().map(|s| s.message()).collect();
    let view = MemoView::new(created.memo, created.resources);

    Ok((
        StatusCode::CREATED,
        Json(CreateMemoResponse {
            memo: view.into(),
            message: "Memo created successfully!".into(),
            warnings,
        }),
    ))
}

/// Get one memo.
///
/// GET /memos/:id
#[axum::debug_handler]
async fn get_memo(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> Result<Json<MemoResponse>> {
    let view = state.memos.get_memo(user.user_id, id).await?;
    Ok(Json(view.into()))
}

/// Edit a memo.
///
/// PUT /memos/:id
#[axum::debug_handler]
async fn update_memo(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateMemoRequest>,
) -> Result<Json<MemoResponse>> {
    state
        .memos
        .update_memo(
            user.user_id,
            id,
            UpdateMemo {
                content: request.content,
                visibility: request.visibility,
            },
        )
        .await?;

    let view = state.memos.get_memo(user.user_id, id).await?;
    Ok(Json(view.into()))
}

/// Delete a memo together with its attachments.
///
/// DELETE /memos/:id
#[axum::debug_handler]
async fn delete_memo(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    state.memos.delete_memo(user.user_id, id).await?;

    Ok(Json(serde_json::json!({
        "message": "Memo deleted successfully!"
    })))
}

fn parse_visibility(raw: &str) -> Result<Visibility> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Visibility::default());
    }
    Visibility::from_str(&raw.to_ascii_uppercase())
        .ok_or_else(|| Error::InvalidInput(format!("Unknown visibility: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("PUBLIC", Visibility::Public)]
    #[case("protected", Visibility::Protected)]
    #[case(" private ", Visibility::Private)]
    #[case("", Visibility::Private)]
    fn test_parse_visibility(#[case] raw: &str, #[case] expected: Visibility) {
        assert_eq!(parse_visibility(raw).unwrap(), expected);
    }

    #[test]
    fn test_parse_visibility_rejects_unknown() {
        assert!(matches!(parse_visibility("secret"), Err(Error::InvalidInput(_))));
    }
}
