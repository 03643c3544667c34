//! Resource Routes
//!
//! Download and delete single attachments. Access is granted to the
//! uploader and to the owner of the memo the file is attached to.
//!
//! Routes:
//! - GET /uploads/:internal_filename - Download attachment bytes
//! - DELETE /resources/:id - Delete an attachment (row and bytes)

use axum::{
    body::Body,
    extract::{Extension, Path, State},
    http::header,
    response::Response,
    routing::{delete, get},
    Json, Router,
};

use crate::db::Resource;
use crate::middleware::SessionUser;
use crate::{AppState, Error, Result};

/// Types a browser may render in place. The stored type is client-supplied,
/// so everything else is served as a download.
const INLINE_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "application/pdf"];

/// Build download routes.
pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/:internal_filename", get(download_resource))
}

/// Build resource management routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/:id", delete(delete_resource))
}

/// Download an attachment.
///
/// GET /uploads/:internal_filename
#[axum::debug_handler]
async fn download_resource(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path(internal_filename): Path<String>,
) -> Result<Response> {
    let (resource, data) = state
        .memos
        .open_resource(user.user_id, &internal_filename)
        .await?;

    let response = Response::builder()
        .header(header::CONTENT_TYPE, &resource.mime_type)
        .header(header::CONTENT_DISPOSITION, content_disposition(&resource))
        .header(header::X_CONTENT_TYPE_OPTIONS, "nosniff")
        .header(header::CONTENT_LENGTH, data.len())
        .body(Body::from(data))
        .map_err(|e| Error::Internal(format!("Failed to build response: {}", e)))?;

    Ok(response)
}

/// Delete an attachment.
///
/// DELETE /resources/:id
#[axum::debug_handler]
async fn delete_resource(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    let deleted = state.memos.delete_resource(user.user_id, id).await?;

    Ok(Json(serde_json::json!({
        "message": format!("File \"{}\" deleted.", deleted.filename),
        "id": deleted.id,
    })))
}

fn content_disposition(resource: &Resource) -> String {
    let disposition = if INLINE_MIME_TYPES.contains(&resource.mime_type.as_str()) {
        "inline"
    } else {
        "attachment"
    };
    format!("{}; filename=\"{}\"", disposition, resource.filename)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    fn resource(filename: &str, mime_type: &str) -> Resource {
        Resource {
            id: 1,
            creator_id: 1,
            memo_id: Some(1),
            filename: filename.to_string(),
            internal_filename: "0b3c5f2e-9d1a-4c55-8a0e-3f9e2a6d7c11.txt".to_string(),
            external_link: None,
            mime_type: mime_type.to_string(),
            size: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[rstest]
    #[case("photo.png", "image/png", "inline; filename=\"photo.png\"")]
    #[case("scan.pdf", "application/pdf", "inline; filename=\"scan.pdf\"")]
    #[case("page.txt", "text/html", "attachment; filename=\"page.txt\"")]
    #[case("logo.png", "image/svg+xml", "attachment; filename=\"logo.png\"")]
    #[case("notes.txt", "text/plain", "attachment; filename=\"notes.txt\"")]
    fn test_content_disposition(
        #[case] filename: &str,
        #[case] mime_type: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(content_disposition(&resource(filename, mime_type)), expected);
    }
}
