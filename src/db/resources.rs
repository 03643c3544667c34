//! Resource (attachment) database queries.
//!
//! A resource row describes one stored file. The row only carries the
//! internal filename; the bytes live in the attachment store and must be
//! removed alongside the row.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use super::DbPool;

// ============================================================================
// Types
// ============================================================================

/// Resource record from the database.
#[derive(Debug, Clone, FromRow)]
pub struct Resource {
    pub id: i64,
    pub creator_id: i64,
    pub memo_id: Option<i64>,
    pub filename: String,
    pub internal_filename: String,
    pub external_link: Option<String>,
    pub mime_type: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Check if resource is an image.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Get human-readable file size.
    pub fn human_size(&self) -> String {
        const KB: i64 = 1024;
        const MB: i64 = KB * 1024;
        const GB: i64 = MB * 1024;

        if self.size >= GB {
            format!("{:.2} GB", self.size as f64 / GB as f64)
        } else if self.size >= MB {
            format!("{:.2} MB", self.size as f64 / MB as f64)
        } else if self.size >= KB {
            format!("{:.2} KB", self.size as f64 / KB as f64)
        } else {
            format!("{} bytes", self.size)
        }
    }
}

/// Input for creating a resource row.
#[derive(Debug, Clone)]
pub struct CreateResource {
    pub creator_id: i64,
    pub memo_id: Option<i64>,
    pub filename: String,
    pub internal_filename: String,
    pub mime_type: String,
    pub size: i64,
}

// ============================================================================
// Queries
// ============================================================================

/// Create a resource row.
pub async fn create_resource<'e, E>(executor: E, input: CreateResource) -> Result<Resource>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();

    sqlx::query_as::<_, Resource>(
        r#"
        INSERT INTO resource (creator_id, memo_id, filename, internal_filename, mime_type, size, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(input.creator_id)
    .bind(input.memo_id)
    .bind(&input.filename)
    .bind(&input.internal_filename)
    .bind(&input.mime_type)
    .bind(input.size)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
    .map_err(Error::Database)
}

/// Get a resource by ID.
pub async fn get_resource(pool: &DbPool, id: i64) -> Result<Resource> {
    sqlx::query_as::<_, Resource>("SELECT * FROM resource WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Resource {}", id)))
}

/// Get a resource by its internal (storage) filename.
pub async fn get_resource_by_internal_filename(
    pool: &DbPool,
    internal_filename: &str,
) -> Result<Resource> {
    sqlx::query_as::<_, Resource>("SELECT * FROM resource WHERE internal_filename = ?")
        .bind(internal_filename)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("File {}", internal_filename)))
}

/// List resources attached to a memo, oldest first (upload order).
pub async fn list_memo_resources(pool: &DbPool, memo_id: i64) -> Result<Vec<Resource>> {
    sqlx::query_as::<_, Resource>(
        r#"
        SELECT * FROM resource
        WHERE memo_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(memo_id)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)
}

/// Batch list resources for several memos.
pub async fn list_resources_for_memos(pool: &DbPool, memo_ids: &[i64]) -> Result<Vec<Resource>> {
    if memo_ids.is_empty() {
        return Ok(vec![]);
    }

    let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM resource WHERE memo_id IN (");
    let mut separated = query.separated(", ");
    for id in memo_ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(") ORDER BY id ASC");

    query
        .build_query_as::<Resource>()
        .fetch_all(pool)
        .await
        .map_err(Error::Database)
}

/// Delete a resource row.
/// Note: This only deletes the database record, not the file.
pub async fn delete_resource<'e, E>(executor: E, id: i64) -> Result<Resource>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Resource>("DELETE FROM resource WHERE id = ? RETURNING *")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Resource {}", id)))
}

/// Delete all resource rows of a memo.
/// Returns the deleted rows so the caller can remove their files.
pub async fn delete_memo_resources<'e, E>(executor: E, memo_id: i64) -> Result<Vec<Resource>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Resource>("DELETE FROM resource WHERE memo_id = ? RETURNING *")
        .bind(memo_id)
        .fetch_all(executor)
        .await
        .map_err(Error::Database)
}

/// Count resources attached to a memo.
#[cfg(test)]
pub async fn count_memo_resources(pool: &DbPool, memo_id: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM resource WHERE memo_id = ?")
        .bind(memo_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Count every resource row.
pub async fn count_resources(pool: &DbPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM resource")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
