//! Memo database queries.
//!
//! Every listing is scoped to a creator. Single-row lookups are by id only;
//! ownership is checked by the memo service after the row is found.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite};

use super::DbPool;

// ============================================================================
// Types
// ============================================================================

/// Memo visibility. Stored only; every read is still owner-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    #[default]
    Private,
    Protected,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "PRIVATE",
            Self::Protected => "PROTECTED",
            Self::Public => "PUBLIC",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PRIVATE" => Some(Self::Private),
            "PROTECTED" => Some(Self::Protected),
            "PUBLIC" => Some(Self::Public),
            _ => None,
        }
    }
}

/// Memo record from the database.
#[derive(Debug, Clone, FromRow)]
pub struct Memo {
    pub id: i64,
    pub content: String,
    pub visibility: String,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memo {
    pub fn visibility_enum(&self) -> Visibility {
        Visibility::from_str(&self.visibility).unwrap_or_default()
    }
}

/// Input for creating a memo.
#[derive(Debug, Clone)]
pub struct CreateMemo {
    pub creator_id: i64,
    pub content: String,
    pub visibility: Visibility,
}

/// Input for updating a memo. The creator never changes.
#[derive(Debug, Clone)]
pub struct UpdateMemo {
    pub content: String,
    pub visibility: Option<Visibility>,
}

// ============================================================================
// Queries
// ============================================================================

/// Insert a memo and return it with its assigned id.
pub async fn create_memo<'e, E>(executor: E, input: CreateMemo) -> Result<Memo>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();

    sqlx::query_as::<_, Memo>(
        r#"
        INSERT INTO memo (content, visibility, creator_id, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&input.content)
    .bind(input.visibility.as_str())
    .bind(input.creator_id)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
    .map_err(Error::Database)
}

/// Get a memo by ID.
pub async fn get_memo(pool: &DbPool, id: i64) -> Result<Memo> {
    sqlx::query_as::<_, Memo>("SELECT * FROM memo WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Memo {}", id)))
}

/// List a user's memos, newest first.
pub async fn list_user_memos(pool: &DbPool, creator_id: i64) -> Result<Vec<Memo>> {
    sqlx::query_as::<_, Memo>(
        r#"
        SELECT * FROM memo
        WHERE creator_id = ?
        ORDER BY created_at DESC, id DESC
        "#,
    )
    .bind(creator_id)
    .fetch_all(pool)
    .await
    .map_err(Error::Database)
}

/// Update a memo's content (and optionally visibility), refreshing `updated_at`.
pub async fn update_memo(pool: &DbPool, id: i64, input: UpdateMemo) -> Result<Memo> {
    sqlx::query_as::<_, Memo>(
        r#"
        UPDATE memo
        SET content = ?, visibility = COALESCE(?, visibility), updated_at = ?
        WHERE id = ?
        RETURNING *
        "#,
    )
    .bind(&input.content)
    .bind(input.visibility.map(|v| v.as_str()))
    .bind(Utc::now())
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("Memo {}", id)))
}

/// Delete a memo row.
///
/// The schema cascades to resource rows, but not to stored bytes; callers
/// go through `MemoService::delete_memo` so the files are removed too.
pub async fn delete_memo<'e, E>(executor: E, id: i64) -> Result<Memo>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, Memo>("DELETE FROM memo WHERE id = ? RETURNING *")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Memo {}", id)))
}

/// Count a user's memos.
pub async fn count_user_memos(pool: &DbPool, creator_id: i64) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM memo WHERE creator_id = ?")
        .bind(creator_id)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_user, init_pool, initialize_schema, CreateUser, UserRole};

    async fn setup_test_db() -> (DbPool, i64, i64) {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let mut ids = Vec::new();
        for name in ["alice", "bob"] {
            let user = create_user(
                &pool,
                CreateUser {
                    username: name.to_string(),
                    email: None,
                    password_hash: "$argon2id$fake".to_string(),
                    nickname: None,
                    role: UserRole::User,
                },
            )
            .await
            .unwrap();
            ids.push(user.id);
        }

        (pool, ids[0], ids[1])
    }

    fn memo(creator_id: i64, content: &str) -> CreateMemo {
        CreateMemo {
            creator_id,
            content: content.to_string(),
            visibility: Visibility::default(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_memo() {
        let (pool, alice, _) = setup_test_db().await;

        let created = create_memo(&pool, memo(alice, "# hello")).await.unwrap();
        assert!(created.id > 0);
        assert_eq!(created.visibility_enum(), Visibility::Private);
        assert_eq!(created.created_at, created.updated_at);

        let fetched = get_memo(&pool, created.id).await.unwrap();
        assert_eq!(fetched.content, "# hello");
        assert_eq!(fetched.creator_id, alice);
    }

    #[tokio::test]
    async fn test_list_is_owner_scoped_and_newest_first() {
        let (pool, alice, bob) = setup_test_db().await;

        let first = create_memo(&pool, memo(alice, "first")).await.unwrap();
        let second = create_memo(&pool, memo(alice, "second")).await.unwrap();
        create_memo(&pool, memo(bob, "bob's")).await.unwrap();

        let memos = list_user_memos(&pool, alice).await.unwrap();
        let ids: Vec<i64> = memos.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);

        assert_eq!(count_user_memos(&pool, bob).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_update_memo_refreshes_timestamp() {
        let (pool, alice, _) = setup_test_db().await;
        let created = create_memo(&pool, memo(alice, "draft")).await.unwrap();

        let updated = update_memo(
            &pool,
            created.id,
            UpdateMemo {
                content: "final".to_string(),
                visibility: Some(Visibility::Public),
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.content, "final");
        assert_eq!(updated.visibility_enum(), Visibility::Public);
        assert_eq!(updated.creator_id, alice);
        assert!(updated.updated_at >= created.updated_at);

        // Visibility is kept when not supplied
        let again = update_memo(
            &pool,
            created.id,
            UpdateMemo {
                content: "final v2".to_string(),
                visibility: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(again.visibility_enum(), Visibility::Public);
    }

    #[tokio::test]
    async fn test_missing_memo_is_not_found() {
        let (pool, _, _) = setup_test_db().await;

        assert!(matches!(get_memo(&pool, 99).await, Err(Error::NotFound(_))));
        assert!(matches!(delete_memo(&pool, 99).await, Err(Error::NotFound(_))));
        let update = update_memo(
            &pool,
            99,
            UpdateMemo {
                content: "x".to_string(),
                visibility: None,
            },
        )
        .await;
        assert!(matches!(update, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_memo_requires_existing_creator() {
        let (pool, _, _) = setup_test_db().await;

        let err = create_memo(&pool, memo(999, "orphan")).await.unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }
}
