//! User database queries.
//!
//! Users own memos and resources. Lookups for the uniqueness checks live
//! here; password hashing is done by the accounts service before a
//! `CreateUser` ever reaches the database.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Sqlite};

use super::DbPool;

/// Name of the flag row that records the first-account admin grant.
pub const ADMIN_BOOTSTRAP_FLAG: &str = "admin_bootstrapped";

// ============================================================================
// Types
// ============================================================================

/// User role enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserRole {
    Admin,
    #[default]
    User,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::User => "USER",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ADMIN" => Self::Admin,
            _ => Self::User,
        }
    }
}

/// User record from the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub nickname: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn role_enum(&self) -> UserRole {
        UserRole::from_str(&self.role)
    }

    pub fn is_admin(&self) -> bool {
        self.role_enum() == UserRole::Admin
    }
}

/// Input for creating a new user.
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub nickname: Option<String>,
    pub role: UserRole,
}

// ============================================================================
// Queries
// ============================================================================

/// Create a new user.
///
/// Unique violations surface as `Error::Validation` so a lost race on the
/// username/email pre-check reads the same as the pre-check itself.
pub async fn create_user<'e, E>(executor: E, input: CreateUser) -> Result<User>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let now = Utc::now();

    sqlx::query_as::<_, User>(
        r#"
        INSERT INTO user (username, email, password_hash, nickname, role, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&input.username)
    .bind(&input.email)
    .bind(&input.password_hash)
    .bind(&input.nickname)
    .bind(input.role.as_str())
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            Error::Validation("That username or email is already registered.".to_string())
        }
        _ => Error::Database(e),
    })
}

/// Get a user by ID.
pub async fn get_user(pool: &DbPool, id: i64) -> Result<User> {
    sqlx::query_as::<_, User>("SELECT * FROM user WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("User {}", id)))
}

/// Get a user by exact username.
pub async fn get_user_by_username(pool: &DbPool, username: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM user WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
}

/// Get a user by email.
pub async fn get_user_by_email(pool: &DbPool, email: &str) -> Result<Option<User>> {
    sqlx::query_as::<_, User>("SELECT * FROM user WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await
        .map_err(Error::Database)
}

/// Count all users.
pub async fn count_users(pool: &DbPool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Atomically claim the first-account admin grant.
///
/// Returns `true` for exactly one caller over the lifetime of the database.
/// Run it in the same transaction as the user insert so a failed insert
/// releases the claim.
pub async fn claim_admin_bootstrap<'e, E>(executor: E) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO system_setting (name, value, created_at)
        VALUES (?, 'true', ?)
        ON CONFLICT(name) DO NOTHING
        "#,
    )
    .bind(ADMIN_BOOTSTRAP_FLAG)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, initialize_schema};

    async fn setup_test_db() -> DbPool {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();
        pool
    }

    fn new_user(username: &str, email: Option<&str>) -> CreateUser {
        CreateUser {
            username: username.to_string(),
            email: email.map(str::to_string),
            password_hash: "$argon2id$fake".to_string(),
            nickname: None,
            role: UserRole::User,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_user() {
        let pool = setup_test_db().await;

        let user = create_user(&pool, new_user("alice", Some("alice@example.com")))
            .await
            .unwrap();
        assert!(user.id > 0);
        assert_eq!(user.role_enum(), UserRole::User);

        let fetched = get_user(&pool, user.id).await.unwrap();
        assert_eq!(fetched.username, "alice");

        let by_name = get_user_by_username(&pool, "alice").await.unwrap();
        assert_eq!(by_name.map(|u| u.id), Some(user.id));

        let by_email = get_user_by_email(&pool, "alice@example.com").await.unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn test_username_lookup_is_exact() {
        let pool = setup_test_db().await;
        create_user(&pool, new_user("alice", None)).await.unwrap();

        assert!(get_user_by_username(&pool, "Alice").await.unwrap().is_none());
        assert!(get_user_by_username(&pool, "alic").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_is_validation_error() {
        let pool = setup_test_db().await;
        create_user(&pool, new_user("alice", None)).await.unwrap();

        let err = create_user(&pool, new_user("alice", None)).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(count_users(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_user_is_not_found() {
        let pool = setup_test_db().await;
        assert!(matches!(get_user(&pool, 42).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_admin_bootstrap_claimed_once() {
        let pool = setup_test_db().await;

        assert!(claim_admin_bootstrap(&pool).await.unwrap());
        assert!(!claim_admin_bootstrap(&pool).await.unwrap());
        assert!(!claim_admin_bootstrap(&pool).await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_bootstrap_released_on_rollback() {
        let pool = setup_test_db().await;

        let mut tx = pool.begin().await.unwrap();
        assert!(claim_admin_bootstrap(&mut *tx).await.unwrap());
        tx.rollback().await.unwrap();

        assert!(claim_admin_bootstrap(&pool).await.unwrap());
    }
}
