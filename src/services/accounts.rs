//! Account service: registration and credential checks.
//!
//! Passwords are hashed with Argon2id and a random salt; only the PHC
//! string is stored. The first account ever registered becomes `ADMIN`,
//! decided by an atomic flag insert in the same transaction as the user row.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use once_cell::sync::Lazy;
use tracing::{debug, info};

use crate::db::{self, CreateUser, DbPool, User, UserRole};
use crate::{Error, Result};

pub const USERNAME_MIN_LEN: usize = 4;
pub const USERNAME_MAX_LEN: usize = 80;
pub const EMAIL_MAX_LEN: usize = 120;
pub const PASSWORD_MIN_LEN: usize = 6;

/// Hash verified against when the username does not exist, so unknown users
/// cost the same as wrong passwords.
static DUMMY_HASH: Lazy<String> = Lazy::new(|| {
    hash_password("not-a-real-password").unwrap_or_default()
});

/// Input for registering an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: Option<String>,
    pub password: String,
    pub nickname: Option<String>,
}

/// Service for account creation and credential verification.
#[derive(Clone)]
pub struct AccountService {
    db: DbPool,
}

impl AccountService {
    /// Create a new account service.
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Register a new account.
    pub async fn create_account(&self, input: NewAccount) -> Result<User> {
        let username = input.username.trim().to_string();
        let email = input
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        let nickname = input
            .nickname
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        validate_username(&username)?;
        if let Some(email) = &email {
            validate_email(email)?;
        }
        validate_password(&input.password)?;

        if db::get_user_by_username(&self.db, &username).await?.is_some() {
            return Err(Error::Validation(
                "That username is already taken. Please choose a different one.".into(),
            ));
        }
        if let Some(email) = &email {
            if db::get_user_by_email(&self.db, email).await?.is_some() {
                return Err(Error::Validation(
                    "That email is already registered. Please use a different one or login."
                        .into(),
                ));
            }
        }

        let password = input.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| Error::Internal(format!("Password hashing task failed: {}", e)))??;

        let mut tx = self.db.begin().await?;

        let role = if db::claim_admin_bootstrap(&mut *tx).await? {
            UserRole::Admin
        } else {
            UserRole::User
        };

        let user = db::create_user(
            &mut *tx,
            CreateUser {
                username,
                email,
                password_hash,
                nickname,
                role,
            },
        )
        .await?;

        tx.commit().await?;

        info!(user_id = user.id, role = role.as_str(), "Registered user {}", user.username);

        Ok(user)
    }

    /// Check a username/password pair.
    ///
    /// Unknown usernames and wrong passwords both yield
    /// `Error::InvalidCredentials`.
    pub async fn verify_credential(&self, username: &str, password: &str) -> Result<User> {
        let user = db::get_user_by_username(&self.db, username).await?;

        let stored_hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| DUMMY_HASH.clone());
        let password = password.to_string();

        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored_hash))
            .await
            .map_err(|e| Error::Internal(format!("Password check task failed: {}", e)))??;

        match user {
            Some(user) if matches => Ok(user),
            _ => {
                debug!("Rejected login attempt");
                Err(Error::InvalidCredentials)
            }
        }
    }
}

// ============================================================================
// Password hashing
// ============================================================================

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored PHC hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        // An unparseable stored hash can never match
        Err(_) => return Ok(false),
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(Error::Internal(format!("Failed to verify password: {}", e))),
    }
}

// ============================================================================
// Validation
// ============================================================================

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(Error::Validation(format!(
            "Username must be between {} and {} characters long.",
            USERNAME_MIN_LEN, USERNAME_MAX_LEN
        )));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    if email.chars().count() > EMAIL_MAX_LEN {
        return Err(Error::Validation(format!(
            "Email must be at most {} characters long.",
            EMAIL_MAX_LEN
        )));
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(Error::Validation("Invalid email address.".into()))
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters long.",
            PASSWORD_MIN_LEN
        )));
    }
    Ok(())
}
