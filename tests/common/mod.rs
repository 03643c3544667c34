//! Common test utilities and helpers.

#![allow(dead_code)]

use std::time::Duration;

use axum::http::{header, HeaderValue};
use axum_test::multipart::{MultipartForm, Part};
use axum_test::{TestRequest, TestServer};
use memos::api;
use memos::config::{Config, DatabaseConfig, MemoConfig, ServerConfig, SessionConfig, StorageConfig};
use memos::AppState;
use serde_json::{json, Value};
use tempfile::TempDir;

/// Per-file upload limit used by test apps.
pub const TEST_MAX_UPLOAD: usize = 1024;

/// Everything a test needs; the temp dir must outlive the server.
pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub config: Config,
    pub dir: TempDir,
}

impl TestApp {
    /// Number of files currently in the upload directory.
    pub fn stored_files(&self) -> usize {
        std::fs::read_dir(self.upload_dir()).map(|d| d.count()).unwrap_or(0)
    }

    pub fn upload_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("uploads")
    }
}

/// Configuration pointing at a temp directory.
///
/// `database_url` of `None` selects an in-memory database.
pub fn test_config(dir: &TempDir, database_url: Option<String>) -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            public_url: "http://localhost".to_string(),
            max_request_size: 8 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
        },
        database: DatabaseConfig {
            url: database_url.unwrap_or_else(|| ":memory:".to_string()),
        },
        session: SessionConfig {
            secret: "integration-test-secret".to_string(),
            max_age_seconds: 3600,
            remember_max_age_seconds: 7200,
            secure_cookies: false,
        },
        storage: StorageConfig {
            upload_folder: dir.path().join("uploads").to_string_lossy().into_owned(),
            max_upload_size: TEST_MAX_UPLOAD,
        },
        memo: MemoConfig {
            max_content_length: 1000,
        },
    }
}

/// Build application state on a fresh in-memory database.
pub async fn build_test_state() -> (AppState, Config, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let config = test_config(&dir, None);
    let state = AppState::new(&config)
        .await
        .expect("Failed to build app state");
    (state, config, dir)
}

/// Build a test server around the full application.
pub async fn build_test_app() -> TestApp {
    let (state, config, dir) = build_test_state().await;
    let app = api::app(state.clone(), &config.server);
    let server = TestServer::new(app).expect("Failed to create test server");

    TestApp {
        server,
        state,
        config,
        dir,
    }
}

/// Register an account over HTTP.
pub async fn signup(server: &TestServer, username: &str, password: &str) -> Value {
    let response = server
        .post("/auth/signup")
        .json(&json!({
            "username": username,
            "email": format!("{}@example.com", username),
            "password": password,
            "confirm_password": password,
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    response.json()
}

/// Register and log in, returning the session cookie value to replay.
pub async fn signup_and_login(server: &TestServer, username: &str) -> String {
    signup(server, username, "password123").await;

    let response = server
        .post("/auth/login")
        .json(&json!({ "username": username, "password": "password123" }))
        .await;
    response.assert_status_ok();

    response.cookie(memos::middleware::SESSION_COOKIE_NAME).value().to_string()
}

/// Cookie header value for a session cookie value.
pub fn session_header(cookie_value: &str) -> String {
    format!("{}={}", memos::middleware::SESSION_COOKIE_NAME, cookie_value)
}

/// Attach a session cookie to a request.
pub trait WithSession {
    fn session(self, cookie_value: &str) -> Self;
}

impl WithSession for TestRequest {
    fn session(self, cookie_value: &str) -> Self {
        let value = HeaderValue::from_str(&session_header(cookie_value))
            .expect("cookie value is a valid header");
        self.add_header(header::COOKIE, value)
    }
}

/// A file part for the memo create form.
pub fn file_part(name: &str, mime: &str, data: &[u8]) -> Part {
    Part::bytes(data.to_vec()).file_name(name).mime_type(mime)
}

/// Memo create form with the given content and files.
pub fn memo_form(content: &str, files: Vec<(&str, &str, &[u8])>) -> MultipartForm {
    files
        .into_iter()
        .fold(MultipartForm::new().add_text("content", content), |form, (name, mime, data)| {
            form.add_part("resource_files", file_part(name, mime, data))
        })
}
