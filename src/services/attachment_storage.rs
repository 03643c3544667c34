//! Attachment storage service.
//!
//! Uploaded bytes are written to a single flat directory under a generated
//! internal filename: a random UUID plus the (lower-cased) extension of the
//! sanitized original name. The original filename is kept for display only
//! and never reaches the filesystem path.
//!
//! Writes happen before any database work, so every stored file must be
//! removable by its internal filename alone.
//!
//! Deletes that run alongside a database transaction are two-phase: the file
//! is first renamed to `<internal>.deleting`, then either unlinked once the
//! transaction commits or renamed back if it does not.

use std::fmt;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::CreateResource;
use crate::{Error, Result};

/// File extensions accepted for upload (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "pdf", "txt", "md", "doc", "docx", "xls", "xlsx", "zip",
    "gitignore", "Dockerfile", "yml", "yaml", "csv", "gz",
];

const FALLBACK_FILENAME: &str = "unnamed";

/// Suffix of files set aside by `stage_delete`.
const STAGED_SUFFIX: &str = ".deleting";

static UNSAFE_FILENAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("valid filename regex"));

// ============================================================================
// Types
// ============================================================================

/// One file part of an upload request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-supplied filename, untrusted.
    pub filename: Option<String>,
    /// Client-supplied content type, untrusted.
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// A file whose bytes are on disk but whose row is not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResource {
    pub creator_id: i64,
    pub filename: String,
    pub internal_filename: String,
    pub mime_type: String,
    pub size: i64,
}

impl PendingResource {
    /// Row input linking this file to `memo_id`.
    pub fn to_create(&self, memo_id: Option<i64>) -> CreateResource {
        CreateResource {
            creator_id: self.creator_id,
            memo_id,
            filename: self.filename.clone(),
            internal_filename: self.internal_filename.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
        }
    }
}

/// Why a single upload was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingFilename,
    TooLarge { size: usize, max: usize },
    DisallowedType { extension: String },
    Storage(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFilename => write!(f, "no filename was provided"),
            Self::TooLarge { max, .. } => {
                write!(f, "exceeds size limit ({}MB)", max / (1024 * 1024))
            }
            Self::DisallowedType { extension } => {
                write!(f, "file type '{}' is not allowed", extension)
            }
            Self::Storage(_) => write!(f, "could not be saved"),
        }
    }
}

/// A skipped upload, reported back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSkip {
    pub filename: String,
    pub reason: SkipReason,
}

impl UploadSkip {
    /// User-facing warning text.
    pub fn message(&self) -> String {
        format!("File \"{}\" {}.", self.filename, self.reason)
    }
}

/// Stored bytes moved aside while the owning rows are being deleted.
#[derive(Debug)]
pub struct StagedDelete {
    internal_filename: String,
    original: PathBuf,
    staged: PathBuf,
}

impl StagedDelete {
    pub fn internal_filename(&self) -> &str {
        &self.internal_filename
    }
}

// ============================================================================
// Service
// ============================================================================

/// Stores, retrieves and deletes attachment bytes.
#[derive(Debug, Clone)]
pub struct AttachmentStorageService {
    root: PathBuf,
    max_upload_size: usize,
}

impl AttachmentStorageService {
    /// Create a new attachment storage service.
    pub fn new(root: impl Into<PathBuf>, max_upload_size: usize) -> Self {
        Self {
            root: root.into(),
            max_upload_size,
        }
    }

    /// Create the storage directory if it does not exist yet.
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        info!("Attachment storage ready at {}", self.root.display());
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size
    }

    /// Validate and write one uploaded file.
    ///
    /// Never fails the batch: every problem is returned as an `UploadSkip`
    /// and leaves nothing on disk.
    pub async fn store(
        &self,
        owner_id: i64,
        file: UploadedFile,
    ) -> std::result::Result<PendingResource, UploadSkip> {
        let raw_name = file
            .filename
            .as_deref()
            .map(base_name)
            .unwrap_or_default()
            .to_string();

        if raw_name.is_empty() {
            return Err(UploadSkip {
                filename: String::new(),
                reason: SkipReason::MissingFilename,
            });
        }

        let filename = sanitize_filename(&raw_name);
        let skip = |reason| UploadSkip {
            filename: filename.clone(),
            reason,
        };

        let size = file.data.len();
        if size > self.max_upload_size {
            return Err(skip(SkipReason::TooLarge {
                size,
                max: self.max_upload_size,
            }));
        }

        let type_extension = upload_type_extension(&raw_name);
        if !is_allowed_extension(type_extension) {
            return Err(skip(SkipReason::DisallowedType {
                extension: type_extension.to_string(),
            }));
        }

        let internal_filename = generate_internal_filename(&filename);
        let mime_type = resolve_mime_type(file.content_type.as_deref(), &filename);

        if let Err(e) = self.write_new(&internal_filename, &file.data).await {
            error!("Error uploading file {}: {}", filename, e);
            return Err(skip(SkipReason::Storage(e.to_string())));
        }

        debug!(
            internal_filename = %internal_filename,
            size,
            "Stored upload {}",
            filename
        );

        Ok(PendingResource {
            creator_id: owner_id,
            filename,
            internal_filename,
            mime_type,
            size: size as i64,
        })
    }

    /// Remove stored bytes. A file that is already gone is only a warning.
    pub async fn delete(&self, internal_filename: &str) -> Result<()> {
        let path = self
            .path_for(internal_filename)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid file id: {}", internal_filename)))?;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted stored file {}", internal_filename);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Physical file not found for {} at {}, nothing to delete",
                    internal_filename,
                    path.display()
                );
                Ok(())
            }
            Err(e) => Err(Error::Storage(format!(
                "Failed to delete {}: {}",
                internal_filename, e
            ))),
        }
    }

    /// Set a stored file aside so it can be restored or discarded later.
    ///
    /// Returns `None` when there is nothing on disk to delete. Anything other
    /// than a regular file in place of the bytes is a `Storage` error.
    pub async fn stage_delete(&self, internal_filename: &str) -> Result<Option<StagedDelete>> {
        let original = self
            .path_for(internal_filename)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid file id: {}", internal_filename)))?;

        match tokio::fs::symlink_metadata(&original).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(Error::Storage(format!(
                    "Stored entry for {} is not a regular file",
                    internal_filename
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Physical file not found for {} at {}, nothing to delete",
                    internal_filename,
                    original.display()
                );
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to inspect {}: {}",
                    internal_filename, e
                )))
            }
        }

        let staged = self
            .root
            .join(format!("{}{}", internal_filename, STAGED_SUFFIX));
        tokio::fs::rename(&original, &staged).await.map_err(|e| {
            Error::Storage(format!("Failed to stage {} for deletion: {}", internal_filename, e))
        })?;

        Ok(Some(StagedDelete {
            internal_filename: internal_filename.to_string(),
            original,
            staged,
        }))
    }

    /// Put staged files back under their internal filenames.
    pub async fn restore_staged(&self, staged: &[StagedDelete]) {
        for entry in staged {
            match tokio::fs::rename(&entry.staged, &entry.original).await {
                Ok(()) => debug!("Restored staged file {}", entry.internal_filename),
                Err(e) => error!(
                    "Failed to restore staged file {}: {}",
                    entry.internal_filename, e
                ),
            }
        }
    }

    /// Unlink staged files once their rows are gone for good.
    pub async fn finish_staged(&self, staged: Vec<StagedDelete>) {
        for entry in staged {
            match tokio::fs::remove_file(&entry.staged).await {
                Ok(()) => debug!("Deleted stored file {}", entry.internal_filename),
                Err(e) => warn!(
                    "Could not remove staged file {} at {}: {}",
                    entry.internal_filename,
                    entry.staged.display(),
                    e
                ),
            }
        }
    }

    /// Read stored bytes by internal filename.
    pub async fn retrieve(&self, internal_filename: &str) -> Result<Vec<u8>> {
        let not_found = || Error::NotFound(format!("File {}", internal_filename));
        let path = self.path_for(internal_filename).ok_or_else(not_found)?;

        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found()),
            Err(e) => Err(Error::Storage(format!(
                "Failed to read {}: {}",
                internal_filename, e
            ))),
        }
    }

    /// Whether bytes exist for an internal filename.
    pub async fn exists(&self, internal_filename: &str) -> bool {
        match self.path_for(internal_filename) {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        }
    }

    /// Resolve an internal filename inside the storage root.
    ///
    /// Only bare identifiers are accepted; anything that could name another
    /// directory yields `None`.
    fn path_for(&self, internal_filename: &str) -> Option<PathBuf> {
        if is_valid_internal_filename(internal_filename) {
            Some(self.root.join(internal_filename))
        } else {
            None
        }
    }

    async fn write_new(&self, internal_filename: &str, data: &[u8]) -> std::io::Result<()> {
        let path = self.root.join(internal_filename);

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;

        if result.is_err() {
            // Drop whatever was partially written
            let _ = tokio::fs::remove_file(&path).await;
        }

        result
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Last path component of a client-supplied name (handles both separators).
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name).trim()
}

/// Make a client-supplied filename safe for display and extension parsing.
///
/// Drops directory components and non-ASCII characters, turns whitespace
/// into underscores, removes everything outside `[A-Za-z0-9_.-]` and trims
/// leading/trailing dots and underscores.
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = base_name(name).chars().filter(char::is_ascii).collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// The part of a name checked against the allow-list: text after the last
/// dot, or the whole name when there is none (`Dockerfile`).
fn upload_type_extension(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn is_allowed_extension(extension: &str) -> bool {
    ALLOWED_EXTENSIONS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(extension))
}

/// Storage key for a new upload: `<uuid>` or `<uuid>.<ext>`.
pub fn generate_internal_filename(sanitized_filename: &str) -> String {
    let id = Uuid::new_v4();
    match Path::new(sanitized_filename)
        .extension()
        .and_then(|ext| ext.to_str())
    {
        Some(ext) if !ext.is_empty() => format!("{}.{}", id, ext.to_ascii_lowercase()),
        _ => id.to_string(),
    }
}

fn is_valid_internal_filename(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && !name.starts_with('.')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

fn resolve_mime_type(content_type: Option<&str>, filename: &str) -> String {
    match content_type.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .to_string(),
    }
}
