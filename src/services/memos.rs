//! Memo service.
//!
//! Orchestrates memo persistence together with attachment bytes:
//! - Create: files are stored first (best-effort, per file), then the memo
//!   row and every resource row are inserted in one transaction. If that
//!   transaction fails, the stored bytes are deleted again.
//! - Delete: rows are removed inside a transaction while their files are
//!   staged aside. Staged files are unlinked only after the commit and put
//!   back if anything fails, so a row never outlives its bytes.
//! - Reads are owner-scoped and return rendered HTML alongside the source.

use std::collections::HashMap;

use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::{debug, error, info, warn};

use crate::db::{self, CreateMemo, DbPool, Memo, Resource, UpdateMemo, Visibility};
use crate::{Error, Result};

use super::attachment_storage::{
    AttachmentStorageService, PendingResource, StagedDelete, UploadSkip, UploadedFile,
};
use super::markdown;
use super::permissions::ensure_access;

/// Input for creating a memo.
#[derive(Debug, Clone, Default)]
pub struct NewMemo {
    pub content: String,
    pub visibility: Option<Visibility>,
}

/// Outcome of a memo create.
#[derive(Debug, Clone)]
pub struct CreatedMemo {
    pub memo: Memo,
    /// Attachments persisted with the memo, in upload order.
    pub resources: Vec<Resource>,
    /// Files that were not stored, with the reason.
    pub skipped: Vec<UploadSkip>,
}

/// A memo as shown to its owner.
#[derive(Debug, Clone)]
pub struct MemoView {
    pub memo: Memo,
    pub html: String,
    pub resources: Vec<Resource>,
}

impl MemoView {
    /// Render `memo` for display alongside its attachments.
    pub fn new(memo: Memo, resources: Vec<Resource>) -> Self {
        let html = markdown::render(&memo.content);
        Self {
            memo,
            html,
            resources,
        }
    }
}

/// Service for memo and attachment operations.
#[derive(Clone)]
pub struct MemoService {
    db: DbPool,
    attachments: AttachmentStorageService,
    max_content_length: usize,
}

impl MemoService {
    /// Create a new memo service.
    pub fn new(db: DbPool, attachments: AttachmentStorageService, max_content_length: usize) -> Self {
        Self {
            db,
            attachments,
            max_content_length,
        }
    }

    pub fn attachments(&self) -> &AttachmentStorageService {
        &self.attachments
    }

    /// Create a memo with any number of attached files.
    ///
    /// Individual files may be skipped; the memo is still created. Either
    /// the memo and all stored files are persisted, or none of them are.
    pub async fn create_memo(
        &self,
        actor: i64,
        input: NewMemo,
        files: Vec<UploadedFile>,
    ) -> Result<CreatedMemo> {
        self.validate_content(&input.content)?;

        let mut pending = Vec::new();
        let mut skipped = Vec::new();
        for file in files {
            match self.attachments.store(actor, file).await {
                Ok(stored) => pending.push(stored),
                Err(skip) => {
                    warn!(user_id = actor, "{}", skip.message());
                    skipped.push(skip);
                }
            }
        }

        let create = CreateMemo {
            creator_id: actor,
            content: input.content,
            visibility: input.visibility.unwrap_or_default(),
        };

        match self.persist_memo(create, &pending).await {
            Ok((memo, resources)) => {
                info!(
                    memo_id = memo.id,
                    user_id = actor,
                    attachments = resources.len(),
                    skipped = skipped.len(),
                    "Created memo"
                );
                Ok(CreatedMemo {
                    memo,
                    resources,
                    skipped,
                })
            }
            Err(e) => {
                error!(user_id = actor, "Error creating memo: {}", e);
                self.discard_stored(&pending).await;
                Err(e)
            }
        }
    }

    /// Insert the memo and its resource rows in one transaction.
    async fn persist_memo(
        &self,
        create: CreateMemo,
        pending: &[PendingResource],
    ) -> Result<(Memo, Vec<Resource>)> {
        let mut tx = self.db.begin().await?;

        match insert_memo_rows(&mut tx, create, pending).await {
            Ok(rows) => {
                tx.commit().await?;
                Ok(rows)
            }
            Err(e) => {
                rollback(tx).await;
                Err(e)
            }
        }
    }

    /// Compensate for a failed create by removing bytes written for it.
    async fn discard_stored(&self, pending: &[PendingResource]) {
        for stored in pending {
            match self.attachments.delete(&stored.internal_filename).await {
                Ok(()) => debug!(
                    "Cleaned up file {} after failed memo creation",
                    stored.internal_filename
                ),
                Err(e) => error!(
                    "Failed to clean up file {}: {}",
                    stored.internal_filename, e
                ),
            }
        }
    }

    /// Get one memo of the actor.
    pub async fn get_memo(&self, actor: i64, id: i64) -> Result<MemoView> {
        let memo = db::get_memo(&self.db, id).await?;
        ensure_access(actor, memo.creator_id, None)?;

        let resources = db::list_memo_resources(&self.db, memo.id).await?;
        Ok(MemoView::new(memo, resources))
    }

    /// List the actor's memos, newest first.
    pub async fn list_memos(&self, actor: i64) -> Result<Vec<MemoView>> {
        let memos = db::list_user_memos(&self.db, actor).await?;
        let ids: Vec<i64> = memos.iter().map(|m| m.id).collect();

        let mut by_memo: HashMap<i64, Vec<Resource>> = HashMap::new();
        for resource in db::list_resources_for_memos(&self.db, &ids).await? {
            if let Some(memo_id) = resource.memo_id {
                by_memo.entry(memo_id).or_default().push(resource);
            }
        }

        Ok(memos
            .into_iter()
            .map(|memo| {
                let resources = by_memo.remove(&memo.id).unwrap_or_default();
                MemoView::new(memo, resources)
            })
            .collect())
    }

    /// Edit a memo's content and visibility. Attachments are left alone.
    pub async fn update_memo(&self, actor: i64, id: i64, input: UpdateMemo) -> Result<Memo> {
        let existing = db::get_memo(&self.db, id).await?;
        ensure_access(actor, existing.creator_id, None)?;
        self.validate_content(&input.content)?;

        let memo = db::update_memo(&self.db, id, input).await?;
        info!(memo_id = memo.id, user_id = actor, "Updated memo");
        Ok(memo)
    }

    /// Delete a memo with all of its attachments, rows and bytes.
    pub async fn delete_memo(&self, actor: i64, id: i64) -> Result<()> {
        let memo = db::get_memo(&self.db, id).await?;
        ensure_access(actor, memo.creator_id, None)?;

        let mut tx = self.db.begin().await?;
        let mut staged = Vec::new();

        let removed = async {
            let resources = db::delete_memo_resources(&mut *tx, id).await?;
            db::delete_memo(&mut *tx, id).await?;

            for resource in &resources {
                if let Some(entry) = self.attachments.stage_delete(&resource.internal_filename).await? {
                    staged.push(entry);
                }
            }
            Ok::<_, Error>(resources)
        }
        .await;

        let resources = self
            .settle_delete(tx, removed, staged)
            .await
            .map_err(|e| {
                error!(memo_id = id, "Error deleting memo: {}", e);
                e
            })?;

        info!(
            memo_id = id,
            user_id = actor,
            attachments = resources.len(),
            "Deleted memo"
        );
        Ok(())
    }

    /// Delete a single attachment, row and bytes.
    pub async fn delete_resource(&self, actor: i64, id: i64) -> Result<Resource> {
        let resource = db::get_resource(&self.db, id).await?;
        let memo_owner = self.memo_owner(&resource).await?;
        ensure_access(actor, resource.creator_id, memo_owner)?;

        let mut tx = self.db.begin().await?;
        let mut staged = Vec::new();

        let removed = async {
            let deleted = db::delete_resource(&mut *tx, id).await?;
            if let Some(entry) = self.attachments.stage_delete(&deleted.internal_filename).await? {
                staged.push(entry);
            }
            Ok::<_, Error>(deleted)
        }
        .await;

        let deleted = self
            .settle_delete(tx, removed, staged)
            .await
            .map_err(|e| {
                error!(resource_id = id, "Error deleting resource: {}", e);
                e
            })?;

        info!(resource_id = id, user_id = actor, "Deleted resource {}", deleted.filename);
        Ok(deleted)
    }

    /// Finish a delete transaction whose files were staged.
    ///
    /// On success the staged files are unlinked after the commit. On any
    /// failure, including the commit itself, the rows are rolled back and
    /// the staged files restored.
    async fn settle_delete<T>(
        &self,
        tx: Transaction<'_, Sqlite>,
        removed: Result<T>,
        staged: Vec<StagedDelete>,
    ) -> Result<T> {
        let value = match removed {
            Ok(value) => value,
            Err(e) => {
                rollback(tx).await;
                self.attachments.restore_staged(&staged).await;
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            self.attachments.restore_staged(&staged).await;
            return Err(e.into());
        }

        self.attachments.finish_staged(staged).await;
        Ok(value)
    }

    /// Look up an attachment by internal filename and read its bytes.
    pub async fn open_resource(
        &self,
        actor: i64,
        internal_filename: &str,
    ) -> Result<(Resource, Vec<u8>)> {
        let resource = db::get_resource_by_internal_filename(&self.db, internal_filename).await?;
        let memo_owner = self.memo_owner(&resource).await?;
        ensure_access(actor, resource.creator_id, memo_owner)?;

        let data = self.attachments.retrieve(&resource.internal_filename).await?;
        Ok((resource, data))
    }

    /// Creator of the memo a resource is attached to, if any.
    async fn memo_owner(&self, resource: &Resource) -> Result<Option<i64>> {
        match resource.memo_id {
            Some(memo_id) => match db::get_memo(&self.db, memo_id).await {
                Ok(memo) => Ok(Some(memo.creator_id)),
                Err(Error::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            },
            None => Ok(None),
        }
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(Error::Validation("Memo content cannot be empty.".into()));
        }
        if content.chars().count() > self.max_content_length {
            return Err(Error::Validation(format!(
                "Memo content must be at most {} characters long.",
                self.max_content_length
            )));
        }
        Ok(())
    }
}

async fn insert_memo_rows(
    conn: &mut SqliteConnection,
    create: CreateMemo,
    pending: &[PendingResource],
) -> Result<(Memo, Vec<Resource>)> {
    let memo = db::create_memo(&mut *conn, create).await?;

    let mut resources = Vec::with_capacity(pending.len());
    for stored in pending {
        let resource = db::create_resource(&mut *conn, stored.to_create(Some(memo.id))).await?;
        resources.push(resource);
    }

    Ok((memo, resources))
}

async fn rollback(tx: Transaction<'_, Sqlite>) {
    if let Err(e) = tx.rollback().await {
        error!("Failed to roll back transaction: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_resources, count_user_memos, init_pool, initialize_schema, CreateUser, UserRole};
    use crate::services::attachment_storage::SkipReason;
    use axum::body::Bytes;
    use tempfile::TempDir;

    const MAX_UPLOAD: usize = 1024;

    struct Harness {
        pool: DbPool,
        service: MemoService,
        dir: TempDir,
        alice: i64,
        bob: i64,
    }

    impl Harness {
        fn stored_files(&self) -> usize {
            std::fs::read_dir(self.dir.path()).unwrap().count()
        }
    }

    async fn setup() -> Harness {
        let pool = init_pool(":memory:").await.unwrap();
        initialize_schema(&pool).await.unwrap();

        let mut ids = Vec::new();
        for username in ["alice", "bobby"] {
            let user = db::create_user(
                &pool,
                CreateUser {
                    username: username.to_string(),
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

        let dir = TempDir::new().unwrap();
        let attachments = AttachmentStorageService::new(dir.path(), MAX_UPLOAD);
        let service = MemoService::new(pool.clone(), attachments, 100);

        Harness {
            pool,
            service,
            dir,
            alice: ids[0],
            bob: ids[1],
        }
    }

    fn upload(name: &str, data: &'static [u8]) -> UploadedFile {
        UploadedFile {
            filename: Some(name.to_string()),
            content_type: None,
            data: Bytes::from_static(data),
        }
    }

    fn memo(content: &str) -> NewMemo {
        NewMemo {
            content: content.to_string(),
            visibility: None,
        }
    }

    #[tokio::test]
    async fn test_create_memo_with_attachments() {
        let h = setup().await;

        let created = h
            .service
            .create_memo(
                h.alice,
                memo("groceries"),
                vec![upload("list.txt", b"milk"), upload("photo.png", b"\x89PNG")],
            )
            .await
            .unwrap();

        assert_eq!(created.memo.creator_id, h.alice);
        assert_eq!(created.memo.visibility_enum(), Visibility::Private);
        assert_eq!(created.resources.len(), 2);
        assert!(created.skipped.is_empty());
        for resource in &created.resources {
            assert_eq!(resource.memo_id, Some(created.memo.id));
            assert_eq!(resource.creator_id, h.alice);
            assert!(h.service.attachments().exists(&resource.internal_filename).await);
        }
        assert_eq!(created.resources[0].filename, "list.txt");
        assert_eq!(created.resources[1].mime_type, "image/png");
        assert_eq!(h.stored_files(), 2);
    }

    #[tokio::test]
    async fn test_create_memo_skips_bad_files_but_keeps_memo() {
        let h = setup().await;
        static BIG: [u8; MAX_UPLOAD + 1] = [0; MAX_UPLOAD + 1];

        let created = h
            .service
            .create_memo(
                h.alice,
                memo("mixed batch"),
                vec![
                    upload("ok.md", b"# ok"),
                    upload("huge.pdf", &BIG),
                    upload("run.exe", b"MZ"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(created.resources.len(), 1);
        assert_eq!(created.skipped.len(), 2);
        assert!(matches!(created.skipped[0].reason, SkipReason::TooLarge { .. }));
        assert!(matches!(created.skipped[1].reason, SkipReason::DisallowedType { .. }));
        assert_eq!(h.stored_files(), 1);
    }

    #[tokio::test]
    async fn test_invalid_content_stores_nothing() {
        let h = setup().await;

        let err = h
            .service
            .create_memo(h.alice, memo("   "), vec![upload("a.txt", b"a")])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let too_long = "x".repeat(101);
        let err = h
            .service
            .create_memo(h.alice, memo(&too_long), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(count_user_memos(&h.pool, h.alice).await.unwrap(), 0);
        assert_eq!(h.stored_files(), 0);
    }

    #[tokio::test]
    async fn test_failed_resource_insert_rolls_back_and_removes_files() {
        let h = setup().await;
        sqlx::query(
            "CREATE TRIGGER reject_resources BEFORE INSERT ON resource \
             BEGIN SELECT RAISE(ABORT, 'resource insert rejected'); END",
        )
        .execute(&h.pool)
        .await
        .unwrap();

        let err = h
            .service
            .create_memo(
                h.alice,
                memo("doomed"),
                vec![upload("a.txt", b"a"), upload("b.txt", b"b")],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Database(_)));
        assert_eq!(count_user_memos(&h.pool, h.alice).await.unwrap(), 0);
        assert_eq!(count_resources(&h.pool).await.unwrap(), 0);
        assert_eq!(h.stored_files(), 0);
    }

    #[tokio::test]
    async fn test_failed_memo_insert_removes_files() {
        let h = setup().await;

        let err = h
            .service
            .create_memo(9999, memo("no such user"), vec![upload("a.txt", b"a")])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Database(_)));
        assert_eq!(count_resources(&h.pool).await.unwrap(), 0);
        assert_eq!(h.stored_files(), 0);
    }

    #[tokio::test]
    async fn test_memo_access_is_owner_only() {
        let h = setup().await;
        let created = h
            .service
            .create_memo(h.alice, memo("mine"), vec![])
            .await
            .unwrap();
        let id = created.memo.id;

        assert!(matches!(h.service.get_memo(h.bob, id).await, Err(Error::Forbidden)));
        assert!(matches!(
            h.service
                .update_memo(
                    h.bob,
                    id,
                    UpdateMemo {
                        content: "hijacked".into(),
                        visibility: None
                    }
                )
                .await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(h.service.delete_memo(h.bob, id).await, Err(Error::Forbidden)));

        // Missing rows are reported before ownership
        assert!(matches!(h.service.get_memo(h.bob, id + 100).await, Err(Error::NotFound(_))));
        assert!(matches!(h.service.delete_memo(h.bob, id + 100).await, Err(Error::NotFound(_))));

        let view = h.service.get_memo(h.alice, id).await.unwrap();
        assert_eq!(view.memo.content, "mine");
        assert!(view.html.contains("mine"));
    }

    #[tokio::test]
    async fn test_list_memos_is_scoped_and_newest_first() {
        let h = setup().await;
        let first = h
            .service
            .create_memo(h.alice, memo("first"), vec![upload("a.txt", b"a")])
            .await
            .unwrap();
        let second = h
            .service
            .create_memo(h.alice, memo("**second**"), vec![])
            .await
            .unwrap();
        h.service
            .create_memo(h.bob, memo("bob's"), vec![])
            .await
            .unwrap();

        let listed = h.service.list_memos(h.alice).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].memo.id, second.memo.id);
        assert!(listed[0].html.contains("<strong>second</strong>"));
        assert!(listed[0].resources.is_empty());
        assert_eq!(listed[1].memo.id, first.memo.id);
        assert_eq!(listed[1].resources.len(), 1);
    }

    #[tokio::test]
    async fn test_update_memo_keeps_attachments() {
        let h = setup().await;
        let created = h
            .service
            .create_memo(h.alice, memo("draft"), vec![upload("a.txt", b"a")])
            .await
            .unwrap();

        let updated = h
            .service
            .update_memo(
                h.alice,
                created.memo.id,
                UpdateMemo {
                    content: "final".into(),
                    visibility: Some(Visibility::Public),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.content, "final");
        assert_eq!(updated.visibility_enum(), Visibility::Public);
        assert_eq!(updated.creator_id, h.alice);
        assert_eq!(count_resources(&h.pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_memo_removes_rows_and_bytes() {
        let h = setup().await;
        let created = h
            .service
            .create_memo(
                h.alice,
                memo("to delete"),
                vec![upload("a.txt", b"a"), upload("b.txt", b"b")],
            )
            .await
            .unwrap();

        h.service.delete_memo(h.alice, created.memo.id).await.unwrap();

        assert_eq!(count_user_memos(&h.pool, h.alice).await.unwrap(), 0);
        assert_eq!(count_resources(&h.pool).await.unwrap(), 0);
        assert_eq!(h.stored_files(), 0);
    }

    #[tokio::test]
    async fn test_delete_memo_tolerates_missing_bytes() {
        let h = setup().await;
        let created = h
            .service
            .create_memo(h.alice, memo("orphaned"), vec![upload("a.txt", b"a")])
            .await
            .unwrap();
        std::fs::remove_file(h.dir.path().join(&created.resources[0].internal_filename)).unwrap();

        h.service.delete_memo(h.alice, created.memo.id).await.unwrap();
        assert_eq!(count_resources(&h.pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_memo_storage_failure_keeps_rows_and_files() {
        let h = setup().await;
        let created = h
            .service
            .create_memo(
                h.alice,
                memo("stuck"),
                vec![upload("a.txt", b"a"), upload("b.txt", b"b")],
            )
            .await
            .unwrap();

        // A directory in place of the second file makes its removal fail
        // after the first file has already been set aside
        let second = h.dir.path().join(&created.resources[1].internal_filename);
        std::fs::remove_file(&second).unwrap();
        std::fs::create_dir(&second).unwrap();

        let err = h
            .service
            .delete_memo(h.alice, created.memo.id)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(count_user_memos(&h.pool, h.alice).await.unwrap(), 1);

        let rows = db::list_memo_resources(&h.pool, created.memo.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(
                h.dir.path().join(&row.internal_filename).exists(),
                "{} lost its bytes",
                row.filename
            );
        }
        let first = &created.resources[0].internal_filename;
        assert_eq!(h.service.attachments().retrieve(first).await.unwrap(), b"a");
        assert_eq!(h.stored_files(), 2);
    }

    #[tokio::test]
    async fn test_delete_resource_storage_failure_keeps_row() {
        let h = setup().await;
        let created = h
            .service
            .create_memo(h.alice, memo("stuck"), vec![upload("a.txt", b"a")])
            .await
            .unwrap();
        let resource = &created.resources[0];

        let path = h.dir.path().join(&resource.internal_filename);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        let err = h
            .service
            .delete_resource(h.alice, resource.id)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(count_resources(&h.pool).await.unwrap(), 1);
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn test_resource_access_via_memo_ownership() {
        let h = setup().await;
        let created = h
            .service
            .create_memo(h.alice, memo("shared file"), vec![upload("a.txt", b"hello")])
            .await
            .unwrap();
        let resource = &created.resources[0];

        let (found, data) = h
            .service
            .open_resource(h.alice, &resource.internal_filename)
            .await
            .unwrap();
        assert_eq!(found.id, resource.id);
        assert_eq!(data, b"hello");

        assert!(matches!(
            h.service.open_resource(h.bob, &resource.internal_filename).await,
            Err(Error::Forbidden)
        ));
        assert!(matches!(
            h.service.open_resource(h.alice, "../../etc/passwd").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            h.service.delete_resource(h.bob, resource.id).await,
            Err(Error::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_memo_owner_may_open_and_delete_resource_uploaded_by_another_user() {
        let h = setup().await;
        let created = h
            .service
            .create_memo(h.alice, memo("host"), vec![])
            .await
            .unwrap();

        // Bob's upload attached to Alice's memo
        let foreign = db::create_resource(
            &h.pool,
            db::CreateResource {
                creator_id: h.bob,
                memo_id: Some(created.memo.id),
                filename: "b.txt".into(),
                internal_filename: "0b3c5f2e-9d1a-4c55-8a0e-3f9e2a6d7c11.txt".into(),
                mime_type: "text/plain".into(),
                size: 1,
            },
        )
        .await
        .unwrap();
        std::fs::write(h.dir.path().join(&foreign.internal_filename), b"b").unwrap();

        let (opened, data) = h
            .service
            .open_resource(h.alice, &foreign.internal_filename)
            .await
            .unwrap();
        assert_eq!(opened.id, foreign.id);
        assert_eq!(data, b"b");

        let deleted = h.service.delete_resource(h.alice, foreign.id).await.unwrap();
        assert_eq!(deleted.id, foreign.id);
        assert_eq!(count_resources(&h.pool).await.unwrap(), 0);
        assert_eq!(h.stored_files(), 0);
    }
}
