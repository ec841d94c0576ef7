use bytes::Bytes;
use chrono::Utc;
use sqlx::QueryBuilder;
use uuid::Uuid;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::events::{DomainEvent, EventBus};
use crate::models::{
    FileRecord, FileRecordResponse, ListQuery, SortOrder, UpdateFileRequest, UploadResponse, User,
    Visibility,
};
use crate::services::content::{content_hash, detect_mime, ContentService};
use crate::services::QuotaService;

const SELECT_RESPONSE: &str = "SELECT f.id, f.owner_id, f.hash, f.display_name, f.folder_id, \
     f.visibility, f.download_count, b.size, b.mime_type, f.created_at, f.updated_at \
     FROM file_records f JOIN content_blobs b ON f.hash = b.hash";

const DEFAULT_PAGE_SIZE: i64 = 100;
const MAX_PAGE_SIZE: i64 = 1000;

/// File record service
pub struct FileService;

impl FileService {
    /// Upload a payload for `user`.
    ///
    /// Hashing and type detection are pure; everything with an effect (quota
    /// authorization, blob insert-or-fetch, record insert) runs in one
    /// transaction so concurrent uploads cannot slip between the check and
    /// the insert.
    pub async fn upload(
        db: &Database,
        events: &EventBus,
        user: &User,
        display_name: String,
        folder_id: Option<String>,
        visibility: Visibility,
        payload: Bytes,
    ) -> Result<UploadResponse> {
        Self::validate_name(&display_name)?;
        if payload.is_empty() {
            return Err(AppError::BadRequest("Empty payload".to_string()));
        }

        let hash = content_hash(&payload);
        let mime_type = detect_mime(&payload);
        let size = payload.len() as i64;

        let mut tx = db.pool().begin().await?;

        QuotaService::authorize(&mut tx, user, &hash, size).await?;

        let (_blob, is_new_content) =
            ContentService::create_if_absent(&mut tx, &hash, size, mime_type, &payload).await?;

        let record_id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO file_records
                (id, owner_id, hash, display_name, folder_id, visibility, download_count, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(&record_id)
        .bind(&user.id)
        .bind(&hash)
        .bind(&display_name)
        .bind(&folder_id)
        .bind(visibility.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let file: FileRecordResponse =
            sqlx::query_as(&format!("{} WHERE f.id = ?", SELECT_RESPONSE))
                .bind(&record_id)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        if is_new_content {
            events.emit(DomainEvent::ContentCreated {
                hash: hash.clone(),
                size,
            });
        }
        events.emit(DomainEvent::FileCreated {
            id: record_id,
            owner_id: user.id.clone(),
            hash,
        });

        tracing::debug!(
            owner = %user.id,
            size,
            is_new_content,
            "file uploaded"
        );

        Ok(UploadResponse {
            file,
            is_new_content,
        })
    }

    /// Get a raw file record by ID
    pub async fn get(db: &Database, file_id: &str) -> Result<FileRecord> {
        let record: FileRecord = sqlx::query_as("SELECT * FROM file_records WHERE id = ?")
            .bind(file_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        Ok(record)
    }

    /// Get a file record with blob metadata joined in
    pub async fn get_response(db: &Database, file_id: &str) -> Result<FileRecordResponse> {
        let file: FileRecordResponse =
            sqlx::query_as(&format!("{} WHERE f.id = ?", SELECT_RESPONSE))
                .bind(file_id)
                .fetch_optional(db.pool())
                .await?
                .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        Ok(file)
    }

    /// Rename / move / change visibility. Owner only.
    pub async fn update(
        db: &Database,
        requesting_user_id: &str,
        file_id: &str,
        req: UpdateFileRequest,
    ) -> Result<FileRecordResponse> {
        let record = Self::get(db, file_id).await?;
        if record.owner_id != requesting_user_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        if let Some(ref name) = req.display_name {
            Self::validate_name(name)?;
        }

        let now = Utc::now().to_rfc3339();
        let mut qb: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE file_records SET updated_at = ");
        qb.push_bind(&now);
        if let Some(ref name) = req.display_name {
            qb.push(", display_name = ").push_bind(name);
        }
        if let Some(ref folder) = req.folder_id {
            qb.push(", folder_id = ").push_bind(folder);
        }
        if let Some(visibility) = req.visibility {
            qb.push(", visibility = ").push_bind(visibility.as_str());
        }
        qb.push(" WHERE id = ").push_bind(file_id);
        qb.build().execute(db.pool()).await?;

        Self::get_response(db, file_id).await
    }

    /// Delete a file record; the last reference to a hash takes the blob
    /// with it.
    ///
    /// The reference count is recomputed after this record's delete is
    /// visible, inside the same transaction, so two concurrent deletes of the
    /// last two references cannot both leave the blob behind, and blob
    /// deletion is idempotent if they both see zero.
    pub async fn delete(
        db: &Database,
        events: &EventBus,
        requesting_user_id: &str,
        file_id: &str,
    ) -> Result<()> {
        let mut tx = db.pool().begin().await?;

        let record: Option<FileRecord> = sqlx::query_as("SELECT * FROM file_records WHERE id = ?")
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?;
        let record = record.ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

        if record.owner_id != requesting_user_id {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        sqlx::query("DELETE FROM file_records WHERE id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        let (remaining,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM file_records WHERE hash = ?")
                .bind(&record.hash)
                .fetch_one(&mut *tx)
                .await?;

        let orphaned = remaining == 0;
        if orphaned {
            ContentService::delete(&mut tx, &record.hash).await?;
        }

        tx.commit().await?;

        events.emit(DomainEvent::FileDeleted {
            id: record.id,
            owner_id: record.owner_id,
            hash: record.hash.clone(),
        });
        if orphaned {
            events.emit(DomainEvent::ContentDeleted { hash: record.hash });
        }

        Ok(())
    }

    /// Bump the download counter
    pub async fn increment_download_count(db: &Database, file_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE file_records SET download_count = download_count + 1 WHERE id = ?",
        )
        .bind(file_id)
        .execute(db.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("File not found".to_string()));
        }

        Ok(())
    }

    /// List one owner's records
    pub async fn list_by_owner(
        db: &Database,
        owner_id: &str,
        query: &ListQuery,
    ) -> Result<Vec<FileRecordResponse>> {
        let mut qb: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(SELECT_RESPONSE);
        qb.push(" WHERE f.owner_id = ").push_bind(owner_id);
        Self::push_filters(&mut qb, query);
        Self::push_ordering(&mut qb, query);

        let files = qb
            .build_query_as::<FileRecordResponse>()
            .fetch_all(db.pool())
            .await?;

        Ok(files)
    }

    /// List public records across all owners
    pub async fn list_public(db: &Database, query: &ListQuery) -> Result<Vec<FileRecordResponse>> {
        let mut qb: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(SELECT_RESPONSE);
        qb.push(" WHERE f.visibility = 'public'");
        Self::push_filters(&mut qb, query);
        Self::push_ordering(&mut qb, query);

        let files = qb
            .build_query_as::<FileRecordResponse>()
            .fetch_all(db.pool())
            .await?;

        Ok(files)
    }

    /// Filter composition: every value is bound, never spliced into the SQL.
    fn push_filters(qb: &mut QueryBuilder<'_, sqlx::Sqlite>, query: &ListQuery) {
        if let Some(ref folder) = query.folder_id {
            qb.push(" AND f.folder_id = ").push_bind(folder.clone());
        }
        if let Some(visibility) = query.visibility {
            qb.push(" AND f.visibility = ").push_bind(visibility.as_str());
        }
        if let Some(ref name) = query.name {
            qb.push(" AND f.display_name LIKE ")
                .push_bind(format!("%{}%", name));
        }
    }

    fn push_ordering(qb: &mut QueryBuilder<'_, sqlx::Sqlite>, query: &ListQuery) {
        let sort = query.sort.unwrap_or_default();
        let order = query.order.unwrap_or(SortOrder::Desc);

        // Sort columns come from the SortKey enum, never from caller strings
        qb.push(" ORDER BY ")
            .push(sort.column())
            .push(" ")
            .push(order.keyword())
            .push(", f.id");

        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let offset = query.offset.unwrap_or(0).max(0);
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(AppError::BadRequest("Invalid file name".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::UserService;

    async fn setup() -> (Database, EventBus) {
        let db = Database::new_in_memory().await.unwrap();
        (db, EventBus::new(64))
    }

    async fn seed_user(db: &Database, id: &str, quota: i64) -> User {
        UserService::ensure_user(db, id, quota).await.unwrap()
    }

    async fn upload(
        db: &Database,
        events: &EventBus,
        user: &User,
        name: &str,
        payload: &[u8],
    ) -> Result<UploadResponse> {
        FileService::upload(
            db,
            events,
            user,
            name.to_string(),
            None,
            Visibility::Private,
            Bytes::copy_from_slice(payload),
        )
        .await
    }

    async fn blob_count(db: &Database) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM content_blobs")
            .fetch_one(db.pool())
            .await
            .unwrap();
        count
    }

    #[tokio::test]
    async fn upload_stores_blob_and_record() {
        let (db, events) = setup().await;
        let user = seed_user(&db, "u1", 1024).await;

        let resp = upload(&db, &events, &user, "hello.txt", b"hello world")
            .await
            .unwrap();

        assert!(resp.is_new_content);
        assert_eq!(resp.file.size, 11);
        assert_eq!(resp.file.mime_type, "text/plain");
        assert_eq!(resp.file.owner_id, "u1");
        assert_eq!(resp.file.download_count, 0);
        assert_eq!(blob_count(&db).await, 1);
    }

    #[tokio::test]
    async fn repeated_uploads_share_one_blob() {
        let (db, events) = setup().await;
        let a = seed_user(&db, "a", 1024).await;
        let b = seed_user(&db, "b", 1024).await;

        let r1 = upload(&db, &events, &a, "one", b"shared bytes").await.unwrap();
        let r2 = upload(&db, &events, &a, "two", b"shared bytes").await.unwrap();
        let r3 = upload(&db, &events, &b, "three", b"shared bytes").await.unwrap();

        assert!(r1.is_new_content);
        assert!(!r2.is_new_content);
        assert!(!r3.is_new_content);
        assert_eq!(r1.file.hash, r3.file.hash);
        assert_eq!(blob_count(&db).await, 1);

        let (records,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM file_records")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(records, 3);
    }

    #[tokio::test]
    async fn quota_scenario_duplicate_then_reject() {
        let (db, events) = setup().await;
        // 10-byte quota standing in for the 10 MB of the product scenario
        let user = seed_user(&db, "u1", 10).await;

        let first = upload(&db, &events, &user, "six", b"123456").await.unwrap();
        assert!(first.is_new_content);
        assert_eq!(QuotaService::used_bytes(db.pool(), "u1").await.unwrap(), 6);

        // Identical content again: free, used bytes unchanged, two records
        let dup = upload(&db, &events, &user, "six-again", b"123456")
            .await
            .unwrap();
        assert!(!dup.is_new_content);
        assert_eq!(QuotaService::used_bytes(db.pool(), "u1").await.unwrap(), 6);
        let (records,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM file_records WHERE owner_id = 'u1'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(records, 2);

        // A different 5-byte payload would need 11 of 10
        let err = upload(&db, &events, &user, "five", b"abcde").await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { .. }));
        assert_eq!(QuotaService::used_bytes(db.pool(), "u1").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn rejected_upload_leaves_no_state_behind() {
        let (db, events) = setup().await;
        let user = seed_user(&db, "u1", 4).await;

        let err = upload(&db, &events, &user, "big", b"too large").await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { .. }));
        assert_eq!(blob_count(&db).await, 0);
    }

    #[tokio::test]
    async fn delete_last_reference_collects_blob() {
        let (db, events) = setup().await;
        let a = seed_user(&db, "a", 1024).await;
        let b = seed_user(&db, "b", 1024).await;

        let r1 = upload(&db, &events, &a, "one", b"refcounted").await.unwrap();
        let r2 = upload(&db, &events, &b, "two", b"refcounted").await.unwrap();
        let hash = r1.file.hash.clone();

        // First delete: one reference remains, blob persists
        FileService::delete(&db, &events, "a", &r1.file.id).await.unwrap();
        assert!(ContentService::lookup(&db, &hash).await.unwrap().is_some());

        // Second delete: orphaned, blob removed
        FileService::delete(&db, &events, "b", &r2.file.id).await.unwrap();
        assert!(ContentService::lookup(&db, &hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_requires_ownership() {
        let (db, events) = setup().await;
        let owner = seed_user(&db, "owner", 1024).await;
        seed_user(&db, "intruder", 1024).await;

        let resp = upload(&db, &events, &owner, "mine", b"private bytes")
            .await
            .unwrap();

        let err = FileService::delete(&db, &events, "intruder", &resp.file.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // Record and blob untouched
        assert!(FileService::get(&db, &resp.file.id).await.is_ok());
        assert_eq!(blob_count(&db).await, 1);
    }

    #[tokio::test]
    async fn delete_missing_record_is_not_found() {
        let (db, events) = setup().await;
        seed_user(&db, "u1", 1024).await;

        let err = FileService::delete(&db, &events, "u1", "no-such-id")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn download_count_is_monotonic() {
        let (db, events) = setup().await;
        let user = seed_user(&db, "u1", 1024).await;
        let resp = upload(&db, &events, &user, "file", b"counted").await.unwrap();

        FileService::increment_download_count(&db, &resp.file.id)
            .await
            .unwrap();
        FileService::increment_download_count(&db, &resp.file.id)
            .await
            .unwrap();

        let file = FileService::get(&db, &resp.file.id).await.unwrap();
        assert_eq!(file.download_count, 2);
    }

    #[tokio::test]
    async fn update_renames_and_changes_visibility() {
        let (db, events) = setup().await;
        let user = seed_user(&db, "u1", 1024).await;
        seed_user(&db, "other", 1024).await;
        let resp = upload(&db, &events, &user, "old-name", b"mutable metadata")
            .await
            .unwrap();

        let updated = FileService::update(
            &db,
            "u1",
            &resp.file.id,
            UpdateFileRequest {
                display_name: Some("new-name".to_string()),
                folder_id: Some("folder-1".to_string()),
                visibility: Some(Visibility::Public),
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.display_name, "new-name");
        assert_eq!(updated.folder_id.as_deref(), Some("folder-1"));
        assert_eq!(updated.visibility, "public");
        // Content identity is untouched by metadata changes
        assert_eq!(updated.hash, resp.file.hash);

        let err = FileService::update(
            &db,
            "other",
            &resp.file.id,
            UpdateFileRequest {
                display_name: Some("stolen".to_string()),
                folder_id: None,
                visibility: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn duplicate_display_names_are_allowed() {
        let (db, events) = setup().await;
        let user = seed_user(&db, "u1", 1024).await;

        upload(&db, &events, &user, "same-name", b"payload one").await.unwrap();
        upload(&db, &events, &user, "same-name", b"payload two").await.unwrap();

        let files = FileService::list_by_owner(&db, "u1", &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn listing_filters_and_sorts() {
        let (db, events) = setup().await;
        let user = seed_user(&db, "u1", 4096).await;
        seed_user(&db, "u2", 4096).await;
        let other = UserService::get_user(&db, "u2").await.unwrap();

        upload(&db, &events, &user, "alpha.txt", b"aaa").await.unwrap();
        upload(&db, &events, &user, "beta.txt", b"bbbbb").await.unwrap();
        let public = FileService::upload(
            &db,
            &events,
            &user,
            "gamma.txt".to_string(),
            Some("docs".to_string()),
            Visibility::Public,
            Bytes::from_static(b"c"),
        )
        .await
        .unwrap();
        upload(&db, &events, &other, "delta.txt", b"dd").await.unwrap();

        // Owner scoping
        let mine = FileService::list_by_owner(&db, "u1", &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 3);
        // Default order: creation time descending
        assert_eq!(mine[0].display_name, "gamma.txt");

        // Sort by size ascending
        let by_size = FileService::list_by_owner(
            &db,
            "u1",
            &ListQuery {
                sort: Some(crate::models::SortKey::Size),
                order: Some(SortOrder::Asc),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(by_size[0].display_name, "gamma.txt");
        assert_eq!(by_size[2].display_name, "beta.txt");

        // Name substring filter
        let named = FileService::list_by_owner(
            &db,
            "u1",
            &ListQuery {
                name: Some("eta".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].display_name, "beta.txt");

        // Folder filter
        let in_folder = FileService::list_by_owner(
            &db,
            "u1",
            &ListQuery {
                folder_id: Some("docs".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(in_folder.len(), 1);

        // Public listing sees only the public record, across owners
        let public_files = FileService::list_public(&db, &ListQuery::default())
            .await
            .unwrap();
        assert_eq!(public_files.len(), 1);
        assert_eq!(public_files[0].id, public.file.id);

        // Pagination
        let page = FileService::list_by_owner(
            &db,
            "u1",
            &ListQuery {
                limit: Some(2),
                offset: Some(2),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn upload_rejects_invalid_input() {
        let (db, events) = setup().await;
        let user = seed_user(&db, "u1", 1024).await;

        let err = upload(&db, &events, &user, "", b"data").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = upload(&db, &events, &user, "a/b", b"data").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = upload(&db, &events, &user, "empty", b"").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn upload_and_delete_emit_events() {
        let (db, events) = setup().await;
        let user = seed_user(&db, "u1", 1024).await;
        let mut rx = events.subscribe();

        let resp = upload(&db, &events, &user, "observed", b"event payload")
            .await
            .unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            DomainEvent::ContentCreated { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            DomainEvent::FileCreated { .. }
        ));

        FileService::delete(&db, &events, "u1", &resp.file.id).await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            DomainEvent::FileDeleted { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            DomainEvent::ContentDeleted { .. }
        ));
    }

    #[tokio::test]
    async fn concurrent_uploads_of_identical_content_converge() {
        let (db, events) = setup().await;
        let a = seed_user(&db, "a", 1024).await;
        let b = seed_user(&db, "b", 1024).await;

        let (r1, r2) = tokio::join!(
            upload(&db, &events, &a, "left", b"contended payload"),
            upload(&db, &events, &b, "right", b"contended payload"),
        );
        let r1 = r1.unwrap();
        let r2 = r2.unwrap();

        // Exactly one creator; the loser observed the existing blob
        assert!(r1.is_new_content ^ r2.is_new_content);
        assert_eq!(blob_count(&db).await, 1);

        // Cross-user dedup saves disk, not quota
        assert_eq!(
            QuotaService::used_bytes(db.pool(), "a").await.unwrap(),
            17
        );
        assert_eq!(
            QuotaService::used_bytes(db.pool(), "b").await.unwrap(),
            17
        );
    }

    #[tokio::test]
    async fn concurrent_same_user_uploads_respect_quota() {
        let (db, events) = setup().await;
        // Each payload fits alone; together they exceed the quota
        let user = seed_user(&db, "u1", 10).await;

        let (r1, r2) = tokio::join!(
            upload(&db, &events, &user, "one", b"12345678"),
            upload(&db, &events, &user, "two", b"abcdefgh"),
        );

        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        let used = QuotaService::used_bytes(db.pool(), "u1").await.unwrap();
        assert!(used <= 10);
    }
}
