use sqlx::{Executor, Sqlite};

use crate::error::{AppError, Result};
use crate::models::User;

/// Quota enforcement over deduplicated usage.
///
/// A user's used bytes is the sum of blob sizes over the DISTINCT hashes the
/// user's records reference: two records of the same content count once.
/// Distinct users referencing the same blob each pay the full size against
/// their own quota.
pub struct QuotaService;

impl QuotaService {
    /// Deduplicated usage for one owner, recomputed on demand.
    pub async fn used_bytes<'e, E>(executor: E, owner_id: &str) -> Result<i64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let (used,): (i64,) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(size), 0)
            FROM content_blobs
            WHERE hash IN (SELECT DISTINCT hash FROM file_records WHERE owner_id = ?)
            "#,
        )
        .bind(owner_id)
        .fetch_one(executor)
        .await?;

        Ok(used)
    }

    /// Decide whether `user` may add a record for `hash` of `size` bytes.
    ///
    /// Free when the blob already exists AND the user already references that
    /// hash (a no-op duplicate for this user). Otherwise the full size is
    /// charged, even when another user already stored the content. Must run
    /// inside the same transaction as the subsequent insert.
    pub async fn authorize(
        conn: &mut sqlx::SqliteConnection,
        user: &User,
        hash: &str,
        size: i64,
    ) -> Result<()> {
        let (blob_exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM content_blobs WHERE hash = ?)")
                .bind(hash)
                .fetch_one(&mut *conn)
                .await?;

        if blob_exists {
            let (already_referenced,): (bool,) = sqlx::query_as(
                "SELECT EXISTS(SELECT 1 FROM file_records WHERE owner_id = ? AND hash = ?)",
            )
            .bind(&user.id)
            .bind(hash)
            .fetch_one(&mut *conn)
            .await?;

            if already_referenced {
                return Ok(());
            }
        }

        let used = Self::used_bytes(&mut *conn, &user.id).await?;
        let available = user.quota_bytes - used;

        if size > available {
            return Err(AppError::QuotaExceeded {
                required: size,
                available: available.max(0),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::content::{content_hash, ContentService};

    async fn seed_user(db: &Database, id: &str, quota: i64) -> User {
        sqlx::query(
            "INSERT INTO users (id, quota_bytes, created_at, updated_at) VALUES (?, ?, '', '')",
        )
        .bind(id)
        .bind(quota)
        .execute(db.pool())
        .await
        .unwrap();

        User {
            id: id.to_string(),
            quota_bytes: quota,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    async fn seed_record(db: &Database, owner: &str, payload: &[u8]) -> String {
        let hash = content_hash(payload);
        let mut tx = db.pool().begin().await.unwrap();
        ContentService::create_if_absent(
            &mut tx,
            &hash,
            payload.len() as i64,
            "application/octet-stream",
            payload,
        )
        .await
        .unwrap();
        sqlx::query(
            r#"
            INSERT INTO file_records (id, owner_id, hash, display_name, created_at, updated_at)
            VALUES (?, ?, ?, 'f', '', '')
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(owner)
        .bind(&hash)
        .execute(&mut *tx)
        .await
        .unwrap();
        tx.commit().await.unwrap();
        hash
    }

    #[tokio::test]
    async fn used_bytes_counts_distinct_hashes_once() {
        let db = Database::new_in_memory().await.unwrap();
        seed_user(&db, "u1", 1000).await;

        seed_record(&db, "u1", b"0123456789").await;
        seed_record(&db, "u1", b"0123456789").await; // same content, second record
        seed_record(&db, "u1", b"abcde").await;

        let used = QuotaService::used_bytes(db.pool(), "u1").await.unwrap();
        assert_eq!(used, 15);
    }

    #[tokio::test]
    async fn duplicate_for_same_user_is_free() {
        let db = Database::new_in_memory().await.unwrap();
        let user = seed_user(&db, "u1", 10).await;
        let hash = seed_record(&db, "u1", b"0123456789").await; // quota fully used

        // Re-referencing the same hash passes even with zero headroom
        let mut conn = db.pool().acquire().await.unwrap();
        QuotaService::authorize(&mut conn, &user, &hash, 10)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn existing_blob_still_charges_new_user() {
        let db = Database::new_in_memory().await.unwrap();
        seed_user(&db, "u1", 100).await;
        let poor = seed_user(&db, "u2", 5).await;
        let hash = seed_record(&db, "u1", b"0123456789").await;

        // u2 never referenced this hash; the full 10 bytes are charged
        let mut conn = db.pool().acquire().await.unwrap();
        let err = QuotaService::authorize(&mut conn, &poor, &hash, 10)
            .await
            .unwrap_err();
        match err {
            AppError::QuotaExceeded { required, available } => {
                assert_eq!(required, 10);
                assert_eq!(available, 5);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn denies_when_over_quota() {
        let db = Database::new_in_memory().await.unwrap();
        let user = seed_user(&db, "u1", 10).await;
        seed_record(&db, "u1", b"123456").await; // 6 of 10 used

        let mut conn = db.pool().acquire().await.unwrap();
        let hash = content_hash(b"55555");
        let err = QuotaService::authorize(&mut conn, &user, &hash, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { .. }));
    }
}
