use crate::db::Database;
use crate::error::Result;
use crate::models::DedupStats;

/// Deduplication statistics aggregator.
///
/// Reads run without locking; a snapshot that races a concurrent write is
/// acceptable for reporting (never used for quota decisions).
pub struct StatsService;

impl StatsService {
    /// System-wide unique-vs-total storage and savings
    pub async fn system_stats(db: &Database) -> Result<DedupStats> {
        let (unique_files, unique_storage_bytes): (i64, i64) =
            sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(size), 0) FROM content_blobs")
                .fetch_one(db.pool())
                .await?;

        // The hypothetical non-deduplicated size: every record pays the full
        // size of the blob it references.
        let (total_files, total_storage_bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(b.size), 0)
            FROM file_records f
            JOIN content_blobs b ON f.hash = b.hash
            "#,
        )
        .fetch_one(db.pool())
        .await?;

        Ok(DedupStats::from_counts(
            unique_files,
            total_files,
            unique_storage_bytes,
            total_storage_bytes,
        ))
    }

    /// The same formulas restricted to one user's records. A user's own
    /// duplicate uploads show up as savings; other users sharing the same
    /// content do not affect this view.
    pub async fn user_stats(db: &Database, owner_id: &str) -> Result<DedupStats> {
        let (unique_files, unique_storage_bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(size), 0)
            FROM content_blobs
            WHERE hash IN (SELECT DISTINCT hash FROM file_records WHERE owner_id = ?)
            "#,
        )
        .bind(owner_id)
        .fetch_one(db.pool())
        .await?;

        let (total_files, total_storage_bytes): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(b.size), 0)
            FROM file_records f
            JOIN content_blobs b ON f.hash = b.hash
            WHERE f.owner_id = ?
            "#,
        )
        .bind(owner_id)
        .fetch_one(db.pool())
        .await?;

        Ok(DedupStats::from_counts(
            unique_files,
            total_files,
            unique_storage_bytes,
            total_storage_bytes,
        ))
    }
}
