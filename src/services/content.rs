use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqliteConnection;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::ContentBlob;

/// Compute the content address of a payload: SHA-256 over the bytes alone,
/// lowercase hex. Identical bytes always map to the same address.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Classify a payload by its leading bytes. The declared type from the
/// caller is never trusted for dedup identity.
pub fn detect_mime(bytes: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"PK\x05\x06", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
        (b"BM", "image/bmp"),
        (b"\x7fELF", "application/x-executable"),
        (b"OggS", "application/ogg"),
        (b"fLaC", "audio/flac"),
        (b"ID3", "audio/mpeg"),
    ];

    for (magic, mime) in SIGNATURES {
        if bytes.starts_with(magic) {
            return mime;
        }
    }

    // RIFF containers carry the subtype at offset 8
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") {
        match &bytes[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wav",
            _ => {}
        }
    }

    // MP4 family: "ftyp" box at offset 4
    if bytes.len() >= 8 && &bytes[4..8] == b"ftyp" {
        return "video/mp4";
    }

    if !bytes.is_empty() && std::str::from_utf8(bytes).is_ok() {
        return "text/plain";
    }

    "application/octet-stream"
}

/// Content store service
pub struct ContentService;

impl ContentService {
    /// Look up blob metadata by hash
    pub async fn lookup(db: &Database, hash: &str) -> Result<Option<ContentBlob>> {
        let blob: Option<ContentBlob> = sqlx::query_as(
            "SELECT hash, size, mime_type, created_at FROM content_blobs WHERE hash = ?",
        )
        .bind(hash)
        .fetch_optional(db.pool())
        .await?;

        Ok(blob)
    }

    /// Fetch the stored payload bytes for a hash
    pub async fn fetch_payload(db: &Database, hash: &str) -> Result<Bytes> {
        let payload: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT payload FROM content_blobs WHERE hash = ?")
                .bind(hash)
                .fetch_optional(db.pool())
                .await?;

        let (payload,) = payload
            .ok_or_else(|| AppError::NotFound(format!("Content not found: {}", hash)))?;

        Ok(Bytes::from(payload))
    }

    /// Insert a blob if no row with this hash exists yet, atomically.
    ///
    /// A concurrent creator winning the race degrades this call to
    /// fetch-existing: `ON CONFLICT(hash) DO NOTHING` followed by a re-read
    /// inside the same transaction, never an error.
    pub async fn create_if_absent(
        conn: &mut SqliteConnection,
        hash: &str,
        size: i64,
        mime_type: &str,
        payload: &[u8],
    ) -> Result<(ContentBlob, bool)> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT INTO content_blobs (hash, size, mime_type, payload, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO NOTHING
            "#,
        )
        .bind(hash)
        .bind(size)
        .bind(mime_type)
        .bind(payload)
        .bind(&now)
        .execute(&mut *conn)
        .await?;

        let was_created = result.rows_affected() > 0;

        let blob: ContentBlob = sqlx::query_as(
            "SELECT hash, size, mime_type, created_at FROM content_blobs WHERE hash = ?",
        )
        .bind(hash)
        .fetch_one(&mut *conn)
        .await?;

        Ok((blob, was_created))
    }

    /// Physically remove a blob. Callers verify zero references first,
    /// inside the same transaction.
    pub async fn delete(conn: &mut SqliteConnection, hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM content_blobs WHERE hash = ?")
            .bind(hash)
            .execute(conn)
            .await?;

        Ok(())
    }
}
