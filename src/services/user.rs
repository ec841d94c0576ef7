use chrono::Utc;

use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{StorageUsageResponse, User};
use crate::services::QuotaService;

/// User service. Identity is owned by the outer layer; this service keeps
/// the quota row the enforcer reads and the derived storage usage view.
pub struct UserService;

impl UserService {
    /// Get user by ID
    pub async fn get_user(db: &Database, user_id: &str) -> Result<User> {
        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        Ok(user)
    }

    /// Fetch a user, provisioning the row with the default quota on first
    /// contact. Races on first contact resolve to the existing row.
    pub async fn ensure_user(db: &Database, user_id: &str, default_quota: i64) -> Result<User> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO users (id, quota_bytes, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(default_quota)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        Self::get_user(db, user_id).await
    }

    /// Update a user's quota
    pub async fn set_quota(db: &Database, user_id: &str, quota_bytes: i64) -> Result<User> {
        if quota_bytes < 0 {
            return Err(AppError::BadRequest("Quota must be non-negative".to_string()));
        }

        let now = Utc::now().to_rfc3339();
        let result = sqlx::query("UPDATE users SET quota_bytes = ?, updated_at = ? WHERE id = ?")
            .bind(quota_bytes)
            .bind(&now)
            .bind(user_id)
            .execute(db.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        Self::get_user(db, user_id).await
    }

    /// Deduplicated storage usage against the quota
    pub async fn get_storage_usage(db: &Database, user_id: &str) -> Result<StorageUsageResponse> {
        let user = Self::get_user(db, user_id).await?;
        let used = QuotaService::used_bytes(db.pool(), user_id).await?;

        Ok(StorageUsageResponse {
            used_bytes: used,
            quota_bytes: user.quota_bytes,
            percentage: if user.quota_bytes > 0 {
                (used as f64 / user.quota_bytes as f64 * 100.0).round() as u8
            } else {
                0
            },
        })
    }
}
