use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// User model. Identity lives with the outer layer; the engine only tracks
/// the per-user quota the enforcer charges deduplicated usage against.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: String,
    pub quota_bytes: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Current authenticated user (resolved by the identity middleware)
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
}

/// Storage usage response
#[derive(Debug, Serialize)]
pub struct StorageUsageResponse {
    pub used_bytes: i64,
    pub quota_bytes: i64,
    pub percentage: u8,
}

/// Quota update request
#[derive(Debug, Deserialize)]
pub struct UpdateQuotaRequest {
    pub quota_bytes: i64,
}
