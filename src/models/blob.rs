use serde::Serialize;
use sqlx::FromRow;

/// Content blob metadata - one row per distinct content hash
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ContentBlob {
    pub hash: String,
    pub size: i64,
    pub mime_type: String,
    pub created_at: String,
}
