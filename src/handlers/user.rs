use axum::{extract::State, Extension, Json};

use crate::error::{ApiResponse, Result};
use crate::models::{CurrentUser, DedupStats, StorageUsageResponse};
use crate::services::{StatsService, UserService};
use crate::AppState;

/// Get deduplicated storage usage against the quota
/// GET /api/v1/user/storage
pub async fn get_storage_usage(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<StorageUsageResponse>>> {
    let usage = UserService::get_storage_usage(&state.db, &current_user.id).await?;
    Ok(Json(ApiResponse::success(usage)))
}

/// Get the caller's deduplication statistics
/// GET /api/v1/user/stats
pub async fn get_user_stats(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<DedupStats>>> {
    let stats = StatsService::user_stats(&state.db, &current_user.id).await?;
    Ok(Json(ApiResponse::success(stats)))
}
