use axum::{extract::State, Json};

use crate::error::{ApiResponse, Result};
use crate::models::DedupStats;
use crate::services::StatsService;
use crate::AppState;

/// System-wide deduplication statistics
/// GET /api/v1/stats
pub async fn get_system_stats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<DedupStats>>> {
    let stats = StatsService::system_stats(&state.db).await?;
    Ok(Json(ApiResponse::success(stats)))
}
