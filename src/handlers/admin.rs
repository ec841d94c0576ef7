use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::{ApiResponse, Result};
use crate::models::{UpdateQuotaRequest, User};
use crate::services::UserService;
use crate::AppState;

/// Update a user's quota. Authorization for administrative calls is the
/// outer layer's concern.
/// PUT /api/v1/admin/users/:id/quota
pub async fn update_user_quota(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateQuotaRequest>,
) -> Result<Json<ApiResponse<User>>> {
    let user = UserService::set_quota(&state.db, &id, req.quota_bytes).await?;
    Ok(Json(ApiResponse::success(user)))
}
