use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::models::CurrentUser;
use crate::services::UserService;
use crate::AppState;

/// Identity middleware.
///
/// Authentication lives with the outer layer; every request arrives with an
/// already-authenticated caller id in `X-User-Id`. Unknown ids are
/// provisioned with the configured default quota on first contact.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user_id = request
        .headers()
        .get("X-User-Id")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing X-User-Id header".to_string()))?
        .to_string();

    let user =
        UserService::ensure_user(&state.db, &user_id, state.config.quota.default_quota_bytes)
            .await?;

    request.extensions_mut().insert(CurrentUser { id: user.id });

    Ok(next.run(request).await)
}
