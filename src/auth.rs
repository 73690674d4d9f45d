use crate::errors::AppError;
use crate::handlers::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Shared-secret gate for the management-facing routes.
///
/// Checks the `X-API-Key` header against active rows in `api_keys`. Key
/// lifecycle (creation, rotation, revocation) is handled outside this
/// service. The public link-resolution routes intentionally bypass this.
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized(
                "API key not provided; include the X-API-Key header".to_string(),
            )
        })?;

    let found: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM api_keys WHERE key = $1 AND ativo = true")
            .bind(api_key)
            .fetch_optional(&state.db)
            .await?;

    if found.is_none() {
        return Err(AppError::Unauthorized(
            "invalid or inactive API key".to_string(),
        ));
    }

    Ok(next.run(request).await)
}
