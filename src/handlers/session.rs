//! 会话生命周期

use crate::{auth::AuthContext, error::AppError, middleware::AppState};
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

/// 结束当前会话：刷盘、记录登出
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let closed = state
        .sessions
        .close(&auth_context.organization_id, &auth_context.user_id)
        .await;

    tracing::info!(
        organization_id = %auth_context.organization_id,
        user_id = %auth_context.user_id,
        closed,
        "Session close requested"
    );
    Ok(Json(json!({ "closed": closed })))
}
