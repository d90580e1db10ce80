//! 分区锁定与权限查询

use crate::{
    auth::AuthContext,
    error::AppError,
    handlers::current_session,
    middleware::AppState,
    services::PermissionChecker,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// 当前锁定的分区
pub async fn list_locks(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    let locks = session.rbac.section_locks().await;
    Ok(Json(json!({ "locks": locks })))
}

/// 当前用户对分区的有效权限
pub async fn section_permissions(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(section_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    let access = session.permissions().section_access(&section_id).await;
    Ok(Json(access))
}

pub async fn lock_section(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(section_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    let permissions = session.permissions();
    if !permissions.lock_section(&section_id).await? {
        return Err(AppError::Forbidden);
    }
    Ok(Json(permissions.section_access(&section_id).await))
}

pub async fn unlock_section(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(section_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    let permissions = session.permissions();
    if !permissions.unlock_section(&section_id).await? {
        return Err(AppError::Forbidden);
    }
    Ok(Json(permissions.section_access(&section_id).await))
}
