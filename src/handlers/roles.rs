//! 角色管理的 HTTP 处理器

use crate::{
    auth::AuthContext,
    error::AppError,
    handlers::current_session,
    middleware::AppState,
    models::role::*,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// 列出组织内全部角色
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ManageRoles, None).await {
        return Err(AppError::Forbidden);
    }

    let roles = session.rbac.get_all_user_roles().await;
    Ok(Json(json!({
        "roles": roles,
        "count": roles.len()
    })))
}

/// 当前用户的角色与有效权限
pub async fn get_my_role(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    let role = session
        .rbac
        .get_user_role(None)
        .await
        .ok_or_else(|| AppError::NotFound("role".to_string()))?;

    Ok(Json(json!({
        "role": role,
        "permissions": role.effective_permissions()
    })))
}

/// 分配角色（覆盖已有分配）
pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(user_id): Path<String>,
    Json(req): Json<AssignRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;

    let assigned = session
        .rbac
        .assign_role(&user_id, req.role, req.custom_permissions, req.expires_at)
        .await?;
    if !assigned {
        return Err(AppError::Forbidden);
    }

    let role = session.rbac.get_user_role(Some(&user_id)).await;
    Ok(Json(json!({
        "message": "Role assigned",
        "role": role
    })))
}

/// 撤销角色
pub async fn revoke_role(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ManageRoles, None).await {
        return Err(AppError::Forbidden);
    }

    if !session.rbac.revoke_role(&user_id).await? {
        return Err(AppError::NotFound(format!("role for user {}", user_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// 设置分区覆盖权限
pub async fn set_section_override(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((user_id, section_id)): Path<(String, String)>,
    Json(access): Json<AccessOverride>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ManageRoles, None).await {
        return Err(AppError::Forbidden);
    }

    if !session
        .rbac
        .set_section_override(&user_id, &section_id, access)
        .await?
    {
        return Err(AppError::NotFound(format!("role for user {}", user_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// 清除分区覆盖权限
pub async fn clear_section_override(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((user_id, section_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ManageRoles, None).await {
        return Err(AppError::Forbidden);
    }

    if !session
        .rbac
        .clear_section_override(&user_id, &section_id)
        .await?
    {
        return Err(AppError::NotFound(format!(
            "override for {} on {}",
            user_id, section_id
        )));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// 设置字段覆盖权限
pub async fn set_field_override(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path((user_id, field_path)): Path<(String, String)>,
    Json(access): Json<AccessOverride>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ManageRoles, None).await {
        return Err(AppError::Forbidden);
    }

    if !session
        .rbac
        .set_field_override(&user_id, &field_path, access)
        .await?
    {
        return Err(AppError::NotFound(format!("role for user {}", user_id)));
    }
    Ok(StatusCode::NO_CONTENT)
}
