//! HTTP 处理器模块

pub mod analytics;
pub mod audit;
pub mod health;
pub mod roles;
pub mod sections;
pub mod session;

use crate::{
    auth::AuthContext, error::AppError, middleware::AppState, services::OrganizationSession,
};
use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

/// 当前请求用户的会话，首次访问时打开
pub(crate) async fn current_session(
    state: &AppState,
    auth: &AuthContext,
) -> Result<Arc<OrganizationSession>, AppError> {
    state.sessions.session_for(&auth.identity()).await
}

/// 作为附件下载的响应
pub(crate) fn attachment(content_type: &str, file_name: &str, body: String) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        body,
    )
        .into_response()
}
