//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::{handlers, middleware::AppState};

/// 请求体上限，角色与覆盖权限的请求都很小
const MAX_BODY_BYTES: usize = 64 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 需要认证的路由
    let authenticated_routes = Router::new()
        // 审计日志
        .route("/api/v1/audit/logs", get(handlers::audit::list_audit_logs))
        .route("/api/v1/audit/report", get(handlers::audit::audit_report))
        .route("/api/v1/audit/export", get(handlers::audit::export_audit_logs))

        // 分析
        .route("/api/v1/analytics", get(handlers::analytics::get_analytics))
        .route(
            "/api/v1/analytics/refresh",
            post(handlers::analytics::refresh_analytics),
        )
        .route(
            "/api/v1/analytics/report/{kind}",
            get(handlers::analytics::get_report),
        )
        .route(
            "/api/v1/analytics/export",
            get(handlers::analytics::export_analytics),
        )
        .route(
            "/api/v1/analytics/snapshots",
            post(handlers::analytics::record_snapshot),
        )

        // 角色
        .route("/api/v1/roles", get(handlers::roles::list_roles))
        .route("/api/v1/roles/me", get(handlers::roles::get_my_role))
        .route(
            "/api/v1/roles/{user_id}",
            put(handlers::roles::assign_role).delete(handlers::roles::revoke_role),
        )
        .route(
            "/api/v1/roles/{user_id}/sections/{section_id}",
            put(handlers::roles::set_section_override)
                .delete(handlers::roles::clear_section_override),
        )
        .route(
            "/api/v1/roles/{user_id}/fields/{field_path}",
            put(handlers::roles::set_field_override),
        )

        // 分区
        .route("/api/v1/sections/locks", get(handlers::sections::list_locks))
        .route(
            "/api/v1/sections/{id}/permissions",
            get(handlers::sections::section_permissions),
        )
        .route(
            "/api/v1/sections/{id}/lock",
            post(handlers::sections::lock_section).delete(handlers::sections::unlock_section),
        )

        // 会话
        .route("/api/v1/session/close", post(handlers::session::close_session))
        .layer(axum::middleware::from_fn_with_state(
            state.jwt_service.clone(),
            crate::auth::middleware::jwt_auth_middleware,
        ));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(authenticated_routes)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .with_state(state)
}
