//! 健康检查处理器
//! 提供 /health 和 /ready 端点

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::{db, middleware::AppState, repository::keys};

/// 存活检查响应
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// 就绪检查响应
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: Vec<HealthCheck>,
}

/// 健康检查项
#[derive(Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    fn from_status(name: &str, status: db::HealthStatus) -> Self {
        match status {
            db::HealthStatus::Healthy => Self {
                name: name.to_string(),
                status: "healthy".to_string(),
                message: None,
            },
            db::HealthStatus::Unhealthy(msg) => Self {
                name: name.to_string(),
                status: "unhealthy".to_string(),
                message: Some(msg),
            },
        }
    }
}

static APP_START_TIME: OnceCell<Instant> = OnceCell::new();

/// 设置应用启动时间（main 中调用一次）
pub fn set_start_time() {
    let _ = APP_START_TIME.set(Instant::now());
}

/// 应用运行时间（秒）
pub fn get_uptime() -> u64 {
    APP_START_TIME
        .get()
        .map_or(0, |start| start.elapsed().as_secs())
}

/// 存活检查，不检查依赖
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: get_uptime(),
    })
}

/// 就绪检查：存储可读，配置了数据库时数据库可达
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut checks = Vec::new();

    let store_status = match state.store.get(keys::READINESS_CHECK).await {
        Ok(_) => db::HealthStatus::Healthy,
        Err(e) => db::HealthStatus::Unhealthy(e.to_string()),
    };
    checks.push(HealthCheck::from_status("store", store_status));

    if let Some(pool) = &state.db {
        checks.push(HealthCheck::from_status("database", db::health_check(pool).await));
        db::record_pool_metrics(pool);
    }

    let ready = checks.iter().all(|c| c.status == "healthy");
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready, checks }))
}
