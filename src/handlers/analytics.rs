//! 分析数据的 HTTP 处理器

use crate::{
    auth::AuthContext,
    error::AppError,
    handlers::{attachment, current_session},
    middleware::AppState,
    models::{analytics::*, audit::AuditAction, role::Permission},
    services::AuditLogParams,
};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl RangeQuery {
    fn range(&self) -> Result<Option<DateRange>, AppError> {
        match (self.start, self.end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) if start <= end => Ok(Some(DateRange::new(start, end))),
            (Some(_), Some(_)) => Err(AppError::bad_request("start must not be after end")),
            _ => Err(AppError::bad_request("start and end must be given together")),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<AnalyticsExportFormat>,
}

/// 获取分析数据
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let range = query.range()?;
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ViewAll, None).await {
        return Err(AppError::Forbidden);
    }

    let data = session.analytics.get_analytics(range).await?;
    Ok(Json(serde_json::to_value(data.as_ref())?))
}

/// 丢弃缓存并重新计算
pub async fn refresh_analytics(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let range = query.range()?;
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ViewAll, None).await {
        return Err(AppError::Forbidden);
    }

    let data = session.analytics.refresh(range).await?;
    Ok(Json(serde_json::to_value(data.as_ref())?))
}

/// 文本报告
pub async fn get_report(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Path(kind): Path<String>,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let kind: ReportKind = kind.parse().map_err(AppError::BadRequest)?;
    let range = query.range()?;
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ViewAll, None).await {
        return Err(AppError::Forbidden);
    }

    let body = session.analytics.generate_report(kind, range).await?;
    let content_type = match kind {
        ReportKind::Detailed => "application/json",
        ReportKind::Summary | ReportKind::Executive => "text/markdown; charset=utf-8",
    };

    Ok(([(header::CONTENT_TYPE, content_type)], body))
}

/// 导出分析数据
pub async fn export_analytics(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ExportData, None).await {
        return Err(AppError::Forbidden);
    }

    let format = query.format.unwrap_or(AnalyticsExportFormat::Json);
    let blob = session.analytics.export_analytics(format).await?;

    let mut metadata = serde_json::Map::new();
    metadata.insert("format".into(), json!(format));
    session
        .audit
        .log_action(AuditLogParams::new(AuditAction::Export, "analytics").metadata(metadata))
        .await?;

    Ok(attachment(blob.content_type, &blob.file_name, blob.body))
}

/// 记录今天的进度快照
pub async fn record_snapshot(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ViewAll, None).await {
        return Err(AppError::Forbidden);
    }

    let snapshot = session.analytics.record_progress_snapshot().await?;
    Ok(Json(snapshot))
}
