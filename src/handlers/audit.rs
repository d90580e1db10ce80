//! 审计日志的 HTTP 处理器

use crate::{
    auth::AuthContext,
    error::AppError,
    handlers::{attachment, current_session},
    middleware::AppState,
    models::{audit::*, role::Permission},
    services::AuditLogParams,
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub result: Option<AuditResult>,
    pub format: Option<AuditExportFormat>,
}

impl AuditLogQuery {
    fn filters(&self) -> AuditLogFilters {
        AuditLogFilters {
            start_date: self.start_date,
            end_date: self.end_date,
            user_id: self.user_id.clone(),
            action: self.action.as_deref().map(AuditAction::from),
            resource: self.resource.clone(),
            result: self.result,
        }
    }
}

/// 查询审计日志
pub async fn list_audit_logs(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ViewAuditLogs, None).await {
        return Err(AppError::Forbidden);
    }

    let logs = session.audit.get_audit_logs(Some(&query.filters())).await?;

    Ok(Json(json!({
        "logs": logs,
        "count": logs.len()
    })))
}

/// 审计报告
pub async fn audit_report(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ViewAuditLogs, None).await {
        return Err(AppError::Forbidden);
    }

    let report = session.audit.generate_audit_report(Some(&query.filters())).await?;
    Ok(Json(report))
}

/// 导出审计日志（JSON 或 CSV）
pub async fn export_audit_logs(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let session = current_session(&state, &auth_context).await?;
    if !session.rbac.has_permission(Permission::ViewAuditLogs, None).await {
        return Err(AppError::Forbidden);
    }

    let format = query.format.unwrap_or(AuditExportFormat::Json);
    let body = session
        .audit
        .export_audit_logs(format, Some(&query.filters()))
        .await?;

    let mut metadata = serde_json::Map::new();
    metadata.insert("format".into(), json!(format));
    session
        .audit
        .log_action(AuditLogParams::new(AuditAction::Export, "audit_logs").metadata(metadata))
        .await?;

    let stamp = Utc::now().format("%Y-%m-%d");
    Ok(match format {
        AuditExportFormat::Json => attachment(
            "application/json",
            &format!("audit-logs-{}.json", stamp),
            body,
        ),
        AuditExportFormat::Csv => {
            attachment("text/csv", &format!("audit-logs-{}.csv", stamp), body)
        }
    })
}
