//! 审计日志服务
//!
//! 条目先进入内存队列，队列长度达到 `batch_size` 或每隔 `flush_interval`
//! 原子地追加到 `audit_logs_{orgId}`，同时清除超出保留期的条目。
//! 写入失败时条目退回队首，定时刷盘按指数退避重试；连续失败达到上限后
//! 该批条目转入死信缓冲。

use crate::{
    config::AuditConfig,
    error::{AppError, Result},
    models::audit::*,
    repository::{self, keys, KeyValueStore, StoreScope},
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

const CSV_HEADER: [&str; 9] = [
    "Timestamp",
    "User ID",
    "User Name",
    "Action",
    "Resource",
    "Resource ID",
    "Result",
    "Error Message",
    "Changes",
];

/// 会话身份，附加到每条审计记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSession {
    pub organization_id: String,
    pub user_id: String,
    pub user_name: String,
    pub session_id: String,
}

impl AuditSession {
    pub fn new(
        organization_id: impl Into<String>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            session_id: Uuid::new_v4().to_string(),
        }
    }
}

/// 审计日志参数结构体
#[derive(Debug, Clone)]
pub struct AuditLogParams<'a> {
    pub action: AuditAction,
    pub resource: &'a str,
    pub resource_id: Option<&'a str>,
    pub changes: Vec<FieldChange>,
    pub metadata: Option<Map<String, Value>>,
    pub result: AuditResult,
    pub error_message: Option<&'a str>,
}

impl<'a> AuditLogParams<'a> {
    pub fn new(action: AuditAction, resource: &'a str) -> Self {
        Self {
            action,
            resource,
            resource_id: None,
            changes: Vec::new(),
            metadata: None,
            result: AuditResult::Success,
            error_message: None,
        }
    }

    pub fn resource_id(mut self, resource_id: &'a str) -> Self {
        self.resource_id = Some(resource_id);
        self
    }

    pub fn changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = changes;
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn failed(mut self, error_message: &'a str) -> Self {
        self.result = AuditResult::Failure;
        self.error_message = Some(error_message);
        self
    }
}

/// 一次刷盘的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// 队列为空
    Empty,
    /// 写入成功的条目数
    Flushed(usize),
    /// 仍在退避窗口内，未尝试
    Deferred,
    /// 写入失败，条目已退回队列
    Failed(usize),
    /// 连续失败达到上限，条目转入死信
    DeadLettered(usize),
}

#[derive(Default)]
struct FlushState {
    consecutive_failures: u32,
    retry_at: Option<Instant>,
    dead_letters: Vec<AuditLogEntry>,
}

pub struct AuditService {
    store: Arc<dyn KeyValueStore>,
    config: AuditConfig,
    session: AuditSession,
    queue: Mutex<VecDeque<AuditLogEntry>>,
    flush_state: Mutex<FlushState>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl AuditService {
    pub fn new(store: Arc<dyn KeyValueStore>, config: AuditConfig, session: AuditSession) -> Self {
        Self {
            store,
            config,
            session,
            queue: Mutex::new(VecDeque::new()),
            flush_state: Mutex::new(FlushState::default()),
            flush_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &AuditSession {
        &self.session
    }

    /// 启动后台刷盘并记录登录
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        self.start_flush_task().await;

        tracing::info!(
            organization_id = %self.session.organization_id,
            user_id = %self.session.user_id,
            session_id = %self.session.session_id,
            "Audit session started"
        );

        self.log_action(AuditLogParams::new(AuditAction::Login, "session"))
            .await
    }

    async fn start_flush_task(self: &Arc<Self>) {
        let mut task = self.flush_task.lock().await;
        if task.is_some() {
            return;
        }

        // 只持有弱引用，服务被释放后任务自行退出
        let service = Arc::downgrade(self);
        let period = self.config.flush_interval();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.flush_due().await;
            }
        }));
    }

    /// 记录审计日志条目
    pub async fn log_action(&self, params: AuditLogParams<'_>) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            tracing::warn!(
                action = %params.action,
                resource = %params.resource,
                "Audit action logged after session cleanup"
            );
            return Err(AppError::SessionClosed);
        }

        let entry = self.build_entry(params);
        self.enqueue(entry).await;
        Ok(())
    }

    /// 单字段变更
    pub async fn log_field_change(
        &self,
        resource: &str,
        resource_id: Option<&str>,
        field: &str,
        old_value: Value,
        new_value: Value,
    ) -> Result<()> {
        self.log_bulk_changes(
            resource,
            resource_id,
            vec![FieldChange::new(field, old_value, new_value)],
        )
        .await
    }

    /// 多字段变更
    pub async fn log_bulk_changes(
        &self,
        resource: &str,
        resource_id: Option<&str>,
        changes: Vec<FieldChange>,
    ) -> Result<()> {
        let mut params = AuditLogParams::new(AuditAction::Update, resource).changes(changes);
        params.resource_id = resource_id;
        self.log_action(params).await
    }

    /// 直接入队一条已构造好的条目（导入、重放）
    pub async fn enqueue_entry(&self, entry: AuditLogEntry) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AppError::SessionClosed);
        }
        self.enqueue(entry).await;
        Ok(())
    }

    fn build_entry(&self, params: AuditLogParams<'_>) -> AuditLogEntry {
        let mut metadata = Map::new();
        metadata.insert("sessionId".into(), Value::from(self.session.session_id.clone()));
        metadata.insert(
            "organizationId".into(),
            Value::from(self.session.organization_id.clone()),
        );
        metadata.insert(
            "userAgent".into(),
            Value::from(concat!("nonprofit-hub/", env!("CARGO_PKG_VERSION"))),
        );
        metadata.insert("ipAddress".into(), Value::from("client-ip"));
        if let Some(extra) = params.metadata {
            metadata.extend(extra);
        }

        // errorMessage 仅在失败时存在
        let error_message = match params.result {
            AuditResult::Success => None,
            AuditResult::Failure => Some(
                params
                    .error_message
                    .unwrap_or("unknown error")
                    .to_string(),
            ),
        };

        AuditLogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_id: self.session.user_id.clone(),
            user_name: self.session.user_name.clone(),
            action: params.action,
            resource: params.resource.to_string(),
            resource_id: params.resource_id.map(|s| s.to_string()),
            changes: params.changes,
            metadata,
            result: params.result,
            error_message,
        }
    }

    async fn enqueue(&self, entry: AuditLogEntry) {
        let len = {
            let mut queue = self.queue.lock().await;
            queue.push_back(entry);
            queue.len()
        };

        if len >= self.config.batch_size {
            self.flush_due().await;
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// 已放弃写入的条目
    pub async fn dead_letters(&self) -> Vec<AuditLogEntry> {
        self.flush_state.lock().await.dead_letters.clone()
    }

    /// 立即刷盘，忽略退避窗口
    pub async fn flush(&self) -> FlushOutcome {
        self.flush_inner(true).await
    }

    /// 定时器与队列阈值触发的刷盘，遵守退避窗口
    async fn flush_due(&self) -> FlushOutcome {
        self.flush_inner(false).await
    }

    async fn flush_inner(&self, force: bool) -> FlushOutcome {
        let mut state = self.flush_state.lock().await;

        if !force {
            if let Some(retry_at) = state.retry_at {
                if Instant::now() < retry_at {
                    return FlushOutcome::Deferred;
                }
            }
        }

        let batch: Vec<AuditLogEntry> = self.queue.lock().await.drain(..).collect();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let count = batch.len();

        match self.persist(&batch).await {
            Ok(()) => {
                state.consecutive_failures = 0;
                state.retry_at = None;
                metrics::counter!("audit.entries.flushed").increment(count as u64);
                tracing::debug!(
                    organization_id = %self.session.organization_id,
                    count,
                    "Audit entries flushed"
                );
                FlushOutcome::Flushed(count)
            }
            Err(e) => {
                state.consecutive_failures += 1;
                metrics::counter!("audit.flush.failures").increment(1);

                if state.consecutive_failures >= self.config.max_flush_attempts {
                    tracing::error!(
                        organization_id = %self.session.organization_id,
                        count,
                        attempts = state.consecutive_failures,
                        error = %e,
                        "Audit flush abandoned, batch moved to dead letter"
                    );
                    self.write_dead_letters(&batch).await;
                    state.dead_letters.extend(batch);
                    state.consecutive_failures = 0;
                    state.retry_at = None;
                    return FlushOutcome::DeadLettered(count);
                }

                let wait = self.config.backoff_for(state.consecutive_failures);
                state.retry_at = Some(Instant::now() + wait);
                tracing::warn!(
                    organization_id = %self.session.organization_id,
                    count,
                    attempts = state.consecutive_failures,
                    retry_in_secs = wait.as_secs(),
                    error = %e,
                    "Audit flush failed, entries requeued"
                );

                let mut queue = self.queue.lock().await;
                for entry in batch.into_iter().rev() {
                    queue.push_front(entry);
                }
                FlushOutcome::Failed(count)
            }
        }
    }

    /// 追加到组织日志；同组织的多个会话并发刷盘时由存储保证互不覆盖
    async fn persist(&self, batch: &[AuditLogEntry]) -> Result<()> {
        let key = keys::audit_logs(&self.session.organization_id);
        let cutoff = Utc::now() - ChronoDuration::days(self.config.retention_days);

        let pruned = repository::update_json(
            self.store.as_ref(),
            &key,
            StoreScope::Organization,
            |stored: &mut Vec<AuditLogEntry>| {
                stored.extend(batch.iter().cloned());
                let before = stored.len();
                stored.retain(|entry| entry.timestamp > cutoff);
                Some(before - stored.len())
            },
        )
        .await?;

        if let Some(pruned) = pruned.filter(|n| *n > 0) {
            tracing::debug!(pruned, "Expired audit entries pruned");
        }
        Ok(())
    }

    async fn write_dead_letters(&self, batch: &[AuditLogEntry]) {
        let Some(path) = &self.config.dead_letter_path else {
            return;
        };

        let mut lines = String::new();
        for entry in batch {
            match serde_json::to_string(entry) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                }
                Err(e) => tracing::error!(error = %e, "Failed to encode dead-letter entry"),
            }
        }

        let result = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(lines.as_bytes()).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = result {
            tracing::error!(path = %path.display(), error = %e, "Failed to write dead-letter file");
        }
    }

    async fn load_entries(&self) -> Result<Vec<AuditLogEntry>> {
        let key = keys::audit_logs(&self.session.organization_id);
        Ok(repository::get_json(self.store.as_ref(), &key)
            .await?
            .unwrap_or_default())
    }

    /// 查询审计日志（先刷盘，保持存储顺序）
    pub async fn get_audit_logs(
        &self,
        filters: Option<&AuditLogFilters>,
    ) -> Result<Vec<AuditLogEntry>> {
        self.flush().await;
        let entries = self.load_entries().await?;
        Ok(match filters {
            Some(f) => f.apply(entries),
            None => entries,
        })
    }

    pub async fn get_user_activity(&self, user_id: &str, days: i64) -> Result<Vec<AuditLogEntry>> {
        let filters = AuditLogFilters {
            user_id: Some(user_id.to_string()),
            start_date: Some(Utc::now() - ChronoDuration::days(days)),
            ..Default::default()
        };
        self.get_audit_logs(Some(&filters)).await
    }

    pub async fn get_resource_history(
        &self,
        resource: &str,
        resource_id: Option<&str>,
    ) -> Result<Vec<AuditLogEntry>> {
        let filters = AuditLogFilters {
            resource: Some(resource.to_string()),
            ..Default::default()
        };
        let mut entries = self.get_audit_logs(Some(&filters)).await?;
        if let Some(resource_id) = resource_id {
            entries.retain(|e| e.resource_id.as_deref() == Some(resource_id));
        }
        Ok(entries)
    }

    pub async fn get_failed_actions(&self, days: i64) -> Result<Vec<AuditLogEntry>> {
        let filters = AuditLogFilters {
            result: Some(AuditResult::Failure),
            start_date: Some(Utc::now() - ChronoDuration::days(days)),
            ..Default::default()
        };
        self.get_audit_logs(Some(&filters)).await
    }

    pub async fn generate_audit_report(
        &self,
        filters: Option<&AuditLogFilters>,
    ) -> Result<AuditReport> {
        let logs = self.get_audit_logs(filters).await?;
        Ok(AuditReport {
            summary: AuditSummary::from_entries(&logs),
            logs,
        })
    }

    pub async fn export_audit_logs(
        &self,
        format: AuditExportFormat,
        filters: Option<&AuditLogFilters>,
    ) -> Result<String> {
        let logs = self.get_audit_logs(filters).await?;
        match format {
            AuditExportFormat::Json => Ok(serde_json::to_string_pretty(&logs)?),
            AuditExportFormat::Csv => logs_to_csv(&logs),
        }
    }

    /// 结束会话：刷盘、记录登出、再次刷盘并停止定时任务。重复调用无效果。
    pub async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.flush().await;
        let logout = self.build_entry(AuditLogParams::new(AuditAction::Logout, "session"));
        self.queue.lock().await.push_back(logout);
        self.flush().await;

        if let Some(task) = self.flush_task.lock().await.take() {
            task.abort();
        }

        tracing::info!(
            organization_id = %self.session.organization_id,
            user_id = %self.session.user_id,
            session_id = %self.session.session_id,
            "Audit session closed"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn logs_to_csv(logs: &[AuditLogEntry]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());

    writer.write_record(CSV_HEADER)?;
    for entry in logs {
        let changes = if entry.changes.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&entry.changes)?
        };
        writer.write_record([
            entry.timestamp.to_rfc3339(),
            entry.user_id.clone(),
            entry.user_name.clone(),
            entry.action.as_str().to_string(),
            entry.resource.clone(),
            entry.resource_id.clone().unwrap_or_default(),
            entry.result.as_str().to_string(),
            entry.error_message.clone().unwrap_or_default(),
            changes,
        ])?;
    }

    let bytes = writer.into_inner().map_err(AppError::internal)?;
    String::from_utf8(bytes).map_err(AppError::internal)
}
