//! 分析服务
//!
//! 按日期范围缓存计算结果，有效期内重复查询返回同一个 `Arc`。
//! 写入缓存时清除过期条目，条目数超过上限时淘汰最早计算的结果。

use crate::{
    analytics::{self, export, report, AnalyticsInputs},
    config::AnalyticsConfig,
    error::Result,
    models::{analytics::*, audit::AuditLogFilters, form::*},
    repository::{self, keys, KeyValueStore, StoreScope},
    services::audit_service::AuditService,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// 同时缓存的日期范围上限
pub const MAX_CACHED_RANGES: usize = 32;

struct CachedAnalytics {
    data: Arc<AnalyticsData>,
    computed_at: Instant,
}

pub struct AnalyticsService {
    store: Arc<dyn KeyValueStore>,
    audit: Arc<AuditService>,
    config: AnalyticsConfig,
    organization_id: String,
    cache: RwLock<HashMap<String, CachedAnalytics>>,
}

impl AnalyticsService {
    pub fn new(store: Arc<dyn KeyValueStore>, audit: Arc<AuditService>, config: AnalyticsConfig) -> Self {
        Self {
            organization_id: audit.session().organization_id.clone(),
            store,
            audit,
            config,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_analytics(&self, range: Option<DateRange>) -> Result<Arc<AnalyticsData>> {
        let key = DateRange::cache_key(range.as_ref());
        let ttl = self.config.cache_ttl();

        if let Some(cached) = self.cache.read().await.get(&key) {
            if cached.computed_at.elapsed() < ttl {
                metrics::counter!("analytics.cache.hits").increment(1);
                return Ok(cached.data.clone());
            }
        }

        metrics::counter!("analytics.cache.misses").increment(1);
        let data = Arc::new(self.compute(range).await?);
        if ttl.is_zero() {
            return Ok(data);
        }

        let mut cache = self.cache.write().await;
        cache.retain(|_, cached| cached.computed_at.elapsed() < ttl);
        while cache.len() >= MAX_CACHED_RANGES {
            let oldest = cache
                .iter()
                .min_by_key(|(_, cached)| cached.computed_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(oldest) => cache.remove(&oldest),
                None => break,
            };
        }
        cache.insert(
            key,
            CachedAnalytics {
                data: data.clone(),
                computed_at: Instant::now(),
            },
        );
        Ok(data)
    }

    /// 当前缓存的范围数
    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// 丢弃该范围的缓存并重新计算
    pub async fn refresh(&self, range: Option<DateRange>) -> Result<Arc<AnalyticsData>> {
        self.cache
            .write()
            .await
            .remove(&DateRange::cache_key(range.as_ref()));
        self.get_analytics(range).await
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    async fn compute(&self, range: Option<DateRange>) -> Result<AnalyticsData> {
        let started = Instant::now();
        let store = self.store.as_ref();

        let application: ApplicationData =
            repository::get_json(store, &keys::application_data(&self.organization_id))
                .await?
                .unwrap_or_default();
        let documents: Vec<DocumentRecord> =
            repository::get_json(store, &keys::documents(&self.organization_id))
                .await?
                .unwrap_or_default();
        let snapshots: Vec<ProgressSnapshot> =
            repository::get_json(store, &keys::progress_snapshots(&self.organization_id))
                .await?
                .unwrap_or_default();

        let filters = range.map(|r| AuditLogFilters {
            start_date: Some(r.start),
            end_date: Some(r.end),
            ..Default::default()
        });
        let audit_logs = self.audit.get_audit_logs(filters.as_ref()).await?;

        let data = analytics::compute(
            &AnalyticsInputs {
                application: &application,
                documents: &documents,
                audit_logs: &audit_logs,
                snapshots: &snapshots,
                date_range: range,
            },
            self.config.mode,
            Utc::now(),
        );

        let elapsed = started.elapsed();
        metrics::histogram!("analytics.compute.seconds").record(elapsed.as_secs_f64());
        tracing::debug!(
            organization_id = %self.organization_id,
            entries = audit_logs.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Analytics computed"
        );

        Ok(data)
    }

    /// 记录今天的整体进度快照，同一天只保留最新值
    pub async fn record_progress_snapshot(&self) -> Result<ProgressSnapshot> {
        let store = self.store.as_ref();
        let application: ApplicationData =
            repository::get_json(store, &keys::application_data(&self.organization_id))
                .await?
                .unwrap_or_default();
        let progress = &application.section_progress;
        let overall = if progress.is_empty() {
            0
        } else {
            analytics::round_percent(progress.values().sum::<f64>() / progress.len() as f64)
        };

        let snapshot = ProgressSnapshot {
            date: Utc::now().date_naive(),
            progress: overall,
        };
        repository::update_json(
            store,
            &keys::progress_snapshots(&self.organization_id),
            StoreScope::Organization,
            |snapshots: &mut Vec<ProgressSnapshot>| {
                snapshots.retain(|s| s.date != snapshot.date);
                snapshots.push(snapshot);
                snapshots.sort_by_key(|s| s.date);
                Some(())
            },
        )
        .await?;
        tracing::debug!(progress = overall, "Progress snapshot recorded");
        Ok(snapshot)
    }

    pub async fn generate_report(&self, kind: ReportKind, range: Option<DateRange>) -> Result<String> {
        let data = self.get_analytics(range).await?;
        report::render(kind, &data)
    }

    /// 导出当前（全部时间范围）的分析数据
    pub async fn export_analytics(&self, format: AnalyticsExportFormat) -> Result<ExportBlob> {
        let data = self.get_analytics(None).await?;
        export::export(format, &data)
    }
}
