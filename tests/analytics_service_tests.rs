//! 分析服务集成测试

use chrono::{Duration, Utc};
use nonprofit_hub::{
    config::{AnalyticsConfig, AnalyticsMode},
    models::{analytics::*, form::ProgressSnapshot},
    repository::{self, keys, MemoryStore, StoreScope},
    services::{analytics_service::MAX_CACHED_RANGES, AnalyticsService, AuditService, AuditSession},
};
use serde_json::json;
use std::sync::Arc;

mod common;
use common::{audit_service, create_test_config, memory_store, ORG};

async fn seed_application(store: &MemoryStore) {
    repository::set_json(
        store,
        &keys::application_data(ORG),
        &json!({
            "sectionProgress": {"basicInfo": 100, "financials": 50, "governance": 0},
            "formData": {
                "basicInfo": {
                    "name": "Helping Hands",
                    "ein": "",
                    "address": {"city": ""}
                }
            }
        }),
        StoreScope::Organization,
    )
    .await
    .unwrap();
}

fn analytics(
    store: Arc<MemoryStore>,
    audit: Arc<AuditService>,
    config: AnalyticsConfig,
) -> AnalyticsService {
    AnalyticsService::new(store, audit, config)
}

#[tokio::test]
async fn test_overview_from_application_data() {
    let store = memory_store();
    seed_application(&store).await;
    let audit = audit_service(store.clone(), "u1");
    audit
        .log_field_change("basicInfo", None, "name", json!(""), json!("Helping Hands"))
        .await
        .unwrap();

    let service = analytics(store, audit, AnalyticsConfig::default());
    let data = service.get_analytics(None).await.unwrap();

    assert_eq!(data.overview.overall_progress, 50);
    assert_eq!(data.overview.total_sections, 3);
    assert_eq!(data.overview.completed_sections, 1);
    assert_eq!(data.overview.in_progress_sections, 1);
    assert_eq!(data.overview.not_started_sections, 1);
    assert_eq!(data.overview.total_fields, 3);
    assert_eq!(data.overview.completed_fields, 1);
    assert_eq!(data.overview.empty_fields, 2);
    assert_eq!(data.overview.total_edits, 1);
    assert_eq!(data.overview.active_users, 1);

    let basic = data
        .section_metrics
        .iter()
        .find(|m| m.section_id == "basicInfo")
        .unwrap();
    assert_eq!(basic.edit_count, 1);
    assert_eq!(basic.last_modified_by.as_deref(), Some("User u1"));
}

#[tokio::test]
async fn test_empty_store_yields_zeroes() {
    let store = memory_store();
    let audit = audit_service(store.clone(), "u1");
    let service = analytics(store, audit, AnalyticsConfig::default());

    let data = service.get_analytics(None).await.unwrap();
    assert_eq!(data.overview.overall_progress, 0);
    assert_eq!(data.overview.total_fields, 0);
    assert!(data.section_metrics.is_empty());
    assert_eq!(data.completion_trends.len(), 31);
}

#[tokio::test]
async fn test_cache_returns_same_result_until_refresh() {
    let store = memory_store();
    seed_application(&store).await;
    let audit = audit_service(store.clone(), "u1");
    let service = analytics(store.clone(), audit, AnalyticsConfig::default());

    let first = service.get_analytics(None).await.unwrap();
    let second = service.get_analytics(None).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    // 不同范围单独缓存
    let range = DateRange::new(Utc::now() - Duration::days(7), Utc::now());
    let ranged = service.get_analytics(Some(range)).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &ranged));

    // 缓存期间数据变化不可见，刷新后可见
    repository::set_json(
        store.as_ref(),
        &keys::application_data(ORG),
        &json!({"sectionProgress": {"basicInfo": 100}}),
        StoreScope::Organization,
    )
    .await
    .unwrap();
    assert_eq!(service.get_analytics(None).await.unwrap().overview.overall_progress, 50);

    let refreshed = service.refresh(None).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &refreshed));
    assert_eq!(refreshed.overview.overall_progress, 100);

    service.clear_cache().await;
    let after_clear = service.get_analytics(None).await.unwrap();
    assert!(!Arc::ptr_eq(&refreshed, &after_clear));
}

#[tokio::test]
async fn test_zero_ttl_disables_cache() {
    let store = memory_store();
    let audit = audit_service(store.clone(), "u1");
    let config = AnalyticsConfig {
        cache_ttl_secs: 0,
        ..AnalyticsConfig::default()
    };
    let service = analytics(store, audit, config);

    let first = service.get_analytics(None).await.unwrap();
    let second = service.get_analytics(None).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_cache_evicts_expired_and_bounds_ranges() {
    let store = memory_store();
    let audit = audit_service(store.clone(), "u1");
    let config = AnalyticsConfig {
        cache_ttl_secs: 1,
        ..AnalyticsConfig::default()
    };
    let service = analytics(store, audit, config);

    let base = Utc::now() - Duration::days(365);
    for i in 0..(MAX_CACHED_RANGES as i64 + 8) {
        let range = DateRange::new(base + Duration::days(i), base + Duration::days(i + 1));
        service.get_analytics(Some(range)).await.unwrap();
    }
    assert_eq!(service.cache_len().await, MAX_CACHED_RANGES);

    // 过期条目在下一次写入缓存时被清除
    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    service.get_analytics(None).await.unwrap();
    assert_eq!(service.cache_len().await, 1);
}

#[tokio::test]
async fn test_organizations_are_isolated() {
    let store = memory_store();
    seed_application(&store).await;
    repository::set_json(
        store.as_ref(),
        &keys::application_data("org-other"),
        &json!({"sectionProgress": {"basicInfo": 10}}),
        StoreScope::Organization,
    )
    .await
    .unwrap();

    let ours = analytics(store.clone(), audit_service(store.clone(), "u1"), AnalyticsConfig::default());
    let other_audit = Arc::new(AuditService::new(
        store.clone(),
        create_test_config().audit,
        AuditSession::new("org-other", "u9", "User u9"),
    ));
    let theirs = analytics(store.clone(), other_audit, AnalyticsConfig::default());

    assert_eq!(ours.get_analytics(None).await.unwrap().overview.overall_progress, 50);
    assert_eq!(theirs.get_analytics(None).await.unwrap().overview.overall_progress, 10);

    theirs.record_progress_snapshot().await.unwrap();
    let snapshots: Option<Vec<ProgressSnapshot>> =
        repository::get_json(store.as_ref(), &keys::progress_snapshots(ORG))
            .await
            .unwrap();
    assert!(snapshots.is_none());
}

#[tokio::test]
async fn test_date_range_excludes_outside_logs() {
    let store = memory_store();
    seed_application(&store).await;
    let audit = audit_service(store.clone(), "u1");
    audit
        .log_field_change("financials", None, "budget", json!(0), json!(10))
        .await
        .unwrap();
    let service = analytics(store, audit, AnalyticsConfig::default());

    let future = DateRange::new(Utc::now() + Duration::days(1), Utc::now() + Duration::days(2));
    let data = service.get_analytics(Some(future)).await.unwrap();
    assert_eq!(data.overview.total_edits, 0);
    assert!(data.user_activity.is_empty());
    assert_eq!(data.date_range, Some(future));

    let all = service.get_analytics(None).await.unwrap();
    assert_eq!(all.overview.total_edits, 1);
}

#[tokio::test]
async fn test_snapshot_one_per_day_and_measured_trend() {
    let store = memory_store();
    seed_application(&store).await;
    let audit = audit_service(store.clone(), "u1");
    let config = AnalyticsConfig {
        mode: AnalyticsMode::Measured,
        ..AnalyticsConfig::default()
    };
    let service = analytics(store.clone(), audit, config);

    let yesterday = Utc::now().date_naive() - Duration::days(1);
    repository::set_json(
        store.as_ref(),
        &keys::progress_snapshots(ORG),
        &vec![ProgressSnapshot {
            date: yesterday,
            progress: 20,
        }],
        StoreScope::Organization,
    )
    .await
    .unwrap();

    let first = service.record_progress_snapshot().await.unwrap();
    let second = service.record_progress_snapshot().await.unwrap();
    assert_eq!(first.progress, 50);
    assert_eq!(first.date, second.date);

    let stored: Vec<ProgressSnapshot> =
        repository::get_json(store.as_ref(), &keys::progress_snapshots(ORG))
            .await
            .unwrap()
            .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].date, yesterday);

    let data = service.get_analytics(None).await.unwrap();
    let trend = &data.completion_trends;
    assert_eq!(trend.len(), 31);
    assert_eq!(trend[29].progress, 20);
    assert_eq!(trend[30].progress, 50);
}

#[tokio::test]
async fn test_reports_and_exports() {
    let store = memory_store();
    seed_application(&store).await;
    let audit = audit_service(store.clone(), "u1");
    let service = analytics(store, audit, AnalyticsConfig::default());

    let summary = service.generate_report(ReportKind::Summary, None).await.unwrap();
    assert!(summary.starts_with("# Organization Profile Summary"));

    let detailed = service.generate_report(ReportKind::Detailed, None).await.unwrap();
    let parsed: AnalyticsData = serde_json::from_str(&detailed).unwrap();
    assert_eq!(parsed.overview.overall_progress, 50);

    let executive = service.generate_report(ReportKind::Executive, None).await.unwrap();
    assert!(executive.contains("## Key Metrics"));
    assert!(executive.contains("## Recommendations"));

    let csv = service
        .export_analytics(AnalyticsExportFormat::Csv)
        .await
        .unwrap();
    assert!(csv.file_name.starts_with("analytics-"));
    assert!(csv.file_name.ends_with(".csv"));
    assert!(csv.body.starts_with("\"Metric\",\"Value\""));

    let html = service
        .export_analytics(AnalyticsExportFormat::Html)
        .await
        .unwrap();
    assert_eq!(html.content_type, "text/html");
    assert!(html.body.contains("<style>"));
}

#[tokio::test]
async fn test_store_failure_propagates() {
    let store = memory_store();
    let audit = audit_service(store.clone(), "u1");
    let service = analytics(store.clone(), audit, AnalyticsConfig::default());

    store.set_fail_reads(true);
    assert!(service.get_analytics(None).await.is_err());
    store.set_fail_reads(false);
    assert!(service.get_analytics(None).await.is_ok());
}
