//! Analytics aggregate models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::form::DocumentRecord;

/// 查询时间范围（两端包含）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// 缓存键
    pub fn cache_key(range: Option<&DateRange>) -> String {
        match range {
            Some(r) => format!("{}..{}", r.start.to_rfc3339(), r.end.to_rfc3339()),
            None => "all".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_sections: usize,
    pub completed_sections: usize,
    pub in_progress_sections: usize,
    pub not_started_sections: usize,
    pub overall_progress: u32,
    pub total_fields: usize,
    pub completed_fields: usize,
    pub empty_fields: usize,
    pub total_documents: usize,
    pub active_users: usize,
    pub total_edits: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionMetric {
    pub section_id: String,
    pub progress: u32,
    pub total_fields: usize,
    pub completed_fields: usize,
    pub edit_count: usize,
    /// 编辑次数 × 2 分钟的估算值
    pub time_spent_minutes: f64,
    pub last_modified: Option<DateTime<Utc>>,
    pub last_modified_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivity {
    pub user_id: String,
    pub user_name: String,
    pub total_edits: usize,
    pub total_actions: usize,
    pub sections_worked_on: Vec<String>,
    pub last_active: DateTime<Utc>,
    pub average_session_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionTime {
    pub section_id: String,
    pub minutes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourActivity {
    pub hour: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeMetrics {
    pub total_time_spent_minutes: f64,
    pub average_time_per_section: f64,
    pub fastest_section: Option<SectionTime>,
    pub slowest_section: Option<SectionTime>,
    /// YYYY-MM-DD -> 条目数
    pub daily_activity: BTreeMap<String, usize>,
    /// 最繁忙的 5 个小时
    pub peak_hours: Vec<HourActivity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub progress: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEditCount {
    pub field: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyFieldStat {
    pub field: String,
    pub empty_count: usize,
    pub total_count: usize,
    pub empty_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationErrorCount {
    pub field: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAnalytics {
    pub most_edited_fields: Vec<FieldEditCount>,
    pub frequently_empty_fields: Vec<EmptyFieldStat>,
    pub validation_errors: Vec<ValidationErrorCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub total_documents: usize,
    pub total_size: u64,
    pub by_type: BTreeMap<String, usize>,
    pub recent_uploads: Vec<DocumentRecord>,
}

/// 分析聚合结果；完全由输入数据推导，不单独持久化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsData {
    pub generated_at: DateTime<Utc>,
    pub date_range: Option<DateRange>,
    pub overview: Overview,
    pub section_metrics: Vec<SectionMetric>,
    pub user_activity: Vec<UserActivity>,
    pub time_metrics: TimeMetrics,
    pub completion_trends: Vec<TrendPoint>,
    pub field_analytics: FieldAnalytics,
    pub document_stats: DocumentStats,
}

/// 报告类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Summary,
    Detailed,
    Executive,
}

impl std::str::FromStr for ReportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(ReportKind::Summary),
            "detailed" => Ok(ReportKind::Detailed),
            "executive" => Ok(ReportKind::Executive),
            other => Err(format!("unknown report type: {}", other)),
        }
    }
}

/// 分析导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsExportFormat {
    Json,
    Csv,
    Html,
}

/// 可下载的导出内容
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBlob {
    pub file_name: String,
    pub content_type: &'static str,
    pub body: String,
}
