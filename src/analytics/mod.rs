//! 分析聚合计算
//!
//! 纯函数：输入为表单数据、文档、进度快照与审计日志，输出 `AnalyticsData`。
//! 读取存储与缓存由 `services::analytics_service` 负责。

pub mod export;
pub mod fields;
pub mod report;

use crate::config::AnalyticsMode;
use crate::models::analytics::*;
use crate::models::audit::{AuditAction, AuditLogEntry, AuditResult};
use crate::models::form::{ApplicationData, DocumentRecord, ProgressSnapshot};
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 每次编辑折算的分钟数
pub const MINUTES_PER_EDIT: f64 = 2.0;
/// 趋势序列覆盖的天数（共 TREND_DAYS + 1 个点）
pub const TREND_DAYS: i64 = 30;
const PLACEHOLDER_SESSION_MINUTES: f64 = 30.0;
const PLACEHOLDER_VALIDATION_FIELDS: [&str; 4] = ["ein", "email", "phone", "website"];
const TOP_EDITED_FIELDS: usize = 10;
const PEAK_HOURS: usize = 5;
const RECENT_UPLOADS: usize = 5;

/// 计算所需的全部输入
#[derive(Debug, Clone, Copy)]
pub struct AnalyticsInputs<'a> {
    pub application: &'a ApplicationData,
    pub documents: &'a [DocumentRecord],
    pub audit_logs: &'a [AuditLogEntry],
    pub snapshots: &'a [ProgressSnapshot],
    pub date_range: Option<DateRange>,
}

/// 百分比取整（四舍五入，远离零）
pub fn round_percent(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round() as u32
    } else {
        0
    }
}

pub fn compute(inputs: &AnalyticsInputs<'_>, mode: AnalyticsMode, now: DateTime<Utc>) -> AnalyticsData {
    let logs: Vec<&AuditLogEntry> = inputs
        .audit_logs
        .iter()
        .filter(|e| match &inputs.date_range {
            Some(range) => e.timestamp >= range.start && e.timestamp <= range.end,
            None => true,
        })
        .collect();

    let overview = overview(inputs, &logs);
    let section_metrics = section_metrics(inputs.application, &logs);
    let user_activity = user_activity(&logs, mode);
    let time_metrics = time_metrics(&section_metrics, &logs);
    let completion_trends = match mode {
        AnalyticsMode::Placeholder => placeholder_trend(overview.overall_progress, now.date_naive()),
        AnalyticsMode::Measured => {
            measured_trend(inputs.snapshots, overview.overall_progress, now.date_naive())
        }
    };
    let field_analytics = field_analytics(inputs.application, &logs, mode);
    let document_stats = document_stats(inputs.documents);

    AnalyticsData {
        generated_at: now,
        date_range: inputs.date_range,
        overview,
        section_metrics,
        user_activity,
        time_metrics,
        completion_trends,
        field_analytics,
        document_stats,
    }
}

fn overview(inputs: &AnalyticsInputs<'_>, logs: &[&AuditLogEntry]) -> Overview {
    let progress = &inputs.application.section_progress;
    let completed_sections = progress.values().filter(|p| **p >= 100.0).count();
    let in_progress_sections = progress
        .values()
        .filter(|p| **p > 0.0 && **p < 100.0)
        .count();

    let overall_progress = if progress.is_empty() {
        0
    } else {
        round_percent(progress.values().sum::<f64>() / progress.len() as f64)
    };

    let counts = fields::count_tree(Some(&inputs.application.form_data));
    let active_users: BTreeSet<&str> = logs.iter().map(|e| e.user_id.as_str()).collect();

    Overview {
        total_sections: progress.len(),
        completed_sections,
        in_progress_sections,
        not_started_sections: progress.len() - completed_sections - in_progress_sections,
        overall_progress,
        total_fields: counts.total,
        completed_fields: counts.completed,
        empty_fields: counts.empty,
        total_documents: inputs.documents.len(),
        active_users: active_users.len(),
        total_edits: logs.iter().filter(|e| e.is_update()).count(),
    }
}

fn section_metrics(application: &ApplicationData, logs: &[&AuditLogEntry]) -> Vec<SectionMetric> {
    application
        .section_progress
        .iter()
        .map(|(section_id, progress)| {
            let counts = fields::count_tree(application.section_tree(section_id));
            let edits: Vec<&&AuditLogEntry> = logs
                .iter()
                .filter(|e| e.is_update() && e.section() == section_id.as_str())
                .collect();
            let last = edits.iter().max_by_key(|e| e.timestamp);

            SectionMetric {
                section_id: section_id.clone(),
                progress: round_percent(*progress),
                total_fields: counts.total,
                completed_fields: counts.completed,
                edit_count: edits.len(),
                time_spent_minutes: edits.len() as f64 * MINUTES_PER_EDIT,
                last_modified: last.map(|e| e.timestamp),
                last_modified_by: last.map(|e| e.user_name.clone()),
            }
        })
        .collect()
}

fn is_session_event(entry: &AuditLogEntry) -> bool {
    matches!(entry.action, AuditAction::Login | AuditAction::Logout)
}

fn user_activity(logs: &[&AuditLogEntry], mode: AnalyticsMode) -> Vec<UserActivity> {
    let mut by_user: BTreeMap<&str, Vec<&AuditLogEntry>> = BTreeMap::new();
    for entry in logs {
        by_user.entry(entry.user_id.as_str()).or_default().push(*entry);
    }

    let mut activity: Vec<UserActivity> = by_user
        .into_iter()
        .filter_map(|(user_id, entries)| {
            let latest = entries.iter().max_by_key(|e| e.timestamp)?;
            let sections: BTreeSet<String> = entries
                .iter()
                .filter(|e| !is_session_event(e))
                .map(|e| e.section().to_string())
                .collect();

            Some(UserActivity {
                user_id: user_id.to_string(),
                user_name: latest.user_name.clone(),
                total_edits: entries.iter().filter(|e| e.is_update()).count(),
                total_actions: entries.len(),
                sections_worked_on: sections.into_iter().collect(),
                last_active: latest.timestamp,
                average_session_minutes: match mode {
                    AnalyticsMode::Placeholder => PLACEHOLDER_SESSION_MINUTES,
                    AnalyticsMode::Measured => measured_session_minutes(&entries),
                },
            })
        })
        .collect();

    activity.sort_by(|a, b| {
        b.total_actions
            .cmp(&a.total_actions)
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
    activity
}

/// 按会话 id 配对登录与登出，求平均时长；没有完整会话时为 0
fn measured_session_minutes(entries: &[&AuditLogEntry]) -> f64 {
    let mut sessions: HashMap<&str, (Option<DateTime<Utc>>, Option<DateTime<Utc>>)> =
        HashMap::new();

    for entry in entries {
        let Some(session_id) = entry.metadata.get("sessionId").and_then(|v| v.as_str()) else {
            continue;
        };
        let slot = sessions.entry(session_id).or_default();
        match entry.action {
            AuditAction::Login => {
                slot.0 = Some(slot.0.map_or(entry.timestamp, |t| t.min(entry.timestamp)));
            }
            AuditAction::Logout => {
                slot.1 = Some(slot.1.map_or(entry.timestamp, |t| t.max(entry.timestamp)));
            }
            _ => {}
        }
    }

    let durations: Vec<f64> = sessions
        .values()
        .filter_map(|(start, end)| match (start, end) {
            (Some(start), Some(end)) if end >= start => {
                Some((*end - *start).num_seconds() as f64 / 60.0)
            }
            _ => None,
        })
        .collect();

    if durations.is_empty() {
        0.0
    } else {
        durations.iter().sum::<f64>() / durations.len() as f64
    }
}

fn time_metrics(sections: &[SectionMetric], logs: &[&AuditLogEntry]) -> TimeMetrics {
    let total: f64 = sections.iter().map(|s| s.time_spent_minutes).sum();
    let average = if sections.is_empty() {
        0.0
    } else {
        total / sections.len() as f64
    };

    let worked: Vec<&SectionMetric> = sections.iter().filter(|s| s.time_spent_minutes > 0.0).collect();
    let as_time = |s: &&SectionMetric| SectionTime {
        section_id: s.section_id.clone(),
        minutes: s.time_spent_minutes,
    };
    let fastest = worked
        .iter()
        .min_by(|a, b| a.time_spent_minutes.total_cmp(&b.time_spent_minutes))
        .map(as_time);
    let slowest = worked
        .iter()
        .max_by(|a, b| a.time_spent_minutes.total_cmp(&b.time_spent_minutes))
        .map(as_time);

    let mut daily_activity = BTreeMap::new();
    let mut hours = [0usize; 24];
    for entry in logs {
        *daily_activity
            .entry(entry.timestamp.format("%Y-%m-%d").to_string())
            .or_insert(0) += 1;
        hours[entry.timestamp.hour() as usize] += 1;
    }

    let mut peak_hours: Vec<HourActivity> = hours
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .map(|(hour, count)| HourActivity {
            hour: hour as u32,
            count: *count,
        })
        .collect();
    peak_hours.sort_by(|a, b| b.count.cmp(&a.count).then(a.hour.cmp(&b.hour)));
    peak_hours.truncate(PEAK_HOURS);

    TimeMetrics {
        total_time_spent_minutes: total,
        average_time_per_section: average,
        fastest_section: fastest,
        slowest_section: slowest,
        daily_activity,
        peak_hours,
    }
}

/// 从 0 线性爬升到当前进度
pub fn placeholder_trend(overall: u32, today: NaiveDate) -> Vec<TrendPoint> {
    (0..=TREND_DAYS)
        .map(|i| TrendPoint {
            date: today - Duration::days(TREND_DAYS - i),
            progress: round_percent(overall as f64 * i as f64 / TREND_DAYS as f64),
        })
        .collect()
}

/// 基于每日快照，缺失的日期沿用之前最近的快照，今天取当前进度
pub fn measured_trend(snapshots: &[ProgressSnapshot], overall: u32, today: NaiveDate) -> Vec<TrendPoint> {
    let by_day: BTreeMap<NaiveDate, u32> = snapshots.iter().map(|s| (s.date, s.progress)).collect();

    (0..=TREND_DAYS)
        .map(|i| {
            let date = today - Duration::days(TREND_DAYS - i);
            let progress = if date == today {
                overall
            } else {
                by_day
                    .range(..=date)
                    .next_back()
                    .map(|(_, p)| *p)
                    .unwrap_or(0)
            };
            TrendPoint { date, progress }
        })
        .collect()
}

fn field_analytics(application: &ApplicationData, logs: &[&AuditLogEntry], mode: AnalyticsMode) -> FieldAnalytics {
    let mut edits: HashMap<String, usize> = HashMap::new();
    for entry in logs.iter().filter(|e| e.is_update()) {
        for change in &entry.changes {
            *edits
                .entry(format!("{}.{}", entry.resource, change.field))
                .or_insert(0) += 1;
        }
    }
    let mut most_edited_fields: Vec<FieldEditCount> = edits
        .into_iter()
        .map(|(field, count)| FieldEditCount { field, count })
        .collect();
    most_edited_fields.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.field.cmp(&b.field)));
    most_edited_fields.truncate(TOP_EDITED_FIELDS);

    let validation_errors = match mode {
        AnalyticsMode::Placeholder => {
            let mut rng = rand::thread_rng();
            PLACEHOLDER_VALIDATION_FIELDS
                .iter()
                .map(|field| ValidationErrorCount {
                    field: field.to_string(),
                    count: rng.gen_range(0..5),
                })
                .collect()
        }
        AnalyticsMode::Measured => measured_validation_errors(logs),
    };

    FieldAnalytics {
        most_edited_fields,
        frequently_empty_fields: fields::frequently_empty_fields(&application.form_data),
        validation_errors,
    }
}

/// 失败的更新按字段计数；没有字段明细时记在资源路径上
fn measured_validation_errors(logs: &[&AuditLogEntry]) -> Vec<ValidationErrorCount> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for entry in logs
        .iter()
        .filter(|e| e.is_update() && e.result == AuditResult::Failure)
    {
        if entry.changes.is_empty() {
            *counts.entry(entry.resource.clone()).or_insert(0) += 1;
        } else {
            for change in &entry.changes {
                *counts.entry(change.field.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut errors: Vec<ValidationErrorCount> = counts
        .into_iter()
        .map(|(field, count)| ValidationErrorCount { field, count })
        .collect();
    errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.field.cmp(&b.field)));
    errors
}

fn document_stats(documents: &[DocumentRecord]) -> DocumentStats {
    let mut by_type = BTreeMap::new();
    for doc in documents {
        *by_type.entry(doc.doc_type.clone()).or_insert(0) += 1;
    }

    let mut recent_uploads = documents.to_vec();
    recent_uploads.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
    recent_uploads.truncate(RECENT_UPLOADS);

    DocumentStats {
        total_documents: documents.len(),
        total_size: documents.iter().map(|d| d.size).sum(),
        by_type,
        recent_uploads,
    }
}
