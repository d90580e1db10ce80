//! Audit domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 审计操作类型
///
/// 固定词表之外的字符串保存在 `Other` 中，序列化时原样输出。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    View,
    Export,
    Import,
    Login,
    Logout,
    Other(String),
}

impl AuditAction {
    pub fn as_str(&self) -> &str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::View => "view",
            AuditAction::Export => "export",
            AuditAction::Import => "import",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for AuditAction {
    fn from(s: String) -> Self {
        match s.as_str() {
            "create" => AuditAction::Create,
            "update" => AuditAction::Update,
            "delete" => AuditAction::Delete,
            "view" => AuditAction::View,
            "export" => AuditAction::Export,
            "import" => AuditAction::Import,
            "login" => AuditAction::Login,
            "logout" => AuditAction::Logout,
            _ => AuditAction::Other(s),
        }
    }
}

impl From<&str> for AuditAction {
    fn from(s: &str) -> Self {
        AuditAction::from(s.to_string())
    }
}

impl From<AuditAction> for String {
    fn from(action: AuditAction) -> Self {
        match action {
            AuditAction::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 操作结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    Success,
    Failure,
}

impl AuditResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditResult::Success => "success",
            AuditResult::Failure => "failure",
        }
    }
}

/// 单个字段的变更
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub field: String,
    pub old_value: serde_json::Value,
    pub new_value: serde_json::Value,
}

impl FieldChange {
    pub fn new(
        field: impl Into<String>,
        old_value: serde_json::Value,
        new_value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            old_value,
            new_value,
        }
    }
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_name: String,
    pub action: AuditAction,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub changes: Vec<FieldChange>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AuditLogEntry {
    /// 资源路径的首段，即表单分区
    pub fn section(&self) -> &str {
        self.resource.split('.').next().unwrap_or_default()
    }

    pub fn is_update(&self) -> bool {
        self.action == AuditAction::Update
    }
}

/// Audit log filters
///
/// 所有条件取交集；日期范围两端都包含。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogFilters {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    pub action: Option<AuditAction>,
    pub resource: Option<String>,
    pub result: Option<AuditResult>,
}

impl AuditLogFilters {
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(start) = self.start_date {
            if entry.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if entry.timestamp > end {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if &entry.user_id != user_id {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if &entry.action != action {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if &entry.resource != resource {
                return false;
            }
        }
        if let Some(result) = self.result {
            if entry.result != result {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, entries: Vec<AuditLogEntry>) -> Vec<AuditLogEntry> {
        entries.into_iter().filter(|e| self.matches(e)).collect()
    }
}

/// 审计报告摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSummary {
    pub total_actions: usize,
    pub successful_actions: usize,
    pub failed_actions: usize,
    pub unique_users: usize,
    pub action_breakdown: BTreeMap<String, usize>,
    pub resource_breakdown: BTreeMap<String, usize>,
}

impl AuditSummary {
    pub fn from_entries(entries: &[AuditLogEntry]) -> Self {
        let mut action_breakdown = BTreeMap::new();
        let mut resource_breakdown = BTreeMap::new();
        let mut users = std::collections::HashSet::new();
        let mut successful_actions = 0;

        for entry in entries {
            *action_breakdown
                .entry(entry.action.as_str().to_string())
                .or_insert(0) += 1;
            *resource_breakdown.entry(entry.resource.clone()).or_insert(0) += 1;
            users.insert(entry.user_id.as_str());
            if entry.result == AuditResult::Success {
                successful_actions += 1;
            }
        }

        Self {
            total_actions: entries.len(),
            successful_actions,
            failed_actions: entries.len() - successful_actions,
            unique_users: users.len(),
            action_breakdown,
            resource_breakdown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub summary: AuditSummary,
    pub logs: Vec<AuditLogEntry>,
}

/// 审计日志导出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditExportFormat {
    Json,
    Csv,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(user: &str, action: AuditAction, resource: &str, result: AuditResult) -> AuditLogEntry {
        AuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            user_id: user.to_string(),
            user_name: user.to_uppercase(),
            action,
            resource: resource.to_string(),
            resource_id: None,
            changes: vec![],
            metadata: Default::default(),
            result,
            error_message: None,
        }
    }

    #[test]
    fn test_action_string_round_trip() {
        assert_eq!(AuditAction::from("update"), AuditAction::Update);
        assert_eq!(AuditAction::from("logout"), AuditAction::Logout);
        assert_eq!(
            AuditAction::from("approve"),
            AuditAction::Other("approve".to_string())
        );
        assert_eq!(AuditAction::Other("approve".into()).as_str(), "approve");

        let json = serde_json::to_string(&AuditAction::Export).unwrap();
        assert_eq!(json, "\"export\"");
        let parsed: AuditAction = serde_json::from_str("\"custom.thing\"").unwrap();
        assert_eq!(parsed, AuditAction::Other("custom.thing".to_string()));
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let mut e = entry("u1", AuditAction::Update, "financials.budget", AuditResult::Failure);
        e.error_message = Some("boom".to_string());
        let value = serde_json::to_value(&e).unwrap();
        assert!(value.get("userId").is_some());
        assert!(value.get("userName").is_some());
        assert_eq!(value["errorMessage"], "boom");
        assert_eq!(value["result"], "failure");
        assert!(value.get("resourceId").is_none());
    }

    #[test]
    fn test_section_is_first_path_segment() {
        let e = entry("u1", AuditAction::Update, "financials.budget.total", AuditResult::Success);
        assert_eq!(e.section(), "financials");
        let e = entry("u1", AuditAction::View, "governance", AuditResult::Success);
        assert_eq!(e.section(), "governance");
    }

    #[test]
    fn test_filters_are_conjunctive_and_idempotent() {
        let now = Utc::now();
        let mut old = entry("u1", AuditAction::Update, "a", AuditResult::Success);
        old.timestamp = now - Duration::days(10);
        let entries = vec![
            old,
            entry("u1", AuditAction::Update, "a", AuditResult::Success),
            entry("u2", AuditAction::Update, "a", AuditResult::Failure),
            entry("u1", AuditAction::View, "b", AuditResult::Success),
        ];

        let filter = AuditLogFilters {
            start_date: Some(now - Duration::days(1)),
            user_id: Some("u1".to_string()),
            action: Some(AuditAction::Update),
            ..Default::default()
        };

        let once = filter.apply(entries.clone());
        assert_eq!(once.len(), 1);
        assert!(once.iter().all(|e| entries.contains(e)));

        let twice = filter.apply(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let e = entry("u1", AuditAction::View, "a", AuditResult::Success);
        let filter = AuditLogFilters {
            start_date: Some(e.timestamp),
            end_date: Some(e.timestamp),
            ..Default::default()
        };
        assert!(filter.matches(&e));
    }

    #[test]
    fn test_summary_counts() {
        let entries = vec![
            entry("u1", AuditAction::Update, "a", AuditResult::Success),
            entry("u2", AuditAction::Update, "a", AuditResult::Failure),
            entry("u1", AuditAction::View, "b", AuditResult::Success),
        ];
        let summary = AuditSummary::from_entries(&entries);
        assert_eq!(summary.total_actions, 3);
        assert_eq!(summary.successful_actions, 2);
        assert_eq!(summary.failed_actions, 1);
        assert_eq!(summary.unique_users, 2);
        assert_eq!(summary.action_breakdown["update"], 2);
        assert_eq!(summary.resource_breakdown["b"], 1);
    }
}
