//! Organization profile form and document models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 表单数据快照（键 `nonprofitApplicationData`）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationData {
    /// 分区 -> 完成百分比（0-100）
    #[serde(default)]
    pub section_progress: BTreeMap<String, f64>,
    /// 分区 -> 嵌套字段树
    #[serde(default)]
    pub form_data: serde_json::Value,
}

impl ApplicationData {
    pub fn section_tree(&self, section_id: &str) -> Option<&serde_json::Value> {
        self.form_data.get(section_id)
    }
}

/// 上传的文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub doc_type: String,
    #[serde(default)]
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
}

/// 某天的整体完成度
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub date: NaiveDate,
    pub progress: u32,
}
