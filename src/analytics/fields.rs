//! 表单字段统计
//!
//! 对象与数组递归展开，其余每个叶子值算作一个字段；`null` 与空字符串视为空。

use crate::models::analytics::EmptyFieldStat;
use serde_json::Value;
use std::collections::BTreeMap;

/// 返回的高频空字段上限
const MAX_EMPTY_FIELDS: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldCounts {
    pub total: usize,
    pub completed: usize,
    pub empty: usize,
}

pub fn is_empty_leaf(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// 统计一棵字段树
pub fn count_fields(value: &Value) -> FieldCounts {
    let mut counts = FieldCounts::default();
    walk(value, &mut counts);
    counts
}

/// 分区树可能缺失；缺失或为 null 时没有任何字段
pub fn count_tree(tree: Option<&Value>) -> FieldCounts {
    match tree {
        None | Some(Value::Null) => FieldCounts::default(),
        Some(value) => count_fields(value),
    }
}

fn walk(value: &Value, counts: &mut FieldCounts) {
    match value {
        Value::Object(map) => map.values().for_each(|v| walk(v, counts)),
        Value::Array(items) => items.iter().for_each(|v| walk(v, counts)),
        leaf => {
            counts.total += 1;
            if is_empty_leaf(leaf) {
                counts.empty += 1;
            } else {
                counts.completed += 1;
            }
        }
    }
}

/// 空值率超过 50% 的字段路径，数组下标折叠为 `[]`
pub fn frequently_empty_fields(form_data: &Value) -> Vec<EmptyFieldStat> {
    let mut tally: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    collect_paths(form_data, "", &mut tally);

    let mut stats: Vec<EmptyFieldStat> = tally
        .into_iter()
        .filter(|(_, (_, total))| *total > 0)
        .map(|(field, (empty_count, total_count))| EmptyFieldStat {
            field,
            empty_count,
            total_count,
            empty_rate: empty_count as f64 / total_count as f64,
        })
        .filter(|stat| stat.empty_rate > 0.5)
        .collect();

    stats.sort_by(|a, b| {
        b.empty_rate
            .total_cmp(&a.empty_rate)
            .then(b.empty_count.cmp(&a.empty_count))
            .then_with(|| a.field.cmp(&b.field))
    });
    stats.truncate(MAX_EMPTY_FIELDS);
    stats
}

fn collect_paths(value: &Value, path: &str, tally: &mut BTreeMap<String, (usize, usize)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                collect_paths(child, &child_path, tally);
            }
        }
        Value::Array(items) => {
            let child_path = format!("{}[]", path);
            for child in items {
                collect_paths(child, &child_path, tally);
            }
        }
        leaf => {
            // 根节点本身是标量时没有路径可言
            if path.is_empty() {
                return;
            }
            let slot = tally.entry(path.to_string()).or_default();
            slot.1 += 1;
            if is_empty_leaf(leaf) {
                slot.0 += 1;
            }
        }
    }
}
