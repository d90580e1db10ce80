//! 内存键值存储（测试与单机开发）

use super::{KeyValueStore, Mutation, StoreScope};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredValue {
    value: serde_json::Value,
    scope: StoreScope,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredValue>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续读取全部失败（故障注入）
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// 让后续写入全部失败（故障注入）
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// 成功写入次数
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub async fn scope_of(&self, key: &str) -> Option<StoreScope> {
        self.entries.read().await.get(key).map(|v| v.scope)
    }

    pub async fn updated_at(&self, key: &str) -> Option<DateTime<Utc>> {
        self.entries.read().await.get(key).map(|v| v.updated_at)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, AppError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::storage(format!("read of '{}' failed", key)));
        }
        Ok(self.entries.read().await.get(key).map(|v| v.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: serde_json::Value,
        scope: StoreScope,
    ) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::storage(format!("write of '{}' failed", key)));
        }
        self.entries.write().await.insert(
            key.to_string(),
            StoredValue {
                value,
                scope,
                updated_at: Utc::now(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::storage(format!("remove of '{}' failed", key)));
        }
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn update(
        &self,
        key: &str,
        scope: StoreScope,
        mutate: Mutation<'_>,
    ) -> Result<(), AppError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::storage(format!("read of '{}' failed", key)));
        }

        // 写锁覆盖整个读-改-写
        let mut entries = self.entries.write().await;
        let current = entries.get(key).map(|v| v.value.clone());
        let Some(next) = mutate(current)? else {
            return Ok(());
        };

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::storage(format!("write of '{}' failed", key)));
        }
        entries.insert(
            key.to_string(),
            StoredValue {
                value: next,
                scope,
                updated_at: Utc::now(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
