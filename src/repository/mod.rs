//! 键值存储层
//!
//! 所有持久化状态（审计日志、角色表、表单数据、文档列表、草稿）都以 JSON
//! 值的形式保存在一个键值存储中。`set` 是最后写入者胜出；多个会话共享的
//! 组织级键（审计日志、角色表、快照）通过 `update` 原子地读-改-写。

pub mod memory_store;
pub mod pg_store;

pub use memory_store::MemoryStore;
pub use pg_store::PgStore;

use crate::error::AppError;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// 写入作用域
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreScope {
    Organization,
    Personal,
}

impl StoreScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreScope::Organization => "organization",
            StoreScope::Personal => "personal",
        }
    }
}

/// 读-改-写的变更函数：输入当前值，返回 None 表示保持不变
pub type Mutation<'a> =
    Box<dyn FnOnce(Option<Value>) -> Result<Option<Value>, AppError> + Send + 'a>;

/// 键值存储能力
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, AppError>;

    async fn set(&self, key: &str, value: Value, scope: StoreScope) -> Result<(), AppError>;

    async fn remove(&self, key: &str) -> Result<(), AppError>;

    /// 原子地读取、修改并写回同一个键；同一键上的并发更新互不覆盖
    async fn update(
        &self,
        key: &str,
        scope: StoreScope,
        mutate: Mutation<'_>,
    ) -> Result<(), AppError>;
}

/// 读取并反序列化；键不存在时返回 None
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, AppError> {
    match store.get(key).await? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

/// 序列化并写入
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
    scope: StoreScope,
) -> Result<(), AppError> {
    store.set(key, serde_json::to_value(value)?, scope).await
}

/// 原子地修改一个 JSON 值
///
/// `f` 返回 `Some` 时写回修改后的值，返回 `None` 时不写入。键不存在时
/// 从 `T::default()` 开始。
pub async fn update_json<T, R, F>(
    store: &dyn KeyValueStore,
    key: &str,
    scope: StoreScope,
    f: F,
) -> Result<Option<R>, AppError>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnOnce(&mut T) -> Option<R> + Send,
    R: Send,
{
    let mut outcome = None;
    let slot = &mut outcome;
    store
        .update(
            key,
            scope,
            Box::new(move |current| {
                let mut value: T = match current {
                    None | Some(Value::Null) => T::default(),
                    Some(value) => serde_json::from_value(value)?,
                };
                match f(&mut value) {
                    Some(result) => {
                        let next = serde_json::to_value(&value)?;
                        *slot = Some(result);
                        Ok(Some(next))
                    }
                    None => Ok(None),
                }
            }),
        )
        .await?;
    Ok(outcome)
}

/// 存储键；组织数据一律带组织后缀
pub mod keys {
    /// `/ready` 读取的键，从不写入
    pub const READINESS_CHECK: &str = "__readiness_check";

    pub fn application_data(organization_id: &str) -> String {
        format!("nonprofitApplicationData_{}", organization_id)
    }

    pub fn documents(organization_id: &str) -> String {
        format!("documents_{}", organization_id)
    }

    pub fn audit_logs(organization_id: &str) -> String {
        format!("audit_logs_{}", organization_id)
    }

    pub fn rbac_roles(organization_id: &str) -> String {
        format!("rbac_roles_{}", organization_id)
    }

    pub fn rbac_section_permissions(organization_id: &str) -> String {
        format!("rbac_section_permissions_{}", organization_id)
    }

    pub fn progress_snapshots(organization_id: &str) -> String {
        format!("progress_snapshots_{}", organization_id)
    }
}
