//! 自动保存与草稿恢复
//!
//! `AutoSave` 在后台任务中对更新做防抖，空闲 `debounce` 后写入
//! `{data, savedAt}` 并等待 `on_save` 完成，两者都成功才算一次保存。
//! 任一步失败按 `retry_base × 第几次` 等待后重试，重试用尽后调用
//! `on_error` 并保持未保存状态，不再自动重排。

use crate::{
    config::AutoSaveConfig,
    error::{AppError, Result},
    repository::{self, KeyValueStore, StoreScope},
};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// 持久化的草稿
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedDraft<T> {
    pub data: T,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveStatus {
    pub is_saving: bool,
    pub last_saved: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub save_count: u64,
    pub has_unsaved_changes: bool,
}

#[derive(Debug, Clone)]
pub struct AutoSaveOptions {
    pub key: String,
    pub scope: StoreScope,
    pub debounce: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl AutoSaveOptions {
    pub fn from_config(key: impl Into<String>, config: &AutoSaveConfig) -> Self {
        Self {
            key: key.into(),
            scope: StoreScope::Personal,
            debounce: Duration::from_millis(config.debounce_ms),
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
        }
    }
}

/// 保存后执行的异步回调；返回错误时本次保存按失败重试
pub type SaveHook<T> = Arc<dyn Fn(&T) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&AppError) + Send + Sync>;

pub struct AutoSaveHooks<T> {
    pub on_save: Option<SaveHook<T>>,
    pub on_error: Option<ErrorHook>,
}

impl<T> Default for AutoSaveHooks<T> {
    fn default() -> Self {
        Self {
            on_save: None,
            on_error: None,
        }
    }
}

enum Command<T> {
    Update(T),
    SaveNow(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

pub struct AutoSave<T> {
    tx: mpsc::UnboundedSender<Command<T>>,
    status: watch::Receiver<AutoSaveStatus>,
    worker: JoinHandle<()>,
}

impl<T> AutoSave<T>
where
    T: Serialize + Send + Sync + 'static,
{
    pub fn spawn(store: Arc<dyn KeyValueStore>, options: AutoSaveOptions, hooks: AutoSaveHooks<T>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(AutoSaveStatus::default());

        let worker = Worker {
            store,
            options,
            hooks,
            status: status_tx,
        };
        let worker = tokio::spawn(worker.run(rx));

        Self { tx, status, worker }
    }

    /// 提交新状态，重新开始防抖计时
    pub fn update(&self, state: T) {
        if self.tx.send(Command::Update(state)).is_err() {
            tracing::warn!("Auto-save worker stopped, update dropped");
        }
    }

    /// 立即保存待写入的状态
    pub async fn save_now(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::SaveNow(ack)).is_ok() {
            let _ = done.await;
        }
    }

    pub fn status(&self) -> AutoSaveStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AutoSaveStatus> {
        self.status.clone()
    }

    /// 保存待写入的状态并停止后台任务
    pub async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(Command::Shutdown(ack)).is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Auto-save worker ended abnormally");
        }
    }
}

struct Worker<T> {
    store: Arc<dyn KeyValueStore>,
    options: AutoSaveOptions,
    hooks: AutoSaveHooks<T>,
    status: watch::Sender<AutoSaveStatus>,
}

impl<T> Worker<T>
where
    T: Serialize + Send + Sync + 'static,
{
    async fn run(self, mut rx: mpsc::UnboundedReceiver<Command<T>>) {
        let mut pending: Option<T> = None;
        let mut deadline: Option<Instant> = None;

        loop {
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = rx.recv() => match command {
                    Some(Command::Update(state)) => {
                        pending = Some(state);
                        deadline = Some(Instant::now() + self.options.debounce);
                        self.status.send_modify(|s| s.has_unsaved_changes = true);
                    }
                    Some(Command::SaveNow(ack)) => {
                        deadline = None;
                        if let Some(state) = pending.take() {
                            self.save(state).await;
                        }
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown(ack)) => {
                        if let Some(state) = pending.take() {
                            self.save(state).await;
                        }
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        if let Some(state) = pending.take() {
                            self.save(state).await;
                        }
                        break;
                    }
                },
                _ = timer => {
                    deadline = None;
                    if let Some(state) = pending.take() {
                        self.save(state).await;
                    }
                }
            }
        }

        tracing::debug!(key = %self.options.key, "Auto-save worker stopped");
    }

    async fn save(&self, state: T) {
        self.status.send_modify(|s| {
            s.is_saving = true;
            s.error = None;
        });

        let mut attempt = 0u32;
        loop {
            let draft = SavedDraft {
                data: &state,
                saved_at: Utc::now(),
            };

            let outcome = match repository::set_json(
                self.store.as_ref(),
                &self.options.key,
                &draft,
                self.options.scope,
            )
            .await
            {
                Ok(()) => match &self.hooks.on_save {
                    Some(on_save) => on_save(&state).await,
                    None => Ok(()),
                },
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    self.status.send_modify(|s| {
                        s.is_saving = false;
                        s.last_saved = Some(draft.saved_at);
                        s.save_count += 1;
                        s.has_unsaved_changes = false;
                    });
                    tracing::debug!(key = %self.options.key, "Draft saved");
                    return;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.options.max_retries {
                        tracing::error!(
                            key = %self.options.key,
                            attempts = attempt,
                            error = %e,
                            "Auto-save failed, giving up"
                        );
                        self.status.send_modify(|s| {
                            s.is_saving = false;
                            s.error = Some(e.to_string());
                            s.has_unsaved_changes = true;
                        });
                        if let Some(on_error) = &self.hooks.on_error {
                            on_error(&e);
                        }
                        return;
                    }

                    let wait = self.options.retry_base * attempt;
                    tracing::warn!(
                        key = %self.options.key,
                        attempt,
                        retry_in_ms = wait.as_millis() as u64,
                        error = %e,
                        "Auto-save failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

/// 草稿恢复
pub struct FormRecovery {
    store: Arc<dyn KeyValueStore>,
    key: String,
    window: chrono::Duration,
}

impl FormRecovery {
    pub fn new(store: Arc<dyn KeyValueStore>, key: impl Into<String>, config: &AutoSaveConfig) -> Self {
        Self {
            store,
            key: key.into(),
            window: chrono::Duration::hours(config.recovery_window_hours),
        }
    }

    /// 返回恢复窗口内的草稿；过旧的草稿视为不存在
    pub async fn check<T: DeserializeOwned>(&self) -> Result<Option<SavedDraft<T>>> {
        let draft: Option<SavedDraft<T>> = repository::get_json(self.store.as_ref(), &self.key).await?;
        Ok(draft.filter(|d| Utc::now() - d.saved_at < self.window))
    }

    pub async fn discard(&self) -> Result<()> {
        self.store.remove(&self.key).await
    }
}
