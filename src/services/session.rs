//! 会话：一个 (组织, 用户) 对应一组服务实例

use crate::{
    config::{AppConfig, AutoSaveConfig},
    error::Result,
    repository::KeyValueStore,
    services::{
        analytics_service::AnalyticsService,
        audit_service::{AuditService, AuditSession},
        autosave::{AutoSave, AutoSaveHooks, AutoSaveOptions, FormRecovery},
        permissions::SessionPermissions,
        rbac_service::RbacService,
    },
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// 会话身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub organization_id: String,
    pub user_id: String,
    pub user_name: String,
}

impl SessionIdentity {
    fn key(&self) -> (String, String) {
        (self.organization_id.clone(), self.user_id.clone())
    }
}

pub struct OrganizationSession {
    identity: SessionIdentity,
    store: Arc<dyn KeyValueStore>,
    autosave: AutoSaveConfig,
    opened_at: Instant,
    /// 最近一次使用距 opened_at 的毫秒数
    last_active_ms: AtomicU64,
    pub audit: Arc<AuditService>,
    pub rbac: Arc<RbacService>,
    pub analytics: Arc<AnalyticsService>,
}

impl OrganizationSession {
    /// 打开会话：启动审计（记录登录）并载入角色表
    pub async fn open(
        store: Arc<dyn KeyValueStore>,
        config: &AppConfig,
        identity: SessionIdentity,
    ) -> Result<Self> {
        let audit = Arc::new(AuditService::new(
            store.clone(),
            config.audit.clone(),
            AuditSession::new(
                identity.organization_id.clone(),
                identity.user_id.clone(),
                identity.user_name.clone(),
            ),
        ));
        audit.initialize().await?;

        let rbac = Arc::new(RbacService::new(store.clone(), audit.clone()));
        if let Err(e) = rbac.initialize().await {
            audit.cleanup().await;
            return Err(e);
        }

        let analytics = Arc::new(AnalyticsService::new(
            store.clone(),
            audit.clone(),
            config.analytics.clone(),
        ));

        tracing::info!(
            organization_id = %identity.organization_id,
            user_id = %identity.user_id,
            "Session opened"
        );

        Ok(Self {
            identity,
            store,
            autosave: config.autosave.clone(),
            opened_at: Instant::now(),
            last_active_ms: AtomicU64::new(0),
            audit,
            rbac,
            analytics,
        })
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn permissions(&self) -> SessionPermissions {
        SessionPermissions::new(self.rbac.clone())
    }

    /// 用户私有的草稿键
    pub fn draft_key(&self, form: &str) -> String {
        format!(
            "autosave_{}_{}_{}",
            self.identity.organization_id, self.identity.user_id, form
        )
    }

    pub fn autosave<T>(&self, form: &str, hooks: AutoSaveHooks<T>) -> AutoSave<T>
    where
        T: Serialize + Send + Sync + 'static,
    {
        AutoSave::spawn(
            self.store.clone(),
            AutoSaveOptions::from_config(self.draft_key(form), &self.autosave),
            hooks,
        )
    }

    pub fn form_recovery(&self, form: &str) -> FormRecovery {
        FormRecovery::new(self.store.clone(), self.draft_key(form), &self.autosave)
    }

    pub fn is_closed(&self) -> bool {
        self.audit.is_closed()
    }

    /// 标记会话刚被使用
    pub fn touch(&self) {
        let elapsed = self.opened_at.elapsed().as_millis() as u64;
        self.last_active_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        self.opened_at.elapsed().saturating_sub(last)
    }

    /// 结束会话；重复调用无效果
    pub async fn close(&self) {
        self.audit.cleanup().await;
    }
}

/// 空闲会话回收的检查间隔
pub const SESSION_REAP_INTERVAL: Duration = Duration::from_secs(60);

/// 按需打开会话，关闭时执行审计清理；空闲超时的会话由回收任务关闭
pub struct SessionRegistry {
    store: Arc<dyn KeyValueStore>,
    config: Arc<AppConfig>,
    sessions: RwLock<HashMap<(String, String), Arc<OrganizationSession>>>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, config: Arc<AppConfig>) -> Self {
        Self {
            store,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn session_for(&self, identity: &SessionIdentity) -> Result<Arc<OrganizationSession>> {
        let key = identity.key();

        if let Some(session) = self.sessions.read().await.get(&key) {
            if !session.is_closed() {
                session.touch();
                return Ok(session.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(&key) {
            if !session.is_closed() {
                session.touch();
                return Ok(session.clone());
            }
        }

        let session = Arc::new(
            OrganizationSession::open(self.store.clone(), &self.config, identity.clone()).await?,
        );
        sessions.insert(key, session.clone());
        metrics::gauge!("sessions.open").set(sessions.len() as f64);
        Ok(session)
    }

    /// 关闭并移除会话；不存在时返回 false
    pub async fn close(&self, organization_id: &str, user_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(&(organization_id.to_string(), user_id.to_string()));
            metrics::gauge!("sessions.open").set(sessions.len() as f64);
            removed
        };

        match removed {
            Some(session) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// 关闭空闲超过 `server.session_idle_timeout_secs` 的会话，返回关闭数量
    pub async fn reap_idle(&self) -> usize {
        let timeout = self.config.server.session_idle_timeout();
        let idle: Vec<Arc<OrganizationSession>> = {
            let mut sessions = self.sessions.write().await;
            let keys: Vec<(String, String)> = sessions
                .iter()
                .filter(|(_, s)| s.is_closed() || s.idle_for() >= timeout)
                .map(|(key, _)| key.clone())
                .collect();
            let idle = keys.iter().filter_map(|key| sessions.remove(key)).collect();
            metrics::gauge!("sessions.open").set(sessions.len() as f64);
            idle
        };

        let count = idle.len();
        if count > 0 {
            futures::future::join_all(idle.iter().map(|s| s.close())).await;
            tracing::info!(count, "Idle sessions closed");
        }
        count
    }

    /// 后台定期回收空闲会话；注册表被释放后任务自行退出
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.reap_idle().await;
            }
        })
    }

    pub async fn close_all(&self) {
        let sessions: Vec<Arc<OrganizationSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let count = sessions.len();

        futures::future::join_all(sessions.iter().map(|s| s.close())).await;
        metrics::gauge!("sessions.open").set(0.0);
        tracing::info!(count, "All sessions closed");
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
