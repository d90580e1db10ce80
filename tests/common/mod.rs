//! 测试公共模块
//! 提供内存存储上的配置、服务与应用状态

#![allow(dead_code)]

use nonprofit_hub::{
    auth::JwtService,
    config::{
        AnalyticsConfig, AppConfig, AuditConfig, AutoSaveConfig, DatabaseConfig, LoggingConfig,
        SecurityConfig, ServerConfig, StorageBackend, StorageConfig,
    },
    middleware::AppState,
    repository::{KeyValueStore, MemoryStore},
    services::{AuditService, AuditSession, RbacService, SessionRegistry},
};
use secrecy::Secret;
use std::sync::Arc;

pub const ORG: &str = "org-test";

/// 创建测试配置
pub fn create_test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            addr: "127.0.0.1:0".to_string(),
            graceful_shutdown_timeout_secs: 5,
            session_idle_timeout_secs: 1800,
        },
        storage: StorageConfig {
            backend: StorageBackend::Memory,
        },
        database: DatabaseConfig {
            url: None,
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 300,
            max_lifetime_secs: 1800,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
        security: SecurityConfig {
            jwt_secret: Secret::new("test-secret-key-for-testing-only-min-32-chars".to_string()),
            access_token_exp_secs: 300,
        },
        audit: AuditConfig::default(),
        analytics: AnalyticsConfig::default(),
        autosave: AutoSaveConfig::default(),
    }
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// 未初始化的审计服务（不启动定时刷盘，不记录登录）
pub fn audit_service(store: Arc<MemoryStore>, user_id: &str) -> Arc<AuditService> {
    audit_service_with(store, user_id, AuditConfig::default())
}

pub fn audit_service_with(
    store: Arc<MemoryStore>,
    user_id: &str,
    config: AuditConfig,
) -> Arc<AuditService> {
    let store: Arc<dyn KeyValueStore> = store;
    Arc::new(AuditService::new(
        store,
        config,
        AuditSession::new(ORG, user_id, format!("User {}", user_id)),
    ))
}

/// 以 `user_id` 身份载入角色表的 RBAC 服务
pub async fn rbac_for(store: Arc<MemoryStore>, user_id: &str) -> Arc<RbacService> {
    let audit = audit_service(store.clone(), user_id);
    let store: Arc<dyn KeyValueStore> = store;
    let rbac = Arc::new(RbacService::new(store, audit));
    rbac.initialize().await.expect("Failed to initialize RBAC");
    rbac
}

/// 创建测试应用状态
pub fn create_test_app_state(store: Arc<MemoryStore>) -> Arc<AppState> {
    let config = Arc::new(create_test_config());
    let store: Arc<dyn KeyValueStore> = store;
    let jwt_service =
        Arc::new(JwtService::from_config(&config.security).expect("Failed to create JWT service"));
    let sessions = Arc::new(SessionRegistry::new(store.clone(), config.clone()));

    Arc::new(AppState {
        config,
        store,
        db: None,
        sessions,
        jwt_service,
    })
}

/// 生成 `Authorization` 头的值
pub fn bearer(state: &AppState, user_id: &str) -> String {
    let token = state
        .jwt_service
        .generate_access_token(user_id, &format!("User {}", user_id), ORG)
        .expect("Failed to generate token");
    format!("Bearer {}", token)
}
