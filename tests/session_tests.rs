//! 会话与会话注册表测试

use nonprofit_hub::{
    models::{audit::AuditAction, role::Role},
    repository::{KeyValueStore, StoreScope},
    services::{AutoSaveHooks, OrganizationSession, SessionIdentity, SessionRegistry},
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{create_test_config, memory_store, ORG};

fn identity(user_id: &str) -> SessionIdentity {
    SessionIdentity {
        organization_id: ORG.to_string(),
        user_id: user_id.to_string(),
        user_name: format!("User {}", user_id),
    }
}

#[tokio::test]
async fn test_open_logs_login_and_bootstraps_admin() {
    let store = memory_store();
    let config = create_test_config();

    let session = OrganizationSession::open(store.clone(), &config, identity("first"))
        .await
        .unwrap();
    assert_eq!(session.identity().user_id, "first");
    assert_eq!(
        session.rbac.get_user_role(None).await.map(|r| r.role),
        Some(Role::Admin)
    );

    let logs = session.audit.get_audit_logs(None).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, AuditAction::Login);

    session.close().await;
    session.close().await;
    assert!(session.is_closed());

    let logs = session.audit.get_audit_logs(None).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[1].action, AuditAction::Logout);
}

#[tokio::test]
async fn test_open_fails_cleanly_when_store_unreadable() {
    let store = memory_store();
    let config = create_test_config();
    store.set_fail_reads(true);

    // 审计初始化只入队，不读取存储；角色表载入失败时会话不成立
    let result = OrganizationSession::open(store.clone(), &config, identity("u1")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_registry_reuses_and_closes_sessions() {
    let store = memory_store();
    let registry = SessionRegistry::new(store.clone(), Arc::new(create_test_config()));

    let a = registry.session_for(&identity("alice")).await.unwrap();
    let again = registry.session_for(&identity("alice")).await.unwrap();
    assert!(Arc::ptr_eq(&a, &again));

    let b = registry.session_for(&identity("bob")).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len().await, 2);

    // alice 先打开，成为管理员；bob 没有角色
    assert_eq!(a.rbac.get_user_role(None).await.map(|r| r.role), Some(Role::Admin));
    assert!(b.rbac.get_user_role(None).await.is_none());

    assert!(registry.close(ORG, "alice").await);
    assert!(!registry.close(ORG, "alice").await);
    assert!(a.is_closed());
    assert_eq!(registry.len().await, 1);

    // 关闭后重新打开得到新会话
    let reopened = registry.session_for(&identity("alice")).await.unwrap();
    assert!(!Arc::ptr_eq(&a, &reopened));
    assert!(!reopened.is_closed());

    registry.close_all().await;
    assert!(registry.is_empty().await);
    assert!(b.is_closed());
    assert!(reopened.is_closed());
}

#[tokio::test]
async fn test_reap_idle_closes_only_idle_sessions() {
    let store = memory_store();
    let mut config = create_test_config();
    config.server.session_idle_timeout_secs = 1;
    let registry = SessionRegistry::new(store.clone(), Arc::new(config));

    let alice = registry.session_for(&identity("alice")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    let bob = registry.session_for(&identity("bob")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert_eq!(registry.reap_idle().await, 1);
    assert!(alice.is_closed());
    assert!(!bob.is_closed());
    assert_eq!(registry.len().await, 1);

    // 回收与显式关闭一样写入登出记录
    let logs = bob.audit.get_audit_logs(None).await.unwrap();
    assert!(logs
        .iter()
        .any(|l| l.user_id == "alice" && l.action == AuditAction::Logout));

    // 使用过的会话重新计时
    let again = registry.session_for(&identity("bob")).await.unwrap();
    assert!(Arc::ptr_eq(&bob, &again));
    assert_eq!(registry.reap_idle().await, 0);
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_reaper_task_empties_idle_registry() {
    let store = memory_store();
    let mut config = create_test_config();
    config.server.session_idle_timeout_secs = 1;
    let registry = Arc::new(SessionRegistry::new(store.clone(), Arc::new(config)));

    let alice = registry.session_for(&identity("alice")).await.unwrap();
    let reaper = registry.spawn_reaper(Duration::from_millis(100));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(registry.is_empty().await);
    assert!(alice.is_closed());

    // 注册表释放后任务自行结束
    drop(registry);
    tokio::time::timeout(Duration::from_secs(1), reaper)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_session_drafts_are_personal() {
    let store = memory_store();
    let config = create_test_config();
    let session = OrganizationSession::open(store.clone(), &config, identity("writer"))
        .await
        .unwrap();

    let key = session.draft_key("profile");
    assert_eq!(key, format!("autosave_{}_writer_profile", ORG));

    let autosave = session.autosave("profile", AutoSaveHooks::default());
    autosave.update(json!({"mission": "feed people"}));
    autosave.shutdown().await;

    assert_eq!(store.scope_of(&key).await, Some(StoreScope::Personal));
    let draft = session
        .form_recovery("profile")
        .check::<serde_json::Value>()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(draft.data["mission"], "feed people");

    session.form_recovery("profile").discard().await.unwrap();
    assert!(store.get(&key).await.unwrap().is_none());
    session.close().await;
}
