//! 角色与权限服务集成测试

use chrono::{Duration, Utc};
use nonprofit_hub::{
    models::{audit::AuditAction, role::*},
    repository::{self, keys},
    services::{PermissionChecker, RbacService, SessionPermissions},
};
use std::collections::{BTreeSet, HashMap};

mod common;
use common::{memory_store, rbac_for, ORG};

#[tokio::test]
async fn test_first_user_bootstraps_as_admin() {
    let store = memory_store();
    let rbac = rbac_for(store.clone(), "founder").await;

    let role = rbac.get_user_role(None).await.unwrap();
    assert_eq!(role.role, Role::Admin);
    assert_eq!(role.assigned_by, "system");

    let stored: HashMap<String, UserRole> =
        repository::get_json(store.as_ref(), &keys::rbac_roles(ORG))
            .await
            .unwrap()
            .unwrap();
    assert!(stored.contains_key("founder"));

    // 角色表非空后，新用户不会被提升
    let other = rbac_for(store, "newcomer").await;
    assert!(other.get_user_role(None).await.is_none());
    assert!(!other.can_view_section("basicInfo", None).await);
}

#[tokio::test]
async fn test_assign_viewer_then_revoke() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;

    assert!(admin
        .assign_role("viewer", Role::Viewer, BTreeSet::new(), None)
        .await
        .unwrap());

    let viewer = rbac_for(store.clone(), "viewer").await;
    assert!(viewer.can_view_section("basicInfo", None).await);
    assert!(!viewer.can_edit_section("basicInfo", None).await);
    assert!(!viewer.can_edit_field("basicInfo.ein", None).await);

    // 没有 manage_roles 的用户无法分配角色
    assert!(!viewer
        .assign_role("viewer", Role::Admin, BTreeSet::new(), None)
        .await
        .unwrap());
    assert!(viewer.get_all_user_roles().await.is_empty());

    assert!(admin.revoke_role("viewer").await.unwrap());
    assert!(!admin.revoke_role("viewer").await.unwrap());
    assert!(admin.get_user_role(Some("viewer")).await.is_none());
}

#[tokio::test]
async fn test_role_changes_are_audited() {
    let store = memory_store();
    let audit = common::audit_service(store.clone(), "admin");
    let admin = RbacService::new(store, audit.clone());
    admin.initialize().await.unwrap();

    admin
        .assign_role("ed", Role::Editor, BTreeSet::new(), None)
        .await
        .unwrap();
    admin
        .assign_role("ed", Role::Manager, BTreeSet::new(), None)
        .await
        .unwrap();
    admin.lock_section("financials").await.unwrap();

    let history = audit
        .get_resource_history("rbac.roles", Some("ed"))
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, AuditAction::Create);
    assert_eq!(history[1].action, AuditAction::Update);
    assert_eq!(history[1].changes[0].old_value, "editor");
    assert_eq!(history[1].changes[0].new_value, "manager");

    let locks = audit.get_resource_history("financials", None).await.unwrap();
    assert_eq!(locks.len(), 1);
    assert_eq!(locks[0].action.as_str(), "lock");
}

#[tokio::test]
async fn test_manager_can_edit_and_lock() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role("mgr", Role::Manager, BTreeSet::new(), None)
        .await
        .unwrap();
    admin
        .assign_role("ed", Role::Editor, BTreeSet::new(), None)
        .await
        .unwrap();

    let manager = rbac_for(store.clone(), "mgr").await;
    assert!(manager.can_edit_section("financials", None).await);
    assert!(manager.can_lock_section("financials", None).await);
    assert!(manager.lock_section("financials").await.unwrap());
    assert!(manager.is_section_locked("financials").await);
    // 锁定者仍可编辑
    assert!(manager.can_edit_section("financials", None).await);

    let editor = rbac_for(store.clone(), "ed").await;
    assert!(editor.is_section_locked("financials").await);
    assert!(!editor.can_edit_section("financials", None).await);
    assert!(!editor.can_edit_field("financials.budget", None).await);
    assert!(editor.can_view_section("financials", None).await);
    assert!(!editor.lock_section("governance").await.unwrap());
    assert!(!editor.unlock_section("financials").await.unwrap());

    let locks = editor.section_locks().await;
    assert_eq!(locks.len(), 1);
    assert_eq!(locks["financials"].locked_by.as_deref(), Some("mgr"));

    assert!(manager.unlock_section("financials").await.unwrap());
    assert!(manager.unlock_section("financials").await.unwrap());
    assert!(!manager.is_section_locked("financials").await);
}

#[tokio::test]
async fn test_lock_is_idempotent_and_keeps_locker() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role("mgr", Role::Manager, BTreeSet::new(), None)
        .await
        .unwrap();

    assert!(admin.lock_section("governance").await.unwrap());

    let manager = rbac_for(store, "mgr").await;
    assert!(manager.lock_section("governance").await.unwrap());
    let locks = manager.section_locks().await;
    assert_eq!(locks["governance"].locked_by.as_deref(), Some("admin"));
}

#[tokio::test]
async fn test_expired_role_is_evicted() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role(
            "temp",
            Role::Editor,
            BTreeSet::new(),
            Some(Utc::now() - Duration::minutes(1)),
        )
        .await
        .unwrap();
    admin
        .assign_role(
            "later",
            Role::Editor,
            BTreeSet::new(),
            Some(Utc::now() + Duration::days(1)),
        )
        .await
        .unwrap();

    assert!(admin.get_user_role(Some("temp")).await.is_none());
    assert!(!admin.has_permission(Permission::ViewAll, Some("temp")).await);
    assert!(admin.get_user_role(Some("later")).await.is_some());

    let stored: HashMap<String, UserRole> =
        repository::get_json(store.as_ref(), &keys::rbac_roles(ORG))
            .await
            .unwrap()
            .unwrap();
    assert!(!stored.contains_key("temp"));

    let users: Vec<String> = admin
        .get_all_user_roles()
        .await
        .into_iter()
        .map(|r| r.user_id)
        .collect();
    assert_eq!(users, vec!["admin".to_string(), "later".to_string()]);
}

#[tokio::test]
async fn test_custom_permissions_extend_role() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role(
            "viewer",
            Role::Viewer,
            BTreeSet::from([Permission::ViewAuditLogs, Permission::LockSection]),
            None,
        )
        .await
        .unwrap();

    let viewer = rbac_for(store, "viewer").await;
    assert!(viewer.has_permission(Permission::ViewAuditLogs, None).await);
    // 锁定还要求 admin 或 manager 角色
    assert!(!viewer.can_lock_section("basicInfo", None).await);
}

#[tokio::test]
async fn test_section_and_field_overrides() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role("ed", Role::Editor, BTreeSet::new(), None)
        .await
        .unwrap();

    assert!(admin
        .set_section_override("ed", "financials", AccessOverride::hidden())
        .await
        .unwrap());
    assert!(admin
        .set_field_override("ed", "governance.boardMembers", AccessOverride::read_only())
        .await
        .unwrap());
    // 没有角色的用户不能设置覆盖
    assert!(!admin
        .set_section_override("ghost", "financials", AccessOverride::hidden())
        .await
        .unwrap());

    let editor = rbac_for(store.clone(), "ed").await;
    assert!(!editor.can_view_section("financials", None).await);
    assert!(!editor.can_view_field("financials.budget", None).await);
    assert!(editor.can_view_field("governance.boardMembers", None).await);
    assert!(!editor.can_edit_field("governance.boardMembers", None).await);
    assert!(editor.can_edit_field("governance.mission", None).await);

    assert!(admin.clear_section_override("ed", "financials").await.unwrap());
    assert!(!admin.clear_section_override("ed", "financials").await.unwrap());

    let editor = rbac_for(store, "ed").await;
    assert!(editor.can_view_section("financials", None).await);
}

#[tokio::test]
async fn test_assign_role_replaces_overrides() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role("ed", Role::Editor, BTreeSet::new(), None)
        .await
        .unwrap();
    admin
        .set_section_override("ed", "financials", AccessOverride::hidden())
        .await
        .unwrap();
    admin
        .assign_role("ed", Role::Editor, BTreeSet::new(), None)
        .await
        .unwrap();

    let role = admin.get_user_role(Some("ed")).await.unwrap();
    assert!(role.section_permissions.is_empty());
}

#[tokio::test]
async fn test_can_manage_user_respects_hierarchy() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role("mgr", Role::Manager, BTreeSet::new(), None)
        .await
        .unwrap();
    admin
        .assign_role("ed", Role::Editor, BTreeSet::new(), None)
        .await
        .unwrap();

    let manager = rbac_for(store.clone(), "mgr").await;
    assert!(manager.can_manage_user("ed").await);
    assert!(manager.can_manage_user("nobody").await);
    assert!(!manager.can_manage_user("admin").await);

    let editor = rbac_for(store, "ed").await;
    assert!(!editor.can_manage_user("nobody").await);
    assert!(admin.can_manage_user("mgr").await);
}

#[tokio::test]
async fn test_session_permissions_checker() {
    let store = memory_store();
    let admin = rbac_for(store, "admin").await;
    let checker = SessionPermissions::new(admin.clone());

    assert_eq!(checker.role().await, Some(Role::Admin));
    assert!(checker.can_edit_section("basicInfo").await);
    assert!(checker.lock_section("basicInfo").await.unwrap());

    let access = checker.section_access("basicInfo").await;
    assert!(access.locked);
    assert!(access.can_edit);
    assert!(access.can_lock);
}

#[tokio::test]
async fn test_changes_reach_already_open_sessions() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    let member = rbac_for(store.clone(), "member").await;
    let editor = rbac_for(store.clone(), "editor").await;

    assert!(!member.can_edit_section("financials", None).await);

    admin
        .assign_role("member", Role::Manager, BTreeSet::new(), None)
        .await
        .unwrap();
    admin
        .assign_role("editor", Role::Editor, BTreeSet::new(), None)
        .await
        .unwrap();
    assert!(member.can_edit_section("financials", None).await);
    assert!(editor.can_edit_section("financials", None).await);

    admin.lock_section("financials").await.unwrap();
    assert!(member.is_section_locked("financials").await);
    assert!(!editor.can_edit_section("financials", None).await);
    assert!(!editor.can_edit_field("financials.budget", None).await);
    assert!(member.can_edit_section("financials", None).await);

    assert!(admin.revoke_role("member").await.unwrap());
    assert!(member.get_user_role(None).await.is_none());
    assert!(!member.can_view_section("financials", None).await);
    assert!(!member.has_permission(Permission::ViewAuditLogs, None).await);
}

#[tokio::test]
async fn test_stale_session_does_not_overwrite_newer_roles() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role("deputy", Role::Admin, BTreeSet::new(), None)
        .await
        .unwrap();
    let deputy = rbac_for(store.clone(), "deputy").await;

    // deputy 的会话打开之后 admin 又分配了角色
    admin
        .assign_role("writer", Role::Editor, BTreeSet::new(), None)
        .await
        .unwrap();
    assert!(deputy
        .set_section_override("writer", "governance", AccessOverride::read_only())
        .await
        .unwrap());
    assert!(deputy
        .assign_role("reader", Role::Viewer, BTreeSet::new(), None)
        .await
        .unwrap());

    let roles: HashMap<String, UserRole> =
        repository::get_json(store.as_ref(), &keys::rbac_roles(ORG))
            .await
            .unwrap()
            .unwrap();
    let mut ids: Vec<&str> = roles.keys().map(String::as_str).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec!["admin", "deputy", "reader", "writer"]);
    assert!(!roles["writer"].section_permissions["governance"].can_edit);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_assignments_from_separate_sessions() {
    let store = memory_store();
    let admin = rbac_for(store.clone(), "admin").await;
    admin
        .assign_role("second", Role::Admin, BTreeSet::new(), None)
        .await
        .unwrap();
    let second = rbac_for(store.clone(), "second").await;

    let a = {
        let admin = admin.clone();
        tokio::spawn(async move {
            for i in 0..20 {
                admin
                    .assign_role(&format!("a{}", i), Role::Viewer, BTreeSet::new(), None)
                    .await
                    .unwrap();
            }
        })
    };
    let b = tokio::spawn(async move {
        for i in 0..20 {
            second
                .assign_role(&format!("b{}", i), Role::Editor, BTreeSet::new(), None)
                .await
                .unwrap();
        }
    });
    a.await.unwrap();
    b.await.unwrap();

    assert_eq!(admin.get_all_user_roles().await.len(), 42);
}
