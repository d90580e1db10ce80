//! 角色与权限服务
//!
//! 角色表与分区锁定策略只存在于存储中：每次检查都重新读取，修改通过
//! 原子更新写回。同一组织的所有会话因此立即看到彼此的授予、撤销与锁定。
//! 过期角色在读取时被移除。读取失败时检查一律拒绝。

use crate::{
    error::Result,
    models::{audit::*, role::*},
    repository::{self, keys, KeyValueStore, StoreScope},
    services::audit_service::{AuditLogParams, AuditService},
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

const SYSTEM_ASSIGNER: &str = "system";
const ROLES_RESOURCE: &str = "rbac.roles";

type RoleTable = HashMap<String, UserRole>;
type SectionTable = BTreeMap<String, SectionPolicy>;

pub struct RbacService {
    store: Arc<dyn KeyValueStore>,
    audit: Arc<AuditService>,
    organization_id: String,
    current_user_id: String,
    roles_key: String,
    sections_key: String,
}

impl RbacService {
    pub fn new(store: Arc<dyn KeyValueStore>, audit: Arc<AuditService>) -> Self {
        let session = audit.session();
        Self {
            roles_key: keys::rbac_roles(&session.organization_id),
            sections_key: keys::rbac_section_permissions(&session.organization_id),
            organization_id: session.organization_id.clone(),
            current_user_id: session.user_id.clone(),
            store,
            audit,
        }
    }

    /// 校验存储可读；角色表为空时当前用户成为管理员
    pub async fn initialize(&self) -> Result<()> {
        let sections = self.load_sections().await?;

        let bootstrap = UserRole {
            user_id: self.current_user_id.clone(),
            organization_id: self.organization_id.clone(),
            role: Role::Admin,
            custom_permissions: BTreeSet::new(),
            assigned_by: SYSTEM_ASSIGNER.to_string(),
            assigned_at: Utc::now(),
            expires_at: None,
            section_permissions: HashMap::new(),
            field_permissions: HashMap::new(),
        };
        let bootstrapped = repository::update_json(
            self.store.as_ref(),
            &self.roles_key,
            StoreScope::Organization,
            |roles: &mut RoleTable| {
                roles.is_empty().then(|| {
                    roles.insert(bootstrap.user_id.clone(), bootstrap);
                })
            },
        )
        .await?;

        if bootstrapped.is_some() {
            tracing::info!(
                organization_id = %self.organization_id,
                user_id = %self.current_user_id,
                "Empty role table, bootstrapped session user as admin"
            );
        }

        tracing::debug!(
            organization_id = %self.organization_id,
            sections = sections.len(),
            "RBAC state checked"
        );
        Ok(())
    }

    async fn load_roles(&self) -> Result<RoleTable> {
        Ok(repository::get_json(self.store.as_ref(), &self.roles_key)
            .await?
            .unwrap_or_default())
    }

    async fn load_sections(&self) -> Result<SectionTable> {
        Ok(repository::get_json(self.store.as_ref(), &self.sections_key)
            .await?
            .unwrap_or_default())
    }

    async fn record(&self, params: AuditLogParams<'_>) {
        if let Err(e) = self.audit.log_action(params).await {
            tracing::warn!(error = %e, "Failed to record RBAC audit entry");
        }
    }

    fn resolve<'a>(&'a self, user_id: Option<&'a str>) -> &'a str {
        user_id.unwrap_or(self.current_user_id.as_str())
    }

    /// 获取用户角色；过期的角色被移除并返回 None
    pub async fn get_user_role(&self, user_id: Option<&str>) -> Option<UserRole> {
        let user_id = self.resolve(user_id);
        let now = Utc::now();

        let roles = match self.load_roles().await {
            Ok(roles) => roles,
            Err(e) => {
                tracing::warn!(
                    organization_id = %self.organization_id,
                    user_id = %user_id,
                    error = %e,
                    "Failed to load role table, denying"
                );
                return None;
            }
        };

        match roles.get(user_id) {
            None => return None,
            Some(role) if !role.is_expired_at(now) => return Some(role.clone()),
            Some(_) => {}
        }

        // 持久化失败不影响判定，下次读取会再次移除
        let evicted = repository::update_json(
            self.store.as_ref(),
            &self.roles_key,
            StoreScope::Organization,
            |roles: &mut RoleTable| {
                roles
                    .get(user_id)
                    .is_some_and(|r| r.is_expired_at(now))
                    .then(|| roles.remove(user_id))
            },
        )
        .await;
        match evicted {
            Ok(Some(_)) => tracing::info!(
                organization_id = %self.organization_id,
                user_id = %user_id,
                "Expired role evicted"
            ),
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to persist role eviction"),
        }
        None
    }

    pub async fn has_permission(&self, permission: Permission, user_id: Option<&str>) -> bool {
        self.get_user_role(user_id)
            .await
            .is_some_and(|role| role.grants(permission))
    }

    pub async fn assign_role(
        &self,
        user_id: &str,
        role: Role,
        custom_permissions: BTreeSet<Permission>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        if !self.has_permission(Permission::ManageRoles, None).await {
            tracing::warn!(
                actor = %self.current_user_id,
                target = %user_id,
                "Role assignment denied"
            );
            return Ok(false);
        }

        let assigned = UserRole {
            user_id: user_id.to_string(),
            organization_id: self.organization_id.clone(),
            role,
            custom_permissions: custom_permissions.clone(),
            assigned_by: self.current_user_id.clone(),
            assigned_at: Utc::now(),
            expires_at,
            section_permissions: HashMap::new(),
            field_permissions: HashMap::new(),
        };
        let previous = repository::update_json(
            self.store.as_ref(),
            &self.roles_key,
            StoreScope::Organization,
            |roles: &mut RoleTable| Some(roles.insert(user_id.to_string(), assigned)),
        )
        .await?
        .flatten();

        let old_role = previous
            .as_ref()
            .map(|r| Value::from(r.role.as_str()))
            .unwrap_or(Value::Null);
        let mut metadata = Map::new();
        metadata.insert(
            "customPermissions".into(),
            json!(custom_permissions.iter().map(|p| p.as_str()).collect::<Vec<_>>()),
        );
        if let Some(at) = expires_at {
            metadata.insert("expiresAt".into(), Value::from(at.to_rfc3339()));
        }

        let action = if previous.is_some() {
            AuditAction::Update
        } else {
            AuditAction::Create
        };
        self.record(
            AuditLogParams::new(action, ROLES_RESOURCE)
                .resource_id(user_id)
                .changes(vec![FieldChange::new(
                    "role",
                    old_role,
                    Value::from(role.as_str()),
                )])
                .metadata(metadata),
        )
        .await;

        tracing::info!(
            organization_id = %self.organization_id,
            actor = %self.current_user_id,
            target = %user_id,
            role = %role,
            "Role assigned"
        );
        Ok(true)
    }

    /// 撤销角色；无权限或用户本无角色时返回 false
    pub async fn revoke_role(&self, user_id: &str) -> Result<bool> {
        if !self.has_permission(Permission::ManageRoles, None).await {
            tracing::warn!(
                actor = %self.current_user_id,
                target = %user_id,
                "Role revocation denied"
            );
            return Ok(false);
        }

        let removed = repository::update_json(
            self.store.as_ref(),
            &self.roles_key,
            StoreScope::Organization,
            |roles: &mut RoleTable| roles.remove(user_id),
        )
        .await?;

        let Some(removed) = removed else {
            return Ok(false);
        };

        self.record(
            AuditLogParams::new(AuditAction::Delete, ROLES_RESOURCE)
                .resource_id(user_id)
                .changes(vec![FieldChange::new(
                    "role",
                    Value::from(removed.role.as_str()),
                    Value::Null,
                )]),
        )
        .await;

        tracing::info!(
            organization_id = %self.organization_id,
            actor = %self.current_user_id,
            target = %user_id,
            "Role revoked"
        );
        Ok(true)
    }

    /// 满足锁定条件：拥有 lock_section、角色为 admin 或 manager，且覆盖未禁止
    fn may_lock(role: &UserRole, section_id: &str) -> bool {
        role.grants(Permission::LockSection)
            && matches!(role.role, Role::Admin | Role::Manager)
            && role
                .section_permissions
                .get(section_id)
                .map_or(true, |o| o.can_lock)
    }

    pub async fn can_view_section(&self, section_id: &str, user_id: Option<&str>) -> bool {
        let Some(role) = self.get_user_role(user_id).await else {
            return false;
        };
        Self::view_allowed(&role, section_id)
    }

    fn view_allowed(role: &UserRole, section_id: &str) -> bool {
        if role.role == Role::Admin {
            return true;
        }
        if let Some(o) = role.section_permissions.get(section_id) {
            return o.can_view;
        }
        role.grants(Permission::ViewSection) || role.grants(Permission::ViewAll)
    }

    pub async fn can_edit_section(&self, section_id: &str, user_id: Option<&str>) -> bool {
        let Some(role) = self.get_user_role(user_id).await else {
            return false;
        };
        let locked = self.is_section_locked(section_id).await;
        Self::edit_allowed(&role, section_id, locked)
    }

    fn edit_allowed(role: &UserRole, section_id: &str, locked: bool) -> bool {
        if locked && !Self::may_lock(role, section_id) {
            return false;
        }
        match role.role {
            Role::Admin => return true,
            Role::Viewer => return false,
            _ => {}
        }
        if let Some(o) = role.section_permissions.get(section_id) {
            return o.can_edit;
        }
        role.grants(Permission::EditSection) || role.grants(Permission::EditAll)
    }

    pub async fn can_lock_section(&self, section_id: &str, user_id: Option<&str>) -> bool {
        self.get_user_role(user_id)
            .await
            .is_some_and(|role| Self::may_lock(&role, section_id))
    }

    pub async fn can_view_field(&self, field_path: &str, user_id: Option<&str>) -> bool {
        let Some(role) = self.get_user_role(user_id).await else {
            return false;
        };
        if role.role == Role::Admin {
            return true;
        }
        if let Some(o) = role.field_permissions.get(field_path) {
            return o.can_view;
        }
        Self::view_allowed(&role, section_of(field_path))
    }

    pub async fn can_edit_field(&self, field_path: &str, user_id: Option<&str>) -> bool {
        let Some(role) = self.get_user_role(user_id).await else {
            return false;
        };
        let section_id = section_of(field_path);
        let locked = self.is_section_locked(section_id).await;
        if locked && !Self::may_lock(&role, section_id) {
            return false;
        }
        match role.role {
            Role::Admin => return true,
            Role::Viewer => return false,
            _ => {}
        }
        if let Some(o) = role.field_permissions.get(field_path) {
            return o.can_edit;
        }
        Self::edit_allowed(&role, section_id, locked)
    }

    /// 当前用户对分区的有效权限
    pub async fn section_access(&self, section_id: &str) -> SectionAccess {
        let role = self.get_user_role(None).await;
        let locked = self.is_section_locked(section_id).await;
        match role {
            Some(role) => SectionAccess {
                can_view: Self::view_allowed(&role, section_id),
                can_edit: Self::edit_allowed(&role, section_id, locked),
                can_lock: Self::may_lock(&role, section_id),
                locked,
            },
            None => SectionAccess {
                can_view: false,
                can_edit: false,
                can_lock: false,
                locked,
            },
        }
    }

    /// 列出全部未过期角色；需要 manage_roles
    pub async fn get_all_user_roles(&self) -> Vec<UserRole> {
        if !self.has_permission(Permission::ManageRoles, None).await {
            return Vec::new();
        }
        let roles = match self.load_roles().await {
            Ok(roles) => roles,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load role table");
                return Vec::new();
            }
        };
        let now = Utc::now();
        let mut roles: Vec<UserRole> = roles
            .into_values()
            .filter(|r| !r.is_expired_at(now))
            .collect();
        roles.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        roles
    }

    /// 当前用户能否管理目标用户：需要 manage_users 且层级不低于对方
    pub async fn can_manage_user(&self, target_user_id: &str) -> bool {
        let Some(me) = self.get_user_role(None).await else {
            return false;
        };
        if !me.grants(Permission::ManageUsers) {
            return false;
        }
        let target_level = self
            .get_user_role(Some(target_user_id))
            .await
            .map_or(0, |r| r.role.level());
        me.role.level() >= target_level
    }

    pub async fn set_section_override(
        &self,
        user_id: &str,
        section_id: &str,
        access: AccessOverride,
    ) -> Result<bool> {
        self.update_override(user_id, OverrideTarget::Section(section_id), Some(access))
            .await
    }

    pub async fn set_field_override(
        &self,
        user_id: &str,
        field_path: &str,
        access: AccessOverride,
    ) -> Result<bool> {
        self.update_override(user_id, OverrideTarget::Field(field_path), Some(access))
            .await
    }

    pub async fn clear_section_override(&self, user_id: &str, section_id: &str) -> Result<bool> {
        self.update_override(user_id, OverrideTarget::Section(section_id), None)
            .await
    }

    async fn update_override(
        &self,
        user_id: &str,
        target: OverrideTarget<'_>,
        access: Option<AccessOverride>,
    ) -> Result<bool> {
        if !self.has_permission(Permission::ManageRoles, None).await {
            return Ok(false);
        }
        if self.get_user_role(Some(user_id)).await.is_none() {
            return Ok(false);
        }

        let key = target.key();
        let old = repository::update_json(
            self.store.as_ref(),
            &self.roles_key,
            StoreScope::Organization,
            |roles: &mut RoleTable| {
                let role = roles.get_mut(user_id)?;
                let map = match target {
                    OverrideTarget::Section(_) => &mut role.section_permissions,
                    OverrideTarget::Field(_) => &mut role.field_permissions,
                };
                match access {
                    Some(access) => Some(map.insert(key.to_string(), access)),
                    None => map.remove(key).map(Some),
                }
            },
        )
        .await?;

        let Some(old) = old else {
            return Ok(false);
        };

        self.record(
            AuditLogParams::new(AuditAction::Update, ROLES_RESOURCE)
                .resource_id(user_id)
                .changes(vec![FieldChange::new(
                    target.label(),
                    serde_json::to_value(old)?,
                    serde_json::to_value(access)?,
                )]),
        )
        .await;

        tracing::info!(
            organization_id = %self.organization_id,
            target = %user_id,
            key = %key,
            cleared = access.is_none(),
            "Access override updated"
        );
        Ok(true)
    }

    /// 读取失败时按已锁定处理，只有可锁定者能编辑
    pub async fn is_section_locked(&self, section_id: &str) -> bool {
        match self.load_sections().await {
            Ok(sections) => sections.get(section_id).is_some_and(|p| p.locked),
            Err(e) => {
                tracing::warn!(
                    organization_id = %self.organization_id,
                    section = %section_id,
                    error = %e,
                    "Failed to load section policies, treating as locked"
                );
                true
            }
        }
    }

    /// 当前处于锁定状态的分区
    pub async fn section_locks(&self) -> BTreeMap<String, SectionPolicy> {
        match self.load_sections().await {
            Ok(sections) => sections.into_iter().filter(|(_, p)| p.locked).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load section policies");
                BTreeMap::new()
            }
        }
    }

    /// 锁定分区；已锁定时保留原锁定者
    pub async fn lock_section(&self, section_id: &str) -> Result<bool> {
        if !self.can_lock_section(section_id, None).await {
            tracing::warn!(
                user_id = %self.current_user_id,
                section = %section_id,
                "Section lock denied"
            );
            return Ok(false);
        }

        let policy = SectionPolicy {
            locked: true,
            locked_by: Some(self.current_user_id.clone()),
            locked_at: Some(Utc::now()),
        };
        let changed = repository::update_json(
            self.store.as_ref(),
            &self.sections_key,
            StoreScope::Organization,
            |sections: &mut SectionTable| {
                if sections.get(section_id).is_some_and(|p| p.locked) {
                    return None;
                }
                sections.insert(section_id.to_string(), policy);
                Some(())
            },
        )
        .await?;

        if changed.is_some() {
            self.record(AuditLogParams::new(AuditAction::from("lock"), section_id))
                .await;
            tracing::info!(section = %section_id, user_id = %self.current_user_id, "Section locked");
        }
        Ok(true)
    }

    pub async fn unlock_section(&self, section_id: &str) -> Result<bool> {
        if !self.can_lock_section(section_id, None).await {
            tracing::warn!(
                user_id = %self.current_user_id,
                section = %section_id,
                "Section unlock denied"
            );
            return Ok(false);
        }

        let changed = repository::update_json(
            self.store.as_ref(),
            &self.sections_key,
            StoreScope::Organization,
            |sections: &mut SectionTable| {
                if !sections.get(section_id).is_some_and(|p| p.locked) {
                    return None;
                }
                sections.insert(section_id.to_string(), SectionPolicy::default());
                Some(())
            },
        )
        .await?;

        if changed.is_some() {
            self.record(AuditLogParams::new(AuditAction::from("unlock"), section_id))
                .await;
            tracing::info!(section = %section_id, user_id = %self.current_user_id, "Section unlocked");
        }
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy)]
enum OverrideTarget<'a> {
    Section(&'a str),
    Field(&'a str),
}

impl<'a> OverrideTarget<'a> {
    fn key(self) -> &'a str {
        match self {
            OverrideTarget::Section(id) | OverrideTarget::Field(id) => id,
        }
    }

    fn label(&self) -> String {
        match self {
            OverrideTarget::Section(id) => format!("sectionPermissions.{}", id),
            OverrideTarget::Field(path) => format!("fieldPermissions.{}", path),
        }
    }
}

/// 字段路径所属分区（首段）
fn section_of(field_path: &str) -> &str {
    field_path.split('.').next().unwrap_or(field_path)
}
