//! Role and permission domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// 角色，按权限高低排序：Viewer < Editor < Manager < Admin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Editor,
    Manager,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Manager, Role::Editor, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
        }
    }

    /// 层级数值，越大越高
    pub fn level(&self) -> u8 {
        match self {
            Role::Viewer => 1,
            Role::Editor => 2,
            Role::Manager => 3,
            Role::Admin => 4,
        }
    }

    /// 角色默认权限
    pub fn default_permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Admin => &Permission::ALL,
            Role::Manager => &[
                ViewAll,
                EditAll,
                ManageUsers,
                ViewSection,
                EditSection,
                LockSection,
                ViewFinancials,
                EditFinancials,
                ViewGovernance,
                EditGovernance,
                ExportData,
                ImportData,
                ViewAuditLogs,
            ],
            Role::Editor => &[
                ViewAll,
                ViewSection,
                EditSection,
                ViewFinancials,
                ViewGovernance,
                EditGovernance,
                ExportData,
            ],
            Role::Viewer => &[ViewAll, ViewSection, ViewFinancials, ViewGovernance],
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "manager" => Ok(Role::Manager),
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// 权限标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewAll,
    EditAll,
    DeleteAll,
    ManageUsers,
    ManageRoles,
    ViewSection,
    EditSection,
    LockSection,
    ViewFinancials,
    EditFinancials,
    ViewGovernance,
    EditGovernance,
    ExportData,
    ImportData,
    ViewAuditLogs,
    ManageSettings,
}

impl Permission {
    pub const ALL: [Permission; 16] = [
        Permission::ViewAll,
        Permission::EditAll,
        Permission::DeleteAll,
        Permission::ManageUsers,
        Permission::ManageRoles,
        Permission::ViewSection,
        Permission::EditSection,
        Permission::LockSection,
        Permission::ViewFinancials,
        Permission::EditFinancials,
        Permission::ViewGovernance,
        Permission::EditGovernance,
        Permission::ExportData,
        Permission::ImportData,
        Permission::ViewAuditLogs,
        Permission::ManageSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewAll => "view_all",
            Permission::EditAll => "edit_all",
            Permission::DeleteAll => "delete_all",
            Permission::ManageUsers => "manage_users",
            Permission::ManageRoles => "manage_roles",
            Permission::ViewSection => "view_section",
            Permission::EditSection => "edit_section",
            Permission::LockSection => "lock_section",
            Permission::ViewFinancials => "view_financials",
            Permission::EditFinancials => "edit_financials",
            Permission::ViewGovernance => "view_governance",
            Permission::EditGovernance => "edit_governance",
            Permission::ExportData => "export_data",
            Permission::ImportData => "import_data",
            Permission::ViewAuditLogs => "view_audit_logs",
            Permission::ManageSettings => "manage_settings",
        }
    }
}

/// 分区或字段级别的覆盖权限，配置后优先于角色默认值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessOverride {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_lock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub can_delete: Option<bool>,
}

impl AccessOverride {
    pub fn read_only() -> Self {
        Self {
            can_view: true,
            can_edit: false,
            can_lock: false,
            can_delete: None,
        }
    }

    pub fn hidden() -> Self {
        Self {
            can_view: false,
            can_edit: false,
            can_lock: false,
            can_delete: None,
        }
    }
}

/// 用户在组织中的角色分配
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRole {
    pub user_id: String,
    pub organization_id: String,
    pub role: Role,
    #[serde(default)]
    pub custom_permissions: BTreeSet<Permission>,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub section_permissions: HashMap<String, AccessOverride>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_permissions: HashMap<String, AccessOverride>,
}

impl UserRole {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// 角色默认权限与自定义权限的并集
    pub fn grants(&self, permission: Permission) -> bool {
        self.role.default_permissions().contains(&permission)
            || self.custom_permissions.contains(&permission)
    }

    pub fn effective_permissions(&self) -> BTreeSet<Permission> {
        self.role
            .default_permissions()
            .iter()
            .copied()
            .chain(self.custom_permissions.iter().copied())
            .collect()
    }
}

/// 分区锁定策略
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionPolicy {
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
}

/// Assign role request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRoleRequest {
    pub role: Role,
    #[serde(default)]
    pub custom_permissions: BTreeSet<Permission>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 当前用户对某个分区的有效权限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionAccess {
    pub can_view: bool,
    pub can_edit: bool,
    pub can_lock: bool,
    pub locked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_role(role: Role) -> UserRole {
        UserRole {
            user_id: "u1".to_string(),
            organization_id: "org".to_string(),
            role,
            custom_permissions: BTreeSet::new(),
            assigned_by: "system".to_string(),
            assigned_at: Utc::now(),
            expires_at: None,
            section_permissions: HashMap::new(),
            field_permissions: HashMap::new(),
        }
    }

    #[test]
    fn test_role_order() {
        assert!(Role::Admin > Role::Manager);
        assert!(Role::Manager > Role::Editor);
        assert!(Role::Editor > Role::Viewer);
        assert!(Role::Admin.level() > Role::Viewer.level());
    }

    #[test]
    fn test_default_permissions_are_nested() {
        let sets: Vec<BTreeSet<Permission>> = Role::ALL
            .iter()
            .map(|r| r.default_permissions().iter().copied().collect())
            .collect();
        for pair in sets.windows(2) {
            assert!(pair[1].is_subset(&pair[0]));
        }
        assert_eq!(Role::Admin.default_permissions().len(), 16);
    }

    #[test]
    fn test_grants_is_union_of_defaults_and_custom() {
        let mut r = user_role(Role::Viewer);
        for p in Permission::ALL {
            assert_eq!(r.grants(p), Role::Viewer.default_permissions().contains(&p));
        }

        r.custom_permissions.insert(Permission::ExportData);
        assert!(r.grants(Permission::ExportData));
        assert!(!r.grants(Permission::EditAll));
        assert!(r.effective_permissions().contains(&Permission::ExportData));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut r = user_role(Role::Editor);
        assert!(!r.is_expired_at(now));
        r.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(r.is_expired_at(now));
        r.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(!r.is_expired_at(now));
    }

    #[test]
    fn test_permission_serde_tags() {
        for p in Permission::ALL {
            let json = serde_json::to_string(&p).unwrap();
            assert_eq!(json, format!("\"{}\"", p.as_str()));
        }
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert!("owner".parse::<Role>().is_err());
    }
}
