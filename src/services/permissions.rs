//! 绑定到会话用户的权限检查接口

use crate::error::Result;
use crate::models::role::{Permission, Role, SectionAccess};
use crate::services::rbac_service::RbacService;
use async_trait::async_trait;
use std::sync::Arc;

/// 调用方只依赖这组能力，不关心角色表如何存放
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn role(&self) -> Option<Role>;
    async fn has_permission(&self, permission: Permission) -> bool;
    async fn can_view_section(&self, section_id: &str) -> bool;
    async fn can_edit_section(&self, section_id: &str) -> bool;
    async fn can_lock_section(&self, section_id: &str) -> bool;
    async fn can_view_field(&self, field_path: &str) -> bool;
    async fn can_edit_field(&self, field_path: &str) -> bool;
    async fn is_section_locked(&self, section_id: &str) -> bool;
    async fn lock_section(&self, section_id: &str) -> Result<bool>;
    async fn unlock_section(&self, section_id: &str) -> Result<bool>;

    async fn section_access(&self, section_id: &str) -> SectionAccess {
        SectionAccess {
            can_view: self.can_view_section(section_id).await,
            can_edit: self.can_edit_section(section_id).await,
            can_lock: self.can_lock_section(section_id).await,
            locked: self.is_section_locked(section_id).await,
        }
    }
}

/// 以 RBAC 服务为后端的实现
#[derive(Clone)]
pub struct SessionPermissions {
    rbac: Arc<RbacService>,
}

impl SessionPermissions {
    pub fn new(rbac: Arc<RbacService>) -> Self {
        Self { rbac }
    }
}

#[async_trait]
impl PermissionChecker for SessionPermissions {
    async fn role(&self) -> Option<Role> {
        self.rbac.get_user_role(None).await.map(|r| r.role)
    }

    async fn has_permission(&self, permission: Permission) -> bool {
        self.rbac.has_permission(permission, None).await
    }

    async fn can_view_section(&self, section_id: &str) -> bool {
        self.rbac.can_view_section(section_id, None).await
    }

    async fn can_edit_section(&self, section_id: &str) -> bool {
        self.rbac.can_edit_section(section_id, None).await
    }

    async fn can_lock_section(&self, section_id: &str) -> bool {
        self.rbac.can_lock_section(section_id, None).await
    }

    async fn can_view_field(&self, field_path: &str) -> bool {
        self.rbac.can_view_field(field_path, None).await
    }

    async fn can_edit_field(&self, field_path: &str) -> bool {
        self.rbac.can_edit_field(field_path, None).await
    }

    async fn is_section_locked(&self, section_id: &str) -> bool {
        self.rbac.is_section_locked(section_id).await
    }

    async fn lock_section(&self, section_id: &str) -> Result<bool> {
        self.rbac.lock_section(section_id).await
    }

    async fn unlock_section(&self, section_id: &str) -> Result<bool> {
        self.rbac.unlock_section(section_id).await
    }
}
