//! Business logic services layer

pub mod analytics_service;
pub mod audit_service;
pub mod autosave;
pub mod permissions;
pub mod rbac_service;
pub mod session;

pub use analytics_service::AnalyticsService;
pub use audit_service::{AuditLogParams, AuditService, AuditSession, FlushOutcome};
pub use autosave::{AutoSave, AutoSaveHooks, AutoSaveOptions, AutoSaveStatus, FormRecovery, SavedDraft};
pub use permissions::{PermissionChecker, SessionPermissions};
pub use rbac_service::RbacService;
pub use session::{OrganizationSession, SessionIdentity, SessionRegistry};
