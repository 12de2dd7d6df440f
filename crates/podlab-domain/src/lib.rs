pub mod conventions;
pub mod error;
pub mod password;
pub mod types;

mod tests;

pub use conventions::{
    PodNames, DEFAULT_DIRECTORY_ROLE, LAB_INTUNE_ALLOWED_ACTIONS, LAB_INTUNE_ROLE_NAME,
    MAX_STUDENTS,
};
pub use error::DomainError;
pub use password::{generate_password, meets_complexity};
pub use types::{
    AccountRole, AdminUnit, DirectoryRole, GroupRole, NewAdminUnit, NewGroup, NewRoleAssignment,
    NewRoleDefinition, NewScopeTag, NewUser, ObjectId, RoleAssignment, RoleDefinition,
    RoleTemplate, ScopeTag, ScopedRoleGrant, SecurityGroup, StudentIndex, TenantDomain,
    UserAccount,
};
