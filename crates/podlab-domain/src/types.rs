use serde::{Deserialize, Serialize};

use crate::conventions::MAX_STUDENTS;
use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

/// Directory object id (opaque GUID string assigned by the service).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl ObjectId {
    pub fn new(s: impl Into<String>) -> Self {
        ObjectId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One-based student number, the sole correlation key across every entity of
/// a pod. Indexes are never reused or renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentIndex(u32);

impl StudentIndex {
    pub fn new(n: u32) -> Result<Self, DomainError> {
        if n == 0 || n > MAX_STUDENTS {
            return Err(DomainError::InvalidStudentIndex(n));
        }
        Ok(StudentIndex(n))
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Indexes 1..=count, ascending. `count` is bounds-checked the same way
    /// a single index is.
    pub fn first_n(count: u32) -> Result<Vec<StudentIndex>, DomainError> {
        if count == 0 || count > MAX_STUDENTS {
            return Err(DomainError::InvalidStudentCount(count));
        }
        Ok((1..=count).map(StudentIndex).collect())
    }
}

impl std::fmt::Display for StudentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Roles ─────────────────────────────────────────────────────────────────────

/// Which of the two per-student accounts a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountRole {
    Admin,
    Student,
}

impl std::fmt::Display for AccountRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountRole::Admin => write!(f, "admin"),
            AccountRole::Student => write!(f, "student"),
        }
    }
}

/// Which of the three per-student security groups a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupRole {
    Admins,
    Users,
    Devices,
}

impl GroupRole {
    /// All three group roles, in creation order.
    pub fn all() -> &'static [GroupRole] {
        &[GroupRole::Admins, GroupRole::Users, GroupRole::Devices]
    }

    /// Suffix used in the deterministic group name.
    pub fn suffix(&self) -> &'static str {
        match self {
            GroupRole::Admins => "Admins",
            GroupRole::Users => "Users",
            GroupRole::Devices => "Devices",
        }
    }
}

impl std::fmt::Display for GroupRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupRole::Admins => write!(f, "admins"),
            GroupRole::Users => write!(f, "users"),
            GroupRole::Devices => write!(f, "devices"),
        }
    }
}

// ── Directory records ────────────────────────────────────────────────────────
//
// Strongly typed results parsed at the directory boundary. Membership is not
// embedded in group/unit records; it is read through the list-members
// operations, matching how the service exposes it.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: ObjectId,
    pub user_principal_name: String,
    pub display_name: String,
    pub account_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: ObjectId,
    pub display_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeTag {
    pub id: ObjectId,
    pub display_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminUnit {
    pub id: ObjectId,
    pub display_name: String,
    /// True when the unit hides its membership from non-members.
    pub hidden_membership: bool,
}

/// A directory role template. Templates are inert until activated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTemplate {
    pub id: ObjectId,
    pub display_name: String,
}

/// An activated directory role, assignable tenant-wide or per unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRole {
    pub id: ObjectId,
    pub display_name: String,
    pub role_template_id: String,
}

/// A directory-role grant scoped to one administrative unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedRoleGrant {
    pub id: ObjectId,
    pub role_id: ObjectId,
    pub principal_id: ObjectId,
}

/// A device-management RBAC role definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub id: ObjectId,
    pub display_name: String,
    pub is_built_in: bool,
}

/// A device-management role assignment: role definition bound to principal
/// groups, resource-scope groups and scope tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub id: ObjectId,
    pub display_name: String,
    pub member_ids: Vec<ObjectId>,
    pub resource_scope_ids: Vec<ObjectId>,
    pub scope_tag_ids: Vec<String>,
}

/// A DNS domain attached to the tenant, with its verification state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantDomain {
    pub name: String,
    pub is_verified: bool,
    pub is_default: bool,
}

// ── Creation requests ─────────────────────────────────────────────────────────

/// Request to create a user account. `Debug` redacts the password so request
/// logging can never leak the initial credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub user_principal_name: String,
    pub display_name: String,
    pub mail_nickname: String,
    pub password: String,
    pub force_password_change: bool,
}

impl std::fmt::Debug for NewUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewUser")
            .field("user_principal_name", &self.user_principal_name)
            .field("display_name", &self.display_name)
            .field("mail_nickname", &self.mail_nickname)
            .field("password", &"<redacted>")
            .field("force_password_change", &self.force_password_change)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewGroup {
    pub display_name: String,
    pub mail_nickname: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewScopeTag {
    pub display_name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdminUnit {
    pub display_name: String,
    pub description: Option<String>,
    pub hidden_membership: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoleDefinition {
    pub display_name: String,
    pub description: Option<String>,
    pub allowed_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoleAssignment {
    pub display_name: String,
    pub description: Option<String>,
    pub role_definition_id: ObjectId,
    pub member_ids: Vec<ObjectId>,
    pub resource_scope_ids: Vec<ObjectId>,
    pub scope_tag_ids: Vec<String>,
}
