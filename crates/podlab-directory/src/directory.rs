use async_trait::async_trait;

use podlab_domain::{
    AdminUnit, DirectoryRole, NewAdminUnit, NewGroup, NewRoleAssignment, NewRoleDefinition,
    NewScopeTag, NewUser, ObjectId, RoleAssignment, RoleDefinition, RoleTemplate, ScopeTag,
    ScopedRoleGrant, SecurityGroup, TenantDomain, UserAccount,
};

use crate::error::DirectoryError;

/// The identity directory the provisioning stages run against.
///
/// Every operation is a remote round-trip; the directory is the sole source
/// of truth and nothing is cached between calls. Lookups are by name (the
/// deterministic pod names), creates fail with a conflict error when the
/// name is already taken, and membership adds fail with a conflict error
/// when the member is already present. Callers decide what a conflict means;
/// the trait just surfaces it faithfully.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    // ── Domains ───────────────────────────────────────────────────────────────

    /// Every DNS domain attached to the tenant, verified or not.
    async fn list_domains(&self) -> Result<Vec<TenantDomain>, DirectoryError>;

    // ── Users ─────────────────────────────────────────────────────────────────

    async fn find_user_by_upn(&self, upn: &str) -> Result<Option<UserAccount>, DirectoryError>;

    async fn create_user(&self, req: &NewUser) -> Result<UserAccount, DirectoryError>;

    // ── Groups ────────────────────────────────────────────────────────────────

    async fn find_group_by_name(
        &self,
        name: &str,
    ) -> Result<Option<SecurityGroup>, DirectoryError>;

    async fn create_group(&self, req: &NewGroup) -> Result<SecurityGroup, DirectoryError>;

    async fn list_group_members(&self, group: &ObjectId) -> Result<Vec<ObjectId>, DirectoryError>;

    async fn add_group_member(
        &self,
        group: &ObjectId,
        member: &ObjectId,
    ) -> Result<(), DirectoryError>;

    // ── Scope tags ────────────────────────────────────────────────────────────

    async fn find_scope_tag(&self, name: &str) -> Result<Option<ScopeTag>, DirectoryError>;

    async fn create_scope_tag(&self, req: &NewScopeTag) -> Result<ScopeTag, DirectoryError>;

    // ── Administrative units ──────────────────────────────────────────────────

    async fn find_admin_unit(&self, name: &str) -> Result<Option<AdminUnit>, DirectoryError>;

    async fn create_admin_unit(&self, req: &NewAdminUnit) -> Result<AdminUnit, DirectoryError>;

    async fn list_admin_unit_members(
        &self,
        unit: &ObjectId,
    ) -> Result<Vec<ObjectId>, DirectoryError>;

    async fn add_admin_unit_member(
        &self,
        unit: &ObjectId,
        member: &ObjectId,
    ) -> Result<(), DirectoryError>;

    async fn list_scoped_role_grants(
        &self,
        unit: &ObjectId,
    ) -> Result<Vec<ScopedRoleGrant>, DirectoryError>;

    /// Grant `role` over `unit` to `principal` (a group).
    async fn grant_scoped_role(
        &self,
        unit: &ObjectId,
        role: &ObjectId,
        principal: &ObjectId,
    ) -> Result<ScopedRoleGrant, DirectoryError>;

    // ── Directory roles ───────────────────────────────────────────────────────

    async fn list_role_templates(&self) -> Result<Vec<RoleTemplate>, DirectoryError>;

    async fn list_active_roles(&self) -> Result<Vec<DirectoryRole>, DirectoryError>;

    /// Activate a role template tenant-wide. Re-activating an already active
    /// role is a conflict; callers treat that as success.
    async fn activate_role(&self, template: &ObjectId) -> Result<DirectoryRole, DirectoryError>;

    // ── Device-management RBAC ────────────────────────────────────────────────

    async fn find_role_definition(
        &self,
        name: &str,
    ) -> Result<Option<RoleDefinition>, DirectoryError>;

    async fn create_role_definition(
        &self,
        req: &NewRoleDefinition,
    ) -> Result<RoleDefinition, DirectoryError>;

    /// All assignments of one role definition, with their members, scopes
    /// and tags resolved. The service cannot filter assignments by principal,
    /// so callers match principals on the returned set.
    async fn list_role_assignments(
        &self,
        definition: &ObjectId,
    ) -> Result<Vec<RoleAssignment>, DirectoryError>;

    async fn create_role_assignment(
        &self,
        req: &NewRoleAssignment,
    ) -> Result<RoleAssignment, DirectoryError>;
}
