use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use podlab_domain::{
    AdminUnit, DirectoryRole, NewAdminUnit, NewGroup, NewRoleAssignment, NewRoleDefinition,
    NewScopeTag, NewUser, ObjectId, RoleAssignment, RoleDefinition, RoleTemplate, ScopeTag,
    ScopedRoleGrant, SecurityGroup, TenantDomain, UserAccount,
};

use crate::directory::Directory;
use crate::error::DirectoryError;

#[derive(Debug, Default)]
struct Inner {
    domains:          Vec<TenantDomain>,
    users:            Vec<UserAccount>,
    groups:           Vec<SecurityGroup>,
    group_members:    HashMap<String, BTreeSet<String>>,
    scope_tags:       Vec<ScopeTag>,
    admin_units:      Vec<AdminUnit>,
    unit_members:     HashMap<String, BTreeSet<String>>,
    scoped_grants:    HashMap<String, Vec<ScopedRoleGrant>>,
    role_templates:   Vec<RoleTemplate>,
    active_roles:     Vec<DirectoryRole>,
    role_definitions: Vec<RoleDefinition>,
    role_assignments: HashMap<String, Vec<RoleAssignment>>,
    fail_once:        HashMap<String, u32>,
    next_tag_id:      u32,
}

/// In-memory implementation of [`Directory`].
///
/// All data is lost on process exit. Suitable for tests and offline runs.
/// It mirrors the service's observable behavior where the pipeline depends
/// on it: name lookups are case-insensitive, duplicate names and duplicate
/// memberships fail with the service's conflict wording, missing targets
/// fail with its not-found code, and scope tags get small integer ids.
/// It is stricter than the service in one way: group display names are
/// unique here, because the deterministic names are the idempotency key.
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryDirectory {
    /// Directory for a tenant whose default domain is `domain`, verified.
    /// Three common role templates are seeded; none is active yet.
    pub fn new(domain: &str) -> Self {
        let mut inner = Inner::default();
        inner.domains.push(TenantDomain {
            name:        domain.to_string(),
            is_verified: true,
            is_default:  true,
        });
        inner.scope_tags.push(ScopeTag {
            id:           ObjectId::new("0"),
            display_name: "Default".to_string(),
            description:  Some("Default scope tag".to_string()),
        });
        inner.next_tag_id = 1;

        for (id, name) in [
            ("fe930be7-5e62-47db-91af-98c3a49a38b1", "User Administrator"),
            ("729827e3-9c14-49f7-bb1b-9608f156bbb8", "Helpdesk Administrator"),
            ("4d6ac14f-3453-41d0-bef9-a3e0c569773a", "License Administrator"),
        ] {
            inner.role_templates.push(RoleTemplate {
                id:           ObjectId::new(id),
                display_name: name.to_string(),
            });
        }

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    /// Attach an extra domain, e.g. an unverified one, for test setups.
    pub async fn add_domain(&self, domain: TenantDomain) {
        self.inner.write().await.domains.push(domain);
    }

    /// Arrange for the next call of the named trait operation to fail with
    /// a transient 503. Stacks: calling this twice fails the next two calls.
    pub async fn fail_once(&self, op: &str) {
        let mut guard = self.inner.write().await;
        *guard.fail_once.entry(op.to_string()).or_insert(0) += 1;
    }

    // ── Inspection (tests) ────────────────────────────────────────────────────

    pub async fn user_count(&self) -> usize {
        self.inner.read().await.users.len()
    }

    pub async fn group_count(&self) -> usize {
        self.inner.read().await.groups.len()
    }

    /// Created tags only; the seeded built-in Default tag is not counted.
    pub async fn tag_count(&self) -> usize {
        self.inner.read().await.scope_tags.len() - 1
    }

    pub async fn unit_count(&self) -> usize {
        self.inner.read().await.admin_units.len()
    }

    pub async fn assignment_count(&self) -> usize {
        self.inner.read().await.role_assignments.values().map(Vec::len).sum()
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn take_failure(&self, op: &str) -> Result<(), DirectoryError> {
        let mut guard = self.inner.write().await;
        if let Some(remaining) = guard.fail_once.get_mut(op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DirectoryError::Transient {
                    status:  503,
                    message: format!("injected failure for {}", op),
                });
            }
        }
        Ok(())
    }
}

// ── Service-shaped errors ─────────────────────────────────────────────────────

fn duplicate(property: &str) -> DirectoryError {
    DirectoryError::Api {
        code:    "Request_BadRequest".to_string(),
        message: format!(
            "Another object with the same value for property {} already exists.",
            property
        ),
    }
}

fn member_exists() -> DirectoryError {
    DirectoryError::Api {
        code:    "Request_BadRequest".to_string(),
        message: "One or more added object references already exist for the following modified \
                  properties: 'members'."
            .to_string(),
    }
}

fn conflicting_object() -> DirectoryError {
    DirectoryError::Api {
        code:    "Request_MultipleObjectsWithSameKeyValue".to_string(),
        message: "A conflicting object with one or more of the specified property values is \
                  present in the directory."
            .to_string(),
    }
}

fn not_found(id: &str) -> DirectoryError {
    DirectoryError::Api {
        code:    "Request_ResourceNotFound".to_string(),
        message: format!(
            "Resource '{}' does not exist or one of its queried reference-property objects are \
             not present.",
            id
        ),
    }
}

fn name_taken(kind: &str) -> DirectoryError {
    DirectoryError::Api {
        code:    "BadRequest".to_string(),
        message: format!("A {} with the same display name already exists.", kind),
    }
}

fn new_id() -> ObjectId {
    ObjectId::new(Uuid::new_v4().to_string())
}

#[async_trait]
impl Directory for MemoryDirectory {
    fn name(&self) -> &'static str {
        "memory"
    }

    // ── Domains ───────────────────────────────────────────────────────────────

    async fn list_domains(&self) -> Result<Vec<TenantDomain>, DirectoryError> {
        Ok(self.inner.read().await.domains.clone())
    }

    // ── Users ─────────────────────────────────────────────────────────────────

    async fn find_user_by_upn(&self, upn: &str) -> Result<Option<UserAccount>, DirectoryError> {
        let guard = self.inner.read().await;
        Ok(guard
            .users
            .iter()
            .find(|u| u.user_principal_name.eq_ignore_ascii_case(upn))
            .cloned())
    }

    async fn create_user(&self, req: &NewUser) -> Result<UserAccount, DirectoryError> {
        self.take_failure("create_user").await?;
        let mut guard = self.inner.write().await;
        if guard
            .users
            .iter()
            .any(|u| u.user_principal_name.eq_ignore_ascii_case(&req.user_principal_name))
        {
            return Err(duplicate("userPrincipalName"));
        }
        // The initial password and the force-change flag are accepted but not
        // stored; the service never returns them either.
        let user = UserAccount {
            id:                  new_id(),
            user_principal_name: req.user_principal_name.clone(),
            display_name:        req.display_name.clone(),
            account_enabled:     true,
        };
        debug!(upn = %user.user_principal_name, id = %user.id, "memory directory: user created");
        guard.users.push(user.clone());
        Ok(user)
    }

    // ── Groups ────────────────────────────────────────────────────────────────

    async fn find_group_by_name(
        &self,
        name: &str,
    ) -> Result<Option<SecurityGroup>, DirectoryError> {
        let guard = self.inner.read().await;
        Ok(guard
            .groups
            .iter()
            .find(|g| g.display_name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn create_group(&self, req: &NewGroup) -> Result<SecurityGroup, DirectoryError> {
        self.take_failure("create_group").await?;
        let mut guard = self.inner.write().await;
        if guard
            .groups
            .iter()
            .any(|g| g.display_name.eq_ignore_ascii_case(&req.display_name))
        {
            return Err(duplicate("displayName"));
        }
        let group = SecurityGroup {
            id:           new_id(),
            display_name: req.display_name.clone(),
            description:  req.description.clone(),
        };
        debug!(name = %group.display_name, id = %group.id, "memory directory: group created");
        guard.group_members.insert(group.id.as_str().to_string(), BTreeSet::new());
        guard.groups.push(group.clone());
        Ok(group)
    }

    async fn list_group_members(&self, group: &ObjectId) -> Result<Vec<ObjectId>, DirectoryError> {
        let guard = self.inner.read().await;
        let members = guard
            .group_members
            .get(group.as_str())
            .ok_or_else(|| not_found(group.as_str()))?;
        Ok(members.iter().map(ObjectId::new).collect())
    }

    async fn add_group_member(
        &self,
        group: &ObjectId,
        member: &ObjectId,
    ) -> Result<(), DirectoryError> {
        self.take_failure("add_group_member").await?;
        let mut guard = self.inner.write().await;
        let known = guard.users.iter().any(|u| u.id == *member)
            || guard.groups.iter().any(|g| g.id == *member);
        if !known {
            return Err(not_found(member.as_str()));
        }
        let members = guard
            .group_members
            .get_mut(group.as_str())
            .ok_or_else(|| not_found(group.as_str()))?;
        if !members.insert(member.as_str().to_string()) {
            return Err(member_exists());
        }
        debug!(group = %group, member = %member, "memory directory: group member added");
        Ok(())
    }

    // ── Scope tags ────────────────────────────────────────────────────────────

    async fn find_scope_tag(&self, name: &str) -> Result<Option<ScopeTag>, DirectoryError> {
        let guard = self.inner.read().await;
        Ok(guard
            .scope_tags
            .iter()
            .find(|t| t.display_name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn create_scope_tag(&self, req: &NewScopeTag) -> Result<ScopeTag, DirectoryError> {
        self.take_failure("create_scope_tag").await?;
        let mut guard = self.inner.write().await;
        if guard
            .scope_tags
            .iter()
            .any(|t| t.display_name.eq_ignore_ascii_case(&req.display_name))
        {
            return Err(name_taken("role scope tag"));
        }
        let tag = ScopeTag {
            id:           ObjectId::new(guard.next_tag_id.to_string()),
            display_name: req.display_name.clone(),
            description:  req.description.clone(),
        };
        guard.next_tag_id += 1;
        debug!(name = %tag.display_name, id = %tag.id, "memory directory: scope tag created");
        guard.scope_tags.push(tag.clone());
        Ok(tag)
    }

    // ── Administrative units ──────────────────────────────────────────────────

    async fn find_admin_unit(&self, name: &str) -> Result<Option<AdminUnit>, DirectoryError> {
        let guard = self.inner.read().await;
        Ok(guard
            .admin_units
            .iter()
            .find(|u| u.display_name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn create_admin_unit(&self, req: &NewAdminUnit) -> Result<AdminUnit, DirectoryError> {
        self.take_failure("create_admin_unit").await?;
        let mut guard = self.inner.write().await;
        if guard
            .admin_units
            .iter()
            .any(|u| u.display_name.eq_ignore_ascii_case(&req.display_name))
        {
            return Err(duplicate("displayName"));
        }
        let unit = AdminUnit {
            id:                new_id(),
            display_name:      req.display_name.clone(),
            hidden_membership: req.hidden_membership,
        };
        debug!(name = %unit.display_name, id = %unit.id, "memory directory: admin unit created");
        guard.unit_members.insert(unit.id.as_str().to_string(), BTreeSet::new());
        guard.scoped_grants.insert(unit.id.as_str().to_string(), Vec::new());
        guard.admin_units.push(unit.clone());
        Ok(unit)
    }

    async fn list_admin_unit_members(
        &self,
        unit: &ObjectId,
    ) -> Result<Vec<ObjectId>, DirectoryError> {
        let guard = self.inner.read().await;
        let members = guard
            .unit_members
            .get(unit.as_str())
            .ok_or_else(|| not_found(unit.as_str()))?;
        Ok(members.iter().map(ObjectId::new).collect())
    }

    async fn add_admin_unit_member(
        &self,
        unit: &ObjectId,
        member: &ObjectId,
    ) -> Result<(), DirectoryError> {
        self.take_failure("add_admin_unit_member").await?;
        let mut guard = self.inner.write().await;
        let known = guard.users.iter().any(|u| u.id == *member)
            || guard.groups.iter().any(|g| g.id == *member);
        if !known {
            return Err(not_found(member.as_str()));
        }
        let members = guard
            .unit_members
            .get_mut(unit.as_str())
            .ok_or_else(|| not_found(unit.as_str()))?;
        if !members.insert(member.as_str().to_string()) {
            return Err(member_exists());
        }
        debug!(unit = %unit, member = %member, "memory directory: admin unit member added");
        Ok(())
    }

    async fn list_scoped_role_grants(
        &self,
        unit: &ObjectId,
    ) -> Result<Vec<ScopedRoleGrant>, DirectoryError> {
        let guard = self.inner.read().await;
        let grants = guard
            .scoped_grants
            .get(unit.as_str())
            .ok_or_else(|| not_found(unit.as_str()))?;
        Ok(grants.clone())
    }

    async fn grant_scoped_role(
        &self,
        unit: &ObjectId,
        role: &ObjectId,
        principal: &ObjectId,
    ) -> Result<ScopedRoleGrant, DirectoryError> {
        self.take_failure("grant_scoped_role").await?;
        let mut guard = self.inner.write().await;
        if !guard.active_roles.iter().any(|r| r.id == *role) {
            return Err(not_found(role.as_str()));
        }
        let known = guard.users.iter().any(|u| u.id == *principal)
            || guard.groups.iter().any(|g| g.id == *principal);
        if !known {
            return Err(not_found(principal.as_str()));
        }
        let grants = guard
            .scoped_grants
            .get_mut(unit.as_str())
            .ok_or_else(|| not_found(unit.as_str()))?;
        if grants.iter().any(|g| g.role_id == *role && g.principal_id == *principal) {
            return Err(conflicting_object());
        }
        let grant = ScopedRoleGrant {
            id:           new_id(),
            role_id:      role.clone(),
            principal_id: principal.clone(),
        };
        debug!(unit = %unit, role = %role, principal = %principal, "memory directory: scoped role granted");
        grants.push(grant.clone());
        Ok(grant)
    }

    // ── Directory roles ───────────────────────────────────────────────────────

    async fn list_role_templates(&self) -> Result<Vec<RoleTemplate>, DirectoryError> {
        Ok(self.inner.read().await.role_templates.clone())
    }

    async fn list_active_roles(&self) -> Result<Vec<DirectoryRole>, DirectoryError> {
        Ok(self.inner.read().await.active_roles.clone())
    }

    async fn activate_role(&self, template: &ObjectId) -> Result<DirectoryRole, DirectoryError> {
        self.take_failure("activate_role").await?;
        let mut guard = self.inner.write().await;
        let tpl = guard
            .role_templates
            .iter()
            .find(|t| t.id == *template)
            .cloned()
            .ok_or_else(|| not_found(template.as_str()))?;
        if guard
            .active_roles
            .iter()
            .any(|r| r.role_template_id == tpl.id.as_str())
        {
            return Err(conflicting_object());
        }
        let role = DirectoryRole {
            id:               new_id(),
            display_name:     tpl.display_name.clone(),
            role_template_id: tpl.id.as_str().to_string(),
        };
        debug!(role = %role.display_name, id = %role.id, "memory directory: role activated");
        guard.active_roles.push(role.clone());
        Ok(role)
    }

    // ── Device-management RBAC ────────────────────────────────────────────────

    async fn find_role_definition(
        &self,
        name: &str,
    ) -> Result<Option<RoleDefinition>, DirectoryError> {
        let guard = self.inner.read().await;
        Ok(guard
            .role_definitions
            .iter()
            .find(|d| d.display_name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn create_role_definition(
        &self,
        req: &NewRoleDefinition,
    ) -> Result<RoleDefinition, DirectoryError> {
        self.take_failure("create_role_definition").await?;
        let mut guard = self.inner.write().await;
        if guard
            .role_definitions
            .iter()
            .any(|d| d.display_name.eq_ignore_ascii_case(&req.display_name))
        {
            return Err(name_taken("role definition"));
        }
        let def = RoleDefinition {
            id:           new_id(),
            display_name: req.display_name.clone(),
            is_built_in:  false,
        };
        debug!(name = %def.display_name, id = %def.id, "memory directory: role definition created");
        guard.role_assignments.insert(def.id.as_str().to_string(), Vec::new());
        guard.role_definitions.push(def.clone());
        Ok(def)
    }

    async fn list_role_assignments(
        &self,
        definition: &ObjectId,
    ) -> Result<Vec<RoleAssignment>, DirectoryError> {
        let guard = self.inner.read().await;
        let assignments = guard
            .role_assignments
            .get(definition.as_str())
            .ok_or_else(|| not_found(definition.as_str()))?;
        Ok(assignments.clone())
    }

    async fn create_role_assignment(
        &self,
        req: &NewRoleAssignment,
    ) -> Result<RoleAssignment, DirectoryError> {
        self.take_failure("create_role_assignment").await?;
        let mut guard = self.inner.write().await;
        let assignment = RoleAssignment {
            id:                 new_id(),
            display_name:       req.display_name.clone(),
            member_ids:         req.member_ids.clone(),
            resource_scope_ids: req.resource_scope_ids.clone(),
            scope_tag_ids:      req.scope_tag_ids.clone(),
        };
        let assignments = guard
            .role_assignments
            .get_mut(req.role_definition_id.as_str())
            .ok_or_else(|| not_found(req.role_definition_id.as_str()))?;
        debug!(name = %assignment.display_name, id = %assignment.id, "memory directory: role assignment created");
        assignments.push(assignment.clone());
        Ok(assignment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(n: u32) -> NewUser {
        NewUser {
            user_principal_name: format!("admin{}@lab.example.com", n),
            display_name:        format!("Student {} Admin", n),
            mail_nickname:       format!("admin{}", n),
            password:            "Xy7!moonlit-harbor".to_string(),
            force_password_change: true,
        }
    }

    #[tokio::test]
    async fn created_user_is_found_case_insensitively() {
        let dir = MemoryDirectory::new("lab.example.com");
        dir.create_user(&user(1)).await.unwrap();
        let found = dir.find_user_by_upn("ADMIN1@lab.example.com").await.unwrap();
        assert_eq!(found.unwrap().display_name, "Student 1 Admin");
    }

    #[tokio::test]
    async fn duplicate_upn_is_a_conflict() {
        let dir = MemoryDirectory::new("lab.example.com");
        dir.create_user(&user(1)).await.unwrap();
        let err = dir.create_user(&user(1)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn membership_add_is_recorded_and_repeat_conflicts() {
        let dir = MemoryDirectory::new("lab.example.com");
        let u = dir.create_user(&user(1)).await.unwrap();
        let g = dir
            .create_group(&NewGroup {
                display_name:  "SG-Student1-Admins".into(),
                mail_nickname: "SGStudent1Admins".into(),
                description:   None,
            })
            .await
            .unwrap();

        dir.add_group_member(&g.id, &u.id).await.unwrap();
        assert_eq!(dir.list_group_members(&g.id).await.unwrap(), vec![u.id.clone()]);

        let err = dir.add_group_member(&g.id, &u.id).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let dir = MemoryDirectory::new("lab.example.com");
        let ghost = ObjectId::new("no-such-id");
        let err = dir.list_group_members(&ghost).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
    }

    #[tokio::test]
    async fn activation_is_single_shot() {
        let dir = MemoryDirectory::new("lab.example.com");
        let tpl = ObjectId::new("fe930be7-5e62-47db-91af-98c3a49a38b1");
        let role = dir.activate_role(&tpl).await.unwrap();
        assert_eq!(role.display_name, "User Administrator");

        let err = dir.activate_role(&tpl).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(dir.list_active_roles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn scope_tags_get_small_integer_ids() {
        let dir = MemoryDirectory::new("lab.example.com");
        let t1 = dir
            .create_scope_tag(&NewScopeTag { display_name: "ST1".into(), description: None })
            .await
            .unwrap();
        let t2 = dir
            .create_scope_tag(&NewScopeTag { display_name: "ST2".into(), description: None })
            .await
            .unwrap();
        assert_eq!(t1.id.as_str(), "1");
        assert_eq!(t2.id.as_str(), "2");
        assert_eq!(dir.tag_count().await, 2);
    }

    #[tokio::test]
    async fn grants_need_an_active_role() {
        let dir = MemoryDirectory::new("lab.example.com");
        let g = dir
            .create_group(&NewGroup {
                display_name:  "SG-Student1-Admins".into(),
                mail_nickname: "SGStudent1Admins".into(),
                description:   None,
            })
            .await
            .unwrap();
        let unit = dir
            .create_admin_unit(&NewAdminUnit {
                display_name:      "AU-Student1".into(),
                description:       None,
                hidden_membership: true,
            })
            .await
            .unwrap();

        let inactive = ObjectId::new("fe930be7-5e62-47db-91af-98c3a49a38b1");
        let err = dir.grant_scoped_role(&unit.id, &inactive, &g.id).await.unwrap_err();
        assert!(err.is_not_found());

        let role = dir.activate_role(&inactive).await.unwrap();
        let grant = dir.grant_scoped_role(&unit.id, &role.id, &g.id).await.unwrap();
        assert_eq!(grant.principal_id, g.id);

        let again = dir.grant_scoped_role(&unit.id, &role.id, &g.id).await.unwrap_err();
        assert!(again.is_conflict());
    }

    #[tokio::test]
    async fn injected_failure_fires_exactly_once() {
        let dir = MemoryDirectory::new("lab.example.com");
        dir.fail_once("create_user").await;

        let err = dir.create_user(&user(1)).await.unwrap_err();
        assert!(err.is_transient());

        dir.create_user(&user(1)).await.unwrap();
        assert_eq!(dir.user_count().await, 1);
    }

    #[tokio::test]
    async fn assignments_are_tracked_per_definition() {
        let dir = MemoryDirectory::new("lab.example.com");
        let def = dir
            .create_role_definition(&NewRoleDefinition {
                display_name:    "Lab Intune Admin".into(),
                description:     None,
                allowed_actions: vec!["Microsoft.Intune_ManagedDevices_Read".into()],
            })
            .await
            .unwrap();
        let other = dir
            .create_role_definition(&NewRoleDefinition {
                display_name:    "Other".into(),
                description:     None,
                allowed_actions: vec![],
            })
            .await
            .unwrap();

        dir.create_role_assignment(&NewRoleAssignment {
            display_name:       "Student 1 Intune".into(),
            description:        None,
            role_definition_id: def.id.clone(),
            member_ids:         vec![ObjectId::new("g-admins-1")],
            resource_scope_ids: vec![ObjectId::new("g-users-1")],
            scope_tag_ids:      vec!["1".into()],
        })
        .await
        .unwrap();

        assert_eq!(dir.list_role_assignments(&def.id).await.unwrap().len(), 1);
        assert!(dir.list_role_assignments(&other.id).await.unwrap().is_empty());
        assert_eq!(dir.assignment_count().await, 1);
    }

    #[tokio::test]
    async fn extra_domains_are_listed() {
        let dir = MemoryDirectory::new("lab.example.com");
        dir.add_domain(TenantDomain {
            name:        "pending.example.com".into(),
            is_verified: false,
            is_default:  false,
        })
        .await;

        let domains = dir.list_domains().await.unwrap();
        assert_eq!(domains.len(), 2);
        assert!(!domains[1].is_verified);
    }
}
