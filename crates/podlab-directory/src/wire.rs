//! Request and response bodies for the Graph REST surface.
//!
//! Everything here mirrors the service's JSON shapes field for field; the
//! conversions at the bottom map responses onto the domain records so the
//! rest of the crate never touches raw payloads.

use serde::{Deserialize, Serialize};

use podlab_domain::{
    AdminUnit, DirectoryRole, ObjectId, RoleAssignment, RoleDefinition, RoleTemplate, ScopeTag,
    ScopedRoleGrant, SecurityGroup, TenantDomain, UserAccount,
};

// ── Envelopes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct ODataList<T> {
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ODataError {
    pub error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ODataErrorBody {
    pub code: String,
    pub message: String,
}

// ── Users ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserResource {
    pub id: String,
    pub user_principal_name: String,
    pub display_name: String,
    #[serde(default)]
    pub account_enabled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateUserBody<'a> {
    pub account_enabled: bool,
    pub display_name: &'a str,
    pub mail_nickname: &'a str,
    pub user_principal_name: &'a str,
    pub password_profile: PasswordProfile<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PasswordProfile<'a> {
    pub force_change_password_next_sign_in: bool,
    pub password: &'a str,
}

// ── Groups ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroupResource {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateGroupBody<'a> {
    pub display_name: &'a str,
    pub mail_nickname: &'a str,
    pub mail_enabled: bool,
    pub security_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

/// Bare directory object, used when listing memberships with `$select=id`.
#[derive(Debug, Deserialize)]
pub(crate) struct DirectoryObjectResource {
    pub id: String,
}

/// Body of a `$ref` membership add.
#[derive(Debug, Serialize)]
pub(crate) struct ODataRef {
    #[serde(rename = "@odata.id")]
    pub odata_id: String,
}

// ── Domains ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DomainResource {
    /// The domain name doubles as the resource id.
    pub id: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_default: bool,
}

// ── Administrative units ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AdminUnitResource {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub visibility: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateAdminUnitBody<'a> {
    pub display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScopedRoleMembershipResource {
    pub id: String,
    pub role_id: String,
    pub role_member_info: RoleMemberInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RoleMemberInfo {
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateScopedRoleMemberBody {
    pub role_id: String,
    pub role_member_info: RoleMemberInfo,
}

// ── Directory roles ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleTemplateResource {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DirectoryRoleResource {
    pub id: String,
    pub display_name: String,
    pub role_template_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ActivateRoleBody<'a> {
    pub role_template_id: &'a str,
}

// ── Scope tags ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScopeTagResource {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateScopeTagBody<'a> {
    pub display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

// ── Device-management RBAC ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleDefinitionResource {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_built_in: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateRoleDefinitionBody<'a> {
    #[serde(rename = "@odata.type")]
    pub odata_type: &'static str,
    pub display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub is_built_in: bool,
    pub role_permissions: Vec<RolePermissionBody<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RolePermissionBody<'a> {
    pub resource_actions: Vec<ResourceActionBody<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResourceActionBody<'a> {
    pub allowed_resource_actions: Vec<&'a str>,
    pub not_allowed_resource_actions: Vec<&'a str>,
}

/// Assignment as listed under a role definition. Only the id is reliable
/// here; the full resource is fetched separately.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleAssignmentSummaryResource {
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoleAssignmentResource {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub resource_scopes: Vec<String>,
    #[serde(default)]
    pub role_scope_tag_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateRoleAssignmentBody<'a> {
    #[serde(rename = "@odata.type")]
    pub odata_type: &'static str,
    pub display_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    #[serde(rename = "roleDefinition@odata.bind")]
    pub role_definition_bind: String,
    pub members: Vec<&'a str>,
    pub resource_scopes: Vec<&'a str>,
    pub role_scope_tag_ids: Vec<&'a str>,
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<UserResource> for UserAccount {
    fn from(r: UserResource) -> Self {
        UserAccount {
            id: ObjectId::new(r.id),
            user_principal_name: r.user_principal_name,
            display_name: r.display_name,
            account_enabled: r.account_enabled,
        }
    }
}

impl From<GroupResource> for SecurityGroup {
    fn from(r: GroupResource) -> Self {
        SecurityGroup {
            id: ObjectId::new(r.id),
            display_name: r.display_name,
            description: r.description,
        }
    }
}

impl From<DomainResource> for TenantDomain {
    fn from(r: DomainResource) -> Self {
        TenantDomain {
            name: r.id,
            is_verified: r.is_verified,
            is_default: r.is_default,
        }
    }
}

impl From<AdminUnitResource> for AdminUnit {
    fn from(r: AdminUnitResource) -> Self {
        let hidden = r.visibility.as_deref() == Some("HiddenMembership");
        AdminUnit {
            id: ObjectId::new(r.id),
            display_name: r.display_name,
            hidden_membership: hidden,
        }
    }
}

impl From<ScopedRoleMembershipResource> for ScopedRoleGrant {
    fn from(r: ScopedRoleMembershipResource) -> Self {
        ScopedRoleGrant {
            id: ObjectId::new(r.id),
            role_id: ObjectId::new(r.role_id),
            principal_id: ObjectId::new(r.role_member_info.id),
        }
    }
}

impl From<RoleTemplateResource> for RoleTemplate {
    fn from(r: RoleTemplateResource) -> Self {
        RoleTemplate {
            id: ObjectId::new(r.id),
            display_name: r.display_name,
        }
    }
}

impl From<DirectoryRoleResource> for DirectoryRole {
    fn from(r: DirectoryRoleResource) -> Self {
        DirectoryRole {
            id: ObjectId::new(r.id),
            display_name: r.display_name,
            role_template_id: r.role_template_id,
        }
    }
}

impl From<ScopeTagResource> for ScopeTag {
    fn from(r: ScopeTagResource) -> Self {
        ScopeTag {
            id: ObjectId::new(r.id),
            display_name: r.display_name,
            description: r.description,
        }
    }
}

impl From<RoleDefinitionResource> for RoleDefinition {
    fn from(r: RoleDefinitionResource) -> Self {
        RoleDefinition {
            id: ObjectId::new(r.id),
            display_name: r.display_name,
            is_built_in: r.is_built_in,
        }
    }
}

impl From<RoleAssignmentResource> for RoleAssignment {
    fn from(r: RoleAssignmentResource) -> Self {
        RoleAssignment {
            id: ObjectId::new(r.id),
            display_name: r.display_name,
            member_ids: r.members.into_iter().map(ObjectId::new).collect(),
            resource_scope_ids: r.resource_scopes.into_iter().map(ObjectId::new).collect(),
            scope_tag_ids: r.role_scope_tag_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn user_create_body_uses_service_field_names() {
        let body = CreateUserBody {
            account_enabled: true,
            display_name: "Student 1 Admin",
            mail_nickname: "admin1",
            user_principal_name: "admin1@lab.example.com",
            password_profile: PasswordProfile {
                force_change_password_next_sign_in: true,
                password: "s3cret-s3cret",
            },
        };

        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(
            v,
            json!({
                "accountEnabled": true,
                "displayName": "Student 1 Admin",
                "mailNickname": "admin1",
                "userPrincipalName": "admin1@lab.example.com",
                "passwordProfile": {
                    "forceChangePasswordNextSignIn": true,
                    "password": "s3cret-s3cret",
                }
            })
        );
    }

    #[test]
    fn error_envelope_parses() {
        let body = json!({
            "error": {
                "code": "Request_BadRequest",
                "message": "Another object with the same value for property userPrincipalName already exists.",
            }
        });
        let err: ODataError = serde_json::from_value(body).unwrap();
        assert_eq!(err.error.code, "Request_BadRequest");
    }

    #[test]
    fn paged_list_keeps_next_link() {
        let body = json!({
            "value": [{"id": "a"}, {"id": "b"}],
            "@odata.nextLink": "https://graph.example/v1.0/users?$skiptoken=x",
        });
        let page: ODataList<DirectoryObjectResource> = serde_json::from_value(body).unwrap();
        assert_eq!(page.value.len(), 2);
        assert!(page.next_link.is_some());
    }

    #[test]
    fn hidden_membership_maps_from_visibility() {
        let unit: AdminUnitResource = serde_json::from_value(json!({
            "id": "u-1",
            "displayName": "AU-Student1",
            "visibility": "HiddenMembership",
        }))
        .unwrap();
        assert!(AdminUnit::from(unit).hidden_membership);

        let open: AdminUnitResource = serde_json::from_value(json!({
            "id": "u-2",
            "displayName": "AU-Student2",
            "visibility": null,
        }))
        .unwrap();
        assert!(!AdminUnit::from(open).hidden_membership);
    }

    #[test]
    fn assignment_bind_field_is_literal() {
        let body = CreateRoleAssignmentBody {
            odata_type: "#microsoft.graph.deviceAndAppManagementRoleAssignment",
            display_name: "Student 1 Intune",
            description: None,
            role_definition_bind:
                "https://graph.microsoft.com/beta/deviceManagement/roleDefinitions('rd-1')".into(),
            members: vec!["g-admins"],
            resource_scopes: vec!["g-users", "g-devices"],
            role_scope_tag_ids: vec!["7"],
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(
            v["roleDefinition@odata.bind"],
            "https://graph.microsoft.com/beta/deviceManagement/roleDefinitions('rd-1')"
        );
        assert_eq!(v["@odata.type"], "#microsoft.graph.deviceAndAppManagementRoleAssignment");
        assert!(v.get("description").is_none());
    }
}
