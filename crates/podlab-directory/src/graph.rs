use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use podlab_domain::{
    AdminUnit, DirectoryRole, NewAdminUnit, NewGroup, NewRoleAssignment, NewRoleDefinition,
    NewScopeTag, NewUser, ObjectId, RoleAssignment, RoleDefinition, RoleTemplate, ScopeTag,
    ScopedRoleGrant, SecurityGroup, TenantDomain, UserAccount,
};

use crate::auth::{self, TokenProvider};
use crate::directory::Directory;
use crate::error::DirectoryError;
use crate::wire;

/// Retries per request for throttled (429) and transient upstream
/// (502/503/504) responses, counting the first attempt.
const MAX_ATTEMPTS: u32 = 5;

// ── Configuration ─────────────────────────────────────────────────────────────

/// Static configuration for the Graph-backed directory, injected at startup.
#[derive(Clone)]
pub struct GraphDirectoryConfig {
    /// Entra tenant ID (GUID) or a verified tenant domain name.
    pub tenant_id: String,
    /// App registration client ID (optional; falls back to env vars or CLI).
    pub client_id: Option<String>,
    /// App registration client secret (optional; falls back to env vars or CLI).
    pub client_secret: Option<String>,
}

// ── Base URLs (overridden in tests) ───────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct BaseUrls {
    pub(crate) login: String,
    pub(crate) graph: String,
}

impl Default for BaseUrls {
    fn default() -> Self {
        Self {
            login: "https://login.microsoftonline.com".into(),
            graph: "https://graph.microsoft.com".into(),
        }
    }
}

// ── GraphDirectory ────────────────────────────────────────────────────────────

/// `Directory` backed by the Microsoft Graph REST API.
///
/// Identity objects live under `/v1.0`. Device-management RBAC objects
/// (scope tags, role definitions, role assignments) are only exposed under
/// `/beta`. Throttled and transiently failing requests are retried with
/// backoff before an error is surfaced; everything else maps onto
/// [`DirectoryError`] so callers can classify it.
pub struct GraphDirectory {
    client: reqwest::Client,
    token:  Box<dyn TokenProvider>,
    base:   BaseUrls,
}

impl GraphDirectory {
    /// Create a `GraphDirectory`, auto-selecting the token provider from the
    /// configured credentials, the environment, or the Azure CLI.
    pub fn new(config: GraphDirectoryConfig) -> Self {
        let client = reqwest::Client::new();
        let base = BaseUrls::default();
        let token = auth::select_provider(
            &config.tenant_id,
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
            &base.login,
            &base.graph,
            client.clone(),
        );
        Self { client, token, base }
    }

    /// Create a `GraphDirectory` with a static bearer token and custom base
    /// URLs. Used exclusively in tests.
    #[cfg(test)]
    pub(crate) fn with_static_token(token: &str, base: BaseUrls) -> Self {
        Self {
            client: reqwest::Client::new(),
            token:  Box::new(auth::StaticToken(token.to_string())),
            base,
        }
    }

    fn v1(&self, path: &str) -> String {
        format!("{}/v1.0/{}", self.base.graph, path)
    }

    fn beta(&self, path: &str) -> String {
        format!("{}/beta/{}", self.base.graph, path)
    }

    // ── HTTP core ─────────────────────────────────────────────────────────────

    /// Send one request, retrying 429 and 502/503/504 responses. A 429 waits
    /// for the `Retry-After` the service asked for when present, otherwise
    /// the current backoff delay.
    async fn request<B: Serialize>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, DirectoryError> {
        let token = self.token.token().await?;
        let mut delay = Duration::from_secs(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut req = self.client.request(method.clone(), url).bearer_auth(&token);
            if let Some(b) = body {
                req = req.json(b);
            }
            let resp = req.send().await.map_err(|e| DirectoryError::Transport {
                url: url.to_string(),
                source: e,
            })?;

            let status = resp.status().as_u16();
            if !matches!(status, 429 | 502 | 503 | 504) {
                return Ok(resp);
            }
            if attempt >= MAX_ATTEMPTS {
                return Err(DirectoryError::Transient {
                    status,
                    message: format!("{} from {} after {} attempts", status, url, attempt),
                });
            }

            let wait = if status == 429 {
                resp.headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(delay)
            } else {
                delay
            };
            warn!(
                url,
                status,
                attempt,
                wait_ms = wait.as_millis() as u64,
                "transient response from the directory, backing off"
            );
            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(Duration::from_secs(30));
        }
    }

    /// Map a non-success response onto the service's error envelope.
    async fn ok_or_api_error(
        resp: reqwest::Response,
    ) -> Result<reqwest::Response, DirectoryError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<wire::ODataError>(&body) {
            Ok(parsed) => Err(DirectoryError::Api {
                code:    parsed.error.code,
                message: parsed.error.message,
            }),
            Err(_) => Err(DirectoryError::Api {
                code:    status.to_string(),
                message: body,
            }),
        }
    }

    async fn decode<T: DeserializeOwned>(
        resp: reqwest::Response,
        url: &str,
    ) -> Result<T, DirectoryError> {
        let body = resp.text().await.map_err(|e| DirectoryError::Transport {
            url: url.to_string(),
            source: e,
        })?;
        serde_json::from_str(&body).map_err(|e| DirectoryError::Decode {
            url:     url.to_string(),
            message: e.to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DirectoryError> {
        debug!(url, "graph GET");
        let resp = self.request::<()>(Method::GET, url, None).await?;
        let resp = Self::ok_or_api_error(resp).await?;
        Self::decode(resp, url).await
    }

    async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, DirectoryError> {
        debug!(url, "graph POST");
        let resp = self.request(Method::POST, url, Some(body)).await?;
        let resp = Self::ok_or_api_error(resp).await?;
        Self::decode(resp, url).await
    }

    async fn post_no_content<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(), DirectoryError> {
        debug!(url, "graph POST");
        let resp = self.request(Method::POST, url, Some(body)).await?;
        Self::ok_or_api_error(resp).await?;
        Ok(())
    }

    /// GET a collection, following `@odata.nextLink` until exhausted.
    async fn get_list<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, DirectoryError> {
        let mut items = Vec::new();
        let mut next = Some(url.to_string());
        while let Some(page_url) = next {
            let page: wire::ODataList<T> = self.get_json(&page_url).await?;
            items.extend(page.value);
            next = page.next_link;
        }
        Ok(items)
    }

    async fn list_member_ids(&self, url: &str) -> Result<Vec<ObjectId>, DirectoryError> {
        let members: Vec<wire::DirectoryObjectResource> = self.get_list(url).await?;
        Ok(members.into_iter().map(|m| ObjectId::new(m.id)).collect())
    }

    fn member_ref(&self, member: &ObjectId) -> wire::ODataRef {
        wire::ODataRef {
            odata_id: format!("{}/v1.0/directoryObjects/{}", self.base.graph, member),
        }
    }
}

// ── Filter escaping ───────────────────────────────────────────────────────────

/// Escape a value for use inside single quotes in an OData `$filter`.
fn odata_quote(value: &str) -> String {
    value.replace('\'', "''")
}

// ── Directory impl ────────────────────────────────────────────────────────────

#[async_trait]
impl Directory for GraphDirectory {
    fn name(&self) -> &'static str {
        "graph"
    }

    // ── Domains ───────────────────────────────────────────────────────────────

    async fn list_domains(&self) -> Result<Vec<TenantDomain>, DirectoryError> {
        let url = self.v1("domains");
        let domains: Vec<wire::DomainResource> = self.get_list(&url).await?;
        Ok(domains.into_iter().map(TenantDomain::from).collect())
    }

    // ── Users ─────────────────────────────────────────────────────────────────

    async fn find_user_by_upn(&self, upn: &str) -> Result<Option<UserAccount>, DirectoryError> {
        let url = self.v1(&format!(
            "users?$select=id,userPrincipalName,displayName,accountEnabled\
             &$filter=userPrincipalName eq '{}'",
            odata_quote(upn)
        ));
        let users: Vec<wire::UserResource> = self.get_list(&url).await?;
        Ok(users.into_iter().next().map(UserAccount::from))
    }

    async fn create_user(&self, req: &NewUser) -> Result<UserAccount, DirectoryError> {
        let body = wire::CreateUserBody {
            account_enabled:     true,
            display_name:        &req.display_name,
            mail_nickname:       &req.mail_nickname,
            user_principal_name: &req.user_principal_name,
            password_profile:    wire::PasswordProfile {
                force_change_password_next_sign_in: req.force_password_change,
                password:                           &req.password,
            },
        };
        let created: wire::UserResource = self.post_json(&self.v1("users"), &body).await?;
        Ok(created.into())
    }

    // ── Groups ────────────────────────────────────────────────────────────────

    async fn find_group_by_name(
        &self,
        name: &str,
    ) -> Result<Option<SecurityGroup>, DirectoryError> {
        let url = self.v1(&format!(
            "groups?$select=id,displayName,description&$filter=displayName eq '{}'",
            odata_quote(name)
        ));
        let groups: Vec<wire::GroupResource> = self.get_list(&url).await?;
        Ok(groups.into_iter().next().map(SecurityGroup::from))
    }

    async fn create_group(&self, req: &NewGroup) -> Result<SecurityGroup, DirectoryError> {
        let body = wire::CreateGroupBody {
            display_name:     &req.display_name,
            mail_nickname:    &req.mail_nickname,
            mail_enabled:     false,
            security_enabled: true,
            description:      req.description.as_deref(),
        };
        let created: wire::GroupResource = self.post_json(&self.v1("groups"), &body).await?;
        Ok(created.into())
    }

    async fn list_group_members(&self, group: &ObjectId) -> Result<Vec<ObjectId>, DirectoryError> {
        let url = self.v1(&format!("groups/{}/members?$select=id", group));
        self.list_member_ids(&url).await
    }

    async fn add_group_member(
        &self,
        group: &ObjectId,
        member: &ObjectId,
    ) -> Result<(), DirectoryError> {
        let url = self.v1(&format!("groups/{}/members/$ref", group));
        self.post_no_content(&url, &self.member_ref(member)).await
    }

    // ── Scope tags ────────────────────────────────────────────────────────────

    // The beta device-management endpoints do not support `$filter` on
    // displayName, so tag and role-definition lookups list and match here.

    async fn find_scope_tag(&self, name: &str) -> Result<Option<ScopeTag>, DirectoryError> {
        let url = self.beta("deviceManagement/roleScopeTags");
        let tags: Vec<wire::ScopeTagResource> = self.get_list(&url).await?;
        Ok(tags
            .into_iter()
            .find(|t| t.display_name == name)
            .map(ScopeTag::from))
    }

    async fn create_scope_tag(&self, req: &NewScopeTag) -> Result<ScopeTag, DirectoryError> {
        let body = wire::CreateScopeTagBody {
            display_name: &req.display_name,
            description:  req.description.as_deref(),
        };
        let url = self.beta("deviceManagement/roleScopeTags");
        let created: wire::ScopeTagResource = self.post_json(&url, &body).await?;
        Ok(created.into())
    }

    // ── Administrative units ──────────────────────────────────────────────────

    async fn find_admin_unit(&self, name: &str) -> Result<Option<AdminUnit>, DirectoryError> {
        let url = self.v1(&format!(
            "directory/administrativeUnits?$filter=displayName eq '{}'",
            odata_quote(name)
        ));
        let units: Vec<wire::AdminUnitResource> = self.get_list(&url).await?;
        Ok(units.into_iter().next().map(AdminUnit::from))
    }

    async fn create_admin_unit(&self, req: &NewAdminUnit) -> Result<AdminUnit, DirectoryError> {
        let body = wire::CreateAdminUnitBody {
            display_name: &req.display_name,
            description:  req.description.as_deref(),
            visibility:   req.hidden_membership.then_some("HiddenMembership"),
        };
        let url = self.v1("directory/administrativeUnits");
        let created: wire::AdminUnitResource = self.post_json(&url, &body).await?;
        Ok(created.into())
    }

    async fn list_admin_unit_members(
        &self,
        unit: &ObjectId,
    ) -> Result<Vec<ObjectId>, DirectoryError> {
        let url = self.v1(&format!(
            "directory/administrativeUnits/{}/members?$select=id",
            unit
        ));
        self.list_member_ids(&url).await
    }

    async fn add_admin_unit_member(
        &self,
        unit: &ObjectId,
        member: &ObjectId,
    ) -> Result<(), DirectoryError> {
        let url = self.v1(&format!("directory/administrativeUnits/{}/members/$ref", unit));
        self.post_no_content(&url, &self.member_ref(member)).await
    }

    async fn list_scoped_role_grants(
        &self,
        unit: &ObjectId,
    ) -> Result<Vec<ScopedRoleGrant>, DirectoryError> {
        let url = self.v1(&format!(
            "directory/administrativeUnits/{}/scopedRoleMembers",
            unit
        ));
        let grants: Vec<wire::ScopedRoleMembershipResource> = self.get_list(&url).await?;
        Ok(grants.into_iter().map(ScopedRoleGrant::from).collect())
    }

    async fn grant_scoped_role(
        &self,
        unit: &ObjectId,
        role: &ObjectId,
        principal: &ObjectId,
    ) -> Result<ScopedRoleGrant, DirectoryError> {
        let url = self.v1(&format!(
            "directory/administrativeUnits/{}/scopedRoleMembers",
            unit
        ));
        let body = wire::CreateScopedRoleMemberBody {
            role_id:          role.as_str().to_string(),
            role_member_info: wire::RoleMemberInfo {
                id: principal.as_str().to_string(),
            },
        };
        let created: wire::ScopedRoleMembershipResource = self.post_json(&url, &body).await?;
        Ok(created.into())
    }

    // ── Directory roles ───────────────────────────────────────────────────────

    async fn list_role_templates(&self) -> Result<Vec<RoleTemplate>, DirectoryError> {
        let url = self.v1("directoryRoleTemplates");
        let templates: Vec<wire::RoleTemplateResource> = self.get_list(&url).await?;
        Ok(templates.into_iter().map(RoleTemplate::from).collect())
    }

    async fn list_active_roles(&self) -> Result<Vec<DirectoryRole>, DirectoryError> {
        let url = self.v1("directoryRoles");
        let roles: Vec<wire::DirectoryRoleResource> = self.get_list(&url).await?;
        Ok(roles.into_iter().map(DirectoryRole::from).collect())
    }

    async fn activate_role(&self, template: &ObjectId) -> Result<DirectoryRole, DirectoryError> {
        let body = wire::ActivateRoleBody {
            role_template_id: template.as_str(),
        };
        let created: wire::DirectoryRoleResource =
            self.post_json(&self.v1("directoryRoles"), &body).await?;
        Ok(created.into())
    }

    // ── Device-management RBAC ────────────────────────────────────────────────

    async fn find_role_definition(
        &self,
        name: &str,
    ) -> Result<Option<RoleDefinition>, DirectoryError> {
        let url = self.beta("deviceManagement/roleDefinitions");
        let defs: Vec<wire::RoleDefinitionResource> = self.get_list(&url).await?;
        Ok(defs
            .into_iter()
            .find(|d| d.display_name == name)
            .map(RoleDefinition::from))
    }

    async fn create_role_definition(
        &self,
        req: &NewRoleDefinition,
    ) -> Result<RoleDefinition, DirectoryError> {
        let body = wire::CreateRoleDefinitionBody {
            odata_type:       "#microsoft.graph.roleDefinition",
            display_name:     &req.display_name,
            description:      req.description.as_deref(),
            is_built_in:      false,
            role_permissions: vec![wire::RolePermissionBody {
                resource_actions: vec![wire::ResourceActionBody {
                    allowed_resource_actions: req
                        .allowed_actions
                        .iter()
                        .map(String::as_str)
                        .collect(),
                    not_allowed_resource_actions: Vec::new(),
                }],
            }],
        };
        let url = self.beta("deviceManagement/roleDefinitions");
        let created: wire::RoleDefinitionResource = self.post_json(&url, &body).await?;
        Ok(created.into())
    }

    async fn list_role_assignments(
        &self,
        definition: &ObjectId,
    ) -> Result<Vec<RoleAssignment>, DirectoryError> {
        // The listing under a definition returns summaries only; each
        // assignment is fetched individually for members and scopes.
        let url = self.beta(&format!(
            "deviceManagement/roleDefinitions/{}/roleAssignments",
            definition
        ));
        let summaries: Vec<wire::RoleAssignmentSummaryResource> = self.get_list(&url).await?;

        let mut assignments = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let url = self.beta(&format!("deviceManagement/roleAssignments/{}", summary.id));
            let full: wire::RoleAssignmentResource = self.get_json(&url).await?;
            assignments.push(full.into());
        }
        Ok(assignments)
    }

    async fn create_role_assignment(
        &self,
        req: &NewRoleAssignment,
    ) -> Result<RoleAssignment, DirectoryError> {
        let body = wire::CreateRoleAssignmentBody {
            odata_type: "#microsoft.graph.deviceAndAppManagementRoleAssignment",
            display_name: &req.display_name,
            description: req.description.as_deref(),
            role_definition_bind: format!(
                "{}/beta/deviceManagement/roleDefinitions('{}')",
                self.base.graph, req.role_definition_id
            ),
            members: req.member_ids.iter().map(ObjectId::as_str).collect(),
            resource_scopes: req.resource_scope_ids.iter().map(ObjectId::as_str).collect(),
            role_scope_tag_ids: req.scope_tag_ids.iter().map(String::as_str).collect(),
        };
        let url = self.beta("deviceManagement/roleAssignments");
        let created: wire::RoleAssignmentResource = self.post_json(&url, &body).await?;
        Ok(created.into())
    }
}
