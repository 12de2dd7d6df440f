//! Stage 3: hidden administrative units with a scoped directory role grant.

use std::sync::Arc;

use tracing::{debug, info, warn};

use podlab_config::{LabConfig, PropagationPolicy};
use podlab_directory::{Directory, DirectoryError};
use podlab_domain::{
    AdminUnit, DirectoryRole, GroupRole, NewAdminUnit, ObjectId, PodNames, SecurityGroup,
};

use crate::error::ProvisionError;
use crate::report::{Stage, StageReport, StageRequest, StudentOutcome};
use crate::retry::{resolve_with_backoff, write_with_backoff};

/// Provision the administrative units.
///
/// Per student: a membership-hidden unit holding exactly the student account
/// and the Users group, plus a scoped grant of the configured directory role
/// to the Admins group. The role itself is tenant-wide state; it is resolved
/// once up front and activated from its template if needed.
///
/// Students whose stage-1 objects cannot be found (even after waiting out
/// propagation) are skipped, not failed; re-run the identity stage first.
pub async fn provision_admin_units(
    req: &StageRequest,
    config: &LabConfig,
    directory: Arc<dyn Directory>,
) -> Result<StageReport, ProvisionError> {
    let mut report = StageReport::new(Stage::AdminUnits);

    let role = resolve_directory_role(directory.as_ref(), &config.directory_role).await?;
    debug!(role = %role.display_name, id = %role.id, "scoped directory role resolved");

    for &student in &req.students {
        let names = PodNames::new(student, &config.domain);
        let result = provision_student(
            directory.as_ref(),
            &config.propagation,
            &names,
            &role,
            !req.assume_existing,
        )
        .await;
        match result {
            Ok(outcome) => {
                if let StudentOutcome::Skipped { reason } = &outcome {
                    warn!(student = %student, reason = %reason, "skipping student");
                }
                report.record(student, outcome);
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(student = %student, error = %e, "admin unit provisioning failed for student");
                report.record(
                    student,
                    StudentOutcome::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    info!(
        created = report.created(),
        existing = report.already_provisioned(),
        skipped = report.skipped(),
        failed = report.failed(),
        "admin unit stage complete"
    );
    Ok(report)
}

/// Find the configured role among the tenant's active roles, activating it
/// from its template when it has never been used. No match anywhere is
/// fatal: the grant below would be meaningless.
async fn resolve_directory_role(
    directory: &dyn Directory,
    name: &str,
) -> Result<DirectoryRole, ProvisionError> {
    if let Some(active) = find_active_role(directory, name).await? {
        return Ok(active);
    }

    let templates = directory.list_role_templates().await?;
    let template = templates
        .iter()
        .find(|t| t.display_name.eq_ignore_ascii_case(name))
        .ok_or_else(|| ProvisionError::RoleTemplateMissing(name.to_string()))?;

    match directory.activate_role(&template.id).await {
        Ok(role) => {
            info!(role = %role.display_name, "activated directory role from template");
            Ok(role)
        }
        // Activated concurrently, or the active listing lagged behind.
        Err(e) if e.is_conflict() => find_active_role(directory, name)
            .await?
            .ok_or(ProvisionError::Directory(e)),
        Err(e) => Err(e.into()),
    }
}

async fn find_active_role(
    directory: &dyn Directory,
    name: &str,
) -> Result<Option<DirectoryRole>, DirectoryError> {
    let active = directory.list_active_roles().await?;
    Ok(active
        .into_iter()
        .find(|r| r.display_name.eq_ignore_ascii_case(name)))
}

async fn provision_student(
    directory: &dyn Directory,
    policy: &PropagationPolicy,
    names: &PodNames,
    role: &DirectoryRole,
    create: bool,
) -> Result<StudentOutcome, DirectoryError> {
    // Stage-1 objects, waited for under the propagation policy.
    let student_upn = names.student_upn();
    let Some(student_user) = resolve_with_backoff(policy, "student account", || {
        directory.find_user_by_upn(&student_upn)
    })
    .await?
    else {
        return Ok(prerequisite_missing(&student_upn));
    };

    let users_name = names.group_name(GroupRole::Users);
    let Some(users_group) = resolve_with_backoff(policy, "users group", || {
        directory.find_group_by_name(&users_name)
    })
    .await?
    else {
        return Ok(prerequisite_missing(&users_name));
    };

    let admins_name = names.group_name(GroupRole::Admins);
    let Some(admins_group) = resolve_with_backoff(policy, "admins group", || {
        directory.find_group_by_name(&admins_name)
    })
    .await?
    else {
        return Ok(prerequisite_missing(&admins_name));
    };

    let mut created_any = false;

    let Some((unit, unit_created)) = ensure_unit(directory, names, create).await? else {
        return Ok(StudentOutcome::Skipped {
            reason: format!(
                "{} is missing and creation is disabled",
                names.admin_unit_name()
            ),
        });
    };
    created_any |= unit_created;

    // The unit holds the student account and the Users group, nothing else.
    for member in [&student_user.id, &users_group.id] {
        created_any |=
            ensure_unit_member(directory, policy, &unit.id, member, unit_created).await?;
    }

    created_any |= ensure_scoped_grant(
        directory,
        policy,
        &unit,
        role,
        &admins_group,
        unit_created,
    )
    .await?;

    Ok(if created_any {
        StudentOutcome::Created
    } else {
        StudentOutcome::AlreadyProvisioned
    })
}

fn prerequisite_missing(name: &str) -> StudentOutcome {
    StudentOutcome::Skipped {
        reason: format!("{name} not found; run the identity stage first"),
    }
}

async fn ensure_unit(
    directory: &dyn Directory,
    names: &PodNames,
    create: bool,
) -> Result<Option<(AdminUnit, bool)>, DirectoryError> {
    let name = names.admin_unit_name();
    if let Some(existing) = directory.find_admin_unit(&name).await? {
        debug!(unit = %name, "administrative unit already present");
        return Ok(Some((existing, false)));
    }
    if !create {
        return Ok(None);
    }

    let request = NewAdminUnit {
        display_name: name.clone(),
        description: Some(format!("Isolated unit for lab student {}", names.index())),
        hidden_membership: true,
    };
    match directory.create_admin_unit(&request).await {
        Ok(unit) => {
            info!(student = %names.index(), unit = %unit.display_name, "created administrative unit");
            Ok(Some((unit, true)))
        }
        Err(e) if e.is_conflict() => match directory.find_admin_unit(&name).await? {
            Some(existing) => Ok(Some((existing, false))),
            None => Err(e),
        },
        Err(e) => Err(e),
    }
}

async fn ensure_unit_member(
    directory: &dyn Directory,
    policy: &PropagationPolicy,
    unit: &ObjectId,
    member: &ObjectId,
    unit_is_fresh: bool,
) -> Result<bool, DirectoryError> {
    if !unit_is_fresh {
        let members = directory.list_admin_unit_members(unit).await?;
        if members.contains(member) {
            return Ok(false);
        }
    }
    let result = write_with_backoff(policy, "unit membership", || {
        directory.add_admin_unit_member(unit, member)
    })
    .await;
    match result {
        Ok(()) => {
            debug!(unit = %unit, member = %member, "added unit member");
            Ok(true)
        }
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}

async fn ensure_scoped_grant(
    directory: &dyn Directory,
    policy: &PropagationPolicy,
    unit: &AdminUnit,
    role: &DirectoryRole,
    admins: &SecurityGroup,
    unit_is_fresh: bool,
) -> Result<bool, DirectoryError> {
    if !unit_is_fresh {
        let grants = directory.list_scoped_role_grants(&unit.id).await?;
        if grants
            .iter()
            .any(|g| g.role_id == role.id && g.principal_id == admins.id)
        {
            return Ok(false);
        }
    }
    let result = write_with_backoff(policy, "scoped role grant", || {
        directory.grant_scoped_role(&unit.id, &role.id, &admins.id)
    })
    .await;
    match result {
        Ok(_) => {
            info!(unit = %unit.display_name, role = %role.display_name, principal = %admins.display_name, "granted scoped role");
            Ok(true)
        }
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::provision_identities;
    use podlab_directory::MemoryDirectory;
    use podlab_domain::StudentIndex;

    fn config() -> LabConfig {
        let mut config = LabConfig::new("tenant-1", "lab.example.com");
        config.propagation = PropagationPolicy::none();
        config
    }

    fn roster(n: u32) -> StageRequest {
        StageRequest::new(StudentIndex::first_n(n).unwrap())
    }

    async fn with_identities(n: u32) -> Arc<MemoryDirectory> {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        provision_identities(&roster(n), &config(), directory.clone())
            .await
            .unwrap();
        directory
    }

    #[tokio::test]
    async fn units_are_hidden_and_hold_the_right_members() {
        let directory = with_identities(1).await;

        let report = provision_admin_units(&roster(1), &config(), directory.clone())
            .await
            .unwrap();
        assert_eq!(report.created(), 1);

        let unit = directory.find_admin_unit("AU-Student1").await.unwrap().unwrap();
        assert!(unit.hidden_membership);

        let student_user = directory
            .find_user_by_upn("W365Student1@lab.example.com")
            .await
            .unwrap()
            .unwrap();
        let users = directory
            .find_group_by_name("SG-Student1-Users")
            .await
            .unwrap()
            .unwrap();
        let mut members = directory.list_admin_unit_members(&unit.id).await.unwrap();
        members.sort();
        let mut expected = vec![student_user.id, users.id];
        expected.sort();
        assert_eq!(members, expected);
    }

    #[tokio::test]
    async fn the_role_is_activated_and_granted_to_admins() {
        let directory = with_identities(1).await;

        provision_admin_units(&roster(1), &config(), directory.clone())
            .await
            .unwrap();

        let active = directory.list_active_roles().await.unwrap();
        let role = active
            .iter()
            .find(|r| r.display_name == "User Administrator")
            .unwrap();

        let unit = directory.find_admin_unit("AU-Student1").await.unwrap().unwrap();
        let admins = directory
            .find_group_by_name("SG-Student1-Admins")
            .await
            .unwrap()
            .unwrap();
        let grants = directory.list_scoped_role_grants(&unit.id).await.unwrap();
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].role_id, role.id);
        assert_eq!(grants[0].principal_id, admins.id);
    }

    #[tokio::test]
    async fn an_already_active_role_is_reused() {
        let directory = with_identities(1).await;
        let templates = directory.list_role_templates().await.unwrap();
        let template = templates
            .iter()
            .find(|t| t.display_name == "User Administrator")
            .unwrap();
        directory.activate_role(&template.id).await.unwrap();

        provision_admin_units(&roster(1), &config(), directory.clone())
            .await
            .unwrap();

        assert_eq!(directory.list_active_roles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn an_unknown_role_name_is_fatal() {
        let directory = with_identities(1).await;
        let mut config = config();
        config.directory_role = "Chief Wizard".into();

        let err = provision_admin_units(&roster(1), &config, directory.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::RoleTemplateMissing(n) if n == "Chief Wizard"));
        assert_eq!(directory.unit_count().await, 0);
    }

    #[tokio::test]
    async fn missing_identities_skip_the_student() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));

        let report = provision_admin_units(&roster(2), &config(), directory.clone())
            .await
            .unwrap();

        assert_eq!(report.skipped(), 2);
        assert_eq!(directory.unit_count().await, 0);
    }

    #[tokio::test]
    async fn a_second_run_changes_nothing() {
        let directory = with_identities(2).await;
        provision_admin_units(&roster(2), &config(), directory.clone())
            .await
            .unwrap();

        let report = provision_admin_units(&roster(2), &config(), directory.clone())
            .await
            .unwrap();

        assert_eq!(report.already_provisioned(), 2);
        assert_eq!(directory.unit_count().await, 2);
        let unit = directory.find_admin_unit("AU-Student1").await.unwrap().unwrap();
        assert_eq!(
            directory.list_scoped_role_grants(&unit.id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn assume_existing_only_wires_existing_units() {
        let directory = with_identities(1).await;
        let mut req = roster(1);
        req.assume_existing = true;

        let report = provision_admin_units(&req, &config(), directory.clone())
            .await
            .unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(directory.unit_count().await, 0);

        // A unit made out of band gets its members and grant on the next pass.
        directory
            .create_admin_unit(&NewAdminUnit {
                display_name: "AU-Student1".into(),
                description: None,
                hidden_membership: true,
            })
            .await
            .unwrap();
        let report = provision_admin_units(&req, &config(), directory.clone())
            .await
            .unwrap();
        assert_eq!(report.created(), 1);

        let unit = directory.find_admin_unit("AU-Student1").await.unwrap().unwrap();
        let members = directory.list_admin_unit_members(&unit.id).await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(
            directory.list_scoped_role_grants(&unit.id).await.unwrap().len(),
            1
        );
    }
}
