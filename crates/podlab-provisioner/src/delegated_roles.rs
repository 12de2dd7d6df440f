//! Stage 4: the shared device-management role and per-student assignments.

use std::sync::Arc;

use tracing::{debug, info, warn};

use podlab_config::{LabConfig, PropagationPolicy};
use podlab_directory::{Directory, DirectoryError};
use podlab_domain::{
    GroupRole, NewRoleAssignment, NewRoleDefinition, PodNames, RoleDefinition,
    LAB_INTUNE_ALLOWED_ACTIONS, LAB_INTUNE_ROLE_NAME,
};

use crate::error::ProvisionError;
use crate::report::{Stage, StageReport, StageRequest, StudentOutcome};
use crate::retry::{resolve_with_backoff, write_with_backoff};

/// Provision the delegated device-management layer.
///
/// One custom role definition is shared by the whole lab; each student then
/// gets an assignment of it binding the Admins group (who may act) over the
/// Users and Devices groups (what they may act on), partitioned by the
/// student's scope tag. The definition is ensured once up front; a failure
/// there is fatal because every assignment references it.
pub async fn provision_delegated_roles(
    req: &StageRequest,
    config: &LabConfig,
    directory: Arc<dyn Directory>,
) -> Result<StageReport, ProvisionError> {
    let mut report = StageReport::new(Stage::DelegatedRoles);

    let (definition, definition_created) =
        ensure_role_definition(directory.as_ref(), !req.assume_existing).await?;
    if definition_created {
        info!(role = LAB_INTUNE_ROLE_NAME, id = %definition.id, "created shared device-management role");
    }

    for &student in &req.students {
        let names = PodNames::new(student, &config.domain);
        let result = provision_student(
            directory.as_ref(),
            &config.propagation,
            &names,
            &definition,
            definition_created,
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
                warn!(student = %student, error = %e, "role assignment failed for student");
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
        "delegated role stage complete"
    );
    Ok(report)
}

async fn ensure_role_definition(
    directory: &dyn Directory,
    create: bool,
) -> Result<(RoleDefinition, bool), ProvisionError> {
    if let Some(existing) = directory.find_role_definition(LAB_INTUNE_ROLE_NAME).await? {
        debug!(role = LAB_INTUNE_ROLE_NAME, id = %existing.id, "shared role already defined");
        return Ok((existing, false));
    }
    if !create {
        return Err(ProvisionError::RoleDefinitionMissing(
            LAB_INTUNE_ROLE_NAME.to_string(),
        ));
    }

    let request = NewRoleDefinition {
        display_name: LAB_INTUNE_ROLE_NAME.to_string(),
        description: Some("Delegated device management for lab students".to_string()),
        allowed_actions: LAB_INTUNE_ALLOWED_ACTIONS
            .iter()
            .map(|action| action.to_string())
            .collect(),
    };
    match directory.create_role_definition(&request).await {
        Ok(definition) => Ok((definition, true)),
        Err(e) if e.is_conflict() => directory
            .find_role_definition(LAB_INTUNE_ROLE_NAME)
            .await?
            .map(|definition| (definition, false))
            .ok_or(ProvisionError::Directory(e)),
        Err(e) => Err(e.into()),
    }
}

async fn provision_student(
    directory: &dyn Directory,
    policy: &PropagationPolicy,
    names: &PodNames,
    definition: &RoleDefinition,
    definition_is_fresh: bool,
) -> Result<StudentOutcome, DirectoryError> {
    let admins_name = names.group_name(GroupRole::Admins);
    let Some(admins) = resolve_with_backoff(policy, "admins group", || {
        directory.find_group_by_name(&admins_name)
    })
    .await?
    else {
        return Ok(prerequisite_missing(&admins_name, "identity"));
    };

    let users_name = names.group_name(GroupRole::Users);
    let Some(users) = resolve_with_backoff(policy, "users group", || {
        directory.find_group_by_name(&users_name)
    })
    .await?
    else {
        return Ok(prerequisite_missing(&users_name, "identity"));
    };

    let devices_name = names.group_name(GroupRole::Devices);
    let Some(devices) = resolve_with_backoff(policy, "devices group", || {
        directory.find_group_by_name(&devices_name)
    })
    .await?
    else {
        return Ok(prerequisite_missing(&devices_name, "identity"));
    };

    let tag_name = names.scope_tag_name();
    let Some(tag) = resolve_with_backoff(policy, "scope tag", || {
        directory.find_scope_tag(&tag_name)
    })
    .await?
    else {
        return Ok(prerequisite_missing(&tag_name, "scope tag"));
    };

    // Assignments carry no deterministic name in the service, so idempotency
    // is a by-principal search over the definition's existing assignments. A
    // definition created in this run can have none yet.
    if !definition_is_fresh {
        let existing = directory.list_role_assignments(&definition.id).await?;
        if existing.iter().any(|a| a.member_ids.contains(&admins.id)) {
            debug!(student = %names.index(), "delegated assignment already present");
            return Ok(StudentOutcome::AlreadyProvisioned);
        }
    }

    let request = NewRoleAssignment {
        display_name: names.role_assignment_name(),
        description: Some(format!(
            "Delegated device management for lab student {}",
            names.index()
        )),
        role_definition_id: definition.id.clone(),
        member_ids: vec![admins.id.clone()],
        resource_scope_ids: vec![users.id.clone(), devices.id.clone()],
        scope_tag_ids: vec![tag.id.as_str().to_string()],
    };
    let result = write_with_backoff(policy, "role assignment", || {
        directory.create_role_assignment(&request)
    })
    .await;
    match result {
        Ok(assignment) => {
            info!(student = %names.index(), assignment = %assignment.display_name, "created delegated assignment");
            Ok(StudentOutcome::Created)
        }
        Err(e) if e.is_conflict() => Ok(StudentOutcome::AlreadyProvisioned),
        Err(e) => Err(e),
    }
}

fn prerequisite_missing(name: &str, stage: &str) -> StudentOutcome {
    StudentOutcome::Skipped {
        reason: format!("{name} not found; run the {stage} stage first"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::provision_identities;
    use crate::scope_tags::provision_scope_tags;
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

    async fn with_prerequisites(n: u32) -> Arc<MemoryDirectory> {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        provision_identities(&roster(n), &config(), directory.clone())
            .await
            .unwrap();
        provision_scope_tags(&roster(n), &config(), directory.clone())
            .await
            .unwrap();
        directory
    }

    #[tokio::test]
    async fn one_definition_and_one_assignment_per_student() {
        let directory = with_prerequisites(2).await;

        let report = provision_delegated_roles(&roster(2), &config(), directory.clone())
            .await
            .unwrap();
        assert_eq!(report.created(), 2);

        let definition = directory
            .find_role_definition(LAB_INTUNE_ROLE_NAME)
            .await
            .unwrap()
            .unwrap();
        let assignments = directory
            .list_role_assignments(&definition.id)
            .await
            .unwrap();
        assert_eq!(assignments.len(), 2);

        let admins = directory
            .find_group_by_name("SG-Student1-Admins")
            .await
            .unwrap()
            .unwrap();
        let users = directory
            .find_group_by_name("SG-Student1-Users")
            .await
            .unwrap()
            .unwrap();
        let devices = directory
            .find_group_by_name("SG-Student1-Devices")
            .await
            .unwrap()
            .unwrap();
        let tag = directory.find_scope_tag("ST1").await.unwrap().unwrap();

        let assignment = assignments
            .iter()
            .find(|a| a.member_ids.contains(&admins.id))
            .unwrap();
        assert_eq!(assignment.member_ids, vec![admins.id]);
        assert_eq!(assignment.resource_scope_ids, vec![users.id, devices.id]);
        assert_eq!(assignment.scope_tag_ids, vec![tag.id.as_str().to_string()]);
    }

    #[tokio::test]
    async fn a_second_run_adds_no_assignments() {
        let directory = with_prerequisites(2).await;
        provision_delegated_roles(&roster(2), &config(), directory.clone())
            .await
            .unwrap();

        let report = provision_delegated_roles(&roster(2), &config(), directory.clone())
            .await
            .unwrap();

        assert_eq!(report.already_provisioned(), 2);
        assert_eq!(report.created(), 0);
        assert_eq!(directory.assignment_count().await, 2);
    }

    #[tokio::test]
    async fn a_missing_scope_tag_skips_the_student() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        provision_identities(&roster(1), &config(), directory.clone())
            .await
            .unwrap();

        let report = provision_delegated_roles(&roster(1), &config(), directory.clone())
            .await
            .unwrap();

        assert_eq!(report.skipped(), 1);
        assert_eq!(directory.assignment_count().await, 0);
        // The shared definition is still ensured up front.
        assert!(directory
            .find_role_definition(LAB_INTUNE_ROLE_NAME)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn assume_existing_requires_the_definition() {
        let directory = with_prerequisites(1).await;
        let mut req = roster(1);
        req.assume_existing = true;

        let err = provision_delegated_roles(&req, &config(), directory.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::RoleDefinitionMissing(_)));

        // With the definition in place the same request wires assignments.
        provision_delegated_roles(&roster(1), &config(), directory.clone())
            .await
            .unwrap();
        let report = provision_delegated_roles(&req, &config(), directory.clone())
            .await
            .unwrap();
        assert_eq!(report.already_provisioned(), 1);
    }
}
