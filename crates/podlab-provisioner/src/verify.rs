//! Read-only audit of what each pod actually has in the directory.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use podlab_config::LabConfig;
use podlab_directory::Directory;
use podlab_domain::{GroupRole, PodNames, StudentIndex, LAB_INTUNE_ROLE_NAME};

use crate::error::ProvisionError;

/// Presence of each pod piece, checked by its deterministic name. Pure
/// reads; nothing here waits for propagation or writes anything.
#[derive(Debug, Clone, Serialize)]
pub struct PodStatus {
    pub student: StudentIndex,
    pub admin_account: bool,
    pub student_account: bool,
    /// How many of the three security groups exist.
    pub groups: u8,
    pub scope_tag: bool,
    pub admin_unit: bool,
    /// The unit holds both the student account and the Users group.
    pub unit_members_complete: bool,
    /// Some directory role is granted over the unit to the Admins group.
    pub scoped_grant: bool,
    /// A delegated assignment names the Admins group and the student's tag.
    pub role_assignment: bool,
}

impl PodStatus {
    pub fn complete(&self) -> bool {
        self.admin_account
            && self.student_account
            && self.groups == 3
            && self.scope_tag
            && self.admin_unit
            && self.unit_members_complete
            && self.scoped_grant
            && self.role_assignment
    }
}

/// Audit every student on the roster. The shared role definition and its
/// assignments are fetched once; everything else is per student.
pub async fn verify_pods(
    students: &[StudentIndex],
    config: &LabConfig,
    directory: Arc<dyn Directory>,
) -> Result<Vec<PodStatus>, ProvisionError> {
    let definition = directory.find_role_definition(LAB_INTUNE_ROLE_NAME).await?;
    let assignments = match &definition {
        Some(definition) => directory.list_role_assignments(&definition.id).await?,
        None => Vec::new(),
    };

    let mut statuses = Vec::with_capacity(students.len());
    for &student in students {
        let names = PodNames::new(student, &config.domain);

        let admin = directory.find_user_by_upn(&names.admin_upn()).await?;
        let student_user = directory.find_user_by_upn(&names.student_upn()).await?;

        let mut groups = 0u8;
        let mut admins_group = None;
        let mut users_group = None;
        for &role in GroupRole::all() {
            if let Some(group) = directory.find_group_by_name(&names.group_name(role)).await? {
                groups += 1;
                match role {
                    GroupRole::Admins => admins_group = Some(group),
                    GroupRole::Users => users_group = Some(group),
                    GroupRole::Devices => {}
                }
            }
        }

        let tag = directory.find_scope_tag(&names.scope_tag_name()).await?;
        let unit = directory.find_admin_unit(&names.admin_unit_name()).await?;

        let mut unit_members_complete = false;
        let mut scoped_grant = false;
        if let Some(unit) = &unit {
            let members = directory.list_admin_unit_members(&unit.id).await?;
            if let (Some(user), Some(group)) = (&student_user, &users_group) {
                unit_members_complete =
                    members.contains(&user.id) && members.contains(&group.id);
            }
            if let Some(admins) = &admins_group {
                scoped_grant = directory
                    .list_scoped_role_grants(&unit.id)
                    .await?
                    .iter()
                    .any(|g| g.principal_id == admins.id);
            }
        }

        let role_assignment = match (&admins_group, &tag) {
            (Some(admins), Some(tag)) => assignments.iter().any(|a| {
                a.member_ids.contains(&admins.id)
                    && a.scope_tag_ids.iter().any(|t| t == tag.id.as_str())
            }),
            _ => false,
        };

        statuses.push(PodStatus {
            student,
            admin_account: admin.is_some(),
            student_account: student_user.is_some(),
            groups,
            scope_tag: tag.is_some(),
            admin_unit: unit.is_some(),
            unit_members_complete,
            scoped_grant,
            role_assignment,
        });
    }

    let complete = statuses.iter().filter(|s| s.complete()).count();
    info!(
        students = statuses.len(),
        complete, "verification complete"
    );
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::StageRequest;
    use crate::run::provision_all;
    use podlab_config::PropagationPolicy;
    use podlab_directory::MemoryDirectory;

    fn config() -> LabConfig {
        let mut config = LabConfig::new("tenant-1", "lab.example.com");
        config.propagation = PropagationPolicy::none();
        config
    }

    fn students(n: u32) -> Vec<StudentIndex> {
        StudentIndex::first_n(n).unwrap()
    }

    #[tokio::test]
    async fn a_full_run_verifies_complete() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        provision_all(
            &StageRequest::new(students(2)),
            &config(),
            directory.clone(),
        )
        .await
        .unwrap();

        let statuses = verify_pods(&students(2), &config(), directory.clone())
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.complete()));
    }

    #[tokio::test]
    async fn an_empty_tenant_verifies_incomplete() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));

        let statuses = verify_pods(&students(1), &config(), directory.clone())
            .await
            .unwrap();

        let status = &statuses[0];
        assert!(!status.complete());
        assert!(!status.admin_account);
        assert_eq!(status.groups, 0);
        assert!(!status.role_assignment);
    }

    #[tokio::test]
    async fn a_partial_pod_shows_what_is_missing() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        crate::identity::provision_identities(
            &StageRequest::new(students(1)),
            &config(),
            directory.clone(),
        )
        .await
        .unwrap();

        let statuses = verify_pods(&students(1), &config(), directory.clone())
            .await
            .unwrap();

        let status = &statuses[0];
        assert!(status.admin_account);
        assert!(status.student_account);
        assert_eq!(status.groups, 3);
        assert!(!status.scope_tag);
        assert!(!status.admin_unit);
        assert!(!status.scoped_grant);
        assert!(!status.role_assignment);
        assert!(!status.complete());
    }
}
