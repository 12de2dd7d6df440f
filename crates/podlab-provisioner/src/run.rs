//! The full pipeline: all four stages, in order, as one run.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use podlab_config::LabConfig;
use podlab_directory::Directory;

use crate::admin_units::provision_admin_units;
use crate::delegated_roles::provision_delegated_roles;
use crate::error::ProvisionError;
use crate::identity::provision_identities;
use crate::report::{RunSummary, StageRequest};
use crate::scope_tags::provision_scope_tags;

/// Run all four stages over the roster, strictly in order, each stage a
/// full pass before the next begins. A fatal error aborts the run and
/// discards the partial summary; everything written up to that point is
/// still in the directory and a re-run will pick it up.
pub async fn provision_all(
    req: &StageRequest,
    config: &LabConfig,
    directory: Arc<dyn Directory>,
) -> Result<RunSummary, ProvisionError> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!(
        run_id = %run_id,
        students = req.students.len(),
        directory = directory.name(),
        "starting provisioning run"
    );

    let stages = vec![
        provision_identities(req, config, directory.clone()).await?,
        provision_scope_tags(req, config, directory.clone()).await?,
        provision_admin_units(req, config, directory.clone()).await?,
        provision_delegated_roles(req, config, directory.clone()).await?,
    ];

    let summary = RunSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        stages,
    };
    info!(
        run_id = %run_id,
        clean = summary.is_clean(),
        credentials = summary.credentials().count(),
        "provisioning run finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{Stage, StudentOutcome};
    use podlab_config::PropagationPolicy;
    use podlab_directory::MemoryDirectory;
    use podlab_domain::{GroupRole, PodNames, StudentIndex, LAB_INTUNE_ROLE_NAME};

    fn config() -> LabConfig {
        let mut config = LabConfig::new("tenant-1", "lab.example.com");
        config.propagation = PropagationPolicy::none();
        config
    }

    fn roster(n: u32) -> StageRequest {
        StageRequest::new(StudentIndex::first_n(n).unwrap())
    }

    #[tokio::test]
    async fn a_three_student_lab_builds_every_object() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));

        let summary = provision_all(&roster(3), &config(), directory.clone())
            .await
            .unwrap();

        assert!(summary.is_clean());
        assert_eq!(summary.stages.len(), 4);
        // Two accounts, three groups, a tag, a unit and an assignment each.
        assert_eq!(directory.user_count().await, 6);
        assert_eq!(directory.group_count().await, 9);
        assert_eq!(directory.tag_count().await, 3);
        assert_eq!(directory.unit_count().await, 3);
        assert_eq!(directory.assignment_count().await, 3);
        // Six fresh credentials, one per account.
        assert_eq!(summary.credentials().count(), 6);
    }

    #[tokio::test]
    async fn a_second_run_is_a_no_op() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        provision_all(&roster(3), &config(), directory.clone())
            .await
            .unwrap();

        let summary = provision_all(&roster(3), &config(), directory.clone())
            .await
            .unwrap();

        assert!(summary.is_clean());
        assert_eq!(summary.credentials().count(), 0);
        for stage in &summary.stages {
            assert_eq!(stage.already_provisioned(), 3, "stage {}", stage.stage);
            assert_eq!(stage.created(), 0, "stage {}", stage.stage);
        }
        assert_eq!(directory.user_count().await, 6);
        assert_eq!(directory.group_count().await, 9);
        assert_eq!(directory.assignment_count().await, 3);
    }

    #[tokio::test]
    async fn pods_never_reference_each_other() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        provision_all(&roster(2), &config(), directory.clone())
            .await
            .unwrap();

        // Collect every object id belonging to student 2.
        let names2 = PodNames::new(StudentIndex::new(2).unwrap(), "lab.example.com");
        let mut student2_ids = Vec::new();
        for role in [
            GroupRole::Admins,
            GroupRole::Users,
            GroupRole::Devices,
        ] {
            let group = directory
                .find_group_by_name(&names2.group_name(role))
                .await
                .unwrap()
                .unwrap();
            student2_ids.push(group.id);
        }

        // Student 1's assignment must reference none of them.
        let definition = directory
            .find_role_definition(LAB_INTUNE_ROLE_NAME)
            .await
            .unwrap()
            .unwrap();
        let names1 = PodNames::new(StudentIndex::new(1).unwrap(), "lab.example.com");
        let admins1 = directory
            .find_group_by_name(&names1.group_name(GroupRole::Admins))
            .await
            .unwrap()
            .unwrap();
        let assignments = directory
            .list_role_assignments(&definition.id)
            .await
            .unwrap();
        let assignment1 = assignments
            .iter()
            .find(|a| a.member_ids.contains(&admins1.id))
            .unwrap();
        for id in &student2_ids {
            assert!(!assignment1.member_ids.contains(id));
            assert!(!assignment1.resource_scope_ids.contains(id));
        }

        // And student 1's unit holds only student 1's objects.
        let unit1 = directory
            .find_admin_unit(&names1.admin_unit_name())
            .await
            .unwrap()
            .unwrap();
        let members = directory.list_admin_unit_members(&unit1.id).await.unwrap();
        for id in &student2_ids {
            assert!(!members.contains(id));
        }
    }

    #[tokio::test]
    async fn a_transient_failure_is_contained_and_healed_by_a_rerun() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        directory.fail_once("create_admin_unit").await;

        let first = provision_all(&roster(2), &config(), directory.clone())
            .await
            .unwrap();
        assert!(!first.is_clean());
        assert_eq!(
            first.failed_students(),
            vec![StudentIndex::new(1).unwrap()]
        );
        // The failure was in stage 3; stage 4 still ran for both students.
        let stage4 = first.stage(Stage::DelegatedRoles).unwrap();
        assert_eq!(stage4.outcomes.len(), 2);

        let second = provision_all(&roster(2), &config(), directory.clone())
            .await
            .unwrap();
        assert!(second.is_clean());
        let stage3 = second.stage(Stage::AdminUnits).unwrap();
        assert_eq!(
            stage3.outcome_for(StudentIndex::new(1).unwrap()),
            Some(&StudentOutcome::Created)
        );
        assert_eq!(directory.unit_count().await, 2);
    }

    #[tokio::test]
    async fn stage_reports_come_back_in_pipeline_order() {
        let directory = Arc::new(MemoryDirectory::new("lab.example.com"));
        let summary = provision_all(&roster(1), &config(), directory.clone())
            .await
            .unwrap();

        let order: Vec<Stage> = summary.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            order,
            vec![
                Stage::Identity,
                Stage::ScopeTags,
                Stage::AdminUnits,
                Stage::DelegatedRoles
            ]
        );
        assert!(summary.finished_at >= summary.started_at);
    }
}
