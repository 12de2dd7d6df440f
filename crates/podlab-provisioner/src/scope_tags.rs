//! Stage 2: one device-management scope tag per student.

use std::sync::Arc;

use tracing::{debug, info, warn};

use podlab_config::LabConfig;
use podlab_directory::{Directory, DirectoryError};
use podlab_domain::{NewScopeTag, PodNames};

use crate::error::ProvisionError;
use crate::report::{Stage, StageReport, StageRequest, StudentOutcome};

/// Provision the scope tags. This stage has no prerequisites; tags are
/// independent of the accounts and groups, so it can run in any position.
pub async fn provision_scope_tags(
    req: &StageRequest,
    config: &LabConfig,
    directory: Arc<dyn Directory>,
) -> Result<StageReport, ProvisionError> {
    let mut report = StageReport::new(Stage::ScopeTags);

    for &student in &req.students {
        let names = PodNames::new(student, &config.domain);
        match ensure_tag(directory.as_ref(), &names, !req.assume_existing).await {
            Ok(Some(true)) => report.record(student, StudentOutcome::Created),
            Ok(Some(false)) => report.record(student, StudentOutcome::AlreadyProvisioned),
            Ok(None) => {
                let reason = format!(
                    "scope tag {} is missing and creation is disabled",
                    names.scope_tag_name()
                );
                warn!(student = %student, reason = %reason, "skipping student");
                report.record(student, StudentOutcome::Skipped { reason });
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                warn!(student = %student, error = %e, "scope tag provisioning failed for student");
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
        "scope tag stage complete"
    );
    Ok(report)
}

/// `Some(true)` created, `Some(false)` already there, `None` absent with
/// creation disabled.
async fn ensure_tag(
    directory: &dyn Directory,
    names: &PodNames,
    create: bool,
) -> Result<Option<bool>, DirectoryError> {
    let name = names.scope_tag_name();
    if directory.find_scope_tag(&name).await?.is_some() {
        debug!(tag = %name, "scope tag already present");
        return Ok(Some(false));
    }
    if !create {
        return Ok(None);
    }

    let request = NewScopeTag {
        display_name: name,
        description: Some(format!(
            "Resource visibility tag for lab student {}",
            names.index()
        )),
    };
    match directory.create_scope_tag(&request).await {
        Ok(tag) => {
            info!(student = %names.index(), tag = %tag.display_name, id = %tag.id, "created scope tag");
            Ok(Some(true))
        }
        Err(e) if e.is_conflict() => Ok(Some(false)),
        Err(e) => Err(e),
    }
}
