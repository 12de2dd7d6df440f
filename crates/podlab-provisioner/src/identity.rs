//! Stage 1: accounts, security groups and their single memberships.

use std::sync::Arc;

use tracing::{debug, info, warn};

use podlab_config::{LabConfig, PropagationPolicy};
use podlab_directory::{Directory, DirectoryError};
use podlab_domain::{
    generate_password, AccountRole, GroupRole, NewGroup, NewUser, ObjectId, PodNames,
    SecurityGroup, UserAccount,
};

use crate::error::ProvisionError;
use crate::report::{IssuedCredential, Stage, StageReport, StageRequest, StudentOutcome};
use crate::retry::write_with_backoff;

/// Provision the identity layer for every student on the roster.
///
/// Per student: an admin account, a student account, the three security
/// groups, and one membership per group (the admin account in Admins, the
/// student account in Users and Devices). Fresh passwords are recorded in
/// the report's credential list; that list is the only copy.
///
/// The configured UPN domain is checked against the tenant's verified
/// domains before any write. Accounts minted under an unverified domain
/// could never sign in, so a mismatch aborts the run.
pub async fn provision_identities(
    req: &StageRequest,
    config: &LabConfig,
    directory: Arc<dyn Directory>,
) -> Result<StageReport, ProvisionError> {
    let mut report = StageReport::new(Stage::Identity);

    let domains = directory.list_domains().await?;
    let verified = domains
        .iter()
        .any(|d| d.is_verified && d.name.eq_ignore_ascii_case(&config.domain));
    if !verified {
        return Err(ProvisionError::DomainNotVerified(config.domain.clone()));
    }
    debug!(domain = %config.domain, "upn domain is verified");

    for &student in &req.students {
        let names = PodNames::new(student, &config.domain);
        let result = provision_student(
            directory.as_ref(),
            config,
            &names,
            !req.assume_existing,
            &mut report.credentials,
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
                warn!(student = %student, error = %e, "identity provisioning failed for student");
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
        "identity stage complete"
    );
    Ok(report)
}

async fn provision_student(
    directory: &dyn Directory,
    config: &LabConfig,
    names: &PodNames,
    create: bool,
    credentials: &mut Vec<IssuedCredential>,
) -> Result<StudentOutcome, DirectoryError> {
    let mut created_any = false;

    let Some((admin, admin_created)) =
        ensure_account(directory, names, AccountRole::Admin, create, credentials).await?
    else {
        return Ok(missing(names.admin_upn()));
    };
    created_any |= admin_created;

    let Some((student_user, student_created)) =
        ensure_account(directory, names, AccountRole::Student, create, credentials).await?
    else {
        return Ok(missing(names.student_upn()));
    };
    created_any |= student_created;

    for &group_role in GroupRole::all() {
        let Some((group, group_created)) =
            ensure_group(directory, names, group_role, create).await?
        else {
            return Ok(missing(names.group_name(group_role)));
        };
        created_any |= group_created;

        // Admins holds the admin account; Users and Devices both hold the
        // student account. One member each.
        let member = match group_role {
            GroupRole::Admins => &admin,
            GroupRole::Users | GroupRole::Devices => &student_user,
        };
        created_any |= ensure_group_member(
            directory,
            &config.propagation,
            &group.id,
            &member.id,
            group_created,
        )
        .await?;
    }

    Ok(if created_any {
        StudentOutcome::Created
    } else {
        StudentOutcome::AlreadyProvisioned
    })
}

fn missing(name: String) -> StudentOutcome {
    StudentOutcome::Skipped {
        reason: format!("{name} is missing and creation is disabled"),
    }
}

/// Look up one account by UPN, creating it when absent and allowed. On
/// create, the fresh password is pushed into `credentials`.
async fn ensure_account(
    directory: &dyn Directory,
    names: &PodNames,
    role: AccountRole,
    create: bool,
    credentials: &mut Vec<IssuedCredential>,
) -> Result<Option<(UserAccount, bool)>, DirectoryError> {
    let upn = names.upn(role);
    if let Some(existing) = directory.find_user_by_upn(&upn).await? {
        debug!(upn = %upn, "account already present");
        return Ok(Some((existing, false)));
    }
    if !create {
        return Ok(None);
    }

    let request = NewUser {
        user_principal_name: upn.clone(),
        display_name: names.account_display_name(role),
        mail_nickname: names.account_nickname(role),
        password: generate_password(16),
        force_password_change: true,
    };
    match directory.create_user(&request).await {
        Ok(account) => {
            info!(student = %names.index(), upn = %account.user_principal_name, "created account");
            credentials.push(IssuedCredential {
                student: names.index(),
                role,
                user_principal_name: account.user_principal_name.clone(),
                password: request.password,
            });
            Ok(Some((account, true)))
        }
        Err(e) if e.is_conflict() => {
            // Someone else created it between our lookup and the write. No
            // password to report; the existing account keeps its own.
            match directory.find_user_by_upn(&upn).await? {
                Some(existing) => Ok(Some((existing, false))),
                None => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

async fn ensure_group(
    directory: &dyn Directory,
    names: &PodNames,
    role: GroupRole,
    create: bool,
) -> Result<Option<(SecurityGroup, bool)>, DirectoryError> {
    let name = names.group_name(role);
    if let Some(existing) = directory.find_group_by_name(&name).await? {
        debug!(group = %name, "group already present");
        return Ok(Some((existing, false)));
    }
    if !create {
        return Ok(None);
    }

    let request = NewGroup {
        display_name: name.clone(),
        mail_nickname: names.group_nickname(role),
        description: Some(format!(
            "{} group for lab student {}",
            role.suffix(),
            names.index()
        )),
    };
    match directory.create_group(&request).await {
        Ok(group) => {
            info!(student = %names.index(), group = %group.display_name, "created group");
            Ok(Some((group, true)))
        }
        Err(e) if e.is_conflict() => match directory.find_group_by_name(&name).await? {
            Some(existing) => Ok(Some((existing, false))),
            None => Err(e),
        },
        Err(e) => Err(e),
    }
}

/// Add-if-absent membership. A group created in this run is known to be
/// empty, so the membership listing is skipped for it; that also avoids
/// reading a group the directory may not serve yet.
async fn ensure_group_member(
    directory: &dyn Directory,
    policy: &PropagationPolicy,
    group: &ObjectId,
    member: &ObjectId,
    group_is_fresh: bool,
) -> Result<bool, DirectoryError> {
    if !group_is_fresh {
        let members = directory.list_group_members(group).await?;
        if members.contains(member) {
            return Ok(false);
        }
    }
    let result = write_with_backoff(policy, "group membership", || {
        directory.add_group_member(group, member)
    })
    .await;
    match result {
        Ok(()) => {
            debug!(group = %group, member = %member, "added member");
            Ok(true)
        }
        Err(e) if e.is_conflict() => Ok(false),
        Err(e) => Err(e),
    }
}
