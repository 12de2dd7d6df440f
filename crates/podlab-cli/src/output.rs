use chrono::{DateTime, Utc};

use podlab_provisioner::{
    IssuedCredential, PodStatus, RunSummary, StageReport, StudentOutcome,
};

/// Render one stage report as a per-student summary.
pub fn render_stage(report: &StageReport) -> String {
    let mut out = format!(
        "Stage {}: {} created, {} existing, {} skipped, {} failed\n",
        report.stage,
        report.created(),
        report.already_provisioned(),
        report.skipped(),
        report.failed()
    );
    for entry in &report.outcomes {
        let student = format!("{:<4}", entry.student.to_string());
        let line = match &entry.outcome {
            StudentOutcome::Created => format!("  student {student} created"),
            StudentOutcome::AlreadyProvisioned => {
                format!("  student {student} already provisioned")
            }
            StudentOutcome::Skipped { reason } => {
                format!("  student {student} skipped: {reason}")
            }
            StudentOutcome::Failed { reason } => {
                format!("  student {student} failed: {reason}")
            }
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}

/// Render a whole run: every stage, then a one-line verdict.
pub fn render_run(summary: &RunSummary) -> String {
    let mut out = format!("Run {}\n\n", summary.run_id);
    for stage in &summary.stages {
        out.push_str(&render_stage(stage));
        out.push('\n');
    }
    if summary.is_clean() {
        out.push_str("All stages clean.\n");
    } else {
        let failed: Vec<String> = summary
            .failed_students()
            .iter()
            .map(|s| s.to_string())
            .collect();
        out.push_str(&format!(
            "Failures for student(s) {}; re-run to converge.\n",
            failed.join(", ")
        ));
    }
    out
}

/// Render fresh credentials. Deliberately loud: this is the only time the
/// passwords are available anywhere.
pub fn render_credentials(credentials: &[&IssuedCredential]) -> String {
    let width = credentials
        .iter()
        .map(|c| c.user_principal_name.len())
        .max()
        .unwrap_or(0);
    let mut out = String::from("\nIssued credentials (shown once, store them now):\n");
    for credential in credentials {
        let role = format!("{:<7}", credential.role.to_string());
        out.push_str(&format!(
            "  {:<width$}  {role}  {}\n",
            credential.user_principal_name, credential.password
        ));
    }
    out
}

/// Credentials as CSV, one row per account. The generated passwords never
/// contain commas or quotes, so no field needs escaping.
pub fn credentials_csv(credentials: &[&IssuedCredential], issued_at: DateTime<Utc>) -> String {
    let mut out = String::from("student,role,user_principal_name,password,issued_at\n");
    for credential in credentials {
        out.push_str(&format!(
            "{},{},{},{},{}\n",
            credential.student,
            credential.role,
            credential.user_principal_name,
            credential.password,
            issued_at.to_rfc3339()
        ));
    }
    out
}

/// Render the audit: one line per pod, then a tally.
pub fn render_status(statuses: &[PodStatus]) -> String {
    let mut out = String::new();
    for status in statuses {
        if status.complete() {
            out.push_str(&format!("student {} complete\n", status.student));
        } else {
            out.push_str(&format!(
                "student {} missing: {}\n",
                status.student,
                missing_pieces(status).join(", ")
            ));
        }
    }
    let complete = statuses.iter().filter(|s| s.complete()).count();
    out.push_str(&format!("{}/{} pods complete\n", complete, statuses.len()));
    out
}

fn missing_pieces(status: &PodStatus) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if !status.admin_account {
        missing.push("admin account");
    }
    if !status.student_account {
        missing.push("student account");
    }
    if status.groups < 3 {
        missing.push("groups");
    }
    if !status.scope_tag {
        missing.push("scope tag");
    }
    if !status.admin_unit {
        missing.push("admin unit");
    } else {
        // Only meaningful once the unit itself exists.
        if !status.unit_members_complete {
            missing.push("unit members");
        }
        if !status.scoped_grant {
            missing.push("scoped grant");
        }
    }
    if !status.role_assignment {
        missing.push("role assignment");
    }
    missing
}
