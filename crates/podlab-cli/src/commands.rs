use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;

use podlab_config::{load_lab, LabConfig, PropagationPolicy};
use podlab_directory::{Directory, GraphDirectory, GraphDirectoryConfig, MemoryDirectory};
use podlab_domain::StudentIndex;
use podlab_provisioner::{
    provision_admin_units, provision_all, provision_delegated_roles, provision_identities,
    provision_scope_tags, verify_pods, IssuedCredential, Stage, StageRequest,
};

use crate::output;

// ── Stage commands ────────────────────────────────────────────────────────────

pub async fn run_stage(
    stage: Stage,
    students: Option<u32>,
    assume_existing: bool,
    csv_out: Option<PathBuf>,
    config_path: Option<PathBuf>,
    tenant_id: Option<String>,
    domain: Option<String>,
    offline: bool,
) -> Result<()> {
    let (lab, directory) = setup(config_path, tenant_id, domain, offline)?;
    let mut req = StageRequest::new(roster(&lab, students)?);
    req.assume_existing = assume_existing;

    let report = match stage {
        Stage::Identity => provision_identities(&req, &lab, directory).await?,
        Stage::ScopeTags => provision_scope_tags(&req, &lab, directory).await?,
        Stage::AdminUnits => provision_admin_units(&req, &lab, directory).await?,
        Stage::DelegatedRoles => provision_delegated_roles(&req, &lab, directory).await?,
    };

    print!("{}", output::render_stage(&report));
    let credentials: Vec<&IssuedCredential> = report.credentials.iter().collect();
    emit_credentials(&credentials, csv_out.as_deref())?;
    Ok(())
}

// ── Provision (all stages) ────────────────────────────────────────────────────

pub async fn provision(
    students: Option<u32>,
    assume_existing: bool,
    csv_out: Option<PathBuf>,
    config_path: Option<PathBuf>,
    tenant_id: Option<String>,
    domain: Option<String>,
    offline: bool,
) -> Result<()> {
    let (lab, directory) = setup(config_path, tenant_id, domain, offline)?;
    let mut req = StageRequest::new(roster(&lab, students)?);
    req.assume_existing = assume_existing;

    let summary = provision_all(&req, &lab, directory).await?;

    print!("{}", output::render_run(&summary));
    let credentials: Vec<&IssuedCredential> = summary.credentials().collect();
    emit_credentials(&credentials, csv_out.as_deref())?;
    Ok(())
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn status(
    students: Option<u32>,
    config_path: Option<PathBuf>,
    tenant_id: Option<String>,
    domain: Option<String>,
    offline: bool,
) -> Result<()> {
    let (lab, directory) = setup(config_path, tenant_id, domain, offline)?;
    let statuses = verify_pods(&roster(&lab, students)?, &lab, directory).await?;
    print!("{}", output::render_status(&statuses));
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Assemble the lab config (file first, flags win) and pick the directory
/// backend. `--offline` swaps in the in-memory directory and disables the
/// propagation backoff, since there is no lag to wait out.
fn setup(
    config_path: Option<PathBuf>,
    tenant_id: Option<String>,
    domain: Option<String>,
    offline: bool,
) -> Result<(LabConfig, Arc<dyn Directory>)> {
    let mut lab = if let Some(path) = &config_path {
        load_lab(path).with_context(|| format!("failed to load {}", path.display()))?
    } else {
        LabConfig::new(
            tenant_id
                .clone()
                .context("--tenant-id (or PODLAB_TENANT_ID, or a config file) is required")?,
            domain
                .clone()
                .context("--domain (or PODLAB_DOMAIN, or a config file) is required")?,
        )
    };
    if let Some(tenant) = tenant_id {
        lab.tenant_id = tenant;
    }
    if let Some(domain) = domain {
        lab.domain = domain;
    }

    let directory: Arc<dyn Directory> = if offline {
        lab.propagation = PropagationPolicy::none();
        Arc::new(MemoryDirectory::new(&lab.domain))
    } else {
        Arc::new(GraphDirectory::new(GraphDirectoryConfig {
            tenant_id: lab.tenant_id.clone(),
            client_id: lab.credentials.as_ref().map(|c| c.client_id.clone()),
            client_secret: lab.credentials.as_ref().map(|c| c.client_secret.clone()),
        }))
    };

    Ok((lab, directory))
}

fn roster(lab: &LabConfig, students: Option<u32>) -> Result<Vec<StudentIndex>> {
    let count = students.unwrap_or(lab.default_students);
    Ok(StudentIndex::first_n(count)?)
}

/// Print fresh credentials and optionally persist them as CSV. They are
/// shown exactly once; nothing re-reads them later.
fn emit_credentials(credentials: &[&IssuedCredential], csv_out: Option<&Path>) -> Result<()> {
    if credentials.is_empty() {
        return Ok(());
    }
    print!("{}", output::render_credentials(credentials));
    if let Some(path) = csv_out {
        let csv = output::credentials_csv(credentials, Utc::now());
        std::fs::write(path, csv)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("Credentials written to {}", path.display());
    }
    Ok(())
}
