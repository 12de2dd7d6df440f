//! Stage requests and the reports a run produces.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use podlab_domain::{AccountRole, StudentIndex};

/// What a stage is asked to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    /// Students to process, in roster order.
    pub students: Vec<StudentIndex>,
    /// When set, the stage only looks up and wires what should already be
    /// there. A missing entity marks the student skipped instead of being
    /// created.
    pub assume_existing: bool,
}

impl StageRequest {
    pub fn new(students: Vec<StudentIndex>) -> Self {
        StageRequest {
            students,
            assume_existing: false,
        }
    }
}

/// The four pipeline stages, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Identity,
    ScopeTags,
    AdminUnits,
    DelegatedRoles,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Identity => "identity",
            Stage::ScopeTags => "scope-tags",
            Stage::AdminUnits => "admin-units",
            Stage::DelegatedRoles => "delegated-roles",
        };
        f.write_str(name)
    }
}

/// How one stage ended for one student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StudentOutcome {
    /// At least one object or binding was created.
    Created,
    /// Everything was already in place; nothing was written.
    AlreadyProvisioned,
    /// A prerequisite was missing, or creation was disabled and the object
    /// was absent. Nothing was written; re-run the earlier stage first.
    Skipped { reason: String },
    /// A directory error stopped this student partway through the stage.
    /// The run continued with the next student; re-running retries safely.
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentReport {
    pub student: StudentIndex,
    pub outcome: StudentOutcome,
}

/// A credential minted during this run.
///
/// This is the only copy of the initial password that will ever exist; the
/// directory does not return passwords and nothing here stores them. `Debug`
/// redacts so the password cannot leak through logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub student: StudentIndex,
    pub role: AccountRole,
    pub user_principal_name: String,
    pub password: String,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("student", &self.student)
            .field("role", &self.role)
            .field("user_principal_name", &self.user_principal_name)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything one stage pass produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcomes: Vec<StudentReport>,
    /// Populated by the identity stage only; empty elsewhere.
    pub credentials: Vec<IssuedCredential>,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        StageReport {
            stage,
            outcomes: Vec::new(),
            credentials: Vec::new(),
        }
    }

    pub fn record(&mut self, student: StudentIndex, outcome: StudentOutcome) {
        self.outcomes.push(StudentReport { student, outcome });
    }

    pub fn outcome_for(&self, student: StudentIndex) -> Option<&StudentOutcome> {
        self.outcomes
            .iter()
            .find(|r| r.student == student)
            .map(|r| &r.outcome)
    }

    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, StudentOutcome::Created))
    }

    pub fn already_provisioned(&self) -> usize {
        self.count(|o| matches!(o, StudentOutcome::AlreadyProvisioned))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, StudentOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StudentOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&StudentOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Everything a full pipeline run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
}

impl RunSummary {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Credentials minted across all stages, in issue order.
    pub fn credentials(&self) -> impl Iterator<Item = &IssuedCredential> {
        self.stages.iter().flat_map(|s| s.credentials.iter())
    }

    /// Students with at least one failed stage, ascending and deduplicated.
    pub fn failed_students(&self) -> Vec<StudentIndex> {
        let mut students: Vec<StudentIndex> = self
            .stages
            .iter()
            .flat_map(|s| s.outcomes.iter())
            .filter(|r| matches!(r.outcome, StudentOutcome::Failed { .. }))
            .map(|r| r.student)
            .collect();
        students.sort();
        students.dedup();
        students
    }

    pub fn is_clean(&self) -> bool {
        self.stages.iter().all(|s| s.failed() == 0)
    }
}
