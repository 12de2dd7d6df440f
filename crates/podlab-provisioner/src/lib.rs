//! The provisioning pipeline: turns a student roster into isolated lab pods.
//!
//! A pod is the set of directory objects that fences one student off from the
//! rest of the tenant: two accounts, three groups, a scope tag, a hidden
//! administrative unit and a delegated device-management role assignment.
//! The pipeline builds them in four stages, each stage a full pass over the
//! roster. Every stage is idempotent: it looks up each deterministically
//! named object before creating it, so re-running after a partial failure
//! finishes the job without duplicating anything.
//!
//! Stage order matters. Later stages reference objects by name and skip
//! students whose prerequisites are missing rather than failing the run.

pub mod admin_units;
pub mod delegated_roles;
pub mod error;
pub mod identity;
pub mod report;
pub mod run;
pub mod scope_tags;
pub mod verify;

mod retry;

pub use admin_units::provision_admin_units;
pub use delegated_roles::provision_delegated_roles;
pub use error::ProvisionError;
pub use identity::provision_identities;
pub use report::{
    IssuedCredential, RunSummary, Stage, StageReport, StageRequest, StudentOutcome, StudentReport,
};
pub use run::provision_all;
pub use scope_tags::provision_scope_tags;
pub use verify::{verify_pods, PodStatus};
