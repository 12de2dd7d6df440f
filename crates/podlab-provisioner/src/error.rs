use thiserror::Error;

use podlab_directory::DirectoryError;

/// Run-aborting failures.
///
/// Per-student problems never surface here; they are recorded as outcomes in
/// the stage report and the run moves on to the next student. An error of
/// this type means the whole run stopped.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The configured UPN domain is not a verified domain of the tenant.
    /// Accounts created under it could never sign in.
    #[error("domain '{0}' is not a verified domain of the tenant")]
    DomainNotVerified(String),

    /// The configured directory role matches no active role and no template,
    /// so it cannot be activated either.
    #[error("directory role '{0}' matches no role template in the tenant")]
    RoleTemplateMissing(String),

    /// The shared device-management role is absent and creation is disabled.
    #[error("role definition '{0}' not found and creation is disabled")]
    RoleDefinitionMissing(String),

    /// A directory call failed in a way no single student owns: an
    /// authentication failure, or an error during a tenant-wide step.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),
}
