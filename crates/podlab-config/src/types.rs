use std::time::Duration;

use podlab_domain::DEFAULT_DIRECTORY_ROLE;

/// Student count used when neither the config file nor `--students` says
/// otherwise.
pub const DEFAULT_STUDENTS: u32 = 10;

/// Validated lab configuration. Assembled from `lab.yml` via [`crate::load_lab`]
/// or from CLI flags via [`LabConfig::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabConfig {
    /// Tenant GUID or `*.onmicrosoft.com` name.
    pub tenant_id: String,
    /// UPN domain for every account. Must be a verified domain of the
    /// tenant; stage 1 checks this against the directory before writing.
    pub domain: String,
    pub default_students: u32,
    /// Directory role delegated per administrative unit, by display name.
    pub directory_role: String,
    pub propagation: PropagationPolicy,
    pub credentials: Option<ClientCredentials>,
}

impl LabConfig {
    /// Minimal config assembled from CLI flags, defaults everywhere else.
    pub fn new(tenant_id: impl Into<String>, domain: impl Into<String>) -> Self {
        LabConfig {
            tenant_id: tenant_id.into(),
            domain: domain.into(),
            default_students: DEFAULT_STUDENTS,
            directory_role: DEFAULT_DIRECTORY_ROLE.to_string(),
            propagation: PropagationPolicy::default(),
            credentials: None,
        }
    }
}

/// App-registration credentials for the client-credentials grant. `Debug`
/// redacts the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Backoff for reads that chase a just-issued create. The directory is
/// eventually consistent; a lookup may briefly miss an object that was
/// created moments ago, so dependent reads retry instead of relying on a
/// fixed sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationPolicy {
    pub initial_delay_ms: u64,
    /// Total lookup attempts, including the first.
    pub max_attempts: u32,
    pub multiplier: u32,
}

impl Default for PropagationPolicy {
    fn default() -> Self {
        PropagationPolicy {
            initial_delay_ms: 500,
            max_attempts: 5,
            multiplier: 2,
        }
    }
}

impl PropagationPolicy {
    /// Single attempt, no waiting. For tests and the in-memory directory,
    /// where propagation lag does not exist.
    pub fn none() -> Self {
        PropagationPolicy {
            initial_delay_ms: 0,
            max_attempts: 1,
            multiplier: 1,
        }
    }

    /// Delay to apply after the `attempt`-th failed lookup (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = PropagationPolicy {
            initial_delay_ms: 100,
            max_attempts: 4,
            multiplier: 2,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));
    }

    #[test]
    fn none_policy_never_waits() {
        let policy = PropagationPolicy::none();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_after(1), Duration::ZERO);
    }

    #[test]
    fn credentials_debug_redacts_secret() {
        let creds = ClientCredentials {
            client_id: "app-id".into(),
            client_secret: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("app-id"));
    }
}
