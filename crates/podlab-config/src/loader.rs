use std::path::Path;

use podlab_domain::StudentIndex;
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawLab;
use crate::types::{ClientCredentials, LabConfig, PropagationPolicy};

/// Load and validate a lab config file.
pub fn load_lab(path: &Path) -> Result<LabConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawLab = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!("loaded lab config from {}", path.display());
    convert_lab(raw, path)
}

fn convert_lab(raw: RawLab, path: &Path) -> Result<LabConfig, ConfigError> {
    if raw.tenant_id.trim().is_empty() {
        return Err(invalid(path, "tenant_id must not be empty"));
    }
    if raw.domain.trim().is_empty() {
        return Err(invalid(path, "domain must not be empty"));
    }
    if raw.domain.contains('@') || raw.domain.contains(char::is_whitespace) {
        return Err(invalid(
            path,
            &format!("'{}' is not a usable UPN domain", raw.domain),
        ));
    }
    if raw.directory_role.trim().is_empty() {
        return Err(invalid(path, "directory_role must not be empty"));
    }
    // Same bounds the CLI applies to --students.
    StudentIndex::first_n(raw.students)?;

    if raw.propagation.max_attempts == 0 {
        return Err(invalid(path, "propagation.max_attempts must be at least 1"));
    }
    if raw.propagation.multiplier == 0 {
        return Err(invalid(path, "propagation.multiplier must be at least 1"));
    }

    let credentials = match (raw.client_id, raw.client_secret) {
        (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
            client_id,
            client_secret,
        }),
        (None, None) => None,
        _ => {
            return Err(invalid(
                path,
                "client_id and client_secret must be provided together",
            ))
        }
    };

    Ok(LabConfig {
        tenant_id: raw.tenant_id,
        domain: raw.domain,
        default_students: raw.students,
        directory_role: raw.directory_role,
        propagation: PropagationPolicy {
            initial_delay_ms: raw.propagation.initial_delay_ms,
            max_attempts: raw.propagation.max_attempts,
            multiplier: raw.propagation.multiplier,
        },
        credentials,
    })
}

fn invalid(path: &Path, message: &str) -> ConfigError {
    ConfigError::Invalid {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}
