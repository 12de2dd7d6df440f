use serde::{Deserialize, Serialize};

use podlab_domain::DEFAULT_DIRECTORY_ROLE;

use crate::types::DEFAULT_STUDENTS;

/// Raw YAML representation of a lab config file (lab.yml).
#[derive(Debug, Deserialize, Serialize)]
pub struct RawLab {
    pub tenant_id: String,
    pub domain: String,
    #[serde(default = "default_students")]
    pub students: u32,
    #[serde(default = "default_directory_role")]
    pub directory_role: String,
    #[serde(default)]
    pub propagation: RawPropagation,
    /// App-registration credentials. Optional here; the environment
    /// (`AZURE_CLIENT_ID`/`AZURE_CLIENT_SECRET`) or the az CLI can supply
    /// them instead.
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

fn default_students() -> u32 {
    DEFAULT_STUDENTS
}

fn default_directory_role() -> String {
    DEFAULT_DIRECTORY_ROLE.to_string()
}

#[derive(Debug, Deserialize, Serialize)]
pub struct RawPropagation {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,
}

impl Default for RawPropagation {
    fn default() -> Self {
        RawPropagation {
            initial_delay_ms: default_initial_delay_ms(),
            max_attempts: default_max_attempts(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    5
}

fn default_multiplier() -> u32 {
    2
}
