mod loader;
mod raw;
pub mod error;
pub mod types;

pub use error::ConfigError;
pub use loader::load_lab;
pub use types::{ClientCredentials, LabConfig, PropagationPolicy, DEFAULT_STUDENTS};
