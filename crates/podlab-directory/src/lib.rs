pub mod auth;
pub mod directory;
pub mod error;
pub mod graph;
pub mod memory;
mod wire;

pub use auth::{StaticToken, TokenProvider};
pub use directory::Directory;
pub use error::DirectoryError;
pub use graph::{GraphDirectory, GraphDirectoryConfig};
pub use memory::MemoryDirectory;
