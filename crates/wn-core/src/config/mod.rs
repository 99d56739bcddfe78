//! Configuration: the root config record and its loader.

pub mod loader;
pub mod types;

pub use loader::{load_config, parse_config, substitute_env};
pub use types::{McpSection, RootConfig};
