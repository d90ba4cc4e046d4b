// Tern Configuration System
// Layered configuration management

pub mod error;
pub mod layered;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use layered::{ConfigLayer, ConfigLayerSource, LayeredConfig};
pub use loader::{ConfigLoader, parse_override};
pub use types::*;
