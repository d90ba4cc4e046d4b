use std::path::PathBuf;

/// Errors raised while assembling the configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid override `{0}`: expected KEY=VALUE")]
  InvalidOverride(String),

  #[error("invalid configuration: {0}")]
  Invalid(#[from] toml::de::Error),

  #[error("failed to serialize defaults: {0}")]
  Serialize(#[from] toml::ser::Error),
}
