// Configuration Loader
// Layered configuration loading system

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ConfigError;
use crate::layered::{ConfigLayer, ConfigLayerSource, LayeredConfig, table_for_path};
use crate::types::Config;

const CONFIG_DIR: &str = ".tern";
const CONFIG_FILE: &str = "config.toml";

/// Configuration loader with layered support
pub struct ConfigLoader {
  /// Global config directory
  global_dir: Option<PathBuf>,
  /// Project directory containing `.tern/config.toml`
  project_dir: Option<PathBuf>,
}

impl ConfigLoader {
  /// Create a new configuration loader
  pub fn new() -> Self {
    Self {
      global_dir: dirs::home_dir().map(|home| home.join(CONFIG_DIR)),
      project_dir: None,
    }
  }

  /// Set project directory
  pub fn with_project_dir(mut self, dir: PathBuf) -> Self {
    self.project_dir = Some(dir);
    self
  }

  /// Replace the global config directory (`None` skips the global layer)
  pub fn with_global_dir(mut self, dir: Option<PathBuf>) -> Self {
    self.global_dir = dir;
    self
  }

  /// Load configuration with CLI overrides
  ///
  /// Layers, lowest precedence first:
  /// 1. Built-in defaults
  /// 2. Global config (~/.tern/config.toml)
  /// 3. Project config (<project>/.tern/config.toml)
  /// 4. CLI overrides
  pub fn load_with_cli_overrides(
    &self,
    cli_overrides: Vec<(String, String)>,
  ) -> Result<Config, ConfigError> {
    let mut layered = LayeredConfig::new();
    layered.add_layer(ConfigLayer {
      source: ConfigLayerSource::Default,
      values: toml::Value::try_from(Config::default())?,
    });

    if let Some(global_dir) = &self.global_dir
      && let Some(values) = read_layer(&global_dir.join(CONFIG_FILE))?
    {
      layered.add_layer(ConfigLayer {
        source: ConfigLayerSource::GlobalConfig,
        values,
      });
    }

    if let Some(project_dir) = &self.project_dir
      && let Some(values) = read_layer(&project_dir.join(CONFIG_DIR).join(CONFIG_FILE))?
    {
      layered.add_layer(ConfigLayer {
        source: ConfigLayerSource::ProjectConfig,
        values,
      });
    }

    for (key, value) in cli_overrides {
      layered.add_layer(ConfigLayer {
        source: ConfigLayerSource::CliOverride,
        values: table_for_path(&key, parse_override_value(&value)),
      });
    }

    debug!(layers = ?layered.sources(), "merging configuration layers");
    Ok(layered.merge().try_into()?)
  }
}

impl Default for ConfigLoader {
  fn default() -> Self {
    Self::new()
  }
}

/// Split a `KEY=VALUE` override.
pub fn parse_override(raw: &str) -> Result<(String, String), ConfigError> {
  match raw.split_once('=') {
    Some((key, value)) if !key.trim().is_empty() => {
      Ok((key.trim().to_string(), value.trim().to_string()))
    }
    _ => Err(ConfigError::InvalidOverride(raw.to_string())),
  }
}

fn read_layer(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
  if !path.exists() {
    return Ok(None);
  }
  let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  let values = toml::from_str(&content).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  debug!(path = %path.display(), "loaded config layer");
  Ok(Some(values))
}

/// Interpret an override as a TOML scalar, falling back to a bare string.
fn parse_override_value(raw: &str) -> toml::Value {
  toml::from_str::<toml::Table>(&format!("value = {raw}"))
    .ok()
    .and_then(|mut table| table.remove("value"))
    .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
  use std::fs;

  use pretty_assertions::assert_eq;

  use super::*;
  use crate::types::ApprovalMode;

  fn loader_for(project: &Path) -> ConfigLoader {
    ConfigLoader::new()
      .with_global_dir(None)
      .with_project_dir(project.to_path_buf())
  }

  #[test]
  fn defaults_apply_without_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = loader_for(dir.path())
      .load_with_cli_overrides(vec![])
      .expect("load config");
    assert_eq!(config, Config::default());
  }

  #[test]
  fn project_file_and_overrides_stack() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::create_dir_all(dir.path().join(".tern")).expect("mkdir");
    fs::write(
      dir.path().join(".tern").join("config.toml"),
      "[approval]\nmode = \"auto_edit\"\n\n[mcp.servers.docs]\ntrust = true\n",
    )
    .expect("write config");

    let config = loader_for(dir.path())
      .load_with_cli_overrides(vec![
        ("tools.shell_timeout_secs".to_string(), "30".to_string()),
        ("models.model".to_string(), "replay".to_string()),
      ])
      .expect("load config");

    assert_eq!(config.approval.mode, ApprovalMode::AutoEdit);
    assert!(config.mcp.servers["docs"].trust);
    assert_eq!(config.tools.shell_timeout_secs, 30);
    assert_eq!(config.models.model, "replay");
  }

  #[test]
  fn unknown_override_key_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let result = loader_for(dir.path())
      .load_with_cli_overrides(vec![("approval.policy".to_string(), "ask".to_string())]);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn override_parsing_requires_a_key() {
    assert_eq!(
      parse_override("approval.mode=yolo").expect("parse"),
      ("approval.mode".to_string(), "yolo".to_string())
    );
    assert!(matches!(
      parse_override("=yolo"),
      Err(ConfigError::InvalidOverride(_))
    ));
    assert!(parse_override("approval.mode").is_err());
  }
}
