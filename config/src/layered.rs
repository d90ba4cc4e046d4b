// Layered Configuration
// Support for layered configuration with precedence

use serde::{Deserialize, Serialize};
use toml::map::Map;

/// Layered configuration wrapper
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayeredConfig {
  /// Configuration layers, lowest precedence first
  layers: Vec<ConfigLayer>,
}

/// Configuration layer with source tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLayer {
  /// Layer source
  pub source: ConfigLayerSource,
  /// Configuration values
  pub values: toml::Value,
}

/// Configuration layer source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigLayerSource {
  /// Built-in defaults
  Default,
  /// Global user config
  GlobalConfig,
  /// Project-specific config
  ProjectConfig,
  /// CLI override
  CliOverride,
}

impl LayeredConfig {
  /// Create a new layered configuration
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a layer on top of the existing ones
  pub fn add_layer(&mut self, layer: ConfigLayer) {
    self.layers.push(layer);
  }

  pub fn sources(&self) -> Vec<ConfigLayerSource> {
    self.layers.iter().map(|layer| layer.source).collect()
  }

  /// Deep-merge every layer; later layers win key by key.
  pub fn merge(&self) -> toml::Value {
    let mut merged = toml::Value::Table(Map::new());
    for layer in &self.layers {
      merge_values(&mut merged, &layer.values);
    }
    merged
  }
}

fn merge_values(base: &mut toml::Value, overlay: &toml::Value) {
  match (base, overlay) {
    (toml::Value::Table(base), toml::Value::Table(overlay)) => {
      for (key, value) in overlay {
        match base.get_mut(key) {
          Some(existing) => merge_values(existing, value),
          None => {
            base.insert(key.clone(), value.clone());
          }
        }
      }
    }
    (base, overlay) => *base = overlay.clone(),
  }
}

/// Build a nested table from a dotted key, e.g. `approval.mode`.
pub(crate) fn table_for_path(path: &str, value: toml::Value) -> toml::Value {
  path
    .rsplit('.')
    .fold(value, |inner, segment| {
      let mut table = Map::new();
      table.insert(segment.to_string(), inner);
      toml::Value::Table(table)
    })
}
