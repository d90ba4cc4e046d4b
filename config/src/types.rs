// Configuration Types
// All configuration type definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// Approval policy settings
  pub approval: ApprovalConfig,
  /// Remote tool server settings
  pub mcp: McpConfig,
  /// Built-in tool settings
  pub tools: ToolsConfig,
  /// Memory file settings
  pub memory: MemoryConfig,
  /// Model configuration
  pub models: ModelsConfig,
}

// ============================================================================
// APPROVAL POLICY
// ============================================================================

/// Approval policy settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ApprovalConfig {
  /// Session-wide approval mode
  pub mode: ApprovalMode,
  /// Whitelist keys trusted from the start of every session
  pub trusted: Vec<String>,
}

/// How much confirmation a session requires before running tools.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
  /// Ask before anything that is not whitelisted
  #[default]
  Default,
  /// Accept file edits without asking
  AutoEdit,
  /// Never ask
  Yolo,
}

impl fmt::Display for ApprovalMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ApprovalMode::Default => "default",
      ApprovalMode::AutoEdit => "auto_edit",
      ApprovalMode::Yolo => "yolo",
    };
    f.write_str(name)
  }
}

impl FromStr for ApprovalMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "default" => Ok(ApprovalMode::Default),
      "auto_edit" | "auto-edit" => Ok(ApprovalMode::AutoEdit),
      "yolo" => Ok(ApprovalMode::Yolo),
      other => Err(format!("invalid approval mode: {other}")),
    }
  }
}

// ============================================================================
// MCP CONFIGURATION
// ============================================================================

/// MCP configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct McpConfig {
  /// MCP server configurations
  pub servers: BTreeMap<String, McpServerConfig>,
}

/// MCP server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct McpServerConfig {
  /// Calls to a trusted server never ask for confirmation
  pub trust: bool,
  /// Human description of the server
  pub description: String,
}

// ============================================================================
// TOOLS CONFIGURATION
// ============================================================================

/// Built-in tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
  /// Tool names that are never registered
  pub exclude: Vec<String>,
  /// Shell command timeout in seconds
  pub shell_timeout_secs: u64,
}

impl Default for ToolsConfig {
  fn default() -> Self {
    Self {
      exclude: Vec::new(),
      shell_timeout_secs: 120,
    }
  }
}

// ============================================================================
// MEMORY CONFIGURATION
// ============================================================================

/// Memory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
  /// File the save_memory tool appends facts to
  pub file: PathBuf,
}

impl Default for MemoryConfig {
  fn default() -> Self {
    Self {
      file: PathBuf::from(".tern").join("MEMORY.md"),
    }
  }
}

// ============================================================================
// MODELS CONFIGURATION
// ============================================================================

/// Models configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ModelsConfig {
  /// Model name
  pub model: String,
}

impl Default for ModelsConfig {
  fn default() -> Self {
    Self {
      model: "scripted".to_string(),
    }
  }
}
