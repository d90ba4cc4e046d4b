// Approvals
// Confirmation requests surfaced to the user and their outcomes

use serde::{Deserialize, Serialize};

/// What the user decided about a pending tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolConfirmationOutcome {
  ProceedOnce,
  ProceedAlways,
  ProceedAlwaysServer,
  ProceedAlwaysTool,
  Reject,
}

impl ToolConfirmationOutcome {
  pub fn is_proceed(self) -> bool {
    !matches!(self, ToolConfirmationOutcome::Reject)
  }
}

/// Details shown to the user before a risky call runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallConfirmationDetails {
  pub title: String,
  pub kind: ConfirmationKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationKind {
  /// A file modification, shown as a unified diff.
  Edit { file_name: String, file_diff: String },
  /// A shell command; `root_command` is the whitelist key for "always".
  Exec {
    command: String,
    root_command: String,
  },
  /// A tool hosted by a remote tool server.
  Mcp {
    server_name: String,
    tool_name: String,
    tool_display_name: String,
  },
  Info { prompt: String },
}
