// Approval Policy
// Decides which tool calls need a human yes, and remembers "always" answers

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use tern_config::{ApprovalConfig, ApprovalMode};
use tern_protocol::{ConfirmationKind, ToolCallConfirmationDetails, ToolConfirmationOutcome};
use tracing::{info, warn};

pub use crate::tools::registry::ApprovalKey;
use crate::tools::registry::ToolKind;

/// What the policy knows about a call: never the tool itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallProfile {
  pub kind: ToolKind,
  pub keys: Vec<ApprovalKey>,
  pub trusted: bool,
}

/// Pure policy check. `true` means the tool's confirmation hook must run.
pub fn requires_confirmation(
  profile: &CallProfile,
  mode: ApprovalMode,
  whitelist: &HashSet<ApprovalKey>,
) -> bool {
  if mode == ApprovalMode::Yolo || profile.trusted {
    return false;
  }
  if mode == ApprovalMode::AutoEdit && profile.kind == ToolKind::Edit {
    return false;
  }
  !profile.keys.iter().any(|key| whitelist.contains(key))
}

/// Session state change caused by a "proceed always" answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyUpdate {
  None,
  Whitelist(ApprovalKey),
  SetMode(ApprovalMode),
}

pub fn policy_update(
  tool_name: &str,
  details: &ToolCallConfirmationDetails,
  outcome: ToolConfirmationOutcome,
) -> PolicyUpdate {
  use ToolConfirmationOutcome as O;

  if matches!(outcome, O::ProceedOnce | O::Reject) {
    return PolicyUpdate::None;
  }
  match &details.kind {
    ConfirmationKind::Edit { .. } => PolicyUpdate::SetMode(ApprovalMode::AutoEdit),
    ConfirmationKind::Exec { root_command, .. } => {
      PolicyUpdate::Whitelist(ApprovalKey::Command(root_command.clone()))
    }
    ConfirmationKind::Mcp {
      server_name,
      tool_name,
      ..
    } => match outcome {
      O::ProceedAlwaysServer => PolicyUpdate::Whitelist(ApprovalKey::Server(server_name.clone())),
      _ => PolicyUpdate::Whitelist(ApprovalKey::ServerTool {
        server: server_name.clone(),
        tool: tool_name.clone(),
      }),
    },
    ConfirmationKind::Info { .. } => {
      PolicyUpdate::Whitelist(ApprovalKey::Tool(tool_name.to_string()))
    }
  }
}

#[derive(Debug, Default)]
struct ApprovalState {
  mode: ApprovalMode,
  whitelist: HashSet<ApprovalKey>,
}

/// Session-scoped approval mode and whitelist.
///
/// The whitelist only grows; it resets when the session ends.
#[derive(Debug, Default)]
pub struct ApprovalContext {
  state: RwLock<ApprovalState>,
}

impl ApprovalContext {
  pub fn new(mode: ApprovalMode) -> Self {
    Self {
      state: RwLock::new(ApprovalState {
        mode,
        whitelist: HashSet::new(),
      }),
    }
  }

  pub fn from_config(config: &ApprovalConfig) -> Self {
    let context = Self::new(config.mode);
    for raw in &config.trusted {
      match raw.parse::<ApprovalKey>() {
        Ok(key) => {
          context.allow(key);
        }
        Err(err) => warn!(key = %raw, %err, "ignoring invalid trusted approval key"),
      }
    }
    context
  }

  pub fn mode(&self) -> ApprovalMode {
    self.state.read().unwrap_or_else(PoisonError::into_inner).mode
  }

  /// Explicit user action only; tools never change the mode themselves.
  pub fn set_mode(&self, mode: ApprovalMode) {
    let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
    if state.mode != mode {
      info!(from = %state.mode, to = %mode, "approval mode changed");
      state.mode = mode;
    }
  }

  /// Add a key to the whitelist; returns `false` if it was already there.
  pub fn allow(&self, key: ApprovalKey) -> bool {
    let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
    let inserted = state.whitelist.insert(key.clone());
    if inserted {
      info!(key = %key, "approval key whitelisted");
    }
    inserted
  }

  pub fn is_allowed(&self, key: &ApprovalKey) -> bool {
    self
      .state
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .whitelist
      .contains(key)
  }

  pub fn whitelist(&self) -> Vec<ApprovalKey> {
    let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
    let mut keys: Vec<ApprovalKey> = state.whitelist.iter().cloned().collect();
    keys.sort_by_key(ToString::to_string);
    keys
  }

  pub fn requires_confirmation(&self, profile: &CallProfile) -> bool {
    let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
    requires_confirmation(profile, state.mode, &state.whitelist)
  }

  /// Apply the session effect of a user's answer.
  pub fn record_outcome(
    &self,
    tool_name: &str,
    details: &ToolCallConfirmationDetails,
    outcome: ToolConfirmationOutcome,
  ) {
    match policy_update(tool_name, details, outcome) {
      PolicyUpdate::None => {}
      PolicyUpdate::Whitelist(key) => {
        self.allow(key);
      }
      PolicyUpdate::SetMode(mode) => self.set_mode(mode),
    }
  }
}
