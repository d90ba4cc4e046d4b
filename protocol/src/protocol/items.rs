// Display Items
// What the engine hands to the rendering layer

use serde::{Deserialize, Serialize};

use super::approvals::ToolCallConfirmationDetails;
use super::models::{ThoughtSummary, ToolResultDisplay, UsageMetadata};

/// Display-level status of one tool call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
  Validating,
  AwaitingApproval,
  Scheduled,
  Executing,
  Success,
  Error,
  Cancelled,
}

impl ToolCallStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      ToolCallStatus::Success | ToolCallStatus::Error | ToolCallStatus::Cancelled
    )
  }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCallDisplay {
  pub call_id: String,
  pub name: String,
  pub description: String,
  pub status: ToolCallStatus,
  pub result_display: Option<ToolResultDisplay>,
  pub live_output: Option<String>,
  pub confirmation: Option<ToolCallConfirmationDetails>,
}

/// A transcript entry. Finalized entries never change; the pending entry may.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplayItem {
  User { text: String },
  /// First chunk of an assistant message.
  Assistant { text: String },
  /// Continuation chunk of an assistant message split at a safe boundary.
  AssistantContent { text: String },
  Info { text: String },
  Error { text: String },
  ToolGroup { tools: Vec<ToolCallDisplay> },
}

impl DisplayItem {
  pub fn info(text: impl Into<String>) -> Self {
    DisplayItem::Info { text: text.into() }
  }

  pub fn error(text: impl Into<String>) -> Self {
    DisplayItem::Error { text: text.into() }
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamingState {
  #[default]
  Idle,
  Responding,
  WaitingForConfirmation,
}

/// Everything the display sink receives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UiEvent {
  ItemAdded(DisplayItem),
  PendingChanged(Option<DisplayItem>),
  ToolCallUpdated(ToolCallDisplay),
  Thought(ThoughtSummary),
  Usage(UsageMetadata),
  StreamingStateChanged(StreamingState),
}
