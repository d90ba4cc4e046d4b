//! Tool calls tracked by the turn engine
//!
//! Deciding what to do with a completed batch is a pure function of the
//! tracked calls, kept apart from the async plumbing.

use std::collections::HashSet;

use tern_protocol::{Content, Part, ToolCallStatus};

use crate::scheduler::ToolCall;
use crate::tools::ToolKind;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedToolCall {
  pub call: ToolCall,
  /// Set once the call's result was sent to the model or recorded in history.
  pub response_submitted: bool,
}

impl TrackedToolCall {
  pub fn new(call: ToolCall) -> Self {
    Self {
      call,
      response_submitted: false,
    }
  }

  pub fn call_id(&self) -> &str {
    self.call.call_id()
  }

  pub fn is_client_initiated(&self) -> bool {
    self.call.request.is_client_initiated
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionAction {
  /// Nothing goes back to the model.
  Nothing,
  /// Every model-requested call was cancelled: record the responses in
  /// history without a new request.
  RecordCancelled { history: Vec<Content> },
  /// Send every response, in request order, as a continuation.
  Continue { parts: Vec<Part> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPlan {
  /// Calls whose results are consumed by this plan.
  pub submitted: Vec<String>,
  /// Successful memory saves that should trigger one refresh each.
  pub memory_refreshes: Vec<String>,
  pub action: CompletionAction,
}

impl CompletionPlan {
  fn empty() -> Self {
    Self {
      submitted: Vec::new(),
      memory_refreshes: Vec::new(),
      action: CompletionAction::Nothing,
    }
  }
}

/// Plan the follow-up for the unsubmitted calls. Returns an empty plan
/// unless every one of them is terminal.
///
/// An interrupted turn never continues: its responses only go to history.
pub fn plan_completion(
  tracked: &[TrackedToolCall],
  refreshed: &HashSet<String>,
  interrupted: bool,
) -> CompletionPlan {
  let pending: Vec<&TrackedToolCall> = tracked.iter().filter(|t| !t.response_submitted).collect();
  if pending.is_empty() || !pending.iter().all(|t| t.call.is_terminal()) {
    return CompletionPlan::empty();
  }

  let memory_refreshes = pending
    .iter()
    .filter(|t| {
      t.call.kind == Some(ToolKind::Memory)
        && t.call.status() == ToolCallStatus::Success
        && !refreshed.contains(t.call_id())
    })
    .map(|t| t.call_id().to_string())
    .collect();

  let mut submitted: Vec<String> = pending
    .iter()
    .filter(|t| t.is_client_initiated())
    .map(|t| t.call_id().to_string())
    .collect();

  let model_calls: Vec<&TrackedToolCall> = pending
    .iter()
    .copied()
    .filter(|t| !t.is_client_initiated())
    .collect();
  if model_calls.is_empty() {
    return CompletionPlan {
      submitted,
      memory_refreshes,
      action: CompletionAction::Nothing,
    };
  }

  submitted.extend(model_calls.iter().map(|t| t.call_id().to_string()));
  let responses = model_calls
    .iter()
    .filter_map(|t| t.call.response())
    .map(|response| response.response_parts.clone());

  let action = if interrupted
    || model_calls
      .iter()
      .all(|t| t.call.status() == ToolCallStatus::Cancelled)
  {
    CompletionAction::RecordCancelled {
      history: responses.map(Content::user).collect(),
    }
  } else {
    CompletionAction::Continue {
      parts: responses.flatten().collect(),
    }
  };

  CompletionPlan {
    submitted,
    memory_refreshes,
    action,
  }
}
