// Tool Call State Machine
// Per-call lifecycle; every change goes through `ToolCallState::apply`

use std::time::Duration;

use tern_protocol::{
  ToolCallConfirmationDetails, ToolCallDisplay, ToolCallRequestInfo, ToolCallResponseInfo,
  ToolCallStatus, ToolConfirmationOutcome,
};

use crate::tools::ToolKind;

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallState {
  Validating,
  AwaitingApproval { details: ToolCallConfirmationDetails },
  Scheduled,
  Executing { live_output: Option<String> },
  Success { response: ToolCallResponseInfo },
  Error { response: ToolCallResponseInfo },
  Cancelled { response: ToolCallResponseInfo },
}

/// Inputs that move a call between states.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
  AwaitApproval(ToolCallConfirmationDetails),
  Approve,
  Start,
  Output(String),
  Succeed(ToolCallResponseInfo),
  Fail(ToolCallResponseInfo),
  Cancel(ToolCallResponseInfo),
}

impl Transition {
  fn name(&self) -> &'static str {
    match self {
      Transition::AwaitApproval(_) => "await_approval",
      Transition::Approve => "approve",
      Transition::Start => "start",
      Transition::Output(_) => "output",
      Transition::Succeed(_) => "succeed",
      Transition::Fail(_) => "fail",
      Transition::Cancel(_) => "cancel",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot {transition} a tool call in state {from:?}")]
pub struct TransitionError {
  pub from: ToolCallStatus,
  pub transition: &'static str,
}

impl ToolCallState {
  pub fn status(&self) -> ToolCallStatus {
    match self {
      ToolCallState::Validating => ToolCallStatus::Validating,
      ToolCallState::AwaitingApproval { .. } => ToolCallStatus::AwaitingApproval,
      ToolCallState::Scheduled => ToolCallStatus::Scheduled,
      ToolCallState::Executing { .. } => ToolCallStatus::Executing,
      ToolCallState::Success { .. } => ToolCallStatus::Success,
      ToolCallState::Error { .. } => ToolCallStatus::Error,
      ToolCallState::Cancelled { .. } => ToolCallStatus::Cancelled,
    }
  }

  pub fn is_terminal(&self) -> bool {
    self.status().is_terminal()
  }

  pub fn response(&self) -> Option<&ToolCallResponseInfo> {
    match self {
      ToolCallState::Success { response }
      | ToolCallState::Error { response }
      | ToolCallState::Cancelled { response } => Some(response),
      _ => None,
    }
  }

  /// Compute the next state. Terminal states accept nothing.
  pub fn apply(&self, transition: Transition) -> Result<ToolCallState, TransitionError> {
    use ToolCallState as S;
    use Transition as T;

    match (self, transition) {
      (S::Validating, T::AwaitApproval(details)) => Ok(S::AwaitingApproval { details }),
      (S::Validating | S::AwaitingApproval { .. }, T::Approve) => Ok(S::Scheduled),
      (S::Scheduled, T::Start) => Ok(S::Executing { live_output: None }),
      (S::Executing { .. }, T::Output(output)) => Ok(S::Executing {
        live_output: Some(output),
      }),
      (S::Executing { .. }, T::Succeed(response)) => Ok(S::Success { response }),
      (S::Validating | S::Executing { .. }, T::Fail(response)) => Ok(S::Error { response }),
      (state, T::Cancel(response)) if !state.is_terminal() => Ok(S::Cancelled { response }),
      (state, transition) => Err(TransitionError {
        from: state.status(),
        transition: transition.name(),
      }),
    }
  }
}

/// One tracked call inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
  pub request: ToolCallRequestInfo,
  pub state: ToolCallState,
  /// `None` when the tool is not registered.
  pub kind: Option<ToolKind>,
  pub display_name: String,
  pub description: String,
  pub outcome: Option<ToolConfirmationOutcome>,
  pub duration: Option<Duration>,
}

impl ToolCall {
  pub fn new(request: ToolCallRequestInfo) -> Self {
    Self {
      display_name: request.name.clone(),
      description: String::new(),
      request,
      state: ToolCallState::Validating,
      kind: None,
      outcome: None,
      duration: None,
    }
  }

  pub fn call_id(&self) -> &str {
    &self.request.call_id
  }

  pub fn status(&self) -> ToolCallStatus {
    self.state.status()
  }

  pub fn is_terminal(&self) -> bool {
    self.state.is_terminal()
  }

  pub fn response(&self) -> Option<&ToolCallResponseInfo> {
    self.state.response()
  }

  pub fn apply(&mut self, transition: Transition) -> Result<(), TransitionError> {
    self.state = self.state.apply(transition)?;
    Ok(())
  }

  pub fn display(&self) -> ToolCallDisplay {
    let (live_output, confirmation) = match &self.state {
      ToolCallState::Executing { live_output } => (live_output.clone(), None),
      ToolCallState::AwaitingApproval { details } => (None, Some(details.clone())),
      _ => (None, None),
    };
    ToolCallDisplay {
      call_id: self.request.call_id.clone(),
      name: self.display_name.clone(),
      description: self.description.clone(),
      status: self.status(),
      result_display: self.response().and_then(|r| r.result_display.clone()),
      live_output,
      confirmation,
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::Map;
  use tern_protocol::ConfirmationKind;

  use super::*;

  fn response() -> ToolCallResponseInfo {
    ToolCallResponseInfo {
      call_id: "c1".to_string(),
      response_parts: Vec::new(),
      result_display: None,
      error: None,
    }
  }

  fn details() -> ToolCallConfirmationDetails {
    ToolCallConfirmationDetails {
      title: "Confirm".to_string(),
      kind: ConfirmationKind::Info {
        prompt: "ok?".to_string(),
      },
    }
  }

  #[test]
  fn happy_path_with_approval() {
    let mut call = ToolCall::new(ToolCallRequestInfo::new("c1", "probe", Map::new()));
    call.apply(Transition::AwaitApproval(details())).expect("await");
    assert_eq!(call.display().confirmation, Some(details()));
    call.apply(Transition::Approve).expect("approve");
    call.apply(Transition::Start).expect("start");
    call.apply(Transition::Output("50%".to_string())).expect("output");
    assert_eq!(call.display().live_output.as_deref(), Some("50%"));
    call.apply(Transition::Succeed(response())).expect("succeed");
    assert_eq!(call.status(), ToolCallStatus::Success);
    assert!(call.response().is_some());
  }

  #[test]
  fn terminal_states_reject_every_transition() {
    let done = ToolCallState::Cancelled {
      response: response(),
    };
    for transition in [
      Transition::Approve,
      Transition::Start,
      Transition::Cancel(response()),
      Transition::Succeed(response()),
    ] {
      assert!(done.apply(transition).is_err());
    }
  }

  #[test]
  fn execution_requires_scheduling_first() {
    let err = ToolCallState::Validating
      .apply(Transition::Start)
      .expect_err("not scheduled");
    assert_eq!(
      err,
      TransitionError {
        from: ToolCallStatus::Validating,
        transition: "start",
      }
    );
    assert!(
      ToolCallState::AwaitingApproval { details: details() }
        .apply(Transition::Succeed(response()))
        .is_err()
    );
  }

  #[test]
  fn any_live_state_can_be_cancelled() {
    for state in [
      ToolCallState::Validating,
      ToolCallState::AwaitingApproval { details: details() },
      ToolCallState::Scheduled,
      ToolCallState::Executing { live_output: None },
    ] {
      let next = state.apply(Transition::Cancel(response())).expect("cancel");
      assert_eq!(next.status(), ToolCallStatus::Cancelled);
    }
  }
}
