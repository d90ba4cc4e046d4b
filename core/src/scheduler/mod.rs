// Tool Scheduler
// Actor that drives one batch of tool calls from validation to completion

pub mod responses;
pub mod state;

use std::sync::Arc;
use std::time::Instant;

use tern_protocol::{ToolCallConfirmationDetails, ToolCallRequestInfo, ToolConfirmationOutcome};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::approval::{ApprovalContext, CallProfile};
use crate::tools::{LiveOutput, Tool, ToolError, ToolRegistry, ToolResult};

use self::responses::{
  CANCELLED_REASON, REJECTED_REASON, cancelled_response, error_response, success_response,
};
pub use self::state::{ToolCall, ToolCallState, Transition, TransitionError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
  #[error("cannot schedule tool calls while another batch is still running")]
  BatchInFlight,
  #[error("no tool call `{0}` in the active batch")]
  UnknownCall(String),
  #[error("tool call `{0}` is not awaiting approval")]
  NotAwaitingApproval(String),
  #[error("tool scheduler has shut down")]
  Closed,
}

/// Observer notifications, delivered in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
  /// Fired on every state change of a call.
  CallUpdated(ToolCall),
  /// Fired once per batch, when every call is terminal. Calls keep request order.
  BatchComplete(Vec<ToolCall>),
}

enum Command {
  Schedule {
    requests: Vec<ToolCallRequestInfo>,
    token: CancellationToken,
    reply: oneshot::Sender<Result<(), SchedulerError>>,
  },
  Respond {
    call_id: String,
    outcome: ToolConfirmationOutcome,
    reply: oneshot::Sender<Result<(), SchedulerError>>,
  },
  Snapshot {
    reply: oneshot::Sender<Vec<ToolCall>>,
  },
  Prepared {
    batch: u64,
    index: usize,
    result: Result<Option<ToolCallConfirmationDetails>, ToolError>,
  },
  Output {
    batch: u64,
    index: usize,
    output: String,
  },
  Finished {
    batch: u64,
    index: usize,
    result: Result<ToolResult, ToolError>,
    cancelled: bool,
  },
}

/// Cheap, cloneable front door to the scheduler actor.
#[derive(Clone)]
pub struct SchedulerHandle {
  commands: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
  /// Start a batch. Fails with `BatchInFlight` while a previous batch has
  /// non-terminal calls.
  pub async fn schedule(
    &self,
    requests: Vec<ToolCallRequestInfo>,
    token: CancellationToken,
  ) -> Result<(), SchedulerError> {
    let (reply, rx) = oneshot::channel();
    self.send(Command::Schedule {
      requests,
      token,
      reply,
    })?;
    rx.await.map_err(|_| SchedulerError::Closed)?
  }

  /// Deliver the user's answer for a call awaiting approval.
  pub async fn respond(
    &self,
    call_id: impl Into<String>,
    outcome: ToolConfirmationOutcome,
  ) -> Result<(), SchedulerError> {
    let (reply, rx) = oneshot::channel();
    self.send(Command::Respond {
      call_id: call_id.into(),
      outcome,
      reply,
    })?;
    rx.await.map_err(|_| SchedulerError::Closed)?
  }

  /// Calls of the active batch, in request order.
  pub async fn snapshot(&self) -> Result<Vec<ToolCall>, SchedulerError> {
    let (reply, rx) = oneshot::channel();
    self.send(Command::Snapshot { reply })?;
    rx.await.map_err(|_| SchedulerError::Closed)
  }

  fn send(&self, command: Command) -> Result<(), SchedulerError> {
    self
      .commands
      .send(command)
      .map_err(|_| SchedulerError::Closed)
  }
}

struct Slot {
  call: ToolCall,
  tool: Option<Arc<dyn Tool>>,
  started: Option<Instant>,
}

struct Batch {
  id: u64,
  token: CancellationToken,
  slots: Vec<Slot>,
  outstanding: usize,
  cancel_handled: bool,
}

/// Owns the active batch. All state changes happen on the actor task; tool
/// hooks run on spawned tasks and report back through the command channel.
pub struct ToolScheduler {
  registry: Arc<ToolRegistry>,
  approval: Arc<ApprovalContext>,
  events: mpsc::UnboundedSender<SchedulerEvent>,
  commands: mpsc::WeakUnboundedSender<Command>,
  rx: mpsc::UnboundedReceiver<Command>,
  batch: Option<Batch>,
  next_batch_id: u64,
}

impl ToolScheduler {
  /// Spawn the actor. It stops once every handle is dropped and no tool
  /// task is still running.
  pub fn spawn(
    registry: Arc<ToolRegistry>,
    approval: Arc<ApprovalContext>,
  ) -> (SchedulerHandle, mpsc::UnboundedReceiver<SchedulerEvent>) {
    let (commands, rx) = mpsc::unbounded_channel();
    let (events, events_rx) = mpsc::unbounded_channel();
    let scheduler = Self {
      registry,
      approval,
      events,
      commands: commands.downgrade(),
      rx,
      batch: None,
      next_batch_id: 1,
    };
    tokio::spawn(scheduler.run());
    (SchedulerHandle { commands }, events_rx)
  }

  async fn run(mut self) {
    loop {
      let watched = self
        .batch
        .as_ref()
        .filter(|batch| !batch.cancel_handled)
        .map(|batch| batch.token.clone());

      tokio::select! {
        biased;
        command = self.rx.recv() => match command {
          Some(command) => self.handle(command),
          None => break,
        },
        _ = wait_cancelled(watched) => self.cancel_batch(),
      }
      self.advance();
    }
    debug!("tool scheduler stopped");
  }

  fn handle(&mut self, command: Command) {
    match command {
      Command::Schedule {
        requests,
        token,
        reply,
      } => {
        let _ = reply.send(self.schedule(requests, token));
      }
      Command::Respond {
        call_id,
        outcome,
        reply,
      } => {
        let _ = reply.send(self.respond(&call_id, outcome));
      }
      Command::Snapshot { reply } => {
        let calls = self
          .batch
          .as_ref()
          .map(|batch| batch.slots.iter().map(|slot| slot.call.clone()).collect())
          .unwrap_or_default();
        let _ = reply.send(calls);
      }
      Command::Prepared {
        batch,
        index,
        result,
      } => {
        if self.is_active(batch) {
          self.on_prepared(index, result);
        }
      }
      Command::Output {
        batch,
        index,
        output,
      } => {
        if self.is_active(batch) {
          self.apply(index, Transition::Output(output));
        }
      }
      Command::Finished {
        batch,
        index,
        result,
        cancelled,
      } => {
        if self.is_active(batch) {
          self.on_finished(index, result, cancelled);
        }
      }
    }
  }

  fn is_active(&self, batch_id: u64) -> bool {
    self.batch.as_ref().is_some_and(|batch| batch.id == batch_id)
  }

  fn schedule(
    &mut self,
    requests: Vec<ToolCallRequestInfo>,
    token: CancellationToken,
  ) -> Result<(), SchedulerError> {
    if self.batch.is_some() {
      return Err(SchedulerError::BatchInFlight);
    }
    if requests.is_empty() {
      return Ok(());
    }

    let id = self.next_batch_id;
    self.next_batch_id += 1;
    let slots: Vec<Slot> = requests
      .into_iter()
      .map(|request| {
        let tool = self.registry.get(&request.name);
        let mut call = ToolCall::new(request);
        if let Some(tool) = &tool {
          call.kind = Some(tool.kind());
          call.display_name = tool.display_name().to_string();
          call.description = tool.get_description(&call.request.args);
        }
        Slot {
          call,
          tool,
          started: None,
        }
      })
      .collect();

    info!(batch = id, calls = slots.len(), "scheduling tool calls");
    let count = slots.len();
    self.batch = Some(Batch {
      id,
      token,
      outstanding: count,
      slots,
      cancel_handled: false,
    });

    for index in 0..count {
      self.notify(index);
      self.validate(index);
    }
    Ok(())
  }

  fn validate(&mut self, index: usize) {
    let Some(batch) = &self.batch else {
      return;
    };
    let Some(slot) = batch.slots.get(index) else {
      return;
    };
    let request = slot.call.request.clone();
    let token = batch.token.clone();
    let batch_id = batch.id;

    let Some(tool) = slot.tool.clone() else {
      let message = ToolError::NotFound(request.name.clone()).to_string();
      self.apply(index, Transition::Fail(error_response(&request, &message)));
      return;
    };
    if token.is_cancelled() {
      self.apply(
        index,
        Transition::Cancel(cancelled_response(&request, CANCELLED_REASON)),
      );
      return;
    }
    if let Err(err) = tool.validate_params(&request.args) {
      debug!(call_id = %request.call_id, %err, "tool call failed validation");
      self.apply(
        index,
        Transition::Fail(error_response(&request, &err.to_string())),
      );
      return;
    }

    let profile = CallProfile {
      kind: tool.kind(),
      keys: tool.approval_keys(&request.args),
      trusted: tool.is_trusted(),
    };
    if !self.approval.requires_confirmation(&profile) {
      self.apply(index, Transition::Approve);
      return;
    }

    let Some(commands) = self.commands.upgrade() else {
      return;
    };
    tokio::spawn(async move {
      let result = tool.should_confirm_execute(&request.args, &token).await;
      let _ = commands.send(Command::Prepared {
        batch: batch_id,
        index,
        result,
      });
    });
  }

  fn on_prepared(
    &mut self,
    index: usize,
    result: Result<Option<ToolCallConfirmationDetails>, ToolError>,
  ) {
    let Some((request, token)) = self.pending(index, |state| {
      matches!(state, ToolCallState::Validating)
    }) else {
      return;
    };

    let transition = match result {
      Ok(_) | Err(ToolError::Cancelled) if token.is_cancelled() => {
        Transition::Cancel(cancelled_response(&request, CANCELLED_REASON))
      }
      Ok(None) => Transition::Approve,
      Ok(Some(details)) => Transition::AwaitApproval(details),
      Err(ToolError::Cancelled) => {
        Transition::Cancel(cancelled_response(&request, CANCELLED_REASON))
      }
      Err(err) => Transition::Fail(error_response(&request, &err.to_string())),
    };
    self.apply(index, transition);
  }

  fn respond(
    &mut self,
    call_id: &str,
    outcome: ToolConfirmationOutcome,
  ) -> Result<(), SchedulerError> {
    let batch = self
      .batch
      .as_mut()
      .ok_or_else(|| SchedulerError::UnknownCall(call_id.to_string()))?;
    let matching: Vec<usize> = batch
      .slots
      .iter()
      .enumerate()
      .filter(|(_, slot)| slot.call.call_id() == call_id)
      .map(|(index, _)| index)
      .collect();
    if matching.is_empty() {
      return Err(SchedulerError::UnknownCall(call_id.to_string()));
    }
    let Some((index, details)) = matching.into_iter().find_map(|index| {
      match &batch.slots[index].call.state {
        ToolCallState::AwaitingApproval { details } => Some((index, details.clone())),
        _ => None,
      }
    }) else {
      return Err(SchedulerError::NotAwaitingApproval(call_id.to_string()));
    };

    let slot = &mut batch.slots[index];
    slot.call.outcome = Some(outcome);
    let request = slot.call.request.clone();
    info!(call_id, ?outcome, "tool call confirmation answered");

    if !outcome.is_proceed() {
      self.apply(
        index,
        Transition::Cancel(cancelled_response(&request, REJECTED_REASON)),
      );
      return Ok(());
    }
    if batch.token.is_cancelled() {
      self.apply(
        index,
        Transition::Cancel(cancelled_response(&request, CANCELLED_REASON)),
      );
      return Ok(());
    }
    self.approval.record_outcome(&request.name, &details, outcome);
    self.apply(index, Transition::Approve);
    Ok(())
  }

  /// Start every scheduled call once no call is still being validated or
  /// waiting for the user.
  fn start_ready(&mut self) {
    let Some(batch) = &self.batch else {
      return;
    };
    let blocked = batch.slots.iter().any(|slot| {
      matches!(
        slot.call.state,
        ToolCallState::Validating | ToolCallState::AwaitingApproval { .. }
      )
    });
    if blocked {
      return;
    }
    let ready: Vec<usize> = batch
      .slots
      .iter()
      .enumerate()
      .filter(|(_, slot)| matches!(slot.call.state, ToolCallState::Scheduled))
      .map(|(index, _)| index)
      .collect();
    for index in ready {
      self.execute(index);
    }
  }

  fn execute(&mut self, index: usize) {
    let Some(commands) = self.commands.upgrade() else {
      return;
    };
    self.apply(index, Transition::Start);

    let Some(batch) = self.batch.as_mut() else {
      return;
    };
    let Some(slot) = batch.slots.get_mut(index) else {
      return;
    };
    let Some(tool) = slot.tool.clone() else {
      return;
    };
    slot.started = Some(Instant::now());
    let args = slot.call.request.args.clone();
    let token = batch.token.clone();
    let batch_id = batch.id;
    debug!(call_id = %slot.call.call_id(), tool = %tool.name(), "executing tool call");

    let live_output = tool.can_update_output().then(|| {
      let commands = commands.clone();
      LiveOutput::new(move |output| {
        let _ = commands.send(Command::Output {
          batch: batch_id,
          index,
          output,
        });
      })
    });

    tokio::spawn(async move {
      let result = tool.execute(&args, token.clone(), live_output).await;
      let _ = commands.send(Command::Finished {
        batch: batch_id,
        index,
        result,
        cancelled: token.is_cancelled(),
      });
    });
  }

  fn on_finished(&mut self, index: usize, result: Result<ToolResult, ToolError>, cancelled: bool) {
    let Some((request, _)) = self.pending(index, |state| {
      matches!(state, ToolCallState::Executing { .. })
    }) else {
      return;
    };

    let transition = match result {
      _ if cancelled => Transition::Cancel(cancelled_response(&request, CANCELLED_REASON)),
      Err(ToolError::Cancelled) => {
        Transition::Cancel(cancelled_response(&request, CANCELLED_REASON))
      }
      Ok(result) => Transition::Succeed(success_response(&request, result)),
      Err(err) => Transition::Fail(error_response(&request, &err.to_string())),
    };
    self.apply(index, transition);
  }

  /// Cancel every call that is not running yet. Running calls are settled
  /// when their execution returns.
  fn cancel_batch(&mut self) {
    let Some(batch) = self.batch.as_mut() else {
      return;
    };
    batch.cancel_handled = true;
    info!(batch = batch.id, "tool batch cancelled");
    let pending: Vec<(usize, ToolCallRequestInfo)> = batch
      .slots
      .iter()
      .enumerate()
      .filter(|(_, slot)| {
        !slot.call.is_terminal() && !matches!(slot.call.state, ToolCallState::Executing { .. })
      })
      .map(|(index, slot)| (index, slot.call.request.clone()))
      .collect();
    for (index, request) in pending {
      self.apply(
        index,
        Transition::Cancel(cancelled_response(&request, CANCELLED_REASON)),
      );
    }
  }

  fn advance(&mut self) {
    self.start_ready();

    let done = self.batch.as_ref().is_some_and(|batch| batch.outstanding == 0);
    if !done {
      return;
    }
    if let Some(batch) = self.batch.take() {
      info!(batch = batch.id, "tool batch complete");
      let calls = batch.slots.into_iter().map(|slot| slot.call).collect();
      let _ = self.events.send(SchedulerEvent::BatchComplete(calls));
    }
  }

  /// Request and token of a call, if it is in a state accepted by `expected`.
  fn pending(
    &self,
    index: usize,
    expected: impl Fn(&ToolCallState) -> bool,
  ) -> Option<(ToolCallRequestInfo, CancellationToken)> {
    let batch = self.batch.as_ref()?;
    let slot = batch.slots.get(index)?;
    expected(&slot.call.state).then(|| (slot.call.request.clone(), batch.token.clone()))
  }

  fn apply(&mut self, index: usize, transition: Transition) {
    let Some(batch) = self.batch.as_mut() else {
      return;
    };
    let Some(slot) = batch.slots.get_mut(index) else {
      return;
    };

    let was_terminal = slot.call.is_terminal();
    if let Err(err) = slot.call.apply(transition) {
      warn!(call_id = %slot.call.call_id(), %err, "rejected tool call transition");
      return;
    }
    if !was_terminal && slot.call.is_terminal() {
      batch.outstanding = batch.outstanding.saturating_sub(1);
      slot.call.duration = slot.started.map(|started| started.elapsed());
    }
    debug!(
      batch = batch.id,
      call_id = %slot.call.call_id(),
      status = ?slot.call.status(),
      "tool call transition"
    );
    let _ = self.events.send(SchedulerEvent::CallUpdated(slot.call.clone()));
  }

  fn notify(&self, index: usize) {
    if let Some(slot) = self.batch.as_ref().and_then(|batch| batch.slots.get(index)) {
      let _ = self.events.send(SchedulerEvent::CallUpdated(slot.call.clone()));
    }
  }
}

async fn wait_cancelled(token: Option<CancellationToken>) {
  match token {
    Some(token) => token.cancelled().await,
    None => std::future::pending().await,
  }
}
