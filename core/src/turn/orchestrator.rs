// Turn Orchestrator
// Drives one conversational turn: preprocess, stream, hand tool calls to the
// scheduler and send their results back as a continuation.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use futures::StreamExt;
use tern_protocol::{
  DisplayItem, Part, StreamErrorInfo, StreamEvent, StreamingState, ToolCallRequestInfo,
  ToolCallStatus, ToolConfirmationOutcome, UiEvent,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::hooks::SessionHooks;
use super::markdown::find_last_safe_split_point;
use super::preprocess::QueryPreprocessor;
use super::tracked::{CompletionAction, TrackedToolCall, plan_completion};
use crate::error::Result;
use crate::model::{ModelClient, ModelError};
use crate::scheduler::{SchedulerError, SchedulerEvent, SchedulerHandle, ToolCall};

const QUOTA_HINT: &str =
  "\nPossible quota limitations in place or slow response times detected. Please wait and try again.";

/// What the user (or a completed tool batch) sends to the model.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
  /// Raw user input; goes through the preprocessor.
  Text(String),
  /// Ready-made parts, e.g. tool responses.
  Parts(Vec<Part>),
}

impl From<&str> for Query {
  fn from(text: &str) -> Self {
    Query::Text(text.to_string())
  }
}

impl From<String> for Query {
  fn from(text: String) -> Self {
    Query::Text(text)
  }
}

/// How a call to [`TurnOrchestrator::submit_query`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
  /// Another turn is active; nothing was sent.
  Busy,
  /// Answered locally or handed to a client-initiated tool call.
  Handled,
  /// The stream ended normally. `tool_calls` were handed to the scheduler.
  Completed { tool_calls: usize },
  Cancelled,
  Failed,
}

#[derive(Default)]
struct TurnState {
  /// A model stream is open or about to be.
  responding: bool,
  /// A finished batch is still being recorded or refreshed.
  settling: bool,
  turn_cancelled: bool,
  token: Option<CancellationToken>,
  /// Assistant text not yet finalized.
  pending: Option<DisplayItem>,
  tracked: Vec<TrackedToolCall>,
  refreshed_memory: HashSet<String>,
  streaming: StreamingState,
}

impl TurnState {
  fn derive_streaming_state(&self) -> StreamingState {
    if self.responding || self.settling {
      return StreamingState::Responding;
    }
    let mut unsubmitted = self.tracked.iter().filter(|t| !t.response_submitted);
    if unsubmitted
      .clone()
      .any(|t| t.call.status() == ToolCallStatus::AwaitingApproval)
    {
      StreamingState::WaitingForConfirmation
    } else if unsubmitted.next().is_some() {
      StreamingState::Responding
    } else {
      StreamingState::Idle
    }
  }
}

struct Inner {
  model: Arc<dyn ModelClient>,
  scheduler: SchedulerHandle,
  preprocessor: Arc<dyn QueryPreprocessor>,
  hooks: Arc<dyn SessionHooks>,
  ui: mpsc::UnboundedSender<UiEvent>,
  state: Mutex<TurnState>,
}

enum Prepared {
  Send(Vec<Part>),
  Done(TurnOutcome),
}

/// Owns the turn lifecycle. Cloning shares the same turn.
#[derive(Clone)]
pub struct TurnOrchestrator {
  inner: Arc<Inner>,
}

impl TurnOrchestrator {
  /// Build the orchestrator and start consuming scheduler events.
  pub fn new(
    model: Arc<dyn ModelClient>,
    scheduler: SchedulerHandle,
    scheduler_events: mpsc::UnboundedReceiver<SchedulerEvent>,
    preprocessor: Arc<dyn QueryPreprocessor>,
    hooks: Arc<dyn SessionHooks>,
    ui: mpsc::UnboundedSender<UiEvent>,
  ) -> Self {
    let inner = Arc::new(Inner {
      model,
      scheduler,
      preprocessor,
      hooks,
      ui,
      state: Mutex::new(TurnState::default()),
    });
    tokio::spawn(watch_scheduler(Arc::downgrade(&inner), scheduler_events));
    Self { inner }
  }

  /// Run one turn. Continuations carry tool responses and bypass the
  /// busy check; everything else is rejected unless the engine is idle.
  pub async fn submit_query(
    &self,
    query: Query,
    is_continuation: bool,
  ) -> Result<TurnOutcome> {
    let token = CancellationToken::new();
    {
      let mut state = self.inner.state.lock().await;
      if is_continuation && state.turn_cancelled {
        debug!("continuation dropped after cancellation");
        return Ok(TurnOutcome::Cancelled);
      }
      if !is_continuation && state.derive_streaming_state() != StreamingState::Idle {
        debug!("query rejected while a turn is active");
        return Ok(TurnOutcome::Busy);
      }
      state.responding = true;
      state.turn_cancelled = false;
      state.token = Some(token.clone());
      state.pending = None;
      self.sync_streaming_state(&mut state);
    }
    info!(continuation = is_continuation, "turn started");

    let parts = match query {
      Query::Parts(parts) => parts,
      Query::Text(text) => match self.prepare(&text, &token).await? {
        Prepared::Send(parts) => parts,
        Prepared::Done(outcome) => return Ok(outcome),
      },
    };
    self.stream_turn(parts, token).await
  }

  /// Interrupt the active turn. Returns false when there is nothing to
  /// cancel.
  pub async fn cancel(&self) -> bool {
    let mut state = self.inner.state.lock().await;
    if state.turn_cancelled || state.derive_streaming_state() == StreamingState::Idle {
      return false;
    }
    info!("turn cancelled by user");
    state.turn_cancelled = true;
    if let Some(token) = &state.token {
      token.cancel();
    }
    self.finalize_pending(&mut state);
    self.emit(UiEvent::ItemAdded(DisplayItem::info("Request cancelled.")));
    state.responding = false;
    self.inner.preprocessor.clear_staged();
    self.sync_streaming_state(&mut state);
    true
  }

  /// Deliver the user's answer for a call awaiting approval.
  pub async fn respond(
    &self,
    call_id: &str,
    outcome: ToolConfirmationOutcome,
  ) -> std::result::Result<(), SchedulerError> {
    self.inner.scheduler.respond(call_id, outcome).await
  }

  pub async fn streaming_state(&self) -> StreamingState {
    self.inner.state.lock().await.derive_streaming_state()
  }

  /// Token of the current turn, if one was started. Fires on [`Self::cancel`].
  pub async fn cancellation_token(&self) -> Option<CancellationToken> {
    self.inner.state.lock().await.token.clone()
  }

  /// Calls whose results have not been consumed yet.
  pub async fn tracked_calls(&self) -> Vec<TrackedToolCall> {
    self.inner.state.lock().await.tracked.clone()
  }

  pub fn scheduler(&self) -> &SchedulerHandle {
    &self.inner.scheduler
  }

  async fn prepare(&self, text: &str, token: &CancellationToken) -> Result<Prepared> {
    let query = text.trim();
    if query.is_empty() {
      self.end_turn().await;
      return Ok(Prepared::Done(TurnOutcome::Handled));
    }
    self.emit(UiEvent::ItemAdded(DisplayItem::User {
      text: query.to_string(),
    }));

    let outcome = match self.inner.preprocessor.process(query, token).await {
      Ok(outcome) => outcome,
      Err(err) => {
        warn!(error = %err, "query preprocessing failed");
        self.emit(UiEvent::ItemAdded(DisplayItem::error(format!(
          "Error processing query: {err:#}"
        ))));
        self.end_turn().await;
        return Ok(Prepared::Done(TurnOutcome::Failed));
      }
    };
    for message in outcome.messages {
      self.emit(UiEvent::ItemAdded(message));
    }
    if token.is_cancelled() {
      return Ok(Prepared::Done(TurnOutcome::Cancelled));
    }

    if let Some(tool) = outcome.client_tool {
      debug!(tool = %tool.name, "scheduling client-initiated tool call");
      let request = ToolCallRequestInfo::client_initiated(tool.name, tool.args);
      let mut state = self.inner.state.lock().await;
      self.hand_off(&mut state, vec![request], token.clone()).await?;
      return Ok(Prepared::Done(TurnOutcome::Handled));
    }

    match outcome.processed_query {
      Some(parts) if outcome.should_proceed => Ok(Prepared::Send(parts)),
      _ => {
        self.end_turn().await;
        Ok(Prepared::Done(TurnOutcome::Handled))
      }
    }
  }

  async fn stream_turn(
    &self,
    parts: Vec<Part>,
    token: CancellationToken,
  ) -> Result<TurnOutcome> {
    let mut stream = match self
      .inner
      .model
      .send_message_stream(parts, token.clone())
      .await
    {
      Ok(stream) => stream,
      Err(err) => return Ok(self.fail_request(err).await),
    };

    let mut buffer = String::new();
    let mut requests = Vec::new();
    loop {
      let event = tokio::select! {
        biased;
        _ = token.cancelled() => {
          debug!("stream abandoned after cancellation");
          return Ok(TurnOutcome::Cancelled);
        }
        event = stream.next() => event,
      };
      let Some(event) = event else {
        break;
      };
      match event {
        StreamEvent::Content(text) => self.on_content(&mut buffer, &text, &token).await,
        StreamEvent::ToolCallRequest(request) => requests.push(request),
        StreamEvent::Thought(thought) => self.emit(UiEvent::Thought(thought)),
        StreamEvent::UsageMetadata(usage) => self.emit(UiEvent::Usage(usage)),
        StreamEvent::ChatCompressed {
          original_token_count,
          new_token_count,
        } => self.emit(UiEvent::ItemAdded(DisplayItem::info(compression_notice(
          original_token_count,
          new_token_count,
        )))),
        StreamEvent::Error(err) => {
          self.on_stream_error(&err).await;
          return Ok(TurnOutcome::Failed);
        }
        StreamEvent::UserCancelled => {
          self.on_user_cancelled().await;
          return Ok(TurnOutcome::Cancelled);
        }
        StreamEvent::ToolCallConfirmation(request) => {
          trace!(call_id = %request.call_id, "ignoring confirmation event");
        }
        StreamEvent::ToolCallResponse(response) => {
          trace!(call_id = %response.call_id, "ignoring response event");
        }
      }
    }

    let mut state = self.inner.state.lock().await;
    if state.turn_cancelled || token.is_cancelled() {
      return Ok(TurnOutcome::Cancelled);
    }
    self.finalize_pending(&mut state);
    if requests.is_empty() {
      state.responding = false;
      self.sync_streaming_state(&mut state);
      info!("turn finished");
      return Ok(TurnOutcome::Completed { tool_calls: 0 });
    }
    let tool_calls = self.hand_off(&mut state, requests, token).await?;
    Ok(TurnOutcome::Completed { tool_calls })
  }

  /// Leave the responding state and give the batch to the scheduler while
  /// still holding the state lock.
  async fn hand_off(
    &self,
    state: &mut TurnState,
    requests: Vec<ToolCallRequestInfo>,
    token: CancellationToken,
  ) -> Result<usize> {
    let count = requests.len();
    state.responding = false;
    state.tracked.extend(
      requests
        .iter()
        .cloned()
        .map(|request| TrackedToolCall::new(ToolCall::new(request))),
    );
    self.sync_streaming_state(state);
    info!(tool_calls = count, "handing tool calls to the scheduler");

    if let Err(err) = self.inner.scheduler.schedule(requests, token).await {
      warn!(error = %err, "failed to schedule tool calls");
      state.tracked.retain(|t| t.response_submitted);
      self.emit(UiEvent::ItemAdded(DisplayItem::error(format!(
        "Failed to schedule tool calls: {err}"
      ))));
      self.sync_streaming_state(state);
      return Err(err.into());
    }
    Ok(count)
  }

  async fn on_content(&self, buffer: &mut String, chunk: &str, token: &CancellationToken) {
    let mut state = self.inner.state.lock().await;
    if state.turn_cancelled || token.is_cancelled() {
      trace!("dropping content after cancellation");
      return;
    }
    buffer.push_str(chunk);
    let first = !matches!(state.pending, Some(DisplayItem::AssistantContent { .. }));
    let assistant = |text: String| {
      if first {
        DisplayItem::Assistant { text }
      } else {
        DisplayItem::AssistantContent { text }
      }
    };

    let split = find_last_safe_split_point(buffer);
    if split > 0 && split < buffer.len() {
      let head: String = buffer.drain(..split).collect();
      self.emit(UiEvent::ItemAdded(assistant(head)));
      state.pending = Some(DisplayItem::AssistantContent {
        text: buffer.clone(),
      });
    } else {
      state.pending = Some(assistant(buffer.clone()));
    }
    self.emit(UiEvent::PendingChanged(state.pending.clone()));
  }

  async fn on_stream_error(&self, err: &StreamErrorInfo) {
    warn!(status = ?err.status, message = %err.message, "model stream failed");
    let mut state = self.inner.state.lock().await;
    self.finalize_pending(&mut state);
    self.emit(UiEvent::ItemAdded(DisplayItem::error(format_api_error(
      &err.message,
      err.status,
    ))));
    state.responding = false;
    self.sync_streaming_state(&mut state);
  }

  async fn on_user_cancelled(&self) {
    let mut state = self.inner.state.lock().await;
    if state.turn_cancelled {
      return;
    }
    self.finalize_pending(&mut state);
    self.emit(UiEvent::ItemAdded(DisplayItem::info(
      "User cancelled the request.",
    )));
    state.responding = false;
    self.sync_streaming_state(&mut state);
  }

  async fn fail_request(&self, err: ModelError) -> TurnOutcome {
    match &err {
      ModelError::Unauthorized(message) => {
        warn!("model client rejected credentials");
        self.inner.hooks.on_auth_error(message).await;
      }
      other => {
        warn!(error = %other, "model request failed");
        self.emit(UiEvent::ItemAdded(DisplayItem::error(format_api_error(
          &other.to_string(),
          other.status(),
        ))));
      }
    }
    self.end_turn().await;
    TurnOutcome::Failed
  }

  async fn end_turn(&self) {
    let mut state = self.inner.state.lock().await;
    state.responding = false;
    self.sync_streaming_state(&mut state);
  }

  async fn on_call_updated(&self, call: ToolCall) {
    let mut state = self.inner.state.lock().await;
    if let Some(tracked) = state
      .tracked
      .iter_mut()
      .find(|t| !t.response_submitted && t.call_id() == call.call_id())
    {
      tracked.call = call.clone();
    }
    self.emit(UiEvent::ToolCallUpdated(call.display()));
    self.sync_streaming_state(&mut state);
  }

  async fn on_batch_complete(&self, calls: Vec<ToolCall>) {
    let mut state = self.inner.state.lock().await;
    for call in calls {
      if let Some(tracked) = state
        .tracked
        .iter_mut()
        .find(|t| !t.response_submitted && t.call_id() == call.call_id())
      {
        tracked.call = call;
      }
    }

    let group: Vec<_> = state
      .tracked
      .iter()
      .filter(|t| !t.response_submitted)
      .map(|t| t.call.display())
      .collect();
    if !group.is_empty() {
      self.emit(UiEvent::ItemAdded(DisplayItem::ToolGroup { tools: group }));
    }

    let plan = plan_completion(&state.tracked, &state.refreshed_memory, state.turn_cancelled);
    for tracked in state.tracked.iter_mut() {
      if plan.submitted.iter().any(|id| id == tracked.call_id()) {
        tracked.response_submitted = true;
      }
    }
    state
      .refreshed_memory
      .extend(plan.memory_refreshes.iter().cloned());
    state.tracked.retain(|t| !t.response_submitted);

    let (history, continuation) = match plan.action {
      CompletionAction::Nothing => (Vec::new(), None),
      CompletionAction::RecordCancelled { history } => (history, None),
      CompletionAction::Continue { parts } => {
        state.responding = true;
        (Vec::new(), Some(parts))
      }
    };
    let refreshes = plan.memory_refreshes.len();
    let settling = !history.is_empty() || refreshes > 0;
    state.settling = settling;
    self.sync_streaming_state(&mut state);
    drop(state);

    if settling {
      if !history.is_empty() {
        debug!(entries = history.len(), "recording cancelled tool responses");
      }
      for content in history {
        self.inner.model.add_history(content).await;
      }
      for _ in 0..refreshes {
        self.refresh_memory().await;
      }
      let mut state = self.inner.state.lock().await;
      state.settling = false;
      self.sync_streaming_state(&mut state);
    }

    if let Some(parts) = continuation {
      debug!(parts = parts.len(), "sending tool responses to the model");
      if let Err(err) = self.submit_query(Query::Parts(parts), true).await {
        warn!(error = %err, "continuation turn failed");
      }
    }
  }

  async fn refresh_memory(&self) {
    match self.inner.hooks.refresh_memory().await {
      Ok(Some(text)) => self.emit(UiEvent::ItemAdded(DisplayItem::info(text))),
      Ok(None) => {}
      Err(err) => {
        warn!(error = %err, "memory refresh failed");
        self.emit(UiEvent::ItemAdded(DisplayItem::error(format!(
          "Error refreshing memory: {err:#}"
        ))));
      }
    }
  }

  fn finalize_pending(&self, state: &mut TurnState) {
    if let Some(item) = state.pending.take() {
      self.emit(UiEvent::ItemAdded(item));
      self.emit(UiEvent::PendingChanged(None));
    }
  }

  fn sync_streaming_state(&self, state: &mut TurnState) {
    let next = state.derive_streaming_state();
    if next != state.streaming {
      debug!(from = ?state.streaming, to = ?next, "streaming state changed");
      state.streaming = next;
      self.emit(UiEvent::StreamingStateChanged(next));
    }
  }

  fn emit(&self, event: UiEvent) {
    if self.inner.ui.send(event).is_err() {
      trace!("display sink closed");
    }
  }
}

async fn watch_scheduler(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<SchedulerEvent>) {
  while let Some(event) = events.recv().await {
    let Some(inner) = inner.upgrade() else {
      break;
    };
    let orchestrator = TurnOrchestrator { inner };
    match event {
      SchedulerEvent::CallUpdated(call) => orchestrator.on_call_updated(call).await,
      SchedulerEvent::BatchComplete(calls) => orchestrator.on_batch_complete(calls).await,
    }
  }
  debug!("scheduler event stream closed");
}

/// Text shown for a failed model request.
pub fn format_api_error(message: &str, status: Option<u16>) -> String {
  let mut text = format!("[API Error: {message}]");
  if status == Some(429) {
    text.push_str(QUOTA_HINT);
  }
  text
}

fn compression_notice(original: u64, compressed: u64) -> String {
  format!(
    "IMPORTANT: This conversation approached the input token limit. A compressed context will be sent for future messages (compressed from: {original} to {compressed} tokens)."
  )
}
