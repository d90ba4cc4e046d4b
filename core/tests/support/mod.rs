#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tempfile::TempDir;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use tern_config::Config;
use tern_core::model::{ScriptedModelClient, ScriptedTurn};
use tern_core::tools::{
  JsonSchema, LiveOutput, McpTool, McpToolCaller, Tool, ToolArgs, ToolError, ToolKind, ToolResult,
  ToolSpec,
};
use tern_core::turn::{QueryPreprocessor, SessionHooks};
use tern_core::{Tern, TernBuilder};
use tern_protocol::{
  ConfirmationKind, DisplayItem, Part, StreamEvent, StreamingState, ToolCallConfirmationDetails,
  ToolCallDisplay, ToolCallRequestInfo, ToolCallStatus, UiEvent,
};

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn args(value: Value) -> Map<String, Value> {
  match value {
    Value::Object(map) => map,
    other => panic!("expected an object, got {other}"),
  }
}

pub fn call(id: &str, name: &str, value: Value) -> StreamEvent {
  StreamEvent::ToolCallRequest(ToolCallRequestInfo::new(id, name, args(value)))
}

pub fn text(chunk: &str) -> StreamEvent {
  StreamEvent::Content(chunk.to_string())
}

/// Test tool with a `value` string parameter and a counter of executions.
pub struct ProbeTool {
  name: String,
  delay: Duration,
  confirm: bool,
  executions: Arc<AtomicUsize>,
}

impl ProbeTool {
  pub fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      delay: Duration::from_millis(1),
      confirm: false,
      executions: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn confirming(mut self) -> Self {
    self.confirm = true;
    self
  }

  pub fn executions(&self) -> Arc<AtomicUsize> {
    self.executions.clone()
  }
}

#[async_trait]
impl Tool for ProbeTool {
  fn name(&self) -> &str {
    &self.name
  }

  fn kind(&self) -> ToolKind {
    ToolKind::Other
  }

  fn spec(&self) -> ToolSpec {
    ToolSpec::new(
      self.name.clone(),
      "Echoes its input after a delay.",
      JsonSchema::Object {
        properties: BTreeMap::from([(
          "value".to_string(),
          JsonSchema::String { description: None },
        )]),
        required: Some(vec!["value".to_string()]),
      },
    )
  }

  async fn should_confirm_execute(
    &self,
    args: &ToolArgs,
    _token: &CancellationToken,
  ) -> Result<Option<ToolCallConfirmationDetails>, ToolError> {
    Ok(self.confirm.then(|| ToolCallConfirmationDetails {
      title: format!("Confirm {}", self.name),
      kind: ConfirmationKind::Info {
        prompt: self.get_description(args),
      },
    }))
  }

  async fn execute(
    &self,
    args: &ToolArgs,
    token: CancellationToken,
    _live_output: Option<LiveOutput>,
  ) -> Result<ToolResult, ToolError> {
    self.executions.fetch_add(1, Ordering::SeqCst);
    tokio::select! {
      _ = token.cancelled() => return Err(ToolError::Cancelled),
      _ = tokio::time::sleep(self.delay) => {}
    }
    let value = args.get("value").and_then(Value::as_str).unwrap_or_default();
    Ok(ToolResult::text(format!("{}: {value}", self.name)))
  }
}

/// Remote tool server stand-in that records every call.
#[derive(Default)]
pub struct FakeMcpServer {
  pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl McpToolCaller for FakeMcpServer {
  async fn call_tool(
    &self,
    server_name: &str,
    tool_name: &str,
    _args: &ToolArgs,
    _token: &CancellationToken,
  ) -> anyhow::Result<Vec<Part>> {
    let key = format!("{server_name}.{tool_name}");
    self.calls.lock().await.push(key.clone());
    Ok(vec![Part::text(format!("{key} ok"))])
  }
}

pub fn mcp_tool(server: &str, tool: &str, caller: Arc<FakeMcpServer>) -> McpTool {
  McpTool::new(
    server,
    tool,
    format!("{tool} on {server}"),
    JsonSchema::Object {
      properties: BTreeMap::new(),
      required: None,
    },
    caller,
  )
}

#[derive(Default)]
pub struct RecordingHooks {
  pub auth_errors: Mutex<Vec<String>>,
  pub refreshes: AtomicUsize,
  pub refresh_delay: Duration,
}

#[async_trait]
impl SessionHooks for RecordingHooks {
  async fn on_auth_error(&self, message: &str) {
    self.auth_errors.lock().await.push(message.to_string());
  }

  async fn refresh_memory(&self) -> anyhow::Result<Option<String>> {
    let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(self.refresh_delay).await;
    Ok(Some(format!("Memory refreshed ({count})")))
  }
}

pub struct Harness {
  pub tern: Tern,
  pub model: Arc<ScriptedModelClient>,
  pub hooks: Arc<RecordingHooks>,
  pub root: TempDir,
  events: mpsc::UnboundedReceiver<UiEvent>,
  seen: Vec<UiEvent>,
}

pub struct HarnessBuilder {
  config: Config,
  turns: Vec<ScriptedTurn>,
  tools: Vec<Arc<dyn Tool>>,
  mcp_tools: Vec<McpTool>,
  preprocessor: Option<Arc<dyn QueryPreprocessor>>,
  refresh_delay: Duration,
}

impl HarnessBuilder {
  pub fn new(config: Config) -> Self {
    Self {
      config,
      turns: Vec::new(),
      tools: Vec::new(),
      mcp_tools: Vec::new(),
      preprocessor: None,
      refresh_delay: Duration::ZERO,
    }
  }

  pub fn refresh_delay(mut self, delay: Duration) -> Self {
    self.refresh_delay = delay;
    self
  }

  pub fn preprocessor(mut self, preprocessor: Arc<dyn QueryPreprocessor>) -> Self {
    self.preprocessor = Some(preprocessor);
    self
  }

  pub fn turn(mut self, events: Vec<StreamEvent>) -> Self {
    self.turns.push(ScriptedTurn::events(events));
    self
  }

  pub fn scripted(mut self, turn: ScriptedTurn) -> Self {
    self.turns.push(turn);
    self
  }

  pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
    self.tools.push(Arc::new(tool));
    self
  }

  pub fn mcp_tool(mut self, tool: McpTool) -> Self {
    self.mcp_tools.push(tool);
    self
  }

  pub async fn start(self) -> Harness {
    let root = tempfile::tempdir().expect("tempdir");
    let model = Arc::new(ScriptedModelClient::new(self.turns));
    let hooks = Arc::new(RecordingHooks {
      refresh_delay: self.refresh_delay,
      ..RecordingHooks::default()
    });
    let mut builder = TernBuilder::new(self.config, model.clone(), root.path().to_path_buf())
      .with_hooks(hooks.clone());
    for tool in self.tools {
      builder = builder.with_tool(tool);
    }
    for tool in self.mcp_tools {
      builder = builder.with_mcp_tool(tool);
    }
    if let Some(preprocessor) = self.preprocessor {
      builder = builder.with_preprocessor(preprocessor);
    }
    let (tern, events) = builder.build().await;
    Harness {
      tern,
      model,
      hooks,
      root,
      events,
      seen: Vec::new(),
    }
  }
}

impl Harness {
  pub async fn next_event(&mut self) -> UiEvent {
    let event = tokio::time::timeout(EVENT_TIMEOUT, self.events.recv())
      .await
      .expect("timed out waiting for a display event")
      .expect("display channel closed");
    self.seen.push(event.clone());
    event
  }

  pub async fn wait_for(&mut self, predicate: impl Fn(&UiEvent) -> bool) -> UiEvent {
    loop {
      let event = self.next_event().await;
      if predicate(&event) {
        return event;
      }
    }
  }

  pub async fn wait_idle(&mut self) {
    self
      .wait_for(|event| matches!(event, UiEvent::StreamingStateChanged(StreamingState::Idle)))
      .await;
  }

  /// Read events until `done` holds for what has been seen so far.
  pub async fn wait_until(&mut self, done: impl Fn(&Harness) -> bool) {
    while !done(self) {
      self.next_event().await;
    }
  }

  pub async fn wait_for_status(&mut self, call_id: &str, status: ToolCallStatus) -> ToolCallDisplay {
    loop {
      if let Some(display) = self.last_display(call_id, status) {
        return display;
      }
      self.next_event().await;
    }
  }

  fn last_display(&self, call_id: &str, status: ToolCallStatus) -> Option<ToolCallDisplay> {
    self.seen.iter().rev().find_map(|event| match event {
      UiEvent::ToolCallUpdated(display)
        if display.call_id == call_id && display.status == status =>
      {
        Some(display.clone())
      }
      _ => None,
    })
  }

  pub fn seen(&self) -> &[UiEvent] {
    &self.seen
  }

  /// Statuses reported for one call, in order, with repeats collapsed.
  pub fn statuses(&self, call_id: &str) -> Vec<ToolCallStatus> {
    let mut statuses: Vec<ToolCallStatus> = Vec::new();
    for event in &self.seen {
      if let UiEvent::ToolCallUpdated(display) = event
        && display.call_id == call_id
        && statuses.last() != Some(&display.status)
      {
        statuses.push(display.status);
      }
    }
    statuses
  }

  pub fn items(&self) -> Vec<DisplayItem> {
    self
      .seen
      .iter()
      .filter_map(|event| match event {
        UiEvent::ItemAdded(item) => Some(item.clone()),
        _ => None,
      })
      .collect()
  }

  pub fn streaming_states(&self) -> Vec<StreamingState> {
    self
      .seen
      .iter()
      .filter_map(|event| match event {
        UiEvent::StreamingStateChanged(state) => Some(*state),
        _ => None,
      })
      .collect()
  }
}

/// `(call_id, response)` of every function response in a request.
pub fn function_responses(parts: &[Part]) -> Vec<(String, Value)> {
  parts
    .iter()
    .filter_map(|part| match part {
      Part::FunctionResponse { id, response, .. } => Some((id.clone(), response.clone())),
      _ => None,
    })
    .collect()
}

pub fn output(text: &str) -> Value {
  json!({ "output": text })
}
