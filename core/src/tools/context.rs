use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tern_protocol::{Part, ToolResultDisplay};

/// Arguments of a single tool call, as sent by the model.
pub type ToolArgs = Map<String, Value>;

/// Decode call arguments into a tool's typed argument struct.
pub fn parse_args<T: DeserializeOwned>(tool_name: &str, args: &ToolArgs) -> Result<T, ToolError> {
  serde_json::from_value(Value::Object(args.clone()))
    .map_err(|e| ToolError::InvalidParams(format!("invalid arguments for {tool_name}: {e}")))
}

/// Output of a successful tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
  /// Parts sent back to the model.
  pub llm_content: Vec<Part>,
  /// What the user sees in the transcript.
  pub return_display: Option<ToolResultDisplay>,
}

impl ToolResult {
  pub fn text(text: impl Into<String>) -> Self {
    let text = text.into();
    Self {
      llm_content: vec![Part::text(text.clone())],
      return_display: Some(ToolResultDisplay::Text { text }),
    }
  }

  pub fn new(llm_text: impl Into<String>, display: ToolResultDisplay) -> Self {
    Self {
      llm_content: vec![Part::text(llm_text)],
      return_display: Some(display),
    }
  }
}

/// Tool invocation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
  #[error("{0}")]
  InvalidParams(String),
  #[error("Tool \"{0}\" not found in registry.")]
  NotFound(String),
  #[error("{0}")]
  Execution(String),
  #[error("operation cancelled")]
  Cancelled,
}

/// Sink for partial output produced while a tool is still running.
///
/// Each call replaces the previous snapshot; it carries the full output so far.
#[derive(Clone)]
pub struct LiveOutput(Arc<dyn Fn(String) + Send + Sync>);

impl LiveOutput {
  pub fn new(sink: impl Fn(String) + Send + Sync + 'static) -> Self {
    Self(Arc::new(sink))
  }

  pub fn emit(&self, output: impl Into<String>) {
    (self.0)(output.into())
  }
}

impl fmt::Debug for LiveOutput {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("LiveOutput")
  }
}
