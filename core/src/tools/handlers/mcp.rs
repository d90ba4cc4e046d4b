use std::sync::Arc;

use async_trait::async_trait;
use tern_protocol::{ConfirmationKind, Part, ToolCallConfirmationDetails, ToolResultDisplay};
use tokio_util::sync::CancellationToken;

use crate::tools::context::{LiveOutput, ToolArgs, ToolError, ToolResult};
use crate::tools::registry::{ApprovalKey, Tool, ToolKind};
use crate::tools::spec::{JsonSchema, ToolSpec};

/// Transport to a remote tool server. Discovery and connection management
/// live with the embedder.
#[async_trait]
pub trait McpToolCaller: Send + Sync {
  async fn call_tool(
    &self,
    server_name: &str,
    tool_name: &str,
    args: &ToolArgs,
    token: &CancellationToken,
  ) -> anyhow::Result<Vec<Part>>;
}

/// A tool hosted by a remote server, registered under its own name.
pub struct McpTool {
  server_name: String,
  tool_name: String,
  description: String,
  parameters: JsonSchema,
  trusted: bool,
  caller: Arc<dyn McpToolCaller>,
}

impl McpTool {
  pub fn new(
    server_name: impl Into<String>,
    tool_name: impl Into<String>,
    description: impl Into<String>,
    parameters: JsonSchema,
    caller: Arc<dyn McpToolCaller>,
  ) -> Self {
    Self {
      server_name: server_name.into(),
      tool_name: tool_name.into(),
      description: description.into(),
      parameters,
      trusted: false,
      caller,
    }
  }

  pub fn with_trust(mut self, trusted: bool) -> Self {
    self.trusted = trusted;
    self
  }

  pub fn server_name(&self) -> &str {
    &self.server_name
  }
}

#[async_trait]
impl Tool for McpTool {
  fn name(&self) -> &str {
    &self.tool_name
  }

  fn kind(&self) -> ToolKind {
    ToolKind::Mcp
  }

  fn spec(&self) -> ToolSpec {
    ToolSpec::new(&self.tool_name, &self.description, self.parameters.clone())
  }

  fn get_description(&self, args: &ToolArgs) -> String {
    format!(
      "{} ({} MCP Server) {}",
      self.tool_name,
      self.server_name,
      serde_json::to_string(args).unwrap_or_default()
    )
  }

  fn approval_keys(&self, _args: &ToolArgs) -> Vec<ApprovalKey> {
    vec![
      ApprovalKey::Server(self.server_name.clone()),
      ApprovalKey::ServerTool {
        server: self.server_name.clone(),
        tool: self.tool_name.clone(),
      },
    ]
  }

  fn is_trusted(&self) -> bool {
    self.trusted
  }

  async fn should_confirm_execute(
    &self,
    _args: &ToolArgs,
    _token: &CancellationToken,
  ) -> Result<Option<ToolCallConfirmationDetails>, ToolError> {
    Ok(Some(ToolCallConfirmationDetails {
      title: "Confirm MCP Tool Execution".to_string(),
      kind: ConfirmationKind::Mcp {
        server_name: self.server_name.clone(),
        tool_name: self.tool_name.clone(),
        tool_display_name: self.display_name().to_string(),
      },
    }))
  }

  async fn execute(
    &self,
    args: &ToolArgs,
    token: CancellationToken,
    _live_output: Option<LiveOutput>,
  ) -> Result<ToolResult, ToolError> {
    let parts = self
      .caller
      .call_tool(&self.server_name, &self.tool_name, args, &token)
      .await
      .map_err(|e| ToolError::Execution(format!("{}: {e:#}", self.tool_name)))?;

    let text: Vec<&str> = parts.iter().filter_map(Part::as_text).collect();
    let display = if text.is_empty() {
      "[non-text tool output]".to_string()
    } else {
      text.join("\n")
    };
    Ok(ToolResult {
      llm_content: parts,
      return_display: Some(ToolResultDisplay::Text { text: display }),
    })
  }
}
