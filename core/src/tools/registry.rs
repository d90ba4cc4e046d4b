use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tern_protocol::ToolCallConfirmationDetails;
use tokio_util::sync::CancellationToken;

use crate::tools::context::{LiveOutput, ToolArgs, ToolError, ToolResult};
use crate::tools::spec::ToolSpec;

/// Broad category of a tool, used by the approval policy and the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
  Read,
  Edit,
  Execute,
  Mcp,
  Memory,
  Other,
}

/// Identity a call presents to the session whitelist.
///
/// String form: `server`, `server.tool`, `tool:<name>`, `command:<root>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApprovalKey {
  Server(String),
  ServerTool { server: String, tool: String },
  Tool(String),
  Command(String),
}

impl fmt::Display for ApprovalKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ApprovalKey::Server(server) => write!(f, "{server}"),
      ApprovalKey::ServerTool { server, tool } => write!(f, "{server}.{tool}"),
      ApprovalKey::Tool(name) => write!(f, "tool:{name}"),
      ApprovalKey::Command(root) => write!(f, "command:{root}"),
    }
  }
}

impl FromStr for ApprovalKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Err("empty approval key".to_string());
    }
    if let Some(name) = s.strip_prefix("tool:") {
      return Ok(ApprovalKey::Tool(name.to_string()));
    }
    if let Some(root) = s.strip_prefix("command:") {
      return Ok(ApprovalKey::Command(root.to_string()));
    }
    Ok(match s.split_once('.') {
      Some((server, tool)) => ApprovalKey::ServerTool {
        server: server.to_string(),
        tool: tool.to_string(),
      },
      None => ApprovalKey::Server(s.to_string()),
    })
  }
}

/// Capability contract every tool implements.
///
/// The scheduler only talks to tools through this trait: validate, ask the
/// confirmation hook, then execute.
#[async_trait]
pub trait Tool: Send + Sync {
  fn name(&self) -> &str;

  fn display_name(&self) -> &str {
    self.name()
  }

  fn kind(&self) -> ToolKind;

  fn spec(&self) -> ToolSpec;

  fn validate_params(&self, args: &ToolArgs) -> Result<(), ToolError> {
    self.spec().parameters.check_args(args)
  }

  /// One-line human summary of what this call will do.
  fn get_description(&self, args: &ToolArgs) -> String {
    serde_json::to_string(args).unwrap_or_default()
  }

  /// Whitelist keys that, once approved, let this call skip confirmation.
  fn approval_keys(&self, _args: &ToolArgs) -> Vec<ApprovalKey> {
    vec![ApprovalKey::Tool(self.name().to_string())]
  }

  /// Trusted tools never ask for confirmation.
  fn is_trusted(&self) -> bool {
    false
  }

  /// Tools that stream partial output get a live sink in `execute`.
  fn can_update_output(&self) -> bool {
    false
  }

  /// Details to show the user, or `None` when the call may run unasked.
  async fn should_confirm_execute(
    &self,
    _args: &ToolArgs,
    _token: &CancellationToken,
  ) -> Result<Option<ToolCallConfirmationDetails>, ToolError> {
    Ok(None)
  }

  async fn execute(
    &self,
    args: &ToolArgs,
    token: CancellationToken,
    live_output: Option<LiveOutput>,
  ) -> Result<ToolResult, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
  tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a tool, returning the one it replaced.
  pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
    self.tools.insert(tool.name().to_string(), tool)
  }

  pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
    self.tools.remove(name)
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
    self.tools.get(name).cloned()
  }

  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.tools.keys().cloned().collect();
    names.sort();
    names
  }

  /// Declarations of every registered tool, sorted by name.
  pub fn specs(&self) -> Vec<ToolSpec> {
    let mut specs: Vec<ToolSpec> = self.tools.values().map(|tool| tool.spec()).collect();
    specs.sort_by(|a, b| a.name.cmp(&b.name));
    specs
  }

  pub fn len(&self) -> usize {
    self.tools.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tools.is_empty()
  }
}
