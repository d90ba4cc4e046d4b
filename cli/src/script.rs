// Model Scripts
// JSON files that stand in for a live model: canned turns plus remote tools

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Deserialize;
use tern_core::model::ScriptedTurn;
use tern_core::tools::{JsonSchema, McpTool, McpToolCaller, ToolArgs};
use tern_protocol::Part;
use tokio_util::sync::CancellationToken;

/// A remote tool whose every call returns `response`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ScriptedMcpTool {
  pub server: String,
  pub name: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub response: String,
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptFile {
  pub turns: Vec<ScriptedTurn>,
  pub mcp_tools: Vec<ScriptedMcpTool>,
}

impl ScriptFile {
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("failed to read script {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid script {}", path.display()))
  }

  pub fn mcp_tools(&self) -> Vec<McpTool> {
    let caller = Arc::new(ScriptedMcpCaller::new(&self.mcp_tools));
    self
      .mcp_tools
      .iter()
      .map(|tool| {
        McpTool::new(
          tool.server.clone(),
          tool.name.clone(),
          tool.description.clone(),
          JsonSchema::Object {
            properties: BTreeMap::new(),
            required: None,
          },
          caller.clone(),
        )
      })
      .collect()
  }
}

struct ScriptedMcpCaller {
  responses: HashMap<(String, String), String>,
}

impl ScriptedMcpCaller {
  fn new(tools: &[ScriptedMcpTool]) -> Self {
    let responses = tools
      .iter()
      .map(|tool| {
        (
          (tool.server.clone(), tool.name.clone()),
          tool.response.clone(),
        )
      })
      .collect();
    Self { responses }
  }
}

#[async_trait]
impl McpToolCaller for ScriptedMcpCaller {
  async fn call_tool(
    &self,
    server_name: &str,
    tool_name: &str,
    _args: &ToolArgs,
    _token: &CancellationToken,
  ) -> anyhow::Result<Vec<Part>> {
    let key = (server_name.to_string(), tool_name.to_string());
    let Some(response) = self.responses.get(&key) else {
      bail!("no scripted response for {server_name}.{tool_name}");
    };
    Ok(vec![Part::text(response.clone())])
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use serde_json::Map;
  use tern_core::tools::Tool;
  use tern_protocol::StreamEvent;

  use super::*;

  #[test]
  fn scripts_parse_turns_and_remote_tools() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("script.json");
    std::fs::write(
      &path,
      r#"{
        "turns": [
          { "steps": [{ "type": "content", "value": "hi" }, { "pause_ms": 10 }] },
          { "reject": { "kind": "api", "message": "busy", "status": 429 } }
        ],
        "mcp_tools": [{ "server": "docs", "name": "search", "response": "3 hits" }]
      }"#,
    )
    .expect("write script");

    let script = ScriptFile::load(&path).expect("load script");
    assert_eq!(script.turns.len(), 2);
    assert_eq!(
      script.turns[0].steps[0],
      tern_core::model::ScriptStep::Event(StreamEvent::Content("hi".to_string()))
    );
    assert!(script.turns[1].reject.is_some());

    let tools = script.mcp_tools();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name(), "search");
    assert_eq!(tools[0].server_name(), "docs");
  }

  #[tokio::test]
  async fn unscripted_remote_calls_fail() {
    let caller = ScriptedMcpCaller::new(&[ScriptedMcpTool {
      server: "docs".to_string(),
      name: "search".to_string(),
      description: String::new(),
      response: "3 hits".to_string(),
    }]);
    let token = CancellationToken::new();
    let parts = caller
      .call_tool("docs", "search", &Map::new(), &token)
      .await
      .expect("scripted call");
    assert_eq!(parts, vec![Part::text("3 hits")]);
    assert!(
      caller
        .call_tool("docs", "fetch", &Map::new(), &token)
        .await
        .is_err()
    );
  }

  #[test]
  fn missing_script_names_the_path() {
    let err = ScriptFile::load(Path::new("/nonexistent/script.json")).expect_err("missing file");
    assert!(format!("{err:#}").contains("/nonexistent/script.json"));
  }
}
