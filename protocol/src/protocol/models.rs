use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single piece of content exchanged with the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
  Text {
    text: String,
  },
  FunctionCall {
    id: String,
    name: String,
    #[serde(default)]
    args: Map<String, Value>,
  },
  FunctionResponse {
    id: String,
    name: String,
    response: Value,
  },
}

impl Part {
  pub fn text(text: impl Into<String>) -> Self {
    Part::Text { text: text.into() }
  }

  pub fn as_text(&self) -> Option<&str> {
    match self {
      Part::Text { text } => Some(text),
      _ => None,
    }
  }
}

/// Author of a history entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Model,
}

/// One entry of the conversation history kept by the model client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Content {
  pub role: Role,
  pub parts: Vec<Part>,
}

impl Content {
  pub fn user(parts: Vec<Part>) -> Self {
    Self {
      role: Role::User,
      parts,
    }
  }
}

/// A request to run one tool, either from the model or synthesized locally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequestInfo {
  pub call_id: String,
  pub name: String,
  #[serde(default)]
  pub args: Map<String, Value>,
  /// Client-initiated calls are never reported back to the model.
  #[serde(default)]
  pub is_client_initiated: bool,
}

impl ToolCallRequestInfo {
  pub fn new(call_id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
    Self {
      call_id: call_id.into(),
      name: name.into(),
      args,
      is_client_initiated: false,
    }
  }

  /// Build a locally synthesized request with a fresh call id.
  pub fn client_initiated(name: impl Into<String>, args: Map<String, Value>) -> Self {
    let name = name.into();
    Self {
      call_id: format!("{name}-{}", uuid::Uuid::new_v4()),
      name,
      args,
      is_client_initiated: true,
    }
  }
}

/// Human-facing rendering of a tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolResultDisplay {
  Text { text: String },
  FileDiff { file_name: String, diff: String },
}

/// Terminal payload of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallResponseInfo {
  pub call_id: String,
  /// Parts replayed to the model in the continuation turn.
  pub response_parts: Vec<Part>,
  pub result_display: Option<ToolResultDisplay>,
  pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ThoughtSummary {
  pub subject: String,
  pub description: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UsageMetadata {
  pub prompt_token_count: u64,
  pub candidates_token_count: u64,
  pub total_token_count: u64,
}

/// Failure reported by the model transport inside an open stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamErrorInfo {
  pub message: String,
  #[serde(default)]
  pub status: Option<u16>,
}

/// Events produced by the model client for a single turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StreamEvent {
  Thought(ThoughtSummary),
  Content(String),
  ToolCallRequest(ToolCallRequestInfo),
  ToolCallConfirmation(ToolCallRequestInfo),
  ToolCallResponse(ToolCallResponseInfo),
  UserCancelled,
  Error(StreamErrorInfo),
  ChatCompressed {
    original_token_count: u64,
    new_token_count: u64,
  },
  UsageMetadata(UsageMetadata),
}
