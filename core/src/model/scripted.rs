//! Scripted model client
//!
//! Replays canned turns. Backs the CLI's `--script` mode and the test suite.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tern_protocol::{Content, Part, Role, StreamEvent};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::{EventStream, ModelClient};
use super::error::{ModelError, Result};
use crate::tools::ToolSpec;

/// One step of a scripted turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScriptStep {
  /// Hold the stream open; cancellation ends it early.
  Pause { pause_ms: u64 },
  Event(StreamEvent),
}

/// How a scripted request fails before any stream opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptedRejection {
  Unauthorized {
    message: String,
  },
  Api {
    message: String,
    #[serde(default)]
    status: Option<u16>,
  },
}

impl From<ScriptedRejection> for ModelError {
  fn from(rejection: ScriptedRejection) -> Self {
    match rejection {
      ScriptedRejection::Unauthorized { message } => ModelError::Unauthorized(message),
      ScriptedRejection::Api { message, status } => ModelError::Api { message, status },
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptedTurn {
  pub steps: Vec<ScriptStep>,
  pub reject: Option<ScriptedRejection>,
}

impl ScriptedTurn {
  pub fn events(events: Vec<StreamEvent>) -> Self {
    Self {
      steps: events.into_iter().map(ScriptStep::Event).collect(),
      reject: None,
    }
  }

  pub fn rejected(rejection: ScriptedRejection) -> Self {
    Self {
      steps: Vec::new(),
      reject: Some(rejection),
    }
  }

  /// The model side of this turn, as it would land in history.
  fn model_content(&self) -> Option<Content> {
    let mut text = String::new();
    let mut parts = Vec::new();
    for step in &self.steps {
      match step {
        ScriptStep::Event(StreamEvent::Content(chunk)) => text.push_str(chunk),
        ScriptStep::Event(StreamEvent::ToolCallRequest(request)) => {
          parts.push(Part::FunctionCall {
            id: request.call_id.clone(),
            name: request.name.clone(),
            args: request.args.clone(),
          })
        }
        _ => {}
      }
    }
    if !text.is_empty() {
      parts.insert(0, Part::text(text));
    }
    (!parts.is_empty()).then_some(Content {
      role: Role::Model,
      parts,
    })
  }
}

/// Model client that answers each request with the next scripted turn.
#[derive(Default)]
pub struct ScriptedModelClient {
  turns: Mutex<VecDeque<ScriptedTurn>>,
  history: Mutex<Vec<Content>>,
  requests: Mutex<Vec<Vec<Part>>>,
  tools: Mutex<Vec<ToolSpec>>,
}

impl ScriptedModelClient {
  pub fn new(turns: Vec<ScriptedTurn>) -> Self {
    Self {
      turns: Mutex::new(turns.into()),
      ..Self::default()
    }
  }

  pub fn from_events(turns: Vec<Vec<StreamEvent>>) -> Self {
    Self::new(turns.into_iter().map(ScriptedTurn::events).collect())
  }

  /// Every request sent so far, oldest first.
  pub async fn requests(&self) -> Vec<Vec<Part>> {
    self.requests.lock().await.clone()
  }

  pub async fn remaining_turns(&self) -> usize {
    self.turns.lock().await.len()
  }

  pub async fn tools(&self) -> Vec<ToolSpec> {
    self.tools.lock().await.clone()
  }
}

fn replay(steps: Vec<ScriptStep>, token: CancellationToken) -> EventStream {
  Box::pin(futures::stream::unfold(
    (steps.into_iter(), Some(token)),
    |(mut steps, token)| async move {
      let token = token?;
      loop {
        if token.is_cancelled() {
          return Some((StreamEvent::UserCancelled, (steps, None)));
        }
        match steps.next()? {
          ScriptStep::Pause { pause_ms } => {
            tokio::select! {
              _ = token.cancelled() => {}
              _ = tokio::time::sleep(Duration::from_millis(pause_ms)) => {}
            }
          }
          ScriptStep::Event(event) => return Some((event, (steps, Some(token)))),
        }
      }
    },
  ))
}

#[async_trait]
impl ModelClient for ScriptedModelClient {
  async fn send_message_stream(
    &self,
    request: Vec<Part>,
    token: CancellationToken,
  ) -> Result<EventStream> {
    self.requests.lock().await.push(request.clone());
    let Some(turn) = self.turns.lock().await.pop_front() else {
      warn!("model script exhausted; replying with an empty turn");
      return Ok(replay(Vec::new(), token));
    };
    if let Some(rejection) = turn.reject {
      return Err(rejection.into());
    }

    let mut history = self.history.lock().await;
    history.push(Content::user(request));
    if let Some(reply) = turn.model_content() {
      history.push(reply);
    }
    debug!(steps = turn.steps.len(), "replaying scripted turn");
    Ok(replay(turn.steps, token))
  }

  async fn history(&self) -> Vec<Content> {
    self.history.lock().await.clone()
  }

  async fn set_history(&self, history: Vec<Content>) {
    *self.history.lock().await = history;
  }

  async fn add_history(&self, content: Content) {
    self.history.lock().await.push(content);
  }

  async fn reset_chat(&self) -> Result<()> {
    self.history.lock().await.clear();
    Ok(())
  }

  async fn set_tools(&self, tools: Vec<ToolSpec>) {
    *self.tools.lock().await = tools;
  }
}
