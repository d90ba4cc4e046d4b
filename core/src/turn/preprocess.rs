//! Query pre-processing
//!
//! Runs before a user query reaches the model: slash commands may answer
//! locally or turn into a client-initiated tool call, and `@path` mentions
//! pull file contents into the request.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use tern_protocol::{DisplayItem, Part};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tools::ToolArgs;
use crate::tools::handlers::memory::SAVE_MEMORY_TOOL;

/// A tool call the client schedules on the user's behalf.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientToolRequest {
  pub name: String,
  pub args: ToolArgs,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessOutcome {
  pub should_proceed: bool,
  pub processed_query: Option<Vec<Part>>,
  pub client_tool: Option<ClientToolRequest>,
  /// Items to show the user, whatever the outcome.
  pub messages: Vec<DisplayItem>,
}

impl PreprocessOutcome {
  pub fn proceed(parts: Vec<Part>) -> Self {
    Self {
      should_proceed: true,
      processed_query: Some(parts),
      ..Self::default()
    }
  }

  pub fn handled(messages: Vec<DisplayItem>) -> Self {
    Self {
      messages,
      ..Self::default()
    }
  }

  pub fn schedule_tool(name: impl Into<String>, args: ToolArgs) -> Self {
    Self {
      client_tool: Some(ClientToolRequest {
        name: name.into(),
        args,
      }),
      ..Self::default()
    }
  }
}

#[async_trait]
pub trait QueryPreprocessor: Send + Sync {
  async fn process(
    &self,
    query: &str,
    token: &CancellationToken,
  ) -> anyhow::Result<PreprocessOutcome>;

  /// Drop anything staged for a query that was cancelled.
  fn clear_staged(&self) {}
}

/// Sends every query to the model unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughPreprocessor;

#[async_trait]
impl QueryPreprocessor for PassthroughPreprocessor {
  async fn process(
    &self,
    query: &str,
    _token: &CancellationToken,
  ) -> anyhow::Result<PreprocessOutcome> {
    Ok(PreprocessOutcome::proceed(vec![Part::text(query)]))
  }
}

/// Handles `/memory` commands and `@path` file mentions.
pub struct CommandPreprocessor {
  root: PathBuf,
  memory_file: PathBuf,
  staged: Mutex<Vec<PathBuf>>,
}

impl CommandPreprocessor {
  pub fn new(root: PathBuf, memory_file: PathBuf) -> Self {
    let memory_file = if memory_file.is_absolute() {
      memory_file
    } else {
      root.join(memory_file)
    };
    Self {
      root,
      memory_file,
      staged: Mutex::new(Vec::new()),
    }
  }

  /// Files read for the query currently being prepared.
  pub fn staged(&self) -> Vec<PathBuf> {
    self
      .staged
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn stage(&self, path: &Path) {
    self
      .staged
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(path.to_path_buf());
  }

  async fn slash_command(&self, query: &str) -> anyhow::Result<PreprocessOutcome> {
    let mut words = query.trim_start_matches('/').splitn(3, ' ');
    let command = words.next().unwrap_or_default();
    let sub = words.next().unwrap_or_default();
    let rest = words.next().unwrap_or_default().trim();

    match (command, sub) {
      ("memory", "add") if !rest.is_empty() => {
        let mut args = ToolArgs::new();
        args.insert("fact".to_string(), json!(rest));
        Ok(PreprocessOutcome::schedule_tool(SAVE_MEMORY_TOOL, args))
      }
      ("memory", "add") => Ok(PreprocessOutcome::handled(vec![DisplayItem::error(
        "Usage: /memory add <text to remember>",
      )])),
      ("memory", "show") => {
        let content = match tokio::fs::read_to_string(&self.memory_file).await {
          Ok(content) => content,
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
          Err(e) => return Err(e.into()),
        };
        let text = if content.trim().is_empty() {
          "Memory is currently empty.".to_string()
        } else {
          format!("Current memory content:\n{}", content.trim_end())
        };
        Ok(PreprocessOutcome::handled(vec![DisplayItem::info(text)]))
      }
      ("memory", other) => Ok(PreprocessOutcome::handled(vec![DisplayItem::error(
        format!("Unknown /memory command: {other}. Available: show, add"),
      )])),
      (other, _) => Ok(PreprocessOutcome::handled(vec![DisplayItem::error(
        format!("Unknown command: /{other}"),
      )])),
    }
  }

  async fn at_mentions(
    &self,
    query: &str,
    mentions: Vec<&str>,
    token: &CancellationToken,
  ) -> anyhow::Result<PreprocessOutcome> {
    let mut messages = Vec::new();
    let mut contents = Vec::new();

    for mention in mentions {
      if token.is_cancelled() {
        debug!("query cancelled while reading referenced files");
        return Ok(PreprocessOutcome::default());
      }
      let path = self.root.join(mention);
      self.stage(&path);
      match tokio::fs::read_to_string(&path).await {
        Ok(content) => contents.push((mention, content)),
        Err(e) => messages.push(DisplayItem::error(format!(
          "Skipping @{mention}: {e}"
        ))),
      }
    }
    if token.is_cancelled() {
      return Ok(PreprocessOutcome::default());
    }

    let mut parts = vec![Part::text(query)];
    if !contents.is_empty() {
      parts.push(Part::text("\n--- Content from referenced files ---"));
      for (mention, content) in contents {
        parts.push(Part::text(format!("\nContent from @{mention}:\n")));
        parts.push(Part::text(content));
      }
      parts.push(Part::text("\n--- End of content ---"));
    }
    self.staged.lock().unwrap_or_else(PoisonError::into_inner).clear();

    let mut outcome = PreprocessOutcome::proceed(parts);
    outcome.messages = messages;
    Ok(outcome)
  }
}

#[async_trait]
impl QueryPreprocessor for CommandPreprocessor {
  async fn process(
    &self,
    query: &str,
    token: &CancellationToken,
  ) -> anyhow::Result<PreprocessOutcome> {
    if query.starts_with('/') {
      return self.slash_command(query).await;
    }

    let mentions: Vec<&str> = query
      .split_whitespace()
      .filter_map(|word| word.strip_prefix('@'))
      .filter(|path| !path.is_empty())
      .collect();
    if mentions.is_empty() {
      return Ok(PreprocessOutcome::proceed(vec![Part::text(query)]));
    }
    self.at_mentions(query, mentions, token).await
  }

  fn clear_staged(&self) {
    self.staged.lock().unwrap_or_else(PoisonError::into_inner).clear();
  }
}
