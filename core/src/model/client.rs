//! Model client
//!
//! The seam between the turn engine and whatever talks to a model.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tern_protocol::{Content, Part, StreamEvent};
use tokio_util::sync::CancellationToken;

use super::error::Result;
use crate::tools::ToolSpec;

/// Events of one model turn, ending when the turn ends.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[async_trait]
pub trait ModelClient: Send + Sync {
  /// Send one request and stream the reply. The client appends the request
  /// and the reply to its history.
  async fn send_message_stream(
    &self,
    request: Vec<Part>,
    token: CancellationToken,
  ) -> Result<EventStream>;

  async fn history(&self) -> Vec<Content>;

  async fn set_history(&self, history: Vec<Content>);

  /// Append an entry without sending anything.
  async fn add_history(&self, content: Content);

  async fn reset_chat(&self) -> Result<()>;

  /// Declarations of the tools the model may call.
  async fn set_tools(&self, _tools: Vec<ToolSpec>) {}
}
