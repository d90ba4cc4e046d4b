//! Session hooks
//!
//! Side effects the turn engine triggers but does not own.

use async_trait::async_trait;

#[async_trait]
pub trait SessionHooks: Send + Sync {
  /// The model client rejected our credentials.
  async fn on_auth_error(&self, _message: &str) {}

  /// Reload persistent memory after a successful memory save. The returned
  /// text, if any, is shown to the user.
  async fn refresh_memory(&self) -> anyhow::Result<Option<String>> {
    Ok(None)
  }
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl SessionHooks for NoopHooks {}
