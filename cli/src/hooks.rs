use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use tern_core::turn::SessionHooks;
use tracing::warn;

/// Reloads the memory file after each successful save.
pub struct MemoryFileHooks {
  file: PathBuf,
}

impl MemoryFileHooks {
  pub fn new(file: PathBuf) -> Self {
    Self { file }
  }
}

#[async_trait]
impl SessionHooks for MemoryFileHooks {
  async fn on_auth_error(&self, message: &str) {
    warn!(%message, "model rejected the configured credentials");
    eprintln!("Authentication failed: {message}");
  }

  async fn refresh_memory(&self) -> anyhow::Result<Option<String>> {
    let content = match tokio::fs::read_to_string(&self.file).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
      Err(e) => {
        return Err(e).with_context(|| format!("failed to read {}", self.file.display()));
      }
    };
    Ok(Some(format!(
      "Memory refreshed successfully. Loaded {} characters from {}.",
      content.chars().count(),
      self.file.display()
    )))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn refresh_reports_loaded_size() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("MEMORY.md");
    let hooks = MemoryFileHooks::new(file.clone());

    let empty = hooks.refresh_memory().await.expect("refresh").expect("message");
    assert!(empty.starts_with("Memory refreshed successfully. Loaded 0 characters"));

    std::fs::write(&file, "- likes tea\n").expect("write memory");
    let loaded = hooks.refresh_memory().await.expect("refresh").expect("message");
    assert!(loaded.starts_with("Memory refreshed successfully. Loaded 12 characters"));
  }
}
