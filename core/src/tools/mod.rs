pub mod context;
pub mod handlers;
pub mod registry;
pub mod spec;

use std::path::Path;

use tern_config::Config;
use tracing::debug;

pub use context::{LiveOutput, ToolArgs, ToolError, ToolResult, parse_args};
pub use handlers::mcp::{McpTool, McpToolCaller};
pub use registry::{ApprovalKey, Tool, ToolKind, ToolRegistry};
pub use spec::{JsonSchema, ToolSpec};

/// Build the built-in tool registry for a project rooted at `root`.
///
/// Tools named in `tools.exclude` are left out.
pub fn build_default_tools(config: &Config, root: &Path) -> ToolRegistry {
  let mut registry = ToolRegistry::new();
  handlers::register_builtin_tools(&mut registry, config, root);
  for name in &config.tools.exclude {
    if registry.remove(name).is_some() {
      debug!(tool = %name, "excluded tool by configuration");
    }
  }
  registry
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn excluded_tools_are_not_registered() {
    let mut config = Config::default();
    config.tools.exclude = vec!["run_shell_command".to_string(), "unknown".to_string()];
    let registry = build_default_tools(&config, Path::new("."));
    assert_eq!(
      registry.names(),
      vec![
        "read_file".to_string(),
        "save_memory".to_string(),
        "write_file".to_string()
      ]
    );
  }
}
