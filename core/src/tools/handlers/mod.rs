pub mod mcp;
pub mod memory;
pub mod read_file;
pub mod shell;
pub mod write_file;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tern_config::Config;

use crate::tools::registry::ToolRegistry;

pub fn register_builtin_tools(registry: &mut ToolRegistry, config: &Config, root: &Path) {
  registry.register(Arc::new(read_file::ReadFileTool::new(root.to_path_buf())));
  registry.register(Arc::new(write_file::WriteFileTool::new(root.to_path_buf())));
  registry.register(Arc::new(shell::ShellTool::new(
    root.to_path_buf(),
    Duration::from_secs(config.tools.shell_timeout_secs),
  )));
  let memory_file = if config.memory.file.is_absolute() {
    config.memory.file.clone()
  } else {
    root.join(&config.memory.file)
  };
  registry.register(Arc::new(memory::SaveMemoryTool::new(memory_file)));
}
