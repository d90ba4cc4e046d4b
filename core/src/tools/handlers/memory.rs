use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tern_protocol::ToolResultDisplay;
use tokio_util::sync::CancellationToken;

use crate::tools::context::{LiveOutput, ToolArgs, ToolError, ToolResult, parse_args};
use crate::tools::registry::{Tool, ToolKind};
use crate::tools::spec::{ToolSpec, obj, str_field};

pub const SAVE_MEMORY_TOOL: &str = "save_memory";
const MEMORY_SECTION_HEADER: &str = "## Tern Added Memories";

/// Appends facts to the session memory file.
pub struct SaveMemoryTool {
  file: PathBuf,
}

#[derive(Debug, Deserialize)]
struct SaveMemoryArgs {
  fact: String,
}

impl SaveMemoryTool {
  pub fn new(file: PathBuf) -> Self {
    Self { file }
  }
}

/// Insert `fact` as a bullet at the end of the memory section, creating the
/// section when it is missing.
fn append_fact(existing: &str, fact: &str) -> String {
  let fact = fact.trim().trim_start_matches('-').trim();
  let entry = format!("- {fact}\n");

  let Some(header_at) = existing.find(MEMORY_SECTION_HEADER) else {
    let mut out = existing.to_string();
    if !out.is_empty() && !out.ends_with("\n\n") {
      out.push_str(if out.ends_with('\n') { "\n" } else { "\n\n" });
    }
    out.push_str(MEMORY_SECTION_HEADER);
    out.push('\n');
    out.push_str(&entry);
    return out;
  };

  let body_start = header_at + MEMORY_SECTION_HEADER.len();
  let section_end = existing[body_start..]
    .find("\n## ")
    .map(|offset| body_start + offset + 1)
    .unwrap_or(existing.len());

  let mut section = existing[..section_end].trim_end().to_string();
  section.push('\n');
  section.push_str(&entry);
  let rest = &existing[section_end..];
  if !rest.is_empty() {
    section.push('\n');
  }
  section.push_str(rest);
  section
}

#[async_trait]
impl Tool for SaveMemoryTool {
  fn name(&self) -> &str {
    SAVE_MEMORY_TOOL
  }

  fn display_name(&self) -> &str {
    "Save Memory"
  }

  fn kind(&self) -> ToolKind {
    ToolKind::Memory
  }

  fn spec(&self) -> ToolSpec {
    let mut props = BTreeMap::new();
    props.insert(
      "fact".to_string(),
      str_field("A concise fact to remember across sessions"),
    );
    ToolSpec::new(
      SAVE_MEMORY_TOOL,
      "Saves a specific piece of information to long-term memory.",
      obj(props, &["fact"]),
    )
  }

  fn validate_params(&self, args: &ToolArgs) -> Result<(), ToolError> {
    self.spec().parameters.check_args(args)?;
    let args: SaveMemoryArgs = parse_args(SAVE_MEMORY_TOOL, args)?;
    if args.fact.trim().is_empty() {
      return Err(ToolError::InvalidParams(
        "Parameter \"fact\" must be a non-empty string.".to_string(),
      ));
    }
    Ok(())
  }

  fn get_description(&self, args: &ToolArgs) -> String {
    parse_args::<SaveMemoryArgs>(SAVE_MEMORY_TOOL, args)
      .map(|args| args.fact)
      .unwrap_or_default()
  }

  async fn execute(
    &self,
    args: &ToolArgs,
    _token: CancellationToken,
    _live_output: Option<LiveOutput>,
  ) -> Result<ToolResult, ToolError> {
    let args: SaveMemoryArgs = parse_args(SAVE_MEMORY_TOOL, args)?;
    let existing = match tokio::fs::read_to_string(&self.file).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
      Err(e) => {
        return Err(ToolError::Execution(format!(
          "failed to read {}: {e}",
          self.file.display()
        )));
      }
    };

    if let Some(parent) = self.file.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent).await.map_err(|e| {
        ToolError::Execution(format!("failed to create {}: {e}", parent.display()))
      })?;
    }
    tokio::fs::write(&self.file, append_fact(&existing, &args.fact))
      .await
      .map_err(|e| {
        ToolError::Execution(format!("failed to write {}: {e}", self.file.display()))
      })?;

    let message = format!("Okay, I've remembered that: \"{}\"", args.fact.trim());
    Ok(ToolResult::new(
      message.clone(),
      ToolResultDisplay::Text { text: message },
    ))
  }
}
