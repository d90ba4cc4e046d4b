use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tern_protocol::ToolResultDisplay;
use tokio_util::sync::CancellationToken;

use crate::tools::context::{LiveOutput, ToolArgs, ToolError, ToolResult, parse_args};
use crate::tools::registry::{Tool, ToolKind};
use crate::tools::spec::{ToolSpec, int_field, obj, str_field};

pub const READ_FILE_TOOL: &str = "read_file";

pub struct ReadFileTool {
  root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
  file_path: String,
  offset: Option<usize>,
  limit: Option<usize>,
}

impl ReadFileTool {
  pub fn new(root: PathBuf) -> Self {
    Self { root }
  }

  fn resolve(&self, file_path: &str) -> PathBuf {
    let path = PathBuf::from(file_path);
    if path.is_absolute() {
      path
    } else {
      self.root.join(path)
    }
  }
}

#[async_trait]
impl Tool for ReadFileTool {
  fn name(&self) -> &str {
    READ_FILE_TOOL
  }

  fn display_name(&self) -> &str {
    "ReadFile"
  }

  fn kind(&self) -> ToolKind {
    ToolKind::Read
  }

  fn spec(&self) -> ToolSpec {
    let mut props = BTreeMap::new();
    props.insert("file_path".to_string(), str_field("Path of the file to read"));
    props.insert("offset".to_string(), int_field("0-based line to start from"));
    props.insert("limit".to_string(), int_field("Maximum number of lines"));
    ToolSpec::new(
      READ_FILE_TOOL,
      "Reads a text file, optionally a window of its lines.",
      obj(props, &["file_path"]),
    )
  }

  fn validate_params(&self, args: &ToolArgs) -> Result<(), ToolError> {
    self.spec().parameters.check_args(args)?;
    let args: ReadFileArgs = parse_args(READ_FILE_TOOL, args)?;
    if args.file_path.trim().is_empty() {
      return Err(ToolError::InvalidParams(
        "The 'file_path' parameter must be non-empty.".to_string(),
      ));
    }
    Ok(())
  }

  fn get_description(&self, args: &ToolArgs) -> String {
    parse_args::<ReadFileArgs>(READ_FILE_TOOL, args)
      .map(|args| args.file_path)
      .unwrap_or_default()
  }

  async fn execute(
    &self,
    args: &ToolArgs,
    _token: CancellationToken,
    _live_output: Option<LiveOutput>,
  ) -> Result<ToolResult, ToolError> {
    let args: ReadFileArgs = parse_args(READ_FILE_TOOL, args)?;
    let path = self.resolve(&args.file_path);

    let content = tokio::fs::read_to_string(&path)
      .await
      .map_err(|e| ToolError::Execution(format!("failed to read {}: {e}", path.display())))?;

    let lines: Vec<&str> = content.lines().collect();
    let start = args.offset.unwrap_or(0).min(lines.len());
    let end = match args.limit {
      Some(limit) => (start + limit).min(lines.len()),
      None => lines.len(),
    };
    let slice = if start < end {
      lines[start..end].join("\n")
    } else {
      String::new()
    };

    let display = if start == 0 && end == lines.len() {
      format!("Read {} lines", lines.len())
    } else {
      format!("Read lines {}-{} of {}", start + 1, end, lines.len())
    };
    Ok(ToolResult::new(slice, ToolResultDisplay::Text { text: display }))
  }
}
