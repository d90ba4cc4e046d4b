use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use similar::TextDiff;
use tern_protocol::{ConfirmationKind, ToolCallConfirmationDetails, ToolResultDisplay};
use tokio_util::sync::CancellationToken;

use crate::tools::context::{LiveOutput, ToolArgs, ToolError, ToolResult, parse_args};
use crate::tools::registry::{Tool, ToolKind};
use crate::tools::spec::{ToolSpec, obj, str_field};

pub const WRITE_FILE_TOOL: &str = "write_file";

pub struct WriteFileTool {
  root: PathBuf,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
  file_path: String,
  content: String,
}

impl WriteFileTool {
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

async fn current_content(path: &Path) -> Result<String, ToolError> {
  match tokio::fs::read_to_string(path).await {
    Ok(content) => Ok(content),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
    Err(e) => Err(ToolError::Execution(format!(
      "failed to read {}: {e}",
      path.display()
    ))),
  }
}

fn file_diff(file_name: &str, old: &str, new: &str) -> String {
  TextDiff::from_lines(old, new)
    .unified_diff()
    .context_radius(3)
    .header(&format!("{file_name} (current)"), &format!("{file_name} (proposed)"))
    .to_string()
}

fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.display().to_string())
}

#[async_trait]
impl Tool for WriteFileTool {
  fn name(&self) -> &str {
    WRITE_FILE_TOOL
  }

  fn display_name(&self) -> &str {
    "WriteFile"
  }

  fn kind(&self) -> ToolKind {
    ToolKind::Edit
  }

  fn spec(&self) -> ToolSpec {
    let mut props = BTreeMap::new();
    props.insert("file_path".to_string(), str_field("Path of the file to write"));
    props.insert("content".to_string(), str_field("Full new content of the file"));
    ToolSpec::new(
      WRITE_FILE_TOOL,
      "Writes content to a file, replacing what was there.",
      obj(props, &["file_path", "content"]),
    )
  }

  fn validate_params(&self, args: &ToolArgs) -> Result<(), ToolError> {
    self.spec().parameters.check_args(args)?;
    let args: WriteFileArgs = parse_args(WRITE_FILE_TOOL, args)?;
    let path = self.resolve(&args.file_path);
    if args.file_path.trim().is_empty() {
      return Err(ToolError::InvalidParams(
        "The 'file_path' parameter must be non-empty.".to_string(),
      ));
    }
    if path.is_dir() {
      return Err(ToolError::InvalidParams(format!(
        "Path is a directory, not a file: {}",
        path.display()
      )));
    }
    Ok(())
  }

  fn get_description(&self, args: &ToolArgs) -> String {
    parse_args::<WriteFileArgs>(WRITE_FILE_TOOL, args)
      .map(|args| format!("Writing to {}", args.file_path))
      .unwrap_or_default()
  }

  async fn should_confirm_execute(
    &self,
    args: &ToolArgs,
    _token: &CancellationToken,
  ) -> Result<Option<ToolCallConfirmationDetails>, ToolError> {
    let args: WriteFileArgs = parse_args(WRITE_FILE_TOOL, args)?;
    let path = self.resolve(&args.file_path);
    let name = file_name(&path);
    let old = current_content(&path).await?;
    Ok(Some(ToolCallConfirmationDetails {
      title: format!("Confirm Write: {}", args.file_path),
      kind: ConfirmationKind::Edit {
        file_diff: file_diff(&name, &old, &args.content),
        file_name: name,
      },
    }))
  }

  async fn execute(
    &self,
    args: &ToolArgs,
    token: CancellationToken,
    _live_output: Option<LiveOutput>,
  ) -> Result<ToolResult, ToolError> {
    let args: WriteFileArgs = parse_args(WRITE_FILE_TOOL, args)?;
    let path = self.resolve(&args.file_path);
    let old = current_content(&path).await?;
    if token.is_cancelled() {
      return Err(ToolError::Cancelled);
    }

    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      tokio::fs::create_dir_all(parent).await.map_err(|e| {
        ToolError::Execution(format!("failed to create {}: {e}", parent.display()))
      })?;
    }
    tokio::fs::write(&path, args.content.as_bytes())
      .await
      .map_err(|e| ToolError::Execution(format!("failed to write {}: {e}", path.display())))?;

    let name = file_name(&path);
    let llm = if old.is_empty() {
      format!("Successfully created and wrote to new file: {}", path.display())
    } else {
      format!("Successfully overwrote file: {}", path.display())
    };
    Ok(ToolResult::new(
      llm,
      ToolResultDisplay::FileDiff {
        diff: file_diff(&name, &old, &args.content),
        file_name: name,
      },
    ))
  }
}
