use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tern_protocol::{ConfirmationKind, ToolCallConfirmationDetails, ToolResultDisplay};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::tools::context::{LiveOutput, ToolArgs, ToolError, ToolResult, parse_args};
use crate::tools::registry::{ApprovalKey, Tool, ToolKind};
use crate::tools::spec::{ToolSpec, obj, str_field};

pub const SHELL_TOOL: &str = "run_shell_command";

pub struct ShellTool {
  root: PathBuf,
  timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ShellArgs {
  command: String,
  description: Option<String>,
  directory: Option<PathBuf>,
}

impl ShellTool {
  pub fn new(root: PathBuf, timeout: Duration) -> Self {
    Self { root, timeout }
  }
}

/// First program a command line runs, without its directory, e.g. `git` for
/// `/usr/bin/git status`.
pub fn command_root(command: &str) -> Option<String> {
  let words = shlex::split(command)
    .unwrap_or_else(|| command.split_whitespace().map(str::to_string).collect());
  let first = words.into_iter().next()?;
  let first = first
    .split([';', '&', '|'])
    .next()
    .unwrap_or_default()
    .to_string();
  Path::new(&first)
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .filter(|name| !name.is_empty())
}

fn format_output(exit: Option<i32>, stdout: &str, stderr: &str) -> String {
  let mut content = match exit {
    Some(code) => format!("exit_code: {code}\n"),
    None => "exit_code: (terminated by signal)\n".to_string(),
  };
  for (label, stream) in [("stdout", stdout), ("stderr", stderr)] {
    if stream.is_empty() {
      continue;
    }
    content.push_str(label);
    content.push_str(":\n");
    content.push_str(stream);
    if !content.ends_with('\n') {
      content.push('\n');
    }
  }
  content
}

#[async_trait]
impl Tool for ShellTool {
  fn name(&self) -> &str {
    SHELL_TOOL
  }

  fn display_name(&self) -> &str {
    "Shell"
  }

  fn kind(&self) -> ToolKind {
    ToolKind::Execute
  }

  fn spec(&self) -> ToolSpec {
    let mut props = BTreeMap::new();
    props.insert("command".to_string(), str_field("Exact bash command to run"));
    props.insert(
      "description".to_string(),
      str_field("Brief description of the command for the user"),
    );
    props.insert(
      "directory".to_string(),
      str_field("Directory to run in, relative to the project root"),
    );
    ToolSpec::new(
      SHELL_TOOL,
      "Executes a bash command and returns its exit code and output.",
      obj(props, &["command"]),
    )
  }

  fn validate_params(&self, args: &ToolArgs) -> Result<(), ToolError> {
    self.spec().parameters.check_args(args)?;
    let args: ShellArgs = parse_args(SHELL_TOOL, args)?;
    if args.command.trim().is_empty() {
      return Err(ToolError::InvalidParams("Command cannot be empty.".to_string()));
    }
    if command_root(&args.command).is_none() {
      return Err(ToolError::InvalidParams(
        "Could not identify command root to obtain permission from user.".to_string(),
      ));
    }
    if let Some(directory) = &args.directory {
      if directory.is_absolute() {
        return Err(ToolError::InvalidParams(
          "Directory cannot be absolute. Must be relative to the project root directory."
            .to_string(),
        ));
      }
      if !self.root.join(directory).is_dir() {
        return Err(ToolError::InvalidParams("Directory must exist.".to_string()));
      }
    }
    Ok(())
  }

  fn get_description(&self, args: &ToolArgs) -> String {
    let Ok(args) = parse_args::<ShellArgs>(SHELL_TOOL, args) else {
      return String::new();
    };
    let mut description = args.command;
    if let Some(directory) = args.directory {
      description.push_str(&format!(" [in {}]", directory.display()));
    }
    if let Some(summary) = args.description {
      description.push_str(&format!(" ({summary})"));
    }
    description
  }

  fn can_update_output(&self) -> bool {
    true
  }

  fn approval_keys(&self, args: &ToolArgs) -> Vec<ApprovalKey> {
    parse_args::<ShellArgs>(SHELL_TOOL, args)
      .ok()
      .and_then(|args| command_root(&args.command))
      .map(ApprovalKey::Command)
      .into_iter()
      .collect()
  }

  async fn should_confirm_execute(
    &self,
    args: &ToolArgs,
    _token: &CancellationToken,
  ) -> Result<Option<ToolCallConfirmationDetails>, ToolError> {
    let args: ShellArgs = parse_args(SHELL_TOOL, args)?;
    let root_command = command_root(&args.command).ok_or_else(|| {
      ToolError::InvalidParams("Could not identify command root.".to_string())
    })?;
    Ok(Some(ToolCallConfirmationDetails {
      title: "Confirm Shell Command".to_string(),
      kind: ConfirmationKind::Exec {
        command: args.command,
        root_command,
      },
    }))
  }

  async fn execute(
    &self,
    args: &ToolArgs,
    token: CancellationToken,
    live_output: Option<LiveOutput>,
  ) -> Result<ToolResult, ToolError> {
    let args: ShellArgs = parse_args(SHELL_TOOL, args)?;
    let cwd = match &args.directory {
      Some(directory) => self.root.join(directory),
      None => self.root.clone(),
    };

    let mut child = Command::new("bash")
      .arg("-c")
      .arg(&args.command)
      .current_dir(&cwd)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .kill_on_drop(true)
      .spawn()
      .map_err(|e| ToolError::Execution(format!("shell failed to start: {e}")))?;
    debug!(command = %args.command, cwd = %cwd.display(), "spawned shell command");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let run = async {
      let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
          let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
      });

      let mut stdout_buf = String::new();
      if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
          stdout_buf.push_str(&line);
          stdout_buf.push('\n');
          if let Some(live) = &live_output {
            live.emit(stdout_buf.clone());
          }
        }
      }
      let status = child.wait().await?;
      let stderr_buf = stderr_task.await.unwrap_or_default();
      Ok::<_, std::io::Error>((status, stdout_buf, stderr_buf))
    };

    tokio::select! {
      _ = token.cancelled() => {
        debug!(command = %args.command, "shell command cancelled");
        Err(ToolError::Cancelled)
      }
      outcome = tokio::time::timeout(self.timeout, run) => match outcome {
        Err(_) => Err(ToolError::Execution(format!(
          "Command timed out after {}s: {}",
          self.timeout.as_secs(),
          args.command
        ))),
        Ok(Err(e)) => Err(ToolError::Execution(format!("shell failed: {e}"))),
        Ok(Ok((status, stdout, stderr))) => {
          let content = format_output(status.code(), &stdout, &stderr);
          let display = if stdout.is_empty() && stderr.is_empty() {
            format!("exit code {}", status.code().unwrap_or(-1))
          } else {
            format!("{stdout}{stderr}")
          };
          Ok(ToolResult::new(content, ToolResultDisplay::Text { text: display }))
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use pretty_assertions::assert_eq;
  use serde_json::json;

  use super::*;

  fn args(value: serde_json::Value) -> ToolArgs {
    value.as_object().cloned().expect("object args")
  }

  fn tool(root: &Path) -> ShellTool {
    ShellTool::new(root.to_path_buf(), Duration::from_secs(10))
  }

  #[test]
  fn command_root_strips_paths_and_arguments() {
    assert_eq!(command_root("git status"), Some("git".to_string()));
    assert_eq!(command_root("/usr/bin/ls -la"), Some("ls".to_string()));
    assert_eq!(command_root("echo hi; rm -rf x"), Some("echo".to_string()));
    assert_eq!(command_root("   "), None);
  }

  #[test]
  fn approval_key_is_the_root_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert_eq!(
      tool(dir.path()).approval_keys(&args(json!({ "command": "cargo fmt --all" }))),
      vec![ApprovalKey::Command("cargo".to_string())]
    );
  }

  #[test]
  fn validation_rejects_empty_and_absolute_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let shell = tool(dir.path());
    assert_eq!(
      shell.validate_params(&args(json!({ "command": " " }))),
      Err(ToolError::InvalidParams("Command cannot be empty.".to_string()))
    );
    assert!(
      shell
        .validate_params(&args(json!({ "command": "ls", "directory": "/etc" })))
        .is_err()
    );
    assert!(shell.validate_params(&args(json!({ "command": "ls" }))).is_ok());
  }

  #[tokio::test]
  async fn streams_output_while_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let live = LiveOutput::new(move |chunk| sink.lock().expect("lock").push(chunk));

    let result = tool(dir.path())
      .execute(
        &args(json!({ "command": "echo one; echo two" })),
        CancellationToken::new(),
        Some(live),
      )
      .await
      .expect("run shell");

    assert_eq!(
      result.llm_content[0].as_text(),
      Some("exit_code: 0\nstdout:\none\ntwo\n")
    );
    assert_eq!(
      *seen.lock().expect("lock"),
      vec!["one\n".to_string(), "one\ntwo\n".to_string()]
    );
  }

  #[tokio::test]
  async fn cancellation_stops_the_command() {
    let dir = tempfile::tempdir().expect("tempdir");
    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(50)).await;
      canceller.cancel();
    });

    let err = tool(dir.path())
      .execute(&args(json!({ "command": "sleep 5" })), token, None)
      .await
      .expect_err("cancelled");
    assert_eq!(err, ToolError::Cancelled);
  }
}
