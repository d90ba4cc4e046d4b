// Transcript Rendering
// Turns display events into plain terminal lines

use tern_protocol::{
  ConfirmationKind, DisplayItem, StreamingState, ToolCallConfirmationDetails, ToolCallDisplay,
  ToolCallStatus, ToolResultDisplay, UiEvent,
};
use tokio::sync::mpsc;
use tracing::debug;

/// What the input loop needs to hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
  Approval(ToolCallDisplay),
  Idle,
}

/// Print every display event and forward approvals and idleness.
pub fn spawn_renderer(
  mut events: mpsc::UnboundedReceiver<UiEvent>,
  signals: mpsc::UnboundedSender<Signal>,
) -> tokio::task::JoinHandle<()> {
  tokio::spawn(async move {
    while let Some(event) = events.recv().await {
      if let Some(text) = render(&event) {
        println!("{text}");
      }
      let signal = match event {
        UiEvent::ToolCallUpdated(display) if display.status == ToolCallStatus::AwaitingApproval => {
          Some(Signal::Approval(display))
        }
        UiEvent::StreamingStateChanged(StreamingState::Idle) => Some(Signal::Idle),
        UiEvent::Usage(usage) => {
          debug!(
            prompt = usage.prompt_token_count,
            candidates = usage.candidates_token_count,
            total = usage.total_token_count,
            "token usage"
          );
          None
        }
        _ => None,
      };
      if let Some(signal) = signal
        && signals.send(signal).is_err()
      {
        break;
      }
    }
  })
}

pub fn render(event: &UiEvent) -> Option<String> {
  match event {
    UiEvent::ItemAdded(item) => Some(render_item(item)),
    UiEvent::ToolCallUpdated(display) => match display.status {
      ToolCallStatus::AwaitingApproval => display
        .confirmation
        .as_ref()
        .map(|details| render_confirmation(display, details)),
      ToolCallStatus::Executing => Some(match &display.live_output {
        Some(output) => output.lines().last().unwrap_or_default().to_string(),
        None => format!("  ... {} {}", display.name, display.description),
      }),
      _ => None,
    },
    UiEvent::Thought(thought) => Some(format!("(thinking) {}", thought.subject)),
    UiEvent::PendingChanged(_) | UiEvent::Usage(_) | UiEvent::StreamingStateChanged(_) => None,
  }
}

fn render_item(item: &DisplayItem) -> String {
  match item {
    DisplayItem::User { text } => format!("> {text}"),
    DisplayItem::Assistant { text } | DisplayItem::AssistantContent { text } => text.clone(),
    DisplayItem::Info { text } => format!("i {text}"),
    DisplayItem::Error { text } => format!("x {text}"),
    DisplayItem::ToolGroup { tools } => tools
      .iter()
      .map(render_tool)
      .collect::<Vec<_>>()
      .join("\n"),
  }
}

fn render_tool(tool: &ToolCallDisplay) -> String {
  let mark = match tool.status {
    ToolCallStatus::Success => "ok",
    ToolCallStatus::Error => "error",
    ToolCallStatus::Cancelled => "cancelled",
    _ => "pending",
  };
  let mut line = format!("  [{mark}] {} {}", tool.name, tool.description);
  match &tool.result_display {
    Some(ToolResultDisplay::Text { text }) => {
      line.push_str("\n    ");
      line.push_str(&text.replace('\n', "\n    "));
    }
    Some(ToolResultDisplay::FileDiff { diff, .. }) => {
      line.push('\n');
      line.push_str(diff.trim_end());
    }
    None => {}
  }
  line
}

fn render_confirmation(tool: &ToolCallDisplay, details: &ToolCallConfirmationDetails) -> String {
  let body = match &details.kind {
    ConfirmationKind::Edit { file_diff, .. } => file_diff.trim_end().to_string(),
    ConfirmationKind::Exec { command, .. } => format!("  $ {command}"),
    ConfirmationKind::Mcp {
      server_name,
      tool_display_name,
      ..
    } => format!("  {tool_display_name} on MCP server `{server_name}`"),
    ConfirmationKind::Info { prompt } => format!("  {prompt}"),
  };
  format!(
    "? {} ({})\n{body}\n  allow? [y] once  [a] always  [s] server  [t] tool  [n] no",
    details.title, tool.name
  )
}
