// Interactive Loop
// Reads queries and approval answers from stdin while a turn runs

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tern_core::Tern;
use tern_protocol::{ToolCallDisplay, ToolConfirmationOutcome};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::render::Signal;

pub struct Repl {
  tern: Arc<Tern>,
  lines: Lines<BufReader<Stdin>>,
  signals: mpsc::UnboundedReceiver<Signal>,
}

impl Repl {
  pub fn new(tern: Arc<Tern>, signals: mpsc::UnboundedReceiver<Signal>) -> Self {
    Self {
      tern,
      lines: BufReader::new(tokio::io::stdin()).lines(),
      signals,
    }
  }

  pub async fn run(&mut self) -> anyhow::Result<()> {
    loop {
      print!("tern> ");
      std::io::stdout().flush().context("failed to flush stdout")?;
      let Some(line) = self.lines.next_line().await.context("failed to read stdin")? else {
        break;
      };
      let line = line.trim();
      match line {
        "" => continue,
        "exit" | "quit" => break,
        _ => self.run_turn(line.to_string()).await?,
      }
    }
    Ok(())
  }

  /// Submit one query and stay with it until the engine is idle again.
  pub async fn run_turn(&mut self, query: String) -> anyhow::Result<()> {
    let tern = self.tern.clone();
    let turn = tokio::spawn(async move { tern.submit(query).await });

    loop {
      tokio::select! {
        interrupted = tokio::signal::ctrl_c() => {
          interrupted.context("failed to listen for Ctrl-C")?;
          if self.tern.cancel().await {
            info!("turn interrupted");
          }
        }
        signal = self.signals.recv() => match signal {
          Some(Signal::Approval(display)) => self.ask(display).await?,
          Some(Signal::Idle) | None => break,
        },
      }
    }

    match turn.await.context("turn task failed")? {
      Ok(outcome) => debug!(?outcome, "turn ended"),
      Err(err) => warn!(error = %err, "turn ended with an error"),
    }
    Ok(())
  }

  async fn ask(&mut self, display: ToolCallDisplay) -> anyhow::Result<()> {
    print!("  > ");
    std::io::stdout().flush().context("failed to flush stdout")?;
    let answer = self
      .lines
      .next_line()
      .await
      .context("failed to read stdin")?
      .unwrap_or_default();
    let outcome = parse_answer(&answer);
    if let Err(err) = self.tern.respond(&display.call_id, outcome).await {
      let call_id = &display.call_id;
      warn!(call_id = %call_id, error = %err, "approval was not delivered");
    }
    Ok(())
  }
}

/// `y` once, `a` always, `s` whole server, `t` this tool; anything else rejects.
pub fn parse_answer(answer: &str) -> ToolConfirmationOutcome {
  match answer.trim().to_ascii_lowercase().as_str() {
    "y" | "yes" => ToolConfirmationOutcome::ProceedOnce,
    "a" | "always" => ToolConfirmationOutcome::ProceedAlways,
    "s" | "server" => ToolConfirmationOutcome::ProceedAlwaysServer,
    "t" | "tool" => ToolConfirmationOutcome::ProceedAlwaysTool,
    _ => ToolConfirmationOutcome::Reject,
  }
}
