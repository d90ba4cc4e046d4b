// Tern CLI - Command Line Interface Entry Point

mod hooks;
mod render;
mod repl;
mod script;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tern_config::{Config, ConfigLoader, parse_override};
use tern_core::TernBuilder;
use tern_core::model::ScriptedModelClient;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::hooks::MemoryFileHooks;
use crate::repl::Repl;
use crate::script::ScriptFile;

/// Tern - drive model turns, tool calls and approvals from the terminal
#[derive(Parser, Debug)]
#[command(name = "tern")]
#[command(version, about, long_about = None)]
struct TopCli {
  #[clap(flatten)]
  config_overrides: CliConfigOverrides,

  #[clap(subcommand)]
  command: Option<Commands>,

  /// Run a single prompt, then exit
  #[arg(short = 'p', long = "prompt")]
  prompt: Option<String>,

  /// Project directory (defaults to the current directory)
  #[arg(short = 'd', long = "dir")]
  dir: Option<PathBuf>,

  /// Approval mode: default, auto_edit or yolo
  #[arg(long = "approval-mode", value_name = "MODE")]
  approval_mode: Option<String>,

  /// JSON file of scripted model turns
  #[arg(long = "script", value_name = "FILE")]
  script: Option<PathBuf>,
}

/// CLI configuration overrides
#[derive(Debug, clap::Args)]
struct CliConfigOverrides {
  /// Configuration override in key=value format
  #[arg(short = 'c', long = "config", value_name = "KEY=VALUE")]
  overrides: Vec<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
  /// Configuration management
  Config {
    #[command(subcommand)]
    config_command: ConfigCommands,
  },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
  /// Print the merged configuration
  Show,
}

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = TopCli::parse();
  let root = match &cli.dir {
    Some(dir) => dir.clone(),
    None => std::env::current_dir().context("failed to resolve the current directory")?,
  };
  let config = load_config(&cli, &root)?;

  match cli.command {
    Some(Commands::Config {
      config_command: ConfigCommands::Show,
    }) => {
      let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
      println!("{rendered}");
      Ok(())
    }
    None => run_session(config, root, cli.script, cli.prompt).await,
  }
}

fn load_config(cli: &TopCli, root: &std::path::Path) -> Result<Config> {
  let mut overrides = cli
    .config_overrides
    .overrides
    .iter()
    .map(|raw| parse_override(raw))
    .collect::<Result<Vec<_>, _>>()
    .context("invalid -c override")?;
  if let Some(mode) = &cli.approval_mode {
    overrides.push(("approval.mode".to_string(), mode.clone()));
  }

  ConfigLoader::new()
    .with_project_dir(root.to_path_buf())
    .load_with_cli_overrides(overrides)
    .context("failed to load configuration")
}

async fn run_session(
  config: Config,
  root: PathBuf,
  script: Option<PathBuf>,
  prompt: Option<String>,
) -> Result<()> {
  let script = match script {
    Some(path) => ScriptFile::load(&path)?,
    None => {
      warn!("no --script given; the model will answer with empty turns");
      ScriptFile::default()
    }
  };
  info!(
    turns = script.turns.len(),
    mode = ?config.approval.mode,
    "Tern session starting"
  );

  let memory_file = if config.memory.file.is_absolute() {
    config.memory.file.clone()
  } else {
    root.join(&config.memory.file)
  };
  let mcp_tools = script.mcp_tools();
  let model = Arc::new(ScriptedModelClient::new(script.turns));
  let mut builder = TernBuilder::new(config, model, root)
    .with_hooks(Arc::new(MemoryFileHooks::new(memory_file)));
  for tool in mcp_tools {
    builder = builder.with_mcp_tool(tool);
  }
  let (tern, ui) = builder.build().await;

  let (signals_tx, signals) = mpsc::unbounded_channel();
  let renderer = render::spawn_renderer(ui, signals_tx);
  let mut repl = Repl::new(Arc::new(tern), signals);

  match prompt {
    Some(prompt) => repl.run_turn(prompt).await?,
    None => repl.run().await?,
  }
  drop(repl);
  renderer.abort();
  Ok(())
}
