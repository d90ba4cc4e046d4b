use std::path::PathBuf;
use std::sync::Arc;

use tern_config::Config;
use tern_protocol::{StreamingState, ToolConfirmationOutcome, UiEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::approval::ApprovalContext;
use crate::error::Result;
use crate::model::ModelClient;
use crate::scheduler::{SchedulerError, ToolScheduler};
use crate::tools::{McpTool, Tool, build_default_tools};
use crate::turn::{
  CommandPreprocessor, NoopHooks, Query, QueryPreprocessor, SessionHooks, TurnOrchestrator,
  TurnOutcome,
};

/// Assembles a [`Tern`] session from configuration and a model client.
pub struct TernBuilder {
  config: Config,
  model: Arc<dyn ModelClient>,
  root: PathBuf,
  hooks: Arc<dyn SessionHooks>,
  preprocessor: Option<Arc<dyn QueryPreprocessor>>,
  extra_tools: Vec<Arc<dyn Tool>>,
}

impl TernBuilder {
  pub fn new(config: Config, model: Arc<dyn ModelClient>, root: PathBuf) -> Self {
    Self {
      config,
      model,
      root,
      hooks: Arc::new(NoopHooks),
      preprocessor: None,
      extra_tools: Vec::new(),
    }
  }

  pub fn with_hooks(mut self, hooks: Arc<dyn SessionHooks>) -> Self {
    self.hooks = hooks;
    self
  }

  /// Replace the default `/memory` and `@path` preprocessor.
  pub fn with_preprocessor(mut self, preprocessor: Arc<dyn QueryPreprocessor>) -> Self {
    self.preprocessor = Some(preprocessor);
    self
  }

  pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
    self.extra_tools.push(tool);
    self
  }

  /// Register an MCP tool; its server's `trust` setting applies.
  pub fn with_mcp_tool(mut self, tool: McpTool) -> Self {
    let trusted = self
      .config
      .mcp
      .servers
      .get(tool.server_name())
      .is_some_and(|server| server.trust);
    self.extra_tools.push(Arc::new(tool.with_trust(trusted)));
    self
  }

  /// Start the scheduler and the turn engine. Display events arrive on the
  /// returned receiver.
  pub async fn build(self) -> (Tern, mpsc::UnboundedReceiver<UiEvent>) {
    let mut registry = build_default_tools(&self.config, &self.root);
    for tool in self.extra_tools {
      let name = tool.name().to_string();
      if self.config.tools.exclude.contains(&name) {
        debug!(tool = %name, "excluded tool by configuration");
        continue;
      }
      if registry.register(tool).is_some() {
        debug!(tool = %name, "replaced registered tool");
      }
    }
    info!(tools = ?registry.names(), "tool registry ready");
    self.model.set_tools(registry.specs()).await;

    let approval = Arc::new(ApprovalContext::from_config(&self.config.approval));
    let (scheduler, scheduler_events) = ToolScheduler::spawn(Arc::new(registry), approval.clone());

    let preprocessor: Arc<dyn QueryPreprocessor> = match self.preprocessor {
      Some(preprocessor) => preprocessor,
      None => Arc::new(CommandPreprocessor::new(
        self.root.clone(),
        self.config.memory.file.clone(),
      )),
    };
    let (ui, ui_rx) = mpsc::unbounded_channel();
    let orchestrator = TurnOrchestrator::new(
      self.model.clone(),
      scheduler,
      scheduler_events,
      preprocessor,
      self.hooks,
      ui,
    );

    let tern = Tern {
      config: Arc::new(self.config),
      model: self.model,
      approval,
      orchestrator,
    };
    (tern, ui_rx)
  }
}

/// One interactive session.
pub struct Tern {
  config: Arc<Config>,
  model: Arc<dyn ModelClient>,
  approval: Arc<ApprovalContext>,
  orchestrator: TurnOrchestrator,
}

impl Tern {
  pub async fn submit(&self, query: impl Into<Query>) -> Result<TurnOutcome> {
    self.orchestrator.submit_query(query.into(), false).await
  }

  /// Interrupt the active turn; false when idle.
  pub async fn cancel(&self) -> bool {
    self.orchestrator.cancel().await
  }

  pub async fn respond(
    &self,
    call_id: &str,
    outcome: ToolConfirmationOutcome,
  ) -> std::result::Result<(), SchedulerError> {
    self.orchestrator.respond(call_id, outcome).await
  }

  pub async fn streaming_state(&self) -> StreamingState {
    self.orchestrator.streaming_state().await
  }

  /// Token of the current turn, for collaborators that run alongside it.
  pub async fn cancellation_token(&self) -> Option<CancellationToken> {
    self.orchestrator.cancellation_token().await
  }

  pub fn approval(&self) -> &ApprovalContext {
    &self.approval
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  pub fn model(&self) -> &Arc<dyn ModelClient> {
    &self.model
  }

  pub fn orchestrator(&self) -> &TurnOrchestrator {
    &self.orchestrator
  }
}
