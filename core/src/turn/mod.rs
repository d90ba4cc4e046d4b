//! Turn engine
//!
//! Everything between a user query and the model's final answer: query
//! preprocessing, streaming, tool call hand-off and continuations.

pub mod hooks;
pub mod markdown;
pub mod orchestrator;
pub mod preprocess;
pub mod tracked;

pub use hooks::{NoopHooks, SessionHooks};
pub use markdown::find_last_safe_split_point;
pub use orchestrator::{Query, TurnOrchestrator, TurnOutcome, format_api_error};
pub use preprocess::{
  ClientToolRequest, CommandPreprocessor, PassthroughPreprocessor, PreprocessOutcome,
  QueryPreprocessor,
};
pub use tracked::{CompletionAction, CompletionPlan, TrackedToolCall, plan_completion};
