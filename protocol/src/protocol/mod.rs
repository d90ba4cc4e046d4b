// Tern Protocol Layer
// Core protocol definitions

pub mod approvals;
pub mod items;
pub mod models;

pub use approvals::{ConfirmationKind, ToolCallConfirmationDetails, ToolConfirmationOutcome};
pub use items::{DisplayItem, StreamingState, ToolCallDisplay, ToolCallStatus, UiEvent};
pub use models::{
  Content, Part, Role, StreamErrorInfo, StreamEvent, ThoughtSummary, ToolCallRequestInfo,
  ToolCallResponseInfo, ToolResultDisplay, UsageMetadata,
};
