//! Model layer error types

use thiserror::Error;

/// Failures raised before a stream is open. Failures inside an open stream
/// arrive as `StreamEvent::Error` instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
  /// Credentials rejected; routed to the auth-error hook
  #[error("Authentication failed: {0}")]
  Unauthorized(String),

  /// Request rejected before sending
  #[error("Invalid request: {0}")]
  InvalidRequest(String),

  /// Provider API error
  #[error("{message}")]
  Api { message: String, status: Option<u16> },

  /// Network error
  #[error("Network error: {0}")]
  Transport(String),
}

impl ModelError {
  pub fn status(&self) -> Option<u16> {
    match self {
      ModelError::Api { status, .. } => *status,
      ModelError::Unauthorized(_) => Some(401),
      _ => None,
    }
  }
}

/// Alias for Result<T, ModelError>
pub type Result<T> = std::result::Result<T, ModelError>;
