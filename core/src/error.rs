//! Core error types

use thiserror::Error;

use crate::model::ModelError;
use crate::scheduler::SchedulerError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
  #[error(transparent)]
  Model(#[from] ModelError),

  #[error(transparent)]
  Scheduler(#[from] SchedulerError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
