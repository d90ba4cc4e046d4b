//! Tern Model Layer
//!
//! - [ModelClient] trait: what the turn engine needs from a model
//! - [ScriptedModelClient]: replays canned turns

pub mod client;
pub mod error;
pub mod scripted;

pub use client::{EventStream, ModelClient};
pub use error::{ModelError, Result};
pub use scripted::{ScriptStep, ScriptedModelClient, ScriptedRejection, ScriptedTurn};
