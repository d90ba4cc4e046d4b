// Tern Core Library

pub mod approval;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod tern;
pub mod tools;
pub mod turn;

pub use error::CoreError;
pub use tern::{Tern, TernBuilder};
pub use turn::{Query, TurnOutcome};
