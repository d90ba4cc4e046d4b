// Tern Protocol
// Types exchanged between the turn engine, the model client and the display layer

pub mod protocol;

pub use protocol::*;
