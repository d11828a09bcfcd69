//! Deterministic doubles for the oracle and the target API.

pub mod scripted_oracle;
pub mod scripted_transport;

pub use scripted_oracle::ScriptedOracle;
pub use scripted_transport::{ScriptedReply, ScriptedTransport};
