//! Shared types and utilities for Wager
//!
//! This crate contains the wire protocol codec, the bet record type and the
//! small helpers used by both the agent and anything speaking to it.

pub mod protocol;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use protocol::{Message, MessageType, WireError};
pub use types::bet::{Bet, BetError};
