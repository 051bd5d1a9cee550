//! Wire protocol definitions
//!
//! This module defines the framing used between a wager agent and the
//! aggregation server.

pub mod wire;

pub use wire::{
    read_message, read_message_with_limit, write_message, FrameHeader, Message, MessageType,
    WireError, HEADER_SIZE, MAX_PAYLOAD_LEN,
};
