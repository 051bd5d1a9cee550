//! Record types carried inside protocol payloads

pub mod bet;
