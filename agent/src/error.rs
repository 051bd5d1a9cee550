//! Client error taxonomy
//!
//! Only failures that end a transmission surface here. Source exhaustion,
//! cancellation and an expired run budget are normal terminations and are
//! reported through [`crate::client::RunReport`] instead.

use crate::config::ConfigError;
use crate::connection::ConnectError;
use crate::source::SourceError;
use serde::Serialize;
use thiserror::Error;
use wager_shared::{MessageType, WireError};

/// State of the transmission state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Init,
    SendBatch,
    AwaitAck,
    SendEot,
    AwaitEotAck,
    QueryResult,
    AwaitResult,
    Done,
    Failed,
    Shutdown,
}

impl State {
    /// Name used in the `action:` field of log lines
    pub fn action(self) -> &'static str {
        match self {
            State::Init => "init",
            State::SendBatch => "send_batch",
            State::AwaitAck => "receive_ack",
            State::SendEot => "send_eot",
            State::AwaitEotAck => "receive_eot_ack",
            State::QueryResult => "query_winners",
            State::AwaitResult => "receive_winners",
            State::Done => "done",
            State::Failed => "failed",
            State::Shutdown => "shutdown",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Failed | State::Shutdown)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.action())
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{state}: {source}")]
    Connect {
        state: State,
        #[source]
        source: ConnectError,
    },

    #[error("{state}: {source}")]
    Transport {
        state: State,
        #[source]
        source: WireError,
    },

    #[error("{state}: expected {expected}, received {received}")]
    UnexpectedMessage {
        state: State,
        expected: MessageType,
        received: MessageType,
    },

    #[error("reading bets: {0}")]
    Source(#[source] SourceError),
}

impl ClientError {
    /// State the error occurred in, when it happened inside the machine
    pub fn state(&self) -> Option<State> {
        match self {
            ClientError::Connect { state, .. }
            | ClientError::Transport { state, .. }
            | ClientError::UnexpectedMessage { state, .. } => Some(*state),
            ClientError::Source(_) => Some(State::SendBatch),
            ClientError::Config(_) => None,
        }
    }

    /// Connect retries abandoned because shutdown was requested
    pub(crate) fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ClientError::Connect {
                source: ConnectError::Cancelled { .. },
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mentions_state() {
        let err = ClientError::UnexpectedMessage {
            state: State::AwaitAck,
            expected: MessageType::Ack,
            received: MessageType::Winners,
        };
        assert_eq!(err.to_string(), "receive_ack: expected ACK, received RWIN");
        assert_eq!(err.state(), Some(State::AwaitAck));
    }

    #[test]
    fn test_cancelled_connect_is_not_a_failure() {
        let err = ClientError::Connect {
            state: State::SendBatch,
            source: ConnectError::Cancelled {
                address: "server:12345".to_string(),
            },
        };
        assert!(err.is_cancellation());
    }
}
