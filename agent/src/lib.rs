//! Wager Agent Library
//!
//! Reads bets from a record source, streams them to the aggregation server in
//! acknowledged batches, signals end of transmission and asks for the winners.

pub mod batch;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod retry;
pub mod shutdown;
pub mod source;

pub use client::{Client, RunReport, Termination, WinnersResult};
pub use config::{ClientConfig, ConnectionPolicy, Settings};
pub use connection::{Connector, TcpConnector};
pub use error::{ClientError, State};
pub use shutdown::{cancel_on_signal, Shutdown, StopReason};
pub use source::{CsvBetSource, MemorySource, RecordSource, SourceError};
