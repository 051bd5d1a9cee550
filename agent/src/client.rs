//! Transmission state machine
//!
//! Drives one peer through a full run:
//!
//! ```text
//! SEND_BATCH -> AWAIT_ACK -+-> (sleep loop_period) -> SEND_BATCH
//!      |                   |
//!      | empty batch       +-> FAILED (non-ACK / read error)
//!      v
//! SEND_EOT -> AWAIT_EOT_ACK -> QUERY_RESULT -> AWAIT_RESULT -> DONE
//! ```
//!
//! Every send and receive is preceded by a shutdown check; a requested
//! shutdown moves straight to SHUTDOWN without writing another byte. I/O that
//! has already started is not interrupted.

use crate::batch::{next_batch, BatchError};
use crate::config::{ClientConfig, ConnectionPolicy};
use crate::connection::{connect_with_retry, Connection, Connector};
use crate::error::{ClientError, State};
use crate::retry::{retry_with_backoff, RetryError};
use crate::shutdown::{Shutdown, StopReason};
use crate::source::{RecordSource, SourceError};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use wager_shared::protocol::wire::{read_message, write_message, Message, MessageType, WireError};

/// ACKs tolerated after QWIN before the RWIN arrives. The server acknowledges
/// the query first and answers once every peer has finished.
const MAX_INTERIM_ACKS: usize = 1;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Every bet was sent and acknowledged, EOT included
    Completed,
    Cancelled,
    LapseExpired,
}

impl From<StopReason> for Termination {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Cancelled => Termination::Cancelled,
            StopReason::LapseExpired => Termination::LapseExpired,
        }
    }
}

/// Outcome of the winners query. Never affects whether the run succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum WinnersResult {
    Received(String),
    Failed(String),
    Skipped,
}

/// Summary of a run that did not fail during transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub peer_id: u8,
    pub batches_sent: usize,
    pub bets_sent: usize,
    pub termination: Termination,
    pub winners: WinnersResult,
}

impl RunReport {
    fn new(peer_id: u8) -> Self {
        Self {
            peer_id,
            batches_sent: 0,
            bets_sent: 0,
            termination: Termination::Completed,
            winners: WinnersResult::Skipped,
        }
    }

    /// Winners payload, if the query succeeded
    pub fn winners(&self) -> Option<&str> {
        match &self.winners {
            WinnersResult::Received(w) => Some(w),
            _ => None,
        }
    }
}

/// Bet transmission client for a single peer
pub struct Client<C> {
    config: ClientConfig,
    connector: C,
    token: CancellationToken,
}

impl<C: Connector> Client<C> {
    pub fn new(
        config: ClientConfig,
        connector: C,
        token: CancellationToken,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            token,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send every bet in `source`, then query the winners.
    ///
    /// `Err` means the transmission phase failed. Cancellation, an expired
    /// run budget and a failed winners query all return `Ok`; see
    /// [`RunReport::termination`] and [`RunReport::winners`].
    pub async fn run<S>(&self, source: &mut S) -> Result<RunReport, ClientError>
    where
        S: RecordSource + ?Sized,
    {
        let mut tx = Transmission {
            config: &self.config,
            connector: &self.connector,
            shutdown: Shutdown::new(self.token.clone(), self.config.loop_lapse),
            source,
            conn: None,
            state: State::Init,
            in_flight: 0,
            deferred: None,
            report: RunReport::new(self.config.peer_id),
        };
        let outcome = tx.drive().await;
        tx.close().await;
        outcome
    }
}

enum QueryOutcome {
    Winners(String),
    Stopped(StopReason),
}

struct Transmission<'a, C: Connector, S: ?Sized> {
    config: &'a ClientConfig,
    connector: &'a C,
    shutdown: Shutdown,
    source: &'a mut S,
    conn: Option<C::Conn>,
    state: State,
    /// Bets in the BET frame awaiting its ACK
    in_flight: usize,
    /// Source failure to report once the partial batch before it is flushed
    deferred: Option<SourceError>,
    report: RunReport,
}

impl<'a, C, S> Transmission<'a, C, S>
where
    C: Connector,
    S: RecordSource + ?Sized,
{
    async fn drive(&mut self) -> Result<RunReport, ClientError> {
        loop {
            let next = match self.step().await {
                Ok(next) => next,
                Err(e) if e.is_cancellation() => {
                    self.record_stop(StopReason::Cancelled);
                    State::Shutdown
                }
                Err(e) => {
                    error!(
                        "action: {} | result: fail | client_id: {} | error: {}",
                        self.state.action(),
                        self.config.peer_id,
                        e
                    );
                    self.transition(State::Failed);
                    self.close().await;
                    return Err(e);
                }
            };
            self.transition(next);
            if next.is_terminal() {
                self.close().await;
                return Ok(self.report.clone());
            }
        }
    }

    async fn step(&mut self) -> Result<State, ClientError> {
        match self.state {
            State::Init => Ok(State::SendBatch),
            State::SendBatch => self.send_batch().await,
            State::AwaitAck => self.await_ack().await,
            State::SendEot => {
                if self.stop_requested() {
                    return Ok(State::Shutdown);
                }
                let eot = Message::empty(self.config.peer_id, MessageType::Eot);
                if !self.send(State::SendEot, &eot).await? {
                    return Ok(State::Shutdown);
                }
                Ok(State::AwaitEotAck)
            }
            State::AwaitEotAck => {
                if self.stop_requested() {
                    return Ok(State::Shutdown);
                }
                self.receive(State::AwaitEotAck, MessageType::Ack).await?;
                info!(
                    "action: send_eot | result: success | client_id: {} | bets: {}",
                    self.config.peer_id, self.report.bets_sent
                );
                // Batch phase is over under either policy
                self.close().await;
                Ok(State::QueryResult)
            }
            State::QueryResult | State::AwaitResult => self.query_winners().await,
            State::Done | State::Failed | State::Shutdown => Ok(self.state),
        }
    }

    async fn send_batch(&mut self) -> Result<State, ClientError> {
        if let Some(err) = self.deferred.take() {
            return Err(ClientError::Source(err));
        }

        let batch = match next_batch(&mut *self.source, self.config.batch_size).await {
            Ok(batch) => batch,
            Err(BatchError { partial, source }) => {
                warn!(
                    "action: read_bets | result: fail | client_id: {} | pending: {} | error: {}",
                    self.config.peer_id,
                    partial.count(),
                    source
                );
                self.deferred = Some(source);
                partial
            }
        };

        if batch.is_empty() {
            return match self.deferred.take() {
                Some(err) => Err(ClientError::Source(err)),
                None => Ok(State::SendEot),
            };
        }
        if self.stop_requested() {
            return Ok(State::Shutdown);
        }

        let count = batch.count();
        let message = Message::new(self.config.peer_id, MessageType::Bet, batch.into_payload());
        if !self.send(State::SendBatch, &message).await? {
            return Ok(State::Shutdown);
        }
        self.in_flight = count;
        debug!(
            "client {}: sent batch of {} bets ({} bytes)",
            self.config.peer_id,
            count,
            message.payload.len()
        );
        Ok(State::AwaitAck)
    }

    async fn await_ack(&mut self) -> Result<State, ClientError> {
        if self.stop_requested() {
            return Ok(State::Shutdown);
        }
        self.receive(State::AwaitAck, MessageType::Ack).await?;

        let count = std::mem::take(&mut self.in_flight);
        self.report.batches_sent += 1;
        self.report.bets_sent += count;
        info!(
            "action: send_batch | result: success | client_id: {} | bets: {}",
            self.config.peer_id, count
        );
        self.end_exchange().await;

        if self.deferred.is_none() {
            if let Some(reason) = self.shutdown.sleep(self.config.loop_period).await {
                self.record_stop(reason);
                return Ok(State::Shutdown);
            }
        }
        Ok(State::SendBatch)
    }

    async fn query_winners(&mut self) -> Result<State, ClientError> {
        let config = self.config;
        let connector = self.connector;
        let shutdown = &self.shutdown;
        info!(
            "action: query_winners | result: in_progress | client_id: {}",
            config.peer_id
        );

        let outcome = retry_with_backoff(
            "query_winners",
            config.query_attempts,
            config.query_backoff,
            shutdown.token(),
            move |attempt| query_once(config, connector, shutdown, attempt),
        )
        .await;

        match outcome {
            Ok(QueryOutcome::Winners(winners)) => {
                info!(
                    "action: query_winners | result: success | client_id: {} | winners: {}",
                    config.peer_id, winners
                );
                self.report.winners = WinnersResult::Received(winners);
                Ok(State::Done)
            }
            Ok(QueryOutcome::Stopped(reason)) => {
                self.record_stop(reason);
                Ok(State::Shutdown)
            }
            Err(RetryError::Exhausted(e)) if e.is_cancellation() => {
                self.record_stop(StopReason::Cancelled);
                Ok(State::Shutdown)
            }
            Err(RetryError::Exhausted(e)) => {
                // Bets are already accepted; a lost result does not fail the run
                error!(
                    "action: query_winners | result: fail | client_id: {} | error: {}",
                    config.peer_id, e
                );
                self.report.winners = WinnersResult::Failed(e.to_string());
                Ok(State::Failed)
            }
            Err(RetryError::Cancelled) => {
                self.record_stop(StopReason::Cancelled);
                Ok(State::Shutdown)
            }
        }
    }

    /// Write `message`, connecting first if needed. Returns `false` without
    /// writing when shutdown was requested while connecting.
    async fn send(&mut self, state: State, message: &Message) -> Result<bool, ClientError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => connect_with_retry(
                self.connector,
                self.config.connect_attempts,
                self.shutdown.token(),
            )
            .await
            .map_err(|source| ClientError::Connect { state, source })?,
        };
        // Shutdown may have been requested while connecting
        if self.stop_requested() {
            self.conn = Some(conn);
            return Ok(false);
        }
        let conn = self.conn.insert(conn);
        write_message(conn, message)
            .await
            .map_err(|source| ClientError::Transport { state, source })?;
        Ok(true)
    }

    async fn receive(&mut self, state: State, kind: MessageType) -> Result<Message, ClientError> {
        let conn = self.conn.as_mut().ok_or_else(|| ClientError::Transport {
            state,
            source: WireError::Io(std::io::ErrorKind::NotConnected.into()),
        })?;
        let message = read_message(conn)
            .await
            .map_err(|source| ClientError::Transport { state, source })?;
        if message.kind != kind {
            return Err(ClientError::UnexpectedMessage {
                state,
                expected: kind,
                received: message.kind,
            });
        }
        Ok(message)
    }

    /// Release the connection after a request/response pair when every
    /// exchange gets its own connection.
    async fn end_exchange(&mut self) {
        if self.config.connection_policy == ConnectionPolicy::PerExchange {
            self.close().await;
        }
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            close_quietly(&mut conn, self.config.peer_id).await;
        }
    }

    fn stop_requested(&mut self) -> bool {
        match self.shutdown.check() {
            Some(reason) => {
                self.record_stop(reason);
                true
            }
            None => false,
        }
    }

    fn record_stop(&mut self, reason: StopReason) {
        info!(
            "action: shutdown | result: success | client_id: {} | reason: {:?} | state: {}",
            self.config.peer_id, reason, self.state
        );
        self.report.termination = reason.into();
    }

    fn transition(&mut self, next: State) {
        if next != self.state {
            debug!(
                "client {}: {} -> {}",
                self.config.peer_id, self.state, next
            );
        }
        self.state = next;
    }
}

/// One winners query on a fresh connection.
async fn query_once<C: Connector>(
    config: &ClientConfig,
    connector: &C,
    shutdown: &Shutdown,
    attempt: u32,
) -> Result<QueryOutcome, ClientError> {
    if let Some(reason) = shutdown.check() {
        return Ok(QueryOutcome::Stopped(reason));
    }
    let mut conn = connect_with_retry(connector, config.connect_attempts, shutdown.token())
        .await
        .map_err(|source| ClientError::Connect {
            state: State::QueryResult,
            source,
        })?;
    let outcome = exchange_query(&mut conn, config.peer_id, shutdown, attempt).await;
    close_quietly(&mut conn, config.peer_id).await;
    outcome
}

async fn exchange_query<T: Connection>(
    conn: &mut T,
    peer_id: u8,
    shutdown: &Shutdown,
    attempt: u32,
) -> Result<QueryOutcome, ClientError> {
    if let Some(reason) = shutdown.check() {
        return Ok(QueryOutcome::Stopped(reason));
    }
    let query = Message::empty(peer_id, MessageType::QueryWinners);
    write_message(conn, &query)
        .await
        .map_err(|source| ClientError::Transport {
            state: State::QueryResult,
            source,
        })?;
    debug!(
        "client {}: {} -> {} (attempt {})",
        peer_id,
        State::QueryResult,
        State::AwaitResult,
        attempt
    );

    let mut interim_acks = 0;
    loop {
        if let Some(reason) = shutdown.check() {
            return Ok(QueryOutcome::Stopped(reason));
        }
        let message = read_message(conn)
            .await
            .map_err(|source| ClientError::Transport {
                state: State::AwaitResult,
                source,
            })?;
        match message.kind {
            MessageType::Winners => return Ok(QueryOutcome::Winners(message.payload_text())),
            MessageType::Ack if interim_acks < MAX_INTERIM_ACKS => {
                interim_acks += 1;
                debug!(
                    "client {}: winners query acknowledged, waiting for result",
                    peer_id
                );
            }
            other => {
                return Err(ClientError::UnexpectedMessage {
                    state: State::AwaitResult,
                    expected: MessageType::Winners,
                    received: other,
                })
            }
        }
    }
}

async fn close_quietly<T: Connection>(conn: &mut T, peer_id: u8) {
    if let Err(e) = conn.shutdown().await {
        debug!("client {}: closing connection: {}", peer_id, e);
    }
}
