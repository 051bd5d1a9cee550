//! Batch assembly
//!
//! Pulls bets off a [`RecordSource`] and serializes up to `max_size` of them
//! into one BET payload.

use crate::source::{RecordSource, SourceError};
use bytes::Bytes;
use thiserror::Error;
use wager_shared::Bet;

/// A serialized group of bets ready to go out in one BET message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    count: usize,
    payload: String,
}

impl Batch {
    fn push(&mut self, bet: &Bet) {
        bet.write_to(&mut self.payload);
        self.count += 1;
    }

    /// Number of bets in the batch
    pub fn count(&self) -> usize {
        self.count
    }

    /// True when the source was already exhausted
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        Bytes::from(self.payload)
    }
}

/// A read failure part way through a batch. The bets read before the
/// failure are kept in `partial`.
#[derive(Debug, Error)]
#[error("source failed after {} bets of the current batch: {source}", .partial.count())]
pub struct BatchError {
    pub partial: Batch,
    #[source]
    pub source: SourceError,
}

/// Read the next batch of at most `max_size` bets.
///
/// Stops early only when the source runs out. An empty batch means the
/// source was exhausted before this call.
pub async fn next_batch<S>(source: &mut S, max_size: usize) -> Result<Batch, BatchError>
where
    S: RecordSource + ?Sized,
{
    let mut batch = Batch::default();
    while batch.count < max_size {
        match source.next_bet().await {
            Ok(Some(bet)) => batch.push(&bet),
            Ok(None) => break,
            Err(source) => {
                return Err(BatchError {
                    partial: batch,
                    source,
                })
            }
        }
    }
    Ok(batch)
}
