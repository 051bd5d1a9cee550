//! Record sources
//!
//! A source yields bets one at a time, in file order. `Ok(None)` means the
//! data is exhausted; an `Err` is a read failure and is never folded into
//! end-of-data.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;
use wager_shared::types::bet::{BetError, FIELD_SEPARATOR};
use wager_shared::Bet;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed at line {line}: {source}")]
    Read {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected 5 fields, found {fields}")]
    Malformed { line: usize, fields: usize },

    #[error("line {line}: {source}")]
    InvalidBet {
        line: usize,
        #[source]
        source: BetError,
    },
}

/// Sequential supplier of bets
#[async_trait]
pub trait RecordSource: Send {
    /// Next bet, or `None` once the source is exhausted
    async fn next_bet(&mut self) -> Result<Option<Bet>, SourceError>;
}

/// Bets read lazily from a comma separated file, one record per line.
///
/// Blank lines are skipped and fields are trimmed.
pub struct CsvBetSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line: usize,
}

impl CsvBetSource {
    /// Open the file for sequential reading
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;
        debug!("Opened bets file {}", path.display());
        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of lines consumed so far
    pub fn lines_read(&self) -> usize {
        self.line
    }

    fn parse_line(&self, text: &str) -> Result<Bet, SourceError> {
        let fields: Vec<&str> = text.split(FIELD_SEPARATOR).map(str::trim).collect();
        if fields.len() != wager_shared::types::bet::BET_FIELDS {
            return Err(SourceError::Malformed {
                line: self.line,
                fields: fields.len(),
            });
        }
        Bet::from_fields(self.line, fields.as_slice()).map_err(|source| SourceError::InvalidBet {
            line: self.line,
            source,
        })
    }
}

#[async_trait]
impl RecordSource for CsvBetSource {
    async fn next_bet(&mut self) -> Result<Option<Bet>, SourceError> {
        loop {
            let next = self.lines.next_line().await;
            self.line += 1;
            let text = match next {
                Ok(Some(text)) => text,
                Ok(None) => {
                    self.line -= 1;
                    return Ok(None);
                }
                Err(source) => {
                    return Err(SourceError::Read {
                        line: self.line,
                        source,
                    })
                }
            };
            if text.trim().is_empty() {
                continue;
            }
            return self.parse_line(&text).map(Some);
        }
    }
}

/// Queue of bets and read failures held in memory.
///
/// Each entry is yielded in order; an `Err` entry is returned once as a read
/// failure.
#[derive(Debug, Default)]
pub struct MemorySource {
    items: VecDeque<Result<Bet, SourceError>>,
}

impl MemorySource {
    pub fn new(bets: impl IntoIterator<Item = Bet>) -> Self {
        Self {
            items: bets.into_iter().map(Ok).collect(),
        }
    }

    /// Queue a read failure after the bets queued so far
    pub fn push_error(&mut self, err: SourceError) {
        self.items.push_back(Err(err));
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn next_bet(&mut self) -> Result<Option<Bet>, SourceError> {
        self.items.pop_front().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn bet(n: usize) -> Bet {
        Bet::new("Ana", "Paz", format!("{}", 1000 + n), "2001-01-01", format!("{}", n)).unwrap()
    }

    #[tokio::test]
    async fn test_csv_source_reads_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "Santiago,Lorca,30904465,1999-03-17,7574").unwrap();
        writeln!(file).unwrap();
        writeln!(file, " Ana , Paz ,2211,2001-01-01,12").unwrap();

        let mut source = CsvBetSource::open(file.path()).await.unwrap();
        assert_eq!(source.path(), file.path());
        let first = source.next_bet().await.unwrap().unwrap();
        assert_eq!(first.last_name(), "Lorca");
        let second = source.next_bet().await.unwrap().unwrap();
        assert_eq!(second.first_name(), "Ana");
        assert_eq!(second.last_name(), "Paz");
        assert!(source.next_bet().await.unwrap().is_none());
        assert!(source.next_bet().await.unwrap().is_none());
        assert_eq!(source.lines_read(), 3);
    }

    #[tokio::test]
    async fn test_csv_source_malformed_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a,b,c,d,e").unwrap();
        writeln!(file, "a,b,c").unwrap();

        let mut source = CsvBetSource::open(file.path()).await.unwrap();
        assert!(source.next_bet().await.unwrap().is_some());
        let err = source.next_bet().await.unwrap_err();
        assert!(matches!(err, SourceError::Malformed { line: 2, fields: 3 }));
    }

    #[tokio::test]
    async fn test_csv_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvBetSource::open(dir.path().join("bets.csv"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
    }

    #[tokio::test]
    async fn test_memory_source_error_is_distinct_from_end() {
        let mut source = MemorySource::new([bet(1)]);
        source.push_error(SourceError::Malformed { line: 2, fields: 1 });

        assert!(source.next_bet().await.unwrap().is_some());
        assert!(source.next_bet().await.is_err());
        assert!(source.next_bet().await.unwrap().is_none());
    }
}
