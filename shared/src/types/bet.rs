//! Bet record and its batch text encoding
//!
//! A batch payload is a run of records, each one the five fields joined by
//! `FIELD_SEPARATOR` and terminated by `END_OF_BET`:
//!
//! ```text
//! Santiago,Lorca,30904465,1999-03-17,7574\nAna,Paz,2211,2001-01-01,12\n
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separates fields inside one record
pub const FIELD_SEPARATOR: char = ',';

/// Terminates every record in a batch payload
pub const END_OF_BET: char = '\n';

/// Number of fields in a record
pub const BET_FIELDS: usize = 5;

/// Names of the record fields, in wire order
pub const FIELD_NAMES: [&str; BET_FIELDS] = [
    "first_name",
    "last_name",
    "national_id",
    "birth_date",
    "bet_number",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BetError {
    #[error("field {field} contains a reserved separator: {value:?}")]
    InvalidField { field: &'static str, value: String },

    #[error("record {index} has {found} fields, expected 5")]
    FieldCount { index: usize, found: usize },

    #[error("payload is not valid UTF-8")]
    Encoding,
}

/// A single bet as read from the record source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    first_name: String,
    last_name: String,
    national_id: String,
    birth_date: String,
    bet_number: String,
}

impl Bet {
    /// Build a bet, rejecting fields that would break the batch encoding.
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        national_id: impl Into<String>,
        birth_date: impl Into<String>,
        bet_number: impl Into<String>,
    ) -> Result<Self, BetError> {
        let bet = Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            national_id: national_id.into(),
            birth_date: birth_date.into(),
            bet_number: bet_number.into(),
        };
        for (field, value) in FIELD_NAMES.into_iter().zip(bet.fields()) {
            if value.contains(FIELD_SEPARATOR) || value.contains(END_OF_BET) {
                return Err(BetError::InvalidField {
                    field,
                    value: value.to_string(),
                });
            }
        }
        Ok(bet)
    }

    /// Build a bet from exactly `BET_FIELDS` values in wire order.
    pub fn from_fields<S: AsRef<str>>(index: usize, fields: &[S]) -> Result<Self, BetError> {
        match fields {
            [first, last, id, birth, number] => Self::new(
                first.as_ref(),
                last.as_ref(),
                id.as_ref(),
                birth.as_ref(),
                number.as_ref(),
            ),
            _ => Err(BetError::FieldCount {
                index,
                found: fields.len(),
            }),
        }
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn national_id(&self) -> &str {
        &self.national_id
    }

    pub fn birth_date(&self) -> &str {
        &self.birth_date
    }

    pub fn bet_number(&self) -> &str {
        &self.bet_number
    }

    /// Fields in wire order
    pub fn fields(&self) -> [&str; BET_FIELDS] {
        [
            self.first_name.as_str(),
            self.last_name.as_str(),
            self.national_id.as_str(),
            self.birth_date.as_str(),
            self.bet_number.as_str(),
        ]
    }

    /// Append this record, terminator included, to `out`.
    pub fn write_to(&self, out: &mut String) {
        for (i, field) in self.fields().iter().enumerate() {
            if i > 0 {
                out.push(FIELD_SEPARATOR);
            }
            out.push_str(field);
        }
        out.push(END_OF_BET);
    }

    /// Encoded length of this record including separators and terminator
    pub fn encoded_len(&self) -> usize {
        self.fields().iter().map(|f| f.len()).sum::<usize>() + BET_FIELDS
    }
}

/// Split a batch payload back into bets.
///
/// An empty payload is an empty batch. A trailing terminator is expected but
/// not required on the last record.
pub fn parse_batch(payload: &[u8]) -> Result<Vec<Bet>, BetError> {
    let text = std::str::from_utf8(payload).map_err(|_| BetError::Encoding)?;
    let text = text.strip_suffix(END_OF_BET).unwrap_or(text);
    if text.is_empty() {
        return Ok(Vec::new());
    }

    text.split(END_OF_BET)
        .enumerate()
        .map(|(index, record)| {
            let fields: Vec<&str> = record.split(FIELD_SEPARATOR).collect();
            Bet::from_fields(index, fields.as_slice())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Bet {
        Bet::new("Santiago", "Lorca", "30904465", "1999-03-17", "7574").unwrap()
    }

    #[test]
    fn test_write_single_record() {
        let mut out = String::new();
        sample().write_to(&mut out);
        assert_eq!(out, "Santiago,Lorca,30904465,1999-03-17,7574\n");
        assert_eq!(out.len(), sample().encoded_len());
    }

    #[test]
    fn test_parse_batch_preserves_order() {
        let second = Bet::new("Ana", "Paz", "2211", "2001-01-01", "12").unwrap();
        let mut payload = String::new();
        sample().write_to(&mut payload);
        second.write_to(&mut payload);

        let bets = parse_batch(payload.as_bytes()).unwrap();
        assert_eq!(bets, vec![sample(), second]);
    }

    #[test]
    fn test_parse_empty_payload() {
        assert!(parse_batch(b"").unwrap().is_empty());
    }

    #[test]
    fn test_parse_wrong_field_count() {
        let err = parse_batch(b"a,b,c,d,e\na,b,c\n").unwrap_err();
        assert_eq!(err, BetError::FieldCount { index: 1, found: 3 });
    }

    #[test]
    fn test_reserved_characters_rejected() {
        let err = Bet::new("Juan, Jr", "Perez", "1", "2000-01-01", "1").unwrap_err();
        assert!(matches!(err, BetError::InvalidField { field: "first_name", .. }));

        let err = Bet::new("Juan", "Perez", "1\n", "2000-01-01", "1").unwrap_err();
        assert!(matches!(err, BetError::InvalidField { field: "national_id", .. }));
    }

    #[test]
    fn test_from_fields() {
        let bet = Bet::from_fields(0, &["a", "b", "c", "d", "e"]).unwrap();
        assert_eq!(bet.bet_number(), "e");
        assert_eq!(
            Bet::from_fields(4, &["a", "b"]).unwrap_err(),
            BetError::FieldCount { index: 4, found: 2 }
        );
    }
}
