//! Log Record Text Format
//!
//! Every mutation is one line of six space-separated fields:
//!
//! ```text
//! COMMAND KEY VALUE KIND TTL WRITTEN_AT
//! SET user:1 Ariz string 120000 1760000000000
//! SET cfg "{\"x\": 1}" json -1 1760000000042
//! DEL user:1 "" - 0 1760000000100
//! ```
//!
//! - `TTL` is in milliseconds, `-1` meaning the value never expires.
//! - `WRITTEN_AT` is the Unix time in milliseconds of the write.
//! - `KEY` and `VALUE` are written bare when they consist only of printable
//!   ASCII without quotes or backslashes. Anything else, including the empty
//!   string, is double-quoted with `\" \\ \n \r \t \xHH` escapes, so a line
//!   is always plain ASCII.

use crate::storage::{Expiry, ValueKind};
use bytes::Bytes;
use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 6 fields, found {0}")]
    FieldCount(usize),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("unknown value kind '{0}'")]
    UnknownKind(String),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unterminated quoted field")]
    UnterminatedQuote,

    #[error("invalid escape sequence")]
    InvalidEscape,
}

/// One mutating command as recorded in the append-only log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Set {
        key: Bytes,
        value: Bytes,
        kind: ValueKind,
        ttl: Option<Duration>,
        written_at: u64,
    },
    Del {
        key: Bytes,
        written_at: u64,
    },
}

impl LogRecord {
    /// Expiry of a SET record, measured from its original write time.
    pub fn expiry(&self) -> Expiry {
        match self {
            LogRecord::Set {
                ttl, written_at, ..
            } => Expiry::from_ttl(*written_at, *ttl),
            LogRecord::Del { .. } => Expiry::Never,
        }
    }

    /// Encodes the record as one line, without the trailing newline.
    pub fn encode(&self) -> String {
        let mut line = String::new();
        match self {
            LogRecord::Set {
                key,
                value,
                kind,
                ttl,
                written_at,
            } => {
                let ttl = ttl.map_or(-1, |t| i64::try_from(t.as_millis()).unwrap_or(i64::MAX));
                line.push_str("SET ");
                push_token(&mut line, key);
                line.push(' ');
                push_token(&mut line, value);
                let _ = write!(line, " {} {} {}", kind, ttl, written_at);
            }
            LogRecord::Del { key, written_at } => {
                line.push_str("DEL ");
                push_token(&mut line, key);
                let _ = write!(line, " \"\" - 0 {}", written_at);
            }
        }
        line
    }

    /// Decodes one line produced by [`LogRecord::encode`].
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let fields = tokenize(line)?;
        let [command, key, value, kind, ttl, written_at]: [Bytes; 6] = fields
            .try_into()
            .map_err(|fields: Vec<Bytes>| DecodeError::FieldCount(fields.len()))?;

        let written_at = parse_number::<u64>(&written_at)?;

        match &command[..] {
            b"SET" => {
                let kind = std::str::from_utf8(&kind)
                    .ok()
                    .and_then(|k| k.parse::<ValueKind>().ok())
                    .ok_or_else(|| {
                        DecodeError::UnknownKind(String::from_utf8_lossy(&kind).into_owned())
                    })?;
                let ttl = match parse_number::<i64>(&ttl)? {
                    -1 => None,
                    ms if ms >= 0 => Some(Duration::from_millis(ms as u64)),
                    _ => {
                        return Err(DecodeError::InvalidNumber(
                            String::from_utf8_lossy(&ttl).into_owned(),
                        ))
                    }
                };
                Ok(LogRecord::Set {
                    key,
                    value,
                    kind,
                    ttl,
                    written_at,
                })
            }
            b"DEL" => Ok(LogRecord::Del { key, written_at }),
            other => Err(DecodeError::UnknownCommand(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

fn parse_number<T: std::str::FromStr>(field: &[u8]) -> Result<T, DecodeError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .ok_or_else(|| DecodeError::InvalidNumber(String::from_utf8_lossy(field).into_owned()))
}

#[inline]
fn is_bare(b: u8) -> bool {
    b.is_ascii_graphic() && b != b'"' && b != b'\\'
}

fn push_token(line: &mut String, token: &[u8]) {
    if !token.is_empty() && token.iter().all(|&b| is_bare(b)) {
        // All bytes are printable ASCII here
        line.extend(token.iter().map(|&b| b as char));
        return;
    }

    line.push('"');
    for &b in token {
        match b {
            b'"' => line.push_str("\\\""),
            b'\\' => line.push_str("\\\\"),
            b'\n' => line.push_str("\\n"),
            b'\r' => line.push_str("\\r"),
            b'\t' => line.push_str("\\t"),
            b' ' => line.push(' '),
            b if b.is_ascii_graphic() => line.push(b as char),
            b => {
                let _ = write!(line, "\\x{:02x}", b);
            }
        }
    }
    line.push('"');
}

fn tokenize(line: &str) -> Result<Vec<Bytes>, DecodeError> {
    let bytes = line.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if bytes[i] != b'"' {
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            tokens.push(Bytes::copy_from_slice(&bytes[start..i]));
            continue;
        }

        i += 1;
        let mut token = Vec::new();
        loop {
            match bytes.get(i) {
                None => return Err(DecodeError::UnterminatedQuote),
                Some(b'"') => {
                    i += 1;
                    break;
                }
                Some(b'\\') => {
                    let (byte, used) = unescape(&bytes[i + 1..])?;
                    token.push(byte);
                    i += 1 + used;
                }
                Some(&b) => {
                    token.push(b);
                    i += 1;
                }
            }
        }
        tokens.push(Bytes::from(token));
    }

    Ok(tokens)
}

/// Decodes the escape following a backslash, returning the byte and how
/// many input bytes it used.
fn unescape(rest: &[u8]) -> Result<(u8, usize), DecodeError> {
    match rest.first() {
        Some(b'"') => Ok((b'"', 1)),
        Some(b'\\') => Ok((b'\\', 1)),
        Some(b'n') => Ok((b'\n', 1)),
        Some(b'r') => Ok((b'\r', 1)),
        Some(b't') => Ok((b'\t', 1)),
        Some(b'x') => {
            let hex = rest.get(1..3).ok_or(DecodeError::InvalidEscape)?;
            let hex = std::str::from_utf8(hex).map_err(|_| DecodeError::InvalidEscape)?;
            let byte = u8::from_str_radix(hex, 16).map_err(|_| DecodeError::InvalidEscape)?;
            Ok((byte, 3))
        }
        _ => Err(DecodeError::InvalidEscape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(key: &'static str, value: &'static [u8], ttl: Option<u64>) -> LogRecord {
        LogRecord::Set {
            key: Bytes::from_static(key.as_bytes()),
            value: Bytes::from_static(value),
            kind: ValueKind::String,
            ttl: ttl.map(Duration::from_millis),
            written_at: 1_760_000_000_000,
        }
    }

    #[test]
    fn test_encode_plain_set() {
        let record = set("user:1", b"Ariz", Some(120_000));
        assert_eq!(
            record.encode(),
            "SET user:1 Ariz string 120000 1760000000000"
        );
    }

    #[test]
    fn test_encode_never_expiring_set() {
        let record = set("k", b"v", None);
        assert_eq!(record.encode(), "SET k v string -1 1760000000000");
    }

    #[test]
    fn test_encode_del() {
        let record = LogRecord::Del {
            key: Bytes::from("gone"),
            written_at: 42,
        };
        assert_eq!(record.encode(), "DEL gone \"\" - 0 42");
        assert_eq!(LogRecord::decode(&record.encode()), Ok(record));
    }

    #[test]
    fn test_awkward_bytes_survive() {
        let record = set("two words", b"line\r\n\"quoted\" \\ \x00\xff caf\xc3\xa9", Some(5));
        let line = record.encode();
        assert!(line.is_ascii());
        assert!(!line.contains('\n'));
        assert_eq!(LogRecord::decode(&line), Ok(record));
    }

    #[test]
    fn test_empty_value_survives() {
        let record = set("k", b"", Some(1));
        assert_eq!(record.encode(), "SET k \"\" string 1 1760000000000");
        assert_eq!(LogRecord::decode(&record.encode()), Ok(record));
    }

    #[test]
    fn test_json_record() {
        let record = LogRecord::Set {
            key: Bytes::from("cfg"),
            value: Bytes::from("{\"x\": 1}"),
            kind: ValueKind::Json,
            ttl: None,
            written_at: 7,
        };
        assert_eq!(record.encode(), "SET cfg \"{\\\"x\\\": 1}\" json -1 7");
        assert_eq!(LogRecord::decode(&record.encode()), Ok(record));
    }

    #[test]
    fn test_expiry_is_relative_to_write_time() {
        let record = set("k", b"v", Some(2_000));
        assert_eq!(record.expiry(), Expiry::At(1_760_000_002_000));
        assert_eq!(set("k", b"v", None).expiry(), Expiry::Never);
    }

    #[test]
    fn test_decode_rejects_malformed_lines() {
        assert_eq!(
            LogRecord::decode("SET k v string 10"),
            Err(DecodeError::FieldCount(5))
        );
        assert_eq!(
            LogRecord::decode("PUT k v string 10 1"),
            Err(DecodeError::UnknownCommand("PUT".to_string()))
        );
        assert_eq!(
            LogRecord::decode("SET k v list 10 1"),
            Err(DecodeError::UnknownKind("list".to_string()))
        );
        assert_eq!(
            LogRecord::decode("SET k v string -5 1"),
            Err(DecodeError::InvalidNumber("-5".to_string()))
        );
        assert_eq!(
            LogRecord::decode("SET k \"v string 10 1"),
            Err(DecodeError::UnterminatedQuote)
        );
        assert_eq!(
            LogRecord::decode("SET k \"\\q\" string 10 1"),
            Err(DecodeError::InvalidEscape)
        );
    }
}
