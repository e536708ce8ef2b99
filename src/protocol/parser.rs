//! Incremental Command Frame Parser
//!
//! Clients send every command as a RESP array of bulk strings:
//!
//! ```text
//! *<n>\r\n
//! $<len>\r\n<bytes>\r\n      (repeated n times)
//! ```
//!
//! The parser works on a byte buffer and returns either:
//! - `Ok(Some((args, consumed)))` - a complete command, `consumed` bytes were used
//! - `Ok(None)` - the command is incomplete, more data is needed
//! - `Err(ParseError)` - the bytes are not a valid command frame
//!
//! A command is only ever surfaced once all of its elements are present, so
//! callers never observe a partial command. After an error the stream cannot
//! be resynchronised and the connection should be closed.

use crate::protocol::types::{prefix, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding a command frame.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// The frame does not start with the expected type marker
    #[error("expected {:?}, got {:?}", char::from(*.expected), char::from(*.found))]
    UnexpectedPrefix { expected: u8, found: u8 },

    /// A length or count line is not a decimal integer
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Bulk payload is not followed by CRLF
    #[error("bulk string missing trailing CRLF")]
    MissingTerminator,

    /// The frame exceeds the allowed size
    #[error("frame too large: {size} (max: {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of elements in one command
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Decodes one command from the front of `buf`.
///
/// A bulk element with length `-1` decodes to an empty argument, and a
/// null or empty array decodes to an empty argument list.
///
/// # Example
///
/// ```
/// use ledgerkv::protocol::parse_command;
///
/// let (args, consumed) = parse_command(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
/// assert_eq!(args, vec!["GET", "name"]);
/// assert_eq!(consumed, 23);
/// ```
pub fn parse_command(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let Some((count, mut consumed)) = parse_header(buf, prefix::ARRAY)? else {
        return Ok(None);
    };

    if count == -1 {
        return Ok(Some((Vec::new(), consumed)));
    }
    if count < 0 {
        return Err(ParseError::InvalidArrayLength(count));
    }

    let count = count as usize;
    if count > MAX_ARRAY_LEN {
        return Err(ParseError::FrameTooLarge {
            size: count,
            max: MAX_ARRAY_LEN,
        });
    }

    // Bound the up-front allocation by what the buffer could possibly hold
    let mut args = Vec::with_capacity(count.min(buf.len() / 4 + 1));

    for _ in 0..count {
        match parse_bulk_string(&buf[consumed..])? {
            Some((arg, used)) => {
                args.push(arg);
                consumed += used;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((args, consumed)))
}

/// Parses a bulk string: `$<length>\r\n<data>\r\n`
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
    let Some((length, header_len)) = parse_header(buf, prefix::BULK_STRING)? else {
        return Ok(None);
    };

    if length == -1 {
        return Ok(Some((Bytes::new(), header_len)));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }

    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::FrameTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total_needed = header_len + length + 2;
    if buf.len() < total_needed {
        return Ok(None);
    }

    if &buf[header_len + length..total_needed] != CRLF {
        return Err(ParseError::MissingTerminator);
    }

    let data = Bytes::copy_from_slice(&buf[header_len..header_len + length]);
    Ok(Some((data, total_needed)))
}

/// Parses `<marker><integer>\r\n`, returning the integer and the bytes used.
fn parse_header(buf: &[u8], marker: u8) -> ParseResult<Option<(i64, usize)>> {
    let Some(&found) = buf.first() else {
        return Ok(None);
    };
    if found != marker {
        return Err(ParseError::UnexpectedPrefix {
            expected: marker,
            found,
        });
    }

    let Some(pos) = find_crlf(&buf[1..]) else {
        return Ok(None);
    };

    let line = &buf[1..1 + pos];
    let value = std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ParseError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))?;

    Ok(Some((value, 1 + pos + 2)))
}

/// Finds the position of CRLF in the buffer.
///
/// Returns the position of `\r` if found, or None if CRLF is not present.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}
