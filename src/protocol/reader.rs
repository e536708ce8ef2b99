//! Buffered Command Reader
//!
//! TCP is a stream protocol: one read may return half a command, or several
//! pipelined commands at once. `CommandReader` accumulates bytes in a
//! `BytesMut` buffer and hands out one complete command at a time.

use crate::protocol::parser::{parse_command, ParseError, MAX_BULK_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

/// Upper bound on buffered, not yet parsed bytes.
const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Errors that can occur while reading a command from a stream.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Parse(#[from] ParseError),

    /// The stream ended in the middle of a command
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,
}

/// Reads complete commands from an async byte stream.
#[derive(Debug)]
pub struct CommandReader<R> {
    inner: R,
    buffer: BytesMut,
    /// Bytes read from `inner` since the last `take_bytes_read`
    bytes_read: usize,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            bytes_read: 0,
        }
    }

    /// Reads the next command.
    ///
    /// Returns `Ok(None)` when the peer closed the stream cleanly between
    /// commands. Any other failure aborts the whole command; the bytes of a
    /// partially received command are never returned.
    pub async fn read_command(&mut self) -> Result<Option<Vec<Bytes>>, ReadError> {
        loop {
            if let Some((args, consumed)) = parse_command(&self.buffer)? {
                self.buffer.advance(consumed);
                trace!(
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                return Ok(Some(args));
            }

            if self.buffer.len() >= MAX_BUFFER_SIZE {
                return Err(ReadError::BufferFull);
            }

            if self.buffer.capacity() - self.buffer.len() < 1024 {
                self.buffer.reserve(4096);
            }

            let n = self.inner.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ReadError::UnexpectedEof)
                };
            }
            self.bytes_read += n;
            trace!(bytes = n, "Read data");
        }
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the number of bytes read from the stream since the last call.
    pub fn take_bytes_read(&mut self) -> usize {
        std::mem::take(&mut self.bytes_read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_reads_command_split_across_reads() {
        let mock = Builder::new()
            .read(b"*2\r\n$3\r\nGE")
            .read(b"T\r\n$1\r")
            .read(b"\na\r\n")
            .build();
        let mut reader = CommandReader::new(mock);

        let args = reader.read_command().await.unwrap().unwrap();
        assert_eq!(args, vec!["GET", "a"]);
        assert!(reader.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_pipelined_commands_from_one_read() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n")
            .build();
        let mut reader = CommandReader::new(mock);

        assert_eq!(reader.read_command().await.unwrap().unwrap(), vec!["PING"]);
        assert_eq!(reader.buffered(), 20);
        assert_eq!(reader.take_bytes_read(), 34);
        assert_eq!(reader.take_bytes_read(), 0);
        assert_eq!(
            reader.read_command().await.unwrap().unwrap(),
            vec!["DEL", "k"]
        );
        assert!(reader.read_command().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_command_is_an_error() {
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET\r\n").build();
        let mut reader = CommandReader::new(mock);

        let result = reader.read_command().await;
        assert!(matches!(result, Err(ReadError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_malformed_frame_is_an_error() {
        let mock = Builder::new().read(b"$3\r\nGET\r\n").build();
        let mut reader = CommandReader::new(mock);

        let result = reader.read_command().await;
        assert!(matches!(result, Err(ReadError::Parse(_))));
    }

    #[tokio::test]
    async fn test_io_error_is_propagated() {
        let mock = Builder::new()
            .read_error(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))
            .build();
        let mut reader = CommandReader::new(mock);

        let result = reader.read_command().await;
        assert!(matches!(result, Err(ReadError::Io(_))));
    }
}
