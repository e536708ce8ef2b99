//! RESP Protocol Implementation
//!
//! The wire codec for ledgerkv: requests arrive as RESP arrays of bulk
//! strings and replies go out as typed RESP frames.
//!
//! ## Modules
//!
//! - `types`: The `RespValue` reply type and its encoder
//! - `parser`: Incremental decoder for command frames
//! - `reader`: `CommandReader`, which binds the decoder to a byte stream
//!
//! ## Example
//!
//! ```
//! use ledgerkv::protocol::{parse_command, RespValue};
//!
//! // Parsing incoming data
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (args, consumed) = parse_command(data).unwrap().unwrap();
//! assert_eq!(args.len(), 2);
//! assert_eq!(consumed, data.len());
//!
//! // Creating responses
//! let response = RespValue::bulk_string("Ariz");
//! assert_eq!(response.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod reader;
pub mod types;

pub use parser::{parse_command, ParseError, ParseResult};
pub use reader::{CommandReader, ReadError};
pub use types::RespValue;
