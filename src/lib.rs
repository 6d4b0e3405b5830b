//! Line-oriented AT command transport core for UART-attached cellular modems.
//!
//! This crate implements the two pieces of an AT command stack that are hard
//! to get right: a byte-driven [`parser`] that segments an inbound stream into
//! lines, classifies each as part of a command response or an unsolicited
//! result code (URC), and understands embedded binary payloads and data
//! prompts; and a half-duplex `channel` coordinator that serializes one
//! command at a time against a background reader, arms the parser, transmits
//! the command, and waits with a bounded timeout for a completed response.
//!
//! Per-modem command suites (autobauding, PDP context setup, socket opcodes)
//! are deliberately not part of this crate — they are clients of it.
//!
//! ```no_run
//! # #[cfg(feature = "sync")]
//! # fn example() -> atchan::AtResult<()> {
//! use atchan::AtChannelBuilder;
//!
//! let mut chan = AtChannelBuilder::new().with_serial("/dev/ttyUSB0", 115_200).open()?;
//! let resp = chan.command(format_args!("ATI"))?;
//! println!("{}", resp.as_str()?);
//! # Ok(())
//! # }
//! ```

use std::str::Utf8Error;

use thiserror::Error;

pub mod builder;
pub mod config;
pub mod facade;
pub mod parser;

#[cfg(feature = "sync")]
pub mod channel;

#[cfg(feature = "async")]
pub mod channel_async;

pub use builder::AtChannelBuilder;
pub use config::ChannelConfig;
pub use parser::{Classification, Parser, ParserEvent, Response};

/// Errors surfaced at the channel/parser boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The parser did not reach a terminal classification within the
    /// configured command timeout.
    #[error("command timed out waiting for a response")]
    Timeout,
    /// The port was closed concurrently, or was never opened.
    #[error("port is closed")]
    PortClosed,
    /// A formatted command line exceeded the 80-byte wire bound.
    #[error("formatted command exceeds {max} bytes (got {len})")]
    OverLongCommand { len: usize, max: usize },
    #[error(transparent)]
    Utf8(#[from] Utf8Error),
    /// A caller attempted to re-enter the channel (e.g. issue a command)
    /// from within a URC handler running on the reader's own execution
    /// context.
    #[error("re-entrant call into the channel from a URC handler")]
    Reentrant,
}

pub type AtResult<T> = std::result::Result<T, Error>;
