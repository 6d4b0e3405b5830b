//! Builder for [`AtChannel`](crate::channel::AtChannel) /
//! [`AtChannelAsync`](crate::channel_async::AtChannelAsync), in the
//! type-state style the teacher's own `BaseContextBuilder` uses to prevent
//! calling `.build()` (here, `.open()`) before a transport has been chosen.

use std::marker::PhantomData;
use std::time::Duration;

use crate::config::ChannelConfig;
use crate::AtResult;

const DEFAULT_BAUD: u32 = 115_200;

pub struct Init;
pub struct Serial;

/// Type-state builder for an AT channel. Start with [`AtChannelBuilder::new`],
/// pick a transport with `with_serial`/`with_serial_async`, optionally tune
/// [`ChannelConfig`], then call `.open()`.
pub struct AtChannelBuilder<State> {
    com_port: Option<String>,
    baud_rate: u32,
    config: ChannelConfig,
    _marker: PhantomData<State>,
}

impl Default for AtChannelBuilder<Init> {
    fn default() -> Self {
        Self::new()
    }
}

impl AtChannelBuilder<Init> {
    pub fn new() -> Self {
        Self {
            com_port: None,
            baud_rate: DEFAULT_BAUD,
            config: ChannelConfig::default(),
            _marker: PhantomData,
        }
    }

    /// Selects a serial device path, to be opened at the given baud rate
    /// (default 115200) when `.open()` is called.
    #[cfg(feature = "sync")]
    pub fn with_serial(self, path: impl Into<String>, baud_rate: u32) -> AtChannelBuilder<Serial> {
        AtChannelBuilder {
            com_port: Some(path.into()),
            baud_rate,
            config: self.config,
            _marker: PhantomData,
        }
    }
}

impl<State> AtChannelBuilder<State> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_timeout(timeout);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.config = self.config.with_delay(delay);
        self
    }

    pub fn with_line_capacity(mut self, capacity: usize) -> Self {
        self.config.line_capacity = capacity;
        self
    }

    pub fn with_response_capacity(mut self, capacity: usize) -> Self {
        self.config.response_capacity = capacity;
        self
    }
}

#[cfg(feature = "sync")]
impl AtChannelBuilder<Serial> {
    pub fn baud(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Opens the serial device and starts the channel's reader thread.
    pub fn open(self) -> AtResult<crate::channel::AtChannel<serial2::SerialPort>> {
        let port = serial2::SerialPort::open(
            self.com_port.as_deref().expect("with_serial sets com_port"),
            self.baud_rate,
        )?;
        let mut chan = crate::channel::AtChannel::new(port, self.config);
        chan.open()?;
        Ok(chan)
    }
}

pub struct SerialAsync;

#[cfg(feature = "async")]
impl AtChannelBuilder<Init> {
    /// Selects a serial device path for use with the async channel variant.
    pub fn with_serial_async(self, path: impl Into<String>, baud_rate: u32) -> AtChannelBuilder<SerialAsync> {
        AtChannelBuilder {
            com_port: Some(path.into()),
            baud_rate,
            config: self.config,
            _marker: PhantomData,
        }
    }
}

#[cfg(feature = "async")]
impl AtChannelBuilder<SerialAsync> {
    pub fn baud(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Opens the serial device and starts the async channel's reader task.
    pub fn open(self) -> AtResult<crate::channel_async::AtChannelAsync<serial2_tokio::SerialPort>> {
        let port = serial2_tokio::SerialPort::open(
            self.com_port.as_deref().expect("with_serial_async sets com_port"),
            self.baud_rate,
        )?;
        let mut chan = crate::channel_async::AtChannelAsync::new(port, self.config);
        chan.open()?;
        Ok(chan)
    }
}
