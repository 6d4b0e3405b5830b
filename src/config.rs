//! Runtime-adjustable settings for an [`AtChannel`](crate::channel::AtChannel).
//!
//! Per spec, construction itself takes no parameters; these are the knobs
//! read by the channel while it is running (timeout, inter-command delay)
//! plus the two buffer capacities that the source fixes at compile time and
//! this crate fixes at construction instead.

use std::time::Duration;

/// Upper bound on a formatted command line, including the trailing `\r`.
pub const MAX_COMMAND_LEN: usize = 80;
/// Default capacity of the parser's line-assembly buffer.
pub const DEFAULT_LINE_CAPACITY: usize = 80;
/// Default capacity of the parser's response buffer (top of the 512-640
/// byte range used in the source this crate is modeled on).
pub const DEFAULT_RESPONSE_CAPACITY: usize = 640;
/// Number of raw bytes per `send_hex` write, bounding stack/temp buffer
/// growth (40 input bytes -> 80 hex output chars).
pub const HEX_CHUNK_SIZE: usize = 40;
/// Back-off between `config()` probe/retry rounds.
pub const CONFIG_RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// Poll granularity for the waiter's bounded wait on a command response.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Channel-wide settings, adjustable at runtime and shared by every command
/// issued on the channel (never per-command, per spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Command timeout. A value of [`Duration::ZERO`] means "time out
    /// immediately" (the source's default), i.e. callers must opt in to a
    /// real budget before `command()` can usefully block.
    pub timeout: Duration,
    /// Delay slept before transmitting each command.
    pub delay: Duration,
    /// Capacity of the line-assembly buffer (head-drop past this size).
    pub line_capacity: usize,
    /// Capacity of the accumulated response buffer.
    pub response_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::ZERO,
            delay: Duration::ZERO,
            line_capacity: DEFAULT_LINE_CAPACITY,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
        }
    }
}

impl ChannelConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}
