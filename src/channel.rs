//! The half-duplex request/response coordinator (C4).
//!
//! An [`AtChannel`] owns a background reader thread that feeds bytes to the
//! [`Parser`](crate::parser::Parser) one at a time and a waiter side
//! (`command`/`command_raw`) that serializes one command at a time against
//! it. The two sides synchronize through a response slot guarded by a
//! `Mutex`/`Condvar` pair standing in for the source's binary semaphore —
//! see spec.md §5 and DESIGN.md for the mapping.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::{ChannelConfig, HEX_CHUNK_SIZE, MAX_COMMAND_LEN, WAIT_POLL_INTERVAL};
use crate::parser::{CharHandler, Parser, ParserEvent, Response, Scanner, UrcHandler};
use crate::{AtResult, Error};

/// A transport that can be read from and written to concurrently via a
/// shared reference — true of OS-backed serial ports and sockets (which is
/// why `serial2::SerialPort` and `std::net::TcpStream` both implement `Read`
/// and `Write` for `&Self`), and of the in-memory mock this crate's own
/// tests use for loopback.
pub trait DuplexPort: Send + Sync + 'static {}
impl<T> DuplexPort for T
where
    T: Send + Sync + 'static,
    for<'a> &'a T: Read + Write,
{
}

const READER_IDLE_BACKOFF: Duration = Duration::from_millis(20);

struct ChannelShared {
    port_open: AtomicBool,
    reader_running: AtomicBool,
    reader_paused: AtomicBool,
    waiter_active: AtomicBool,
    #[cfg(debug_assertions)]
    in_command: AtomicBool,
    timeout_secs: AtomicU64,
    delay_ms: AtomicU64,
    head_drops: AtomicU64,
    response_slot: Mutex<Option<Response>>,
    response_ready: Condvar,
    parser: Mutex<Parser>,
}

/// The channel coordinator: half-duplex, one command in flight at a time.
///
/// Cloning the handle (via [`AtChannel::handle`]) is how a URC handler that
/// needs to issue its own commands would do so on another execution
/// context — calling back into `command()` from *this* thread while it is
/// inside a URC callback panics (spec.md §4.3/§9: re-entrancy is forbidden).
pub struct AtChannel<P: DuplexPort> {
    port: Arc<P>,
    shared: Arc<ChannelShared>,
    reader_handle: Option<JoinHandle<()>>,
}

impl<P: DuplexPort> AtChannel<P> {
    /// Builds a channel over an already-connected transport. The port is
    /// not opened (the reader thread is not started) until [`open`](Self::open)
    /// is called — mirroring spec.md §6: construction itself takes no
    /// runtime parameters beyond the transport and buffer capacities.
    pub fn new(port: P, config: ChannelConfig) -> Self {
        Self {
            port: Arc::new(port),
            shared: Arc::new(ChannelShared {
                port_open: AtomicBool::new(false),
                reader_running: AtomicBool::new(false),
                reader_paused: AtomicBool::new(false),
                waiter_active: AtomicBool::new(false),
                #[cfg(debug_assertions)]
                in_command: AtomicBool::new(false),
                timeout_secs: AtomicU64::new(config.timeout.as_secs()),
                delay_ms: AtomicU64::new(config.delay.as_millis() as u64),
                head_drops: AtomicU64::new(0),
                response_slot: Mutex::new(None),
                response_ready: Condvar::new(),
                parser: Mutex::new(Parser::new(&config)),
            }),
            reader_handle: None,
        }
    }

    /// Starts the reader thread and marks the port open. Idempotent.
    pub fn open(&mut self) -> AtResult<()> {
        if self.shared.port_open.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.reader_running.store(true, Ordering::Release);
        let port = Arc::clone(&self.port);
        let shared = Arc::clone(&self.shared);
        self.reader_handle = Some(spawn_reader(port, shared));
        tracing::debug!("channel opened");
        Ok(())
    }

    /// Stops the reader thread and marks the port closed, waking any
    /// in-flight waiter (which observes `port_open` cleared and returns
    /// [`Error::PortClosed`]). Idempotent.
    pub fn close(&mut self) {
        if !self.shared.port_open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.reader_running.store(false, Ordering::Release);
        self.shared.response_ready.notify_all();
        if let Some(handle) = self.reader_handle.take() {
            let _ = handle.join();
        }
        tracing::debug!("channel closed");
    }

    /// Pauses the reader thread without touching the port's open state.
    pub fn suspend(&self) {
        self.shared.reader_paused.store(true, Ordering::Release);
    }

    /// Resumes a reader thread paused by [`suspend`](Self::suspend).
    pub fn resume(&self) {
        self.shared.reader_paused.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.shared.port_open.load(Ordering::Acquire)
    }

    /// Exposes the underlying transport for tests in sibling modules (e.g.
    /// `facade`) that need to drive the mock loopback transport directly.
    #[cfg(test)]
    pub(crate) fn port_for_test(&self) -> &P {
        &self.port
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.shared.timeout_secs.store(timeout.as_secs(), Ordering::Relaxed);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.shared.delay_ms.store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of bytes silently discarded by the parser's line-buffer
    /// head-drop, for observability (spec.md §9's head-drop counter note).
    ///
    /// `shared.head_drops` is kept current by the reader thread on every
    /// fed byte (see `spawn_reader`), so this reads it directly rather than
    /// also consulting `Parser::head_drop_count` — summing the two would
    /// double-count every drop.
    pub fn head_drop_count(&self) -> u64 {
        self.shared.head_drops.load(Ordering::Relaxed)
    }

    /// Arms prompt detection for the very next command only.
    pub fn expect_dataprompt(&self, prefix: impl Into<Vec<u8>>) {
        Self::assert_not_in_urc_handler("expect_dataprompt");
        self.shared.parser.lock().unwrap().expect_dataprompt(prefix);
    }

    /// Installs a one-shot scanner, consulted before the default scanner,
    /// for the very next command's lines.
    pub fn set_scanner(&self, scanner: Scanner) {
        Self::assert_not_in_urc_handler("set_scanner");
        self.shared.parser.lock().unwrap().set_scanner(scanner);
    }

    /// Installs a one-shot character handler for the very next command.
    pub fn set_character_handler(&self, handler: CharHandler) {
        Self::assert_not_in_urc_handler("set_character_handler");
        self.shared.parser.lock().unwrap().set_character_handler(handler);
    }

    pub fn clear_character_handler(&self) {
        Self::assert_not_in_urc_handler("clear_character_handler");
        self.shared.parser.lock().unwrap().clear_character_handler();
    }

    /// Installs the caller's default scanner, persistent until replaced.
    pub fn set_default_scanner(&self, scanner: Scanner) {
        Self::assert_not_in_urc_handler("set_default_scanner");
        self.shared.parser.lock().unwrap().set_default_scanner(scanner);
    }

    /// Installs the caller's URC handler, persistent until replaced. Runs
    /// synchronously on the reader thread — it must not call back into
    /// `command`/`command_raw` (see the module docs).
    pub fn set_urc_handler(&self, handler: UrcHandler) {
        Self::assert_not_in_urc_handler("set_urc_handler");
        self.shared.parser.lock().unwrap().set_urc_handler(handler);
    }

    /// Every setter that locks `shared.parser` must go through this first:
    /// the reader thread holds that same mutex for the full duration of a
    /// URC handler invocation (`Parser::dispatch_urc`), so a handler that
    /// calls back into one of these setters on its own thread would
    /// self-deadlock on the non-reentrant `std::sync::Mutex` instead of
    /// failing cleanly.
    fn assert_not_in_urc_handler(method: &str) {
        if crate::parser::in_urc_handler() {
            panic!(
                "re-entrant call into AtChannel::{method} from a URC handler: URC handlers must not call back into the channel"
            );
        }
    }

    /// Formats `args` into a line bounded at 80 bytes (including the
    /// trailing `\r`), transmits it, and blocks until the parser reaches a
    /// terminal classification or the configured timeout elapses.
    pub fn command(&self, args: fmt::Arguments<'_>) -> AtResult<Response> {
        let mut line = String::new();
        fmt::Write::write_fmt(&mut line, args).expect("formatting into a String cannot fail");
        line.push('\r');
        if line.len() > MAX_COMMAND_LEN {
            return Err(Error::OverLongCommand { len: line.len(), max: MAX_COMMAND_LEN });
        }
        self.execute(line.as_bytes())
    }

    /// Same as [`command`](Self::command) but for a non-text payload (the
    /// body written after a data prompt), transmitted verbatim with no
    /// trailing `\r` and no 80-byte bound.
    pub fn command_raw(&self, data: &[u8]) -> AtResult<Response> {
        self.execute(data)
    }

    /// One-way formatted write; does not arm the parser.
    pub fn send(&self, args: fmt::Arguments<'_>) -> AtResult<()> {
        let mut line = String::new();
        fmt::Write::write_fmt(&mut line, args).expect("formatting into a String cannot fail");
        line.push('\r');
        if line.len() > MAX_COMMAND_LEN {
            return Err(Error::OverLongCommand { len: line.len(), max: MAX_COMMAND_LEN });
        }
        self.write_bytes(line.as_bytes())
    }

    /// One-way verbatim write; does not arm the parser.
    pub fn send_raw(&self, data: &[u8]) -> AtResult<()> {
        self.write_bytes(data)
    }

    /// Encodes `data` as uppercase hex and streams it in
    /// [`HEX_CHUNK_SIZE`]-byte chunks to bound the temporary buffer.
    pub fn send_hex(&self, data: &[u8]) -> AtResult<()> {
        for chunk in data.chunks(HEX_CHUNK_SIZE) {
            let mut hex = String::with_capacity(chunk.len() * 2);
            for b in chunk {
                use fmt::Write as _;
                write!(hex, "{b:02X}").expect("formatting into a String cannot fail");
            }
            self.write_bytes(hex.as_bytes())?;
        }
        Ok(())
    }

    fn write_bytes(&self, bytes: &[u8]) -> AtResult<()> {
        if !self.shared.port_open.load(Ordering::Acquire) {
            return Err(Error::PortClosed);
        }
        (&*self.port).write_all(bytes).map_err(Error::Io)
    }

    /// The command lifecycle of spec.md §4.4: reject on a closed port,
    /// sleep the inter-command delay, arm the parser, transmit, and wait
    /// for the response signal in up-to-one-second slices.
    #[tracing::instrument(level = "debug", skip(self, bytes), fields(len = bytes.len()))]
    fn execute(&self, bytes: &[u8]) -> AtResult<Response> {
        if crate::parser::in_urc_handler() {
            return Err(Error::Reentrant);
        }
        if !self.shared.port_open.load(Ordering::Acquire) {
            return Err(Error::PortClosed);
        }
        #[cfg(debug_assertions)]
        if self.shared.in_command.swap(true, Ordering::AcqRel) {
            panic!("re-entrant call into AtChannel::command/command_raw: at most one command may be in flight at a time");
        }

        let delay = Duration::from_millis(self.shared.delay_ms.load(Ordering::Relaxed));
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        {
            let mut parser = self.shared.parser.lock().unwrap();
            if !parser.is_awaiting_data_prompt() {
                parser.await_response();
            }
        }
        *self.shared.response_slot.lock().unwrap() = None;
        self.shared.waiter_active.store(true, Ordering::Release);

        let result = self.write_and_wait(bytes);

        self.shared.waiter_active.store(false, Ordering::Release);
        #[cfg(debug_assertions)]
        self.shared.in_command.store(false, Ordering::Release);

        if matches!(result, Err(Error::Timeout)) {
            tracing::warn!("command timed out waiting for a response, resetting parser");
            self.shared.parser.lock().unwrap().reset();
        }
        result
    }

    fn write_and_wait(&self, bytes: &[u8]) -> AtResult<Response> {
        (&*self.port).write_all(bytes).map_err(Error::Io)?;

        let timeout = Duration::from_secs(self.shared.timeout_secs.load(Ordering::Relaxed));
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.response_slot.lock().unwrap();
        loop {
            if let Some(resp) = guard.take() {
                return Ok(resp);
            }
            if !self.shared.port_open.load(Ordering::Acquire) {
                return Err(Error::PortClosed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let slice = WAIT_POLL_INTERVAL.min(deadline - now);
            let (g, _timeout_result) = self.shared.response_ready.wait_timeout(guard, slice).unwrap();
            guard = g;
        }
    }
}

impl<P: DuplexPort> Drop for AtChannel<P> {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_reader<P: DuplexPort>(port: Arc<P>, shared: Arc<ChannelShared>) -> JoinHandle<()> {
    thread::spawn(move || {
        tracing::debug!("reader thread started");
        let mut byte = [0u8; 1];
        while shared.reader_running.load(Ordering::Acquire) {
            if shared.reader_paused.load(Ordering::Acquire) {
                thread::sleep(READER_IDLE_BACKOFF);
                continue;
            }
            match (&*port).read(&mut byte) {
                Ok(0) => thread::sleep(READER_IDLE_BACKOFF),
                Ok(_) => {
                    let (events, head_drops) = {
                        let mut parser = shared.parser.lock().unwrap();
                        let before = parser.head_drop_count();
                        let events = parser.feed(&byte);
                        (events, parser.head_drop_count() - before)
                    };
                    if head_drops > 0 {
                        shared.head_drops.fetch_add(head_drops, Ordering::Relaxed);
                    }
                    for event in events {
                        match event {
                            ParserEvent::Urc(line) => {
                                tracing::trace!(len = line.len(), "URC surfaced with no handler installed, dropped");
                            }
                            ParserEvent::ResponseComplete(resp) => {
                                *shared.response_slot.lock().unwrap() = Some(resp);
                                shared.response_ready.notify_all();
                            }
                        }
                    }
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "reader thread I/O error, closing port");
                    shared.port_open.store(false, Ordering::Release);
                    shared.response_ready.notify_all();
                    break;
                }
            }
        }
        tracing::debug!("reader thread exited");
    })
}


#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;
    use crate::parser::Classification;

    #[test]
    fn simple_ok_roundtrip() {
        let port = MockTransport::new();
        let mut chan = AtChannel::new(port, ChannelConfig::default().with_timeout(Duration::from_secs(2)));
        chan.open().unwrap();
        chan.port.push_inbound(b"OK\r\n");
        let resp = chan.command(format_args!("AT")).unwrap();
        assert!(resp.is_empty());
        assert_eq!(chan.port.take_outbound(), b"AT\r");
    }

    #[test]
    fn timeout_when_no_response_arrives() {
        let port = MockTransport::new();
        let mut chan = AtChannel::new(port, ChannelConfig::default().with_timeout(Duration::from_millis(500)));
        chan.open().unwrap();
        let result = chan.command(format_args!("AT"));
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn command_closed_port_returns_error() {
        let port = MockTransport::new();
        let chan = AtChannel::new(port, ChannelConfig::default());
        let result = chan.command(format_args!("AT"));
        assert!(matches!(result, Err(Error::PortClosed)));
    }

    #[test]
    fn over_long_command_rejected_without_transmit() {
        let port = MockTransport::new();
        let mut chan = AtChannel::new(port, ChannelConfig::default());
        chan.open().unwrap();
        let long = "A".repeat(200);
        let result = chan.command(format_args!("{long}"));
        assert!(matches!(result, Err(Error::OverLongCommand { .. })));
        assert!(chan.port.take_outbound().is_empty());
    }

    #[test]
    fn urc_dispatched_while_idle() {
        let port = MockTransport::new();
        let mut chan = AtChannel::new(port, ChannelConfig::default());
        let seen = Arc::new(Mutex::new(0u32));
        let seen2 = Arc::clone(&seen);
        chan.set_default_scanner(Box::new(|line: &[u8]| {
            if line.starts_with(b"+CREG:") { Classification::Urc } else { Classification::Unknown }
        }));
        chan.set_urc_handler(Box::new(move |_| *seen2.lock().unwrap() += 1));
        chan.open().unwrap();
        chan.port.push_inbound(b"+CREG: 1,1\r\n");
        thread::sleep(Duration::from_millis(100));
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn data_prompt_then_raw_command() {
        let port = MockTransport::new();
        let mut chan = AtChannel::new(port, ChannelConfig::default().with_timeout(Duration::from_secs(2)));
        chan.open().unwrap();
        chan.expect_dataprompt("> ");
        chan.port.push_inbound(b"> ");
        let resp = chan.command(format_args!("AT+CIPSEND=5")).unwrap();
        assert!(resp.is_empty());

        chan.set_scanner(Box::new(|line: &[u8]| {
            if line == b"SEND OK" { Classification::FinalOk } else { Classification::Unknown }
        }));
        chan.port.push_inbound(b"SEND OK\r\n");
        let resp = chan.command_raw(b"hello").unwrap();
        assert!(resp.is_empty());
        assert_eq!(chan.port.take_outbound(), b"hello");
    }

    #[test]
    fn close_unblocks_waiting_command() {
        let port = MockTransport::new();
        let mut chan = AtChannel::new(port, ChannelConfig::default().with_timeout(Duration::from_secs(30)));
        chan.open().unwrap();
        let shared = Arc::clone(&chan.shared);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            shared.port_open.store(false, Ordering::Release);
            shared.response_ready.notify_all();
        });
        let result = chan.command(format_args!("AT"));
        assert!(matches!(result, Err(Error::PortClosed)));
    }

    #[test]
    fn head_drop_count_is_not_double_counted() {
        use crate::config::DEFAULT_LINE_CAPACITY;
        let port = MockTransport::new();
        let mut chan = AtChannel::new(port, ChannelConfig::default().with_timeout(Duration::from_secs(2)));
        chan.open().unwrap();
        chan.port.push_inbound(&vec![b'x'; 200]);
        chan.port.push_inbound(b"\r\nOK\r\n");
        let _ = chan.command(format_args!("AT"));
        assert_eq!(chan.head_drop_count(), 200 - (DEFAULT_LINE_CAPACITY as u64 - 1));
    }

    #[test]
    #[should_panic(expected = "re-entrant call into AtChannel::set_scanner")]
    fn setter_panics_when_called_from_urc_handler() {
        let port = MockTransport::new();
        let chan = AtChannel::new(port, ChannelConfig::default());
        {
            let mut parser = chan.shared.parser.lock().unwrap();
            parser.set_default_scanner(Box::new(|line: &[u8]| {
                if line.starts_with(b"+CREG:") { Classification::Urc } else { Classification::Unknown }
            }));
            parser.set_urc_handler(Box::new(|_| {
                AtChannel::<MockTransport>::assert_not_in_urc_handler("set_scanner");
            }));
        }
        let _ = chan.shared.parser.lock().unwrap().feed(b"+CREG: 1,1\r\n");
    }
}
