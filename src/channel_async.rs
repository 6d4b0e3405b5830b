//! Async flavor of the channel coordinator (C4), built on `tokio` the same
//! way the teacher's own async transport (`transport/connection_async.rs`)
//! is built: a reader task in place of a reader thread, `tokio::sync::Notify`
//! in place of the semaphore/condvar pair, `tokio::time::timeout` in place
//! of the blocking 1 Hz poll loop.
//!
//! The public contract mirrors [`crate::channel::AtChannel`] exactly; see
//! that module's docs for the command lifecycle. Differences are purely
//! mechanical (futures instead of blocking calls).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::config::{ChannelConfig, HEX_CHUNK_SIZE, MAX_COMMAND_LEN, WAIT_POLL_INTERVAL};
use crate::parser::{CharHandler, Parser, ParserEvent, Response, Scanner, UrcHandler};
use crate::{AtResult, Error};

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
    response_ready: Notify,
    parser: Mutex<Parser>,
}

/// The async channel coordinator. `P` is a split-able duplex transport —
/// `tokio::net::TcpStream` or `serial2_tokio::SerialPort` both qualify.
pub struct AtChannelAsync<P: AsyncRead + AsyncWrite + Unpin + Send + 'static> {
    write_half: Arc<tokio::sync::Mutex<WriteHalf<P>>>,
    shared: Arc<ChannelShared>,
    reader_task: Option<JoinHandle<()>>,
}

impl<P: AsyncRead + AsyncWrite + Unpin + Send + 'static> AtChannelAsync<P> {
    /// Builds a channel over an already-connected transport, splitting it
    /// into independent read/write halves via `tokio::io::split`. The
    /// reader task is not spawned until [`open`](Self::open) is called.
    pub fn new(port: P, config: ChannelConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(port);
        let shared = Arc::new(ChannelShared {
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
            response_ready: Notify::new(),
            parser: Mutex::new(Parser::new(&config)),
        });
        let reader_task = Some(spawn_reader_placeholder(read_half, Arc::clone(&shared)));
        Self {
            write_half: Arc::new(tokio::sync::Mutex::new(write_half)),
            shared,
            reader_task,
        }
    }
}

/// `tokio::io::split` does not let us hold the read half until `open()`
/// without spawning, so the reader task is created eagerly but parked on
/// `reader_running` until `open()` flips it — matching the sync channel's
/// observable behavior (no bytes are processed before `open()`).
fn spawn_reader_placeholder<R>(mut read_half: ReadHalf<R>, shared: Arc<ChannelShared>) -> JoinHandle<()>
where
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        tracing::debug!("reader task started");
        let mut byte = [0u8; 1];
        loop {
            if !shared.reader_running.load(Ordering::Acquire) {
                // Parked rather than exited: `open()` may flip this flag
                // back on without re-splitting the transport.
                tokio::time::sleep(READER_IDLE_BACKOFF).await;
                continue;
            }
            if shared.reader_paused.load(Ordering::Acquire) {
                tokio::time::sleep(READER_IDLE_BACKOFF).await;
                continue;
            }
            match tokio::time::timeout(READER_IDLE_BACKOFF, read_half.read(&mut byte)).await {
                Ok(Ok(0)) => tokio::time::sleep(READER_IDLE_BACKOFF).await,
                Ok(Ok(_)) => {
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
                                shared.response_ready.notify_waiters();
                            }
                        }
                    }
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "reader task I/O error, closing port");
                    shared.port_open.store(false, Ordering::Release);
                    shared.response_ready.notify_waiters();
                    break;
                }
                Err(_elapsed) => continue,
            }
        }
        tracing::debug!("reader task exited");
    })
}

impl<P: AsyncRead + AsyncWrite + Unpin + Send + 'static> AtChannelAsync<P> {
    /// Marks the port open, allowing the already-spawned reader task to
    /// start processing bytes. Idempotent.
    pub fn open(&mut self) -> AtResult<()> {
        if self.shared.port_open.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.reader_running.store(true, Ordering::Release);
        tracing::debug!("channel opened");
        Ok(())
    }

    /// Marks the port closed, waking any in-flight waiter. Idempotent. The
    /// reader task keeps running (parked) so the channel can be reopened
    /// without re-splitting the transport.
    pub fn close(&mut self) {
        if !self.shared.port_open.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.reader_running.store(false, Ordering::Release);
        self.shared.response_ready.notify_waiters();
        tracing::debug!("channel closed");
    }

    pub fn suspend(&self) {
        self.shared.reader_paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.reader_paused.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.shared.port_open.load(Ordering::Acquire)
    }

    pub fn set_timeout(&self, timeout: Duration) {
        self.shared.timeout_secs.store(timeout.as_secs(), Ordering::Relaxed);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.shared.delay_ms.store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// See the sync channel's `head_drop_count` doc: `shared.head_drops` is
    /// already kept current by the reader task, so this reads it directly
    /// rather than also consulting `Parser::head_drop_count`, which would
    /// double-count every drop.
    pub fn head_drop_count(&self) -> u64 {
        self.shared.head_drops.load(Ordering::Relaxed)
    }

    pub fn expect_dataprompt(&self, prefix: impl Into<Vec<u8>>) {
        Self::assert_not_in_urc_handler("expect_dataprompt");
        self.shared.parser.lock().unwrap().expect_dataprompt(prefix);
    }

    pub fn set_scanner(&self, scanner: Scanner) {
        Self::assert_not_in_urc_handler("set_scanner");
        self.shared.parser.lock().unwrap().set_scanner(scanner);
    }

    pub fn set_character_handler(&self, handler: CharHandler) {
        Self::assert_not_in_urc_handler("set_character_handler");
        self.shared.parser.lock().unwrap().set_character_handler(handler);
    }

    pub fn clear_character_handler(&self) {
        Self::assert_not_in_urc_handler("clear_character_handler");
        self.shared.parser.lock().unwrap().clear_character_handler();
    }

    pub fn set_default_scanner(&self, scanner: Scanner) {
        Self::assert_not_in_urc_handler("set_default_scanner");
        self.shared.parser.lock().unwrap().set_default_scanner(scanner);
    }

    pub fn set_urc_handler(&self, handler: UrcHandler) {
        Self::assert_not_in_urc_handler("set_urc_handler");
        self.shared.parser.lock().unwrap().set_urc_handler(handler);
    }

    /// See the sync channel's identically-named helper: the reader task
    /// holds `shared.parser` for the full duration of a URC handler
    /// invocation, so a handler calling back into one of these setters on
    /// its own task would self-deadlock instead of failing cleanly.
    fn assert_not_in_urc_handler(method: &str) {
        if crate::parser::in_urc_handler() {
            panic!(
                "re-entrant call into AtChannelAsync::{method} from a URC handler: URC handlers must not call back into the channel"
            );
        }
    }

    pub async fn command(&self, args: fmt::Arguments<'_>) -> AtResult<Response> {
        let mut line = String::new();
        fmt::Write::write_fmt(&mut line, args).expect("formatting into a String cannot fail");
        line.push('\r');
        if line.len() > MAX_COMMAND_LEN {
            return Err(Error::OverLongCommand { len: line.len(), max: MAX_COMMAND_LEN });
        }
        self.execute(line.as_bytes()).await
    }

    pub async fn command_raw(&self, data: &[u8]) -> AtResult<Response> {
        self.execute(data).await
    }

    pub async fn send(&self, args: fmt::Arguments<'_>) -> AtResult<()> {
        let mut line = String::new();
        fmt::Write::write_fmt(&mut line, args).expect("formatting into a String cannot fail");
        line.push('\r');
        if line.len() > MAX_COMMAND_LEN {
            return Err(Error::OverLongCommand { len: line.len(), max: MAX_COMMAND_LEN });
        }
        self.write_bytes(line.as_bytes()).await
    }

    pub async fn send_raw(&self, data: &[u8]) -> AtResult<()> {
        self.write_bytes(data).await
    }

    pub async fn send_hex(&self, data: &[u8]) -> AtResult<()> {
        for chunk in data.chunks(HEX_CHUNK_SIZE) {
            let mut hex = String::with_capacity(chunk.len() * 2);
            for b in chunk {
                use fmt::Write as _;
                write!(hex, "{b:02X}").expect("formatting into a String cannot fail");
            }
            self.write_bytes(hex.as_bytes()).await?;
        }
        Ok(())
    }

    async fn write_bytes(&self, bytes: &[u8]) -> AtResult<()> {
        if !self.shared.port_open.load(Ordering::Acquire) {
            return Err(Error::PortClosed);
        }
        let mut w = self.write_half.lock().await;
        w.write_all(bytes).await.map_err(Error::Io)
    }

    #[tracing::instrument(level = "debug", skip(self, bytes), fields(len = bytes.len()))]
    async fn execute(&self, bytes: &[u8]) -> AtResult<Response> {
        if crate::parser::in_urc_handler() {
            return Err(Error::Reentrant);
        }
        if !self.shared.port_open.load(Ordering::Acquire) {
            return Err(Error::PortClosed);
        }
        #[cfg(debug_assertions)]
        if self.shared.in_command.swap(true, Ordering::AcqRel) {
            panic!("re-entrant call into AtChannelAsync::command/command_raw: at most one command may be in flight at a time");
        }

        let delay = Duration::from_millis(self.shared.delay_ms.load(Ordering::Relaxed));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        {
            let mut parser = self.shared.parser.lock().unwrap();
            if !parser.is_awaiting_data_prompt() {
                parser.await_response();
            }
        }
        *self.shared.response_slot.lock().unwrap() = None;
        self.shared.waiter_active.store(true, Ordering::Release);

        let result = self.write_and_wait(bytes).await;

        self.shared.waiter_active.store(false, Ordering::Release);
        #[cfg(debug_assertions)]
        self.shared.in_command.store(false, Ordering::Release);

        if matches!(result, Err(Error::Timeout)) {
            tracing::warn!("command timed out waiting for a response, resetting parser");
            self.shared.parser.lock().unwrap().reset();
        }
        result
    }

    async fn write_and_wait(&self, bytes: &[u8]) -> AtResult<Response> {
        {
            let mut w = self.write_half.lock().await;
            w.write_all(bytes).await.map_err(Error::Io)?;
        }

        let timeout = Duration::from_secs(self.shared.timeout_secs.load(Ordering::Relaxed));
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(resp) = self.shared.response_slot.lock().unwrap().take() {
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
            let _ = tokio::time::timeout(slice, self.shared.response_ready.notified()).await;
        }
    }
}

impl<P: AsyncRead + AsyncWrite + Unpin + Send + 'static> Drop for AtChannelAsync<P> {
    fn drop(&mut self) {
        self.shared.reader_running.store(false, Ordering::Release);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}
