//! The byte-driven line assembler, response classifier and parser state
//! machine (components C1-C3).
//!
//! [`Parser`] is deliberately free of any dependency on threads, mutexes, or
//! signals: it is fed bytes, it classifies completed lines, and it returns
//! completed responses. The channel coordinator (`channel`/`channel_async`)
//! owns the thread/task plumbing around it.

use std::cell::Cell;
use std::fmt;
use std::ops::Deref;

use crate::config::ChannelConfig;

/// Classification of one assembled line, used by scanners to direct the
/// parser's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Classification {
    /// No decision; try the next scanner (or the built-in default).
    Unknown,
    /// Append to the response, keep collecting.
    Intermediate,
    /// Dispatch to the URC handler; do not append.
    Urc,
    /// Terminate collection, keep the line's content (e.g. device error text).
    Final,
    /// Terminate collection, discard the line's content (e.g. "OK").
    FinalOk,
    /// `n` raw bytes follow and should be copied verbatim into the response.
    RawDataFollows(usize),
    /// `n` hex characters (`n/2` decoded bytes) follow.
    HexDataFollows(usize),
}

/// A scanner inspects one assembled line and returns a classification.
pub type Scanner = Box<dyn Fn(&[u8]) -> Classification + Send>;
/// A character handler rewrites one incoming byte given the line assembled
/// so far. Returning `\n` forces line completion; returning `\0` drops the
/// byte entirely.
pub type CharHandler = Box<dyn FnMut(u8, &[u8]) -> u8 + Send>;
/// Invoked synchronously, on the reader's execution context, for every line
/// classified as a URC.
pub type UrcHandler = Box<dyn FnMut(&[u8]) + Send>;

thread_local! {
    /// Set for the duration of a URC handler invocation so the channel layer
    /// can refuse (panic on) a re-entrant `command()` call from within it.
    static IN_URC_HANDLER: Cell<bool> = const { Cell::new(false) };
}

/// True if the calling thread is currently inside a URC handler callback.
pub fn in_urc_handler() -> bool {
    IN_URC_HANDLER.with(|f| f.get())
}

/// An accumulated command response: the response buffer's contents at the
/// moment a terminal classification was reached, excluding the terminator
/// line itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Response(Vec<u8>);

impl Response {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> Result<&str, crate::Error> {
        Ok(std::str::from_utf8(&self.0)?)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Response {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

/// An event surfaced by [`Parser::feed`]. Response completion is always
/// returned this way so the channel layer owns the wake-up signal; a URC is
/// only surfaced here if no URC handler is installed (otherwise it is
/// dispatched synchronously to that handler instead).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParserEvent {
    Urc(Vec<u8>),
    ResponseComplete(Response),
}

/// Built-in line classifier applied when both the per-command scanner and
/// the default scanner return [`Classification::Unknown`].
pub fn classify_builtin(line: &[u8]) -> Classification {
    if line == b"OK" {
        return Classification::FinalOk;
    }
    if line == b"ERROR"
        || line.starts_with(b"+CME ERROR:")
        || line.starts_with(b"+CMS ERROR:")
        || line == b"NO CARRIER"
        || line == b"BUSY"
        || line == b"NO ANSWER"
        || line == b"NO DIALTONE"
    {
        return Classification::Final;
    }
    Classification::Intermediate
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Idle,
    AwaitingResponse,
    AwaitingDataPrompt,
    ReadingRaw(usize),
    /// Remaining *hex characters* (not decoded bytes) to consume.
    ReadingHex(usize),
}

struct LineBuffer {
    buf: Vec<u8>,
    capacity: usize,
    head_drops: u64,
    /// Set on the first head-drop of the line currently being assembled, so
    /// the burst is logged once rather than once per dropped byte. Reset
    /// whenever the line buffer is cleared or taken.
    warned_this_line: bool,
}

impl LineBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            head_drops: 0,
            warned_this_line: false,
        }
    }

    /// Head-drops the oldest byte once the buffer has `capacity - 1` bytes,
    /// so that pushing one more never exceeds `capacity` (reserving the slot
    /// this occupies, rather than letting the buffer fill to `capacity`
    /// before dropping).
    fn push(&mut self, b: u8) {
        if self.buf.len() >= self.capacity.saturating_sub(1) {
            self.buf.remove(0);
            self.head_drops = self.head_drops.wrapping_add(1);
            if !self.warned_this_line {
                tracing::warn!(capacity = self.capacity, "line buffer overflow, head-dropping oldest byte(s)");
                self.warned_this_line = true;
            }
        }
        self.buf.push(b);
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.warned_this_line = false;
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    fn take(&mut self) -> Vec<u8> {
        self.warned_this_line = false;
        std::mem::take(&mut self.buf)
    }
}

struct ResponseBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl ResponseBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn clear(&mut self) {
        self.buf.clear();
    }

    fn push_capped(&mut self, b: u8) {
        if self.buf.len() < self.capacity {
            self.buf.push(b);
        } else {
            tracing::warn!("response buffer at capacity ({}), dropping byte", self.capacity);
        }
    }

    /// Appends a line, inserting a `\n` separator if the buffer already has
    /// content. Never leaves a trailing separator.
    fn append_line(&mut self, line: &[u8]) {
        if !self.buf.is_empty() {
            self.push_capped(b'\n');
        }
        for &b in line {
            self.push_capped(b);
        }
    }

    fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// The response-collection state machine (C3), composing the line assembler
/// (C1) and response classifier (C2).
pub struct Parser {
    state: ParserState,
    line: LineBuffer,
    response: ResponseBuffer,
    pending_payload: Vec<u8>,
    hex_high_nibble: Option<u8>,
    /// Per-command, one-shot: consumed (cleared) when a response completes.
    scanner: Option<Scanner>,
    /// Per-command, one-shot: see `scanner`. (Design note: §9 of the spec
    /// this crate follows calls both the scanner and character handler
    /// "armed-once and cleared on completion"; that reading is taken as
    /// authoritative over a looser description elsewhere of the handler as
    /// persistent. See DESIGN.md.)
    char_handler: Option<CharHandler>,
    /// Per-command, one-shot.
    data_prompt: Option<Vec<u8>>,
    /// Persistent until replaced.
    default_scanner: Option<Scanner>,
    /// Persistent until replaced.
    urc_handler: Option<UrcHandler>,
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parser")
            .field("state", &self.state)
            .field("line_len", &self.line.as_slice().len())
            .field("response_len", &self.response.buf.len())
            .field("has_scanner", &self.scanner.is_some())
            .field("has_char_handler", &self.char_handler.is_some())
            .field("data_prompt", &self.data_prompt)
            .finish()
    }
}

impl Parser {
    pub fn new(config: &ChannelConfig) -> Self {
        Self {
            state: ParserState::Idle,
            line: LineBuffer::new(config.line_capacity),
            response: ResponseBuffer::new(config.response_capacity),
            pending_payload: Vec::new(),
            hex_high_nibble: None,
            scanner: None,
            char_handler: None,
            data_prompt: None,
            default_scanner: None,
            urc_handler: None,
        }
    }

    /// Number of bytes silently discarded by line-buffer head-drop since
    /// construction (observability hook noted in the design doc).
    pub fn head_drop_count(&self) -> u64 {
        self.line.head_drops
    }

    /// True if [`expect_dataprompt`](Self::expect_dataprompt) has armed
    /// prompt detection for the next command and it has not yet completed.
    /// The channel layer uses this to avoid clobbering the armed prompt
    /// with a plain `await_response` when sending the command that elicits
    /// it.
    pub fn is_awaiting_data_prompt(&self) -> bool {
        self.state == ParserState::AwaitingDataPrompt
    }

    /// Arms the parser for the next command: clears the response buffer and
    /// transitions `Idle -> AwaitingResponse`. Must be called before the
    /// command is transmitted. Discards any in-progress raw/hex payload
    /// (re-arming mid-payload is a caller bug, not treated as fatal).
    pub fn await_response(&mut self) {
        self.response.clear();
        self.pending_payload.clear();
        self.hex_high_nibble = None;
        self.state = ParserState::AwaitingResponse;
    }

    /// Arms prompt detection for the next command only: the parser will
    /// match `prefix` against the line buffer on every byte (without
    /// waiting for a newline) and complete the response (empty, `FinalOk`)
    /// immediately on an exact match.
    pub fn expect_dataprompt(&mut self, prefix: impl Into<Vec<u8>>) {
        self.response.clear();
        self.line.clear();
        self.pending_payload.clear();
        self.data_prompt = Some(prefix.into());
        self.state = ParserState::AwaitingDataPrompt;
    }

    /// Installs a one-shot scanner consulted before the default scanner for
    /// the very next command's lines. Consumed when that command completes.
    pub fn set_scanner(&mut self, scanner: Scanner) {
        self.scanner = Some(scanner);
    }

    /// Installs a one-shot character handler, consumed when the next
    /// command completes (see the note on `char_handler` above).
    pub fn set_character_handler(&mut self, handler: CharHandler) {
        self.char_handler = Some(handler);
    }

    pub fn clear_character_handler(&mut self) {
        self.char_handler = None;
    }

    /// Installs the caller's default scanner, persistent until replaced.
    pub fn set_default_scanner(&mut self, scanner: Scanner) {
        self.default_scanner = Some(scanner);
    }

    /// Installs the caller's URC handler, persistent until replaced.
    pub fn set_urc_handler(&mut self, handler: UrcHandler) {
        self.urc_handler = Some(handler);
    }

    /// Returns to `Idle`, clears the line buffer and all per-command
    /// transient state. Per spec, does NOT clear the response buffer.
    pub fn reset(&mut self) {
        self.state = ParserState::Idle;
        self.line.clear();
        self.pending_payload.clear();
        self.hex_high_nibble = None;
        self.scanner = None;
        self.char_handler = None;
        self.data_prompt = None;
    }

    /// Feeds inbound bytes. Never blocks. Returns every event produced as a
    /// result of this call, in order (ordinarily at most one).
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ParserEvent> {
        let mut out = Vec::new();
        for &b in bytes {
            if let Some(event) = self.feed_byte(b) {
                out.push(event);
            }
        }
        out
    }

    fn classify(&self, line: &[u8]) -> Classification {
        if let Some(scanner) = &self.scanner {
            let c = scanner(line);
            if c != Classification::Unknown {
                return c;
            }
        }
        if let Some(scanner) = &self.default_scanner {
            let c = scanner(line);
            if c != Classification::Unknown {
                return c;
            }
        }
        classify_builtin(line)
    }

    /// Dispatches a URC line: calls the installed handler synchronously, or
    /// if none is installed, returns it as a `ParserEvent::Urc` instead.
    fn dispatch_urc(&mut self, line: &[u8]) -> Option<ParserEvent> {
        match self.urc_handler.take() {
            Some(mut handler) => {
                IN_URC_HANDLER.with(|f| f.set(true));
                handler(line);
                IN_URC_HANDLER.with(|f| f.set(false));
                self.urc_handler = Some(handler);
                None
            }
            None => Some(ParserEvent::Urc(line.to_vec())),
        }
    }

    fn feed_byte(&mut self, byte: u8) -> Option<ParserEvent> {
        match self.state {
            ParserState::ReadingRaw(ref mut remaining) => {
                self.response.push_capped(byte);
                self.pending_payload.push(byte);
                *remaining -= 1;
                if *remaining == 0 {
                    return self.finish_payload();
                }
                return None;
            }
            ParserState::ReadingHex(ref mut remaining) => {
                let nibble = (byte as char).to_digit(16).map(|v| v as u8);
                let nibble = match nibble {
                    Some(v) => v,
                    None => {
                        tracing::warn!("non-hex byte 0x{byte:02x} in ReadingHex state, treating as 0");
                        0
                    }
                };
                match self.hex_high_nibble.take() {
                    None => self.hex_high_nibble = Some(nibble),
                    Some(hi) => {
                        let decoded = (hi << 4) | nibble;
                        self.response.push_capped(decoded);
                        self.pending_payload.push(decoded);
                    }
                }
                *remaining -= 1;
                if *remaining == 0 {
                    return self.finish_payload();
                }
                return None;
            }
            _ => {}
        }

        let effective = if let Some(handler) = self.char_handler.as_mut() {
            handler(byte, self.line.as_slice())
        } else {
            byte
        };

        if effective == 0 {
            return None;
        }
        if effective == b'\n' {
            if !self.line.is_empty() {
                let line = self.line.take();
                return self.process_line(line);
            }
            return None;
        }
        if effective != b'\r' {
            self.line.push(effective);
            if self.state == ParserState::AwaitingDataPrompt {
                if let Some(prefix) = self.data_prompt.clone() {
                    let buf = self.line.as_slice();
                    if buf.len() >= prefix.len() && buf[..prefix.len()] == prefix[..] {
                        self.line.clear();
                        return Some(ParserEvent::ResponseComplete(self.finish_response()));
                    }
                }
            }
        }
        None
    }

    fn process_line(&mut self, line: Vec<u8>) -> Option<ParserEvent> {
        match self.state {
            ParserState::Idle => {
                if self.classify(&line) == Classification::Urc {
                    self.dispatch_urc(&line)
                } else {
                    None
                }
            }
            ParserState::AwaitingResponse | ParserState::AwaitingDataPrompt => {
                let classification = self.classify(&line);
                tracing::trace!(%classification, len = line.len(), "line classified");
                match classification {
                    Classification::Unknown => unreachable!("classify_builtin never returns Unknown"),
                    Classification::Intermediate => {
                        self.response.append_line(&line);
                        None
                    }
                    Classification::Urc => self.dispatch_urc(&line),
                    Classification::Final => {
                        self.response.append_line(&line);
                        Some(ParserEvent::ResponseComplete(self.finish_response()))
                    }
                    Classification::FinalOk => Some(ParserEvent::ResponseComplete(self.finish_response())),
                    Classification::RawDataFollows(n) => {
                        self.response.append_line(&line);
                        self.pending_payload.clear();
                        if n > 0 {
                            self.response.push_capped(b'\n');
                        }
                        self.state = ParserState::ReadingRaw(n);
                        None
                    }
                    Classification::HexDataFollows(n) => {
                        self.response.append_line(&line);
                        self.pending_payload.clear();
                        self.hex_high_nibble = None;
                        if n == 0 {
                            return self.finish_payload();
                        }
                        self.response.push_capped(b'\n');
                        self.state = ParserState::ReadingHex(n);
                        None
                    }
                }
            }
            ParserState::ReadingRaw(_) | ParserState::ReadingHex(_) => {
                unreachable!("line assembly bypassed while consuming a binary payload")
            }
        }
    }

    fn finish_payload(&mut self) -> Option<ParserEvent> {
        let payload = std::mem::take(&mut self.pending_payload);
        self.hex_high_nibble = None;
        self.state = ParserState::AwaitingResponse;
        match self.classify(&payload) {
            Classification::Urc => self.dispatch_urc(&payload),
            Classification::Final | Classification::FinalOk => {
                Some(ParserEvent::ResponseComplete(self.finish_response()))
            }
            Classification::RawDataFollows(n) => {
                if n > 0 {
                    self.response.push_capped(b'\n');
                }
                self.state = ParserState::ReadingRaw(n);
                None
            }
            Classification::HexDataFollows(n) => {
                if n == 0 {
                    return self.finish_payload();
                }
                self.response.push_capped(b'\n');
                self.state = ParserState::ReadingHex(n);
                None
            }
            Classification::Intermediate | Classification::Unknown => None,
        }
    }

    fn finish_response(&mut self) -> Response {
        self.scanner = None;
        self.char_handler = None;
        self.data_prompt = None;
        self.line.clear();
        self.state = ParserState::Idle;
        Response(self.response.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> Parser {
        Parser::new(&ChannelConfig::default())
    }

    fn responses(events: Vec<ParserEvent>) -> Vec<Response> {
        events
            .into_iter()
            .filter_map(|e| match e {
                ParserEvent::ResponseComplete(r) => Some(r),
                ParserEvent::Urc(_) => None,
            })
            .collect()
    }

    #[test]
    fn simple_ok() {
        let mut p = parser();
        p.await_response();
        let resp = responses(p.feed(b"AT\r\r\nOK\r\n"));
        assert_eq!(resp.len(), 1);
        assert!(resp[0].is_empty());
    }

    #[test]
    fn query_plus_value() {
        let mut p = parser();
        p.await_response();
        let resp = responses(p.feed(b"+CSQ: 14,0\r\nOK\r\n"));
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].as_bytes(), b"+CSQ: 14,0");
    }

    #[test]
    fn urc_mid_wait() {
        let mut p = parser();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        p.set_default_scanner(Box::new(|line: &[u8]| {
            if line.starts_with(b"+CREG:") {
                Classification::Urc
            } else {
                Classification::Unknown
            }
        }));
        p.set_urc_handler(Box::new(move |line| {
            seen2.lock().unwrap().push(line.to_vec());
        }));
        p.await_response();
        let resp = responses(p.feed(b"+CREG: 1,1\r\n"));
        assert!(resp.is_empty());
        assert_eq!(seen.lock().unwrap().len(), 1);
        let resp = responses(p.feed(b"Quectel\r\nOK\r\n"));
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].as_bytes(), b"Quectel");
    }

    #[test]
    fn binary_payload() {
        let mut p = parser();
        p.set_scanner(Box::new(|line: &[u8]| {
            if line == b"+QIRD: 1,TCP,5" {
                Classification::RawDataFollows(5)
            } else {
                Classification::Unknown
            }
        }));
        p.await_response();
        let mut input = b"+QIRD: 1,TCP,5\r\n".to_vec();
        input.extend_from_slice(&[0x00, 0x01, 0xFF, 0x7F, 0x80]);
        input.extend_from_slice(b"OK\r\n");
        let resp = responses(p.feed(&input));
        assert_eq!(resp.len(), 1);
        let mut expected = b"+QIRD: 1,TCP,5\n".to_vec();
        expected.extend_from_slice(&[0x00, 0x01, 0xFF, 0x7F, 0x80]);
        assert_eq!(resp[0].as_bytes(), expected.as_slice());
    }

    #[test]
    fn hex_payload_decodes_upper_and_lower() {
        let mut p = parser();
        p.set_scanner(Box::new(|line: &[u8]| {
            if line == b"+HEX:" {
                Classification::HexDataFollows(2)
            } else {
                Classification::Unknown
            }
        }));
        p.await_response();
        let resp = responses(p.feed(b"+HEX:\r\nfF\r\nOK\r\n"));
        assert_eq!(resp.len(), 1);
        let mut expected = b"+HEX:\n".to_vec();
        expected.push(0xFF);
        assert_eq!(resp[0].as_bytes(), expected.as_slice());
    }

    #[test]
    fn data_prompt_completes_without_newline() {
        let mut p = parser();
        p.expect_dataprompt("> ");
        let resp = responses(p.feed(b"> "));
        assert_eq!(resp.len(), 1);
        assert!(resp[0].is_empty());
    }

    #[test]
    fn data_prompt_then_command_raw_scanner() {
        let mut p = parser();
        p.expect_dataprompt("> ");
        let resp = responses(p.feed(b"> "));
        assert_eq!(resp.len(), 1);

        p.set_scanner(Box::new(|line: &[u8]| {
            if line == b"SEND OK" {
                Classification::FinalOk
            } else {
                Classification::Unknown
            }
        }));
        p.await_response();
        let resp = responses(p.feed(b"SEND OK\r\n"));
        assert_eq!(resp.len(), 1);
        assert!(resp[0].is_empty());
    }

    #[test]
    fn error_line_preserved() {
        let mut p = parser();
        p.await_response();
        let resp = responses(p.feed(b"+CME ERROR: 10\r\n"));
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].as_bytes(), b"+CME ERROR: 10");
    }

    #[test]
    fn ok_classifies_same_with_or_without_scanner() {
        let mut p = parser();
        p.await_response();
        let resp = responses(p.feed(b"OK\r\n"));
        assert_eq!(resp.len(), 1);
        assert!(resp[0].is_empty());

        let mut p2 = parser();
        p2.set_scanner(Box::new(|_| Classification::Unknown));
        p2.await_response();
        let resp2 = responses(p2.feed(b"OK\r\n"));
        assert_eq!(resp2.len(), 1);
        assert!(resp2[0].is_empty());
    }

    #[test]
    fn short_line_preserved_intact() {
        let mut p = parser();
        p.await_response();
        let line = vec![b'a'; 79];
        let mut input = line.clone();
        input.push(b'\n');
        input.extend_from_slice(b"OK\r\n");
        let resp = responses(p.feed(&input));
        assert_eq!(resp[0].as_bytes(), line.as_slice());
    }

    #[test]
    fn long_line_head_dropped_to_capacity() {
        let mut p = parser();
        p.await_response();
        let line = vec![b'b'; 200];
        let mut input = line.clone();
        input.push(b'\n');
        input.extend_from_slice(b"OK\r\n");
        let resp = responses(p.feed(&input));
        let expected: Vec<u8> = line[line.len() - 79..].to_vec();
        assert_eq!(resp[0].as_bytes(), expected.as_slice());
        assert!(p.head_drop_count() > 0);
    }

    #[test]
    fn bare_cr_is_ignored() {
        let mut p = parser();
        p.await_response();
        let resp = responses(p.feed(b"OK\r\r\n"));
        assert_eq!(resp.len(), 1);
    }

    #[test]
    fn idle_urc_does_not_touch_response_buffer() {
        let mut p = parser();
        p.set_default_scanner(Box::new(|line: &[u8]| {
            if line.starts_with(b"+CREG:") {
                Classification::Urc
            } else {
                Classification::Unknown
            }
        }));
        let seen = std::sync::Arc::new(std::sync::Mutex::new(0));
        let seen2 = seen.clone();
        p.set_urc_handler(Box::new(move |_| *seen2.lock().unwrap() += 1));
        let resp = responses(p.feed(b"+CREG: 1,1\r\n"));
        assert!(resp.is_empty());
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn character_handler_rewrites_and_forces_newline() {
        let mut p = parser();
        p.set_character_handler(Box::new(|b, _line_so_far| if b == b':' { b'\n' } else { b }));
        p.await_response();
        // The ':' is rewritten to '\n', forcing "hello" to complete as its
        // own line; since it is not a terminal classification it is merely
        // appended, and the response only completes once "OK" arrives.
        let resp = responses(p.feed(b"hello:OK\r\n"));
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].as_bytes(), b"hello");
    }

    #[test]
    fn reset_clears_transient_state_but_not_response_buffer() {
        let mut p = parser();
        p.set_scanner(Box::new(|_| Classification::Unknown));
        p.await_response();
        let _ = responses(p.feed(b"+CSQ: 14,0\r\n"));
        p.reset();
        assert!(p.scanner.is_none());
        assert_eq!(p.response.buf, b"+CSQ: 14,0".to_vec());
    }

    #[test]
    fn hex_zero_length_is_legal() {
        let mut p = parser();
        p.set_scanner(Box::new(|line: &[u8]| {
            if line == b"+HEX:" {
                Classification::HexDataFollows(0)
            } else {
                Classification::Unknown
            }
        }));
        p.await_response();
        let resp = responses(p.feed(b"+HEX:\r\nOK\r\n"));
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0].as_bytes(), b"+HEX:");
    }
}
