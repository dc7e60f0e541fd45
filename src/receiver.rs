//! The receiver task: single reader of the inbound byte stream.
//!
//! Every line is classified and routed: inbound data headers feed connection
//! channels, pull responses and `OK`/`ERROR`/`SEND *` sentinels complete the
//! in-flight command, lifecycle lines maintain the connection table, and
//! everything unsolicited goes to the async channel. The task takes the next
//! in-flight command from the writer's rendezvous only at the moment a
//! response completes, which pins completions to submission order.
//!
//! The response grammar separates the body from its `OK`/`ERROR` terminator
//! with a blank line; only directly after a blank line do the sentinels
//! terminate a response. Anything unrecognized between them is body text.

use std::io::{self, Read};
use std::sync::Arc;

use crossbeam_channel::{Receiver as ChannelReceiver, Sender, TrySendError};
use log::{debug, trace, warn};
use parking_lot::RwLock;

use crate::command::{Command, CommandResult, Reply};
use crate::connection::{AsyncEvent, Connection, Packet};
use crate::error::ErrorKind;
use crate::transport::{LineReader, ScanLine};

/// Highest number of concurrently open connections. ESP-AT firmware supports
/// five; the parser assumes single-digit connection ids, so anything up to
/// ten works unchanged.
pub(crate) const MAX_CONNS: usize = 10;

/// Async event channel depth.
pub(crate) const ASYNC_DEPTH: usize = 5;

/// Per-connection frame channel depth.
pub(crate) const CONN_DEPTH: usize = 3;

/// Server accept channel depth.
pub(crate) const SERVER_DEPTH: usize = MAX_CONNS;

/// State shared between the receiver task and the device facade.
pub(crate) struct Shared {
    pub(crate) async_tx: Sender<AsyncEvent>,
    pub(crate) async_rx: ChannelReceiver<AsyncEvent>,
    /// Accept channel installed by `set_server`. When present, new inbound
    /// connections go here instead of into the pending command's reply.
    pub(crate) server: RwLock<Option<(Sender<Connection>, ChannelReceiver<Connection>)>>,
}

/// Entry point of the receiver task.
pub(crate) fn receiver_loop<R: Read>(
    device: String,
    transport: R,
    pending: ChannelReceiver<Command>,
    shared: Arc<Shared>,
) {
    Receiver {
        device,
        wire: LineReader::new(transport),
        pending,
        shared,
        conns: Default::default(),
        body: String::new(),
        after_blank: false,
        staged_conn: None,
        closed: false,
    }
    .run()
}

struct Receiver<R> {
    device: String,
    wire: LineReader<R>,
    /// Rendezvous with the writer task; holds the single in-flight command.
    pending: ChannelReceiver<Command>,
    shared: Arc<Shared>,
    /// Open connection channels, indexed by wire id. Single-connection mode
    /// uses slot 0.
    conns: [Option<Sender<Packet>>; MAX_CONNS],
    /// Accumulated response body.
    body: String,
    /// The previous line was empty.
    after_blank: bool,
    /// Connection from a `CONNECT` observed while no server channel was
    /// installed; becomes the reply of the pending dial command.
    staged_conn: Option<Connection>,
    closed: bool,
}

impl<R: Read> Receiver<R> {
    fn run(mut self) {
        debug!("{}: receiver running", self.device);
        while !self.closed {
            let (raw, truncated) = match self.wire.read_line() {
                Ok(ScanLine::Full(line)) => (line.to_vec(), false),
                Ok(ScanLine::Partial(line)) => (line.to_vec(), true),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    let kind = ErrorKind::Transport(e.to_string());
                    self.send_async(AsyncEvent::failure(String::new(), kind));
                    break;
                }
            };
            self.handle_line(&raw, truncated);
        }
        debug!("{}: receiver stopped", self.device);
    }

    fn handle_line(&mut self, raw: &[u8], truncated: bool) {
        trace!("{}: rx {:?}", self.device, String::from_utf8_lossy(raw));

        // Data-carrying headers first: their payload may hide newlines, so
        // they must be handled before any line-shape checks.
        if raw.len() >= 7 && raw.starts_with(b"+IPD,") {
            self.handle_inbound_data(raw);
            return;
        }
        if raw.len() > 15 && raw.starts_with(b"+CIPRECVDATA:") {
            self.handle_pull_response(raw);
            return;
        }

        // Overlong or unterminated chunks are body text, kept verbatim.
        if truncated || raw.len() < 2 || raw[raw.len() - 2] != b'\r' {
            self.body.push_str(&String::from_utf8_lossy(raw));
            return;
        }
        let line = &raw[..raw.len() - 2];

        if line.is_empty() {
            self.after_blank = true;
            return;
        }
        if self.after_blank {
            self.after_blank = false;
            match line {
                b"OK" => {
                    let reply = self.take_reply();
                    self.complete(Ok(reply));
                    return;
                }
                b"ERROR" => {
                    let mut code = std::mem::take(&mut self.body);
                    if code.is_empty() {
                        code.push_str("socket");
                    }
                    self.complete(Err(ErrorKind::Esp(code)));
                    return;
                }
                b"SEND OK" => {
                    let reply = self.take_send_reply();
                    self.complete(Ok(reply));
                    return;
                }
                b"SEND FAIL" => {
                    self.complete(Err(ErrorKind::Timeout));
                    return;
                }
                _ => {}
            }
        }

        if line == b">" {
            // Payload prompt after +CIPSEND=; the caller synchronizes the
            // payload write through the device lock.
            return;
        }
        if line.len() >= 12 && line.starts_with(b"Recv ") {
            // Module-side receipt confirmation for +CIPSEND.
            return;
        }
        if line == b"CONNECT"
            || line == b"CLOSED"
            || (line.len() > 1 && (&line[1..] == b",CONNECT" || &line[1..] == b",CLOSED"))
        {
            self.handle_link(line);
            return;
        }
        if line == b"ready" {
            self.send_async(AsyncEvent::line("ready"));
            return;
        }
        if line.len() > 5 && line.starts_with(b"WIFI ") {
            self.send_async(AsyncEvent::line(String::from_utf8_lossy(line)));
            return;
        }

        self.body.push_str(&String::from_utf8_lossy(line));
        self.body.push('\n');
    }

    /// `+IPD,[<id>,]<len>:<payload>` (active) or `+IPD,[<id>,]<len>` (passive).
    fn handle_inbound_data(&mut self, raw: &[u8]) {
        let (slot, num_at) = if raw[6] == b',' {
            (raw[5].wrapping_sub(b'0') as usize, 7)
        } else {
            (0, 5)
        };
        if slot >= MAX_CONNS {
            self.parse_failure(raw);
            return;
        }
        let Some(tx) = self.conns[slot].clone() else {
            let text = String::from_utf8_lossy(raw).into_owned();
            self.send_async(AsyncEvent::failure(text, ErrorKind::UnknownConnection));
            return;
        };

        // Find the end of the length field: ':' starts an inline payload,
        // CRLF means passive-mode availability.
        let mut active = None;
        let mut k = num_at + 1;
        while k < raw.len() {
            match raw[k] {
                b':' => {
                    active = Some(true);
                    break;
                }
                b'\r' if k + 1 < raw.len() && raw[k + 1] == b'\n' => {
                    active = Some(false);
                    break;
                }
                _ => k += 1,
            }
        }
        let Some(active) = active else {
            self.parse_failure(raw);
            return;
        };

        if !active {
            let _ = tx.send(Packet::Available);
            return;
        }

        let len = parse_int(&raw[num_at..k]);
        if len <= 0 {
            // Close the channel so its reader does not deadlock.
            self.conns[slot] = None;
            self.parse_failure(raw);
            return;
        }
        let mut frame = vec![0u8; len as usize];
        if self.read_payload(&raw[k + 1..], &mut frame, len as usize).is_err() {
            self.parse_failure(raw);
            return;
        }
        trace!("{}: conn {}: {} byte frame", self.device, slot, frame.len());
        // Blocks while the connection channel is full; a slow connection
        // reader stalls the whole receive loop.
        let _ = tx.send(Packet::Data(frame));
    }

    /// `+CIPRECVDATA:<len>,<payload>` — response to a passive-mode pull.
    ///
    /// Completes the pending command inline with the number of payload bytes
    /// that fit its receive buffer; the remainder of the frame is discarded.
    fn handle_pull_response(&mut self, raw: &[u8]) {
        let mut k = 14;
        while k < raw.len() && raw[k] != b',' {
            k += 1;
        }
        if k == raw.len() {
            self.parse_failure(raw);
            return;
        }
        let len = parse_int(&raw[13..k]);
        if len <= 0 {
            self.parse_failure(raw);
            return;
        }
        let len = len as usize;

        let Ok(cmd) = self.pending.recv() else {
            self.closed = true;
            return;
        };
        let want = cmd.recv_len.unwrap_or(0).min(len);
        let mut data = vec![0u8; want];
        let mut outcome = self.read_payload(&raw[k + 1..], &mut data, len);
        if outcome.is_ok() {
            // The closing status line of the pull response.
            outcome = match self.wire.read_line() {
                Ok(_) => Ok(()),
                Err(e) => Err(ErrorKind::Transport(e.to_string())),
            };
        }
        match outcome {
            Ok(()) => cmd.complete(Ok(Reply::Data(data))),
            Err(kind) => cmd.complete(Err(kind)),
        }
    }

    /// `[<id>,]CONNECT` / `[<id>,]CLOSED` — connection lifecycle.
    fn handle_link(&mut self, line: &[u8]) {
        let (id, slot) = if line[0] == b'C' {
            // Single-connection mode: slot 0 on the wire, -1 to the caller.
            (-1, 0)
        } else {
            let slot = line[0].wrapping_sub(b'0') as usize;
            if slot >= MAX_CONNS {
                self.parse_failure(line);
                return;
            }
            (slot as i32, slot)
        };

        if line[line.len() - 1] == b'T' {
            let (tx, rx) = crossbeam_channel::bounded(CONN_DEPTH);
            self.conns[slot] = Some(tx);
            let conn = Connection { id, rx };
            let server = self
                .shared
                .server
                .read()
                .as_ref()
                .map(|(accept, _)| accept.clone());
            if let Some(accept) = server {
                debug!("{}: conn {} accepted", self.device, id);
                // Blocks while the accept queue is full.
                let _ = accept.send(conn);
            } else {
                debug!("{}: conn {} open", self.device, id);
                self.staged_conn = Some(conn);
            }
        } else {
            debug!("{}: conn {} closed", self.device, id);
            // Dropping the sender disconnects the channel, which is the EOF
            // signal to connection readers.
            self.conns[slot] = None;
        }
    }

    /// Consumes `total` payload bytes: `prefetch` first, the transport after,
    /// with the first `buf.len()` bytes kept. Requires `buf.len() <= total`.
    /// The frame's trailing CRLF is consumed as well.
    fn read_payload(
        &mut self,
        prefetch: &[u8],
        buf: &mut [u8],
        total: usize,
    ) -> Result<(), ErrorKind> {
        let head = buf.len().min(prefetch.len());
        buf[..head].copy_from_slice(&prefetch[..head]);
        let mut rest = &prefetch[head..];
        if head < buf.len() {
            self.wire
                .read_exact_into(&mut buf[head..])
                .map_err(transport_error)?;
        }

        let mut remaining = total - buf.len();
        let skip = rest.len().min(remaining);
        rest = &rest[skip..];
        remaining -= skip;
        if remaining > 0 {
            self.wire.discard(remaining).map_err(transport_error)?;
        }

        if rest != b"\r\n" {
            match self.wire.read_line().map_err(transport_error)? {
                ScanLine::Full(line) if line.ends_with(b"\r\n") => {}
                _ => return Err(ErrorKind::Parse),
            }
        }
        Ok(())
    }

    fn take_reply(&mut self) -> Reply {
        if let Some(conn) = self.staged_conn.take() {
            return Reply::Conn(conn);
        }
        let body = std::mem::take(&mut self.body);
        if body.is_empty() {
            Reply::Empty
        } else {
            Reply::Str(body)
        }
    }

    /// `SEND OK` carries no body; only a staged connection survives into the
    /// reply.
    fn take_send_reply(&mut self) -> Reply {
        match self.staged_conn.take() {
            Some(conn) => Reply::Conn(conn),
            None => Reply::Empty,
        }
    }

    /// Completes the in-flight command, blocking on the rendezvous until the
    /// writer hands one over.
    fn complete(&mut self, result: CommandResult) {
        match self.pending.recv() {
            Ok(cmd) => {
                trace!("{}: AT{} done", self.device, cmd.name);
                cmd.complete(result);
            }
            Err(_) => self.closed = true,
        }
        self.body.clear();
        self.staged_conn = None;
    }

    fn parse_failure(&mut self, context: &[u8]) {
        let text = String::from_utf8_lossy(context).into_owned();
        self.send_async(AsyncEvent::failure(text, ErrorKind::Parse));
    }

    /// Non-blocking async delivery with the drop-oldest overflow policy: on
    /// a full channel, drop one oldest event, insert the empty overrun
    /// marker once per episode, retry.
    fn send_async(&mut self, event: AsyncEvent) {
        let mut msg = event;
        let mut overrun = false;
        loop {
            match self.shared.async_tx.try_send(msg) {
                Ok(()) => return,
                Err(TrySendError::Disconnected(_)) => return,
                Err(TrySendError::Full(back)) => {
                    msg = back;
                    let _ = self.shared.async_rx.try_recv();
                    if !overrun {
                        overrun = true;
                        warn!("{}: async channel overrun, oldest events dropped", self.device);
                        let _ = self.shared.async_tx.send(AsyncEvent::overrun());
                    }
                }
            }
        }
    }
}

fn transport_error(e: io::Error) -> ErrorKind {
    ErrorKind::Transport(e.to_string())
}

/// Decimal field parser; malformed input yields 0, which every caller
/// rejects as out of range.
fn parse_int(bytes: &[u8]) -> i64 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}
