//! Command serialization and the writer task.
//!
//! Callers hand the device a command name and a list of [CommandArg]s. The
//! writer task drains the bounded command queue, renders each command into
//! the AT wire syntax and transmits it, then parks the in-flight record on a
//! zero-capacity rendezvous channel until the receiver task accepts it. The
//! rendezvous is what keeps at most one command in flight with the parser,
//! and what makes completions arrive in submission order.

use std::io::Write;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use log::{trace, warn};
use parking_lot::Mutex;

use crate::connection::Connection;
use crate::error::ErrorKind;

/// Capacity of the outbound frame scratch, including the trailing CRLF.
pub(crate) const SCRATCH: usize = 128;

/// One argument of an AT command.
///
/// `Buf` is only valid as the first argument: it marks a receive buffer for
/// the passive-mode pull command (`+CIPRECVDATA=`) and is skipped during wire
/// encoding. Everywhere else it fails the command with
/// [ErrorKind::ArgType](crate::error::ErrorKind::ArgType).
#[derive(Debug)]
pub enum CommandArg<'a> {
    /// An empty field. Adjacent separators are emitted, e.g. `1,,2`.
    Null,
    /// A quoted string; `"` and `\` are backslash-escaped on the wire.
    Str(&'a str),
    /// A signed decimal integer.
    Int(i32),
    /// Receive buffer for a data pull. Not encoded.
    Buf(&'a mut [u8]),
}

/// Reply of a successfully completed command.
#[derive(Debug)]
pub enum CommandResponse {
    /// The response had no body.
    Empty,
    /// Accumulated response body, one line per `\n`.
    Str(String),
    /// Number of bytes copied into the caller's receive buffer.
    Int(usize),
    /// A freshly opened connection (reply to a dial command).
    Conn(Connection),
}

/// Owned argument image that crosses into the writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum WireArg {
    Null,
    Str(String),
    Int(i32),
}

/// Reply slot filled by the receiver task.
#[derive(Debug)]
pub(crate) enum Reply {
    Empty,
    Str(String),
    /// Pulled payload, truncated to the bytes that fit the caller's buffer.
    Data(Vec<u8>),
    Conn(Connection),
}

pub(crate) type CommandResult = Result<Reply, ErrorKind>;

/// One in-flight command record. Completed exactly once, by whichever task
/// fails or finishes it first.
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) args: Vec<WireArg>,
    /// Length of the caller's receive buffer when the first argument was
    /// [CommandArg::Buf].
    pub(crate) recv_len: Option<usize>,
    done: Sender<CommandResult>,
}

impl Command {
    pub(crate) fn new(
        name: &str,
        args: Vec<WireArg>,
        recv_len: Option<usize>,
    ) -> (Self, Receiver<CommandResult>) {
        let (done, wait) = crossbeam_channel::bounded(1);
        let cmd = Self {
            name: name.into(),
            args,
            recv_len,
            done,
        };
        (cmd, wait)
    }

    pub(crate) fn complete(self, result: CommandResult) {
        let _ = self.done.send(result);
    }
}

/// Splits a caller argument list into the receive-buffer length and the
/// owned wire arguments.
pub(crate) fn split_args(
    args: &[CommandArg<'_>],
) -> Result<(Option<usize>, Vec<WireArg>), ErrorKind> {
    let mut recv_len = None;
    let mut wire = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        match arg {
            CommandArg::Buf(buf) if i == 0 => recv_len = Some(buf.len()),
            CommandArg::Buf(_) => return Err(ErrorKind::ArgType),
            CommandArg::Null => wire.push(WireArg::Null),
            CommandArg::Str(s) => wire.push(WireArg::Str((*s).into())),
            CommandArg::Int(n) => wire.push(WireArg::Int(*n)),
        }
    }
    Ok((recv_len, wire))
}

/// Renders `AT` + name + comma-joined arguments + CRLF into a fixed frame.
///
/// The whole frame, CRLF included, must fit [SCRATCH] bytes.
pub(crate) fn encode(
    name: &str,
    args: &[WireArg],
) -> Result<heapless::Vec<u8, SCRATCH>, ErrorKind> {
    let mut frame = heapless::Vec::new();
    put(&mut frame, b"AT")?;
    put(&mut frame, name.as_bytes())?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            put(&mut frame, b",")?;
        }
        match arg {
            WireArg::Null => {}
            WireArg::Str(s) => {
                put(&mut frame, b"\"")?;
                for &b in s.as_bytes() {
                    if b == b'"' || b == b'\\' {
                        put(&mut frame, b"\\")?;
                    }
                    put(&mut frame, &[b])?;
                }
                put(&mut frame, b"\"")?;
            }
            WireArg::Int(n) => put(&mut frame, n.to_string().as_bytes())?,
        }
    }
    if frame.len() > SCRATCH - 2 {
        return Err(ErrorKind::TxOverflow);
    }
    put(&mut frame, b"\r\n")?;
    Ok(frame)
}

fn put(frame: &mut heapless::Vec<u8, SCRATCH>, bytes: &[u8]) -> Result<(), ErrorKind> {
    frame
        .extend_from_slice(bytes)
        .map_err(|_| ErrorKind::TxOverflow)
}

/// Main loop of the writer task.
///
/// Commands with an empty name write no frame (the payload bytes emitted
/// under the device lock are the command) but still register with the
/// receiver and wait for a response.
pub(crate) fn writer_loop(
    device: String,
    queue: Receiver<Command>,
    pending: Sender<Command>,
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
) {
    for cmd in queue.iter() {
        if !cmd.name.is_empty() {
            let frame = match encode(&cmd.name, &cmd.args) {
                Ok(frame) => frame,
                Err(kind) => {
                    warn!("{}: encoding AT{} failed: {}", device, cmd.name, kind);
                    cmd.complete(Err(kind));
                    continue;
                }
            };
            trace!("{}: tx {:?}", device, String::from_utf8_lossy(&frame));
            let written = sink.lock().write_all(&frame);
            if let Err(e) = written {
                cmd.complete(Err(ErrorKind::Transport(e.to_string())));
                continue;
            }
        }
        // Hand over and block until the receiver holds the record.
        if let Err(back) = pending.send(cmd) {
            back.into_inner()
                .complete(Err(ErrorKind::Transport("device closed".into())));
            return;
        }
    }
}
