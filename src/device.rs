//! The device facade: command execution, lock spans, initialization and the
//! observer channels.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::trace;
use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::command::{
    self, split_args, Command, CommandArg, CommandResponse, CommandResult, Reply,
};
use crate::connection::{AsyncEvent, Connection};
use crate::error::{Error, ErrorKind};
use crate::receiver::{self, Shared, ASYNC_DEPTH, SERVER_DEPTH};

/// Command queue depth between callers and the writer task.
const CMD_QUEUE_DEPTH: usize = 3;

/// How long `init` waits for the `ready` report after a reset.
const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// How long `init` drains stale async events before resetting.
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// Driver handle for one ESP-AT module.
///
/// Created with [new](Device::new), which starts the writer and receiver
/// tasks. Call [init](Device::init) before first use. The module must be
/// configured with `AT+CIPDINFO=0`, otherwise inbound data headers carry a
/// peer address prefix this driver does not expect.
///
/// The handle is safe to share between threads. Tearing a device down is
/// done by closing the transport; both tasks exit when their end of the
/// stream goes away.
///
/// ```
/// use std::io::Cursor;
///
/// use esp_at_link::command::CommandArg;
/// use esp_at_link::device::Device;
///
/// // A canned module response; a real transport would be a serial port.
/// let replies = Cursor::new(b"\r\nOK\r\n".to_vec());
/// let dev = Device::new("esp0", replies, Vec::new());
/// dev.cmd("+CWMODE=", &mut [CommandArg::Int(1)]).unwrap();
/// ```
pub struct Device {
    name: String,
    queue: Sender<Command>,
    mutex: Mutex<()>,
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    shared: Arc<Shared>,
}

impl Device {
    /// Builds a driver over the transport halves and starts its background
    /// tasks. `name` appears in error values and log lines only.
    pub fn new<R, W>(name: &str, reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (queue, queue_rx) = crossbeam_channel::bounded(CMD_QUEUE_DEPTH);
        // Zero capacity: the writer blocks until the receiver task holds the
        // in-flight command, keeping exactly one command pending.
        let (pending_tx, pending_rx) = crossbeam_channel::bounded(0);
        let (async_tx, async_rx) = crossbeam_channel::bounded(ASYNC_DEPTH);
        let shared = Arc::new(Shared {
            async_tx,
            async_rx,
            server: RwLock::new(None),
        });
        let sink: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(Box::new(writer)));

        let dev = name.to_string();
        let writer_sink = sink.clone();
        thread::Builder::new()
            .name(format!("{name}-writer"))
            .spawn(move || command::writer_loop(dev, queue_rx, pending_tx, writer_sink))
            .expect("failed to spawn writer thread");

        let dev = name.to_string();
        let receiver_shared = shared.clone();
        thread::Builder::new()
            .name(format!("{name}-receiver"))
            .spawn(move || receiver::receiver_loop(dev, reader, pending_rx, receiver_shared))
            .expect("failed to spawn receiver thread");

        Self {
            name: name.into(),
            queue,
            mutex: Mutex::new(()),
            sink,
            shared,
        }
    }

    /// The name this device was created with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Executes an AT command and returns its reply.
    ///
    /// `name` is the command name without the `AT` prefix (`"+GMR"`, not
    /// `"AT+GMR"`), with a trailing `=` when the command takes arguments. An
    /// empty name writes nothing but still waits for a response; it is used
    /// to synchronize the completion of a `+CIPSEND` payload. The first
    /// argument may be a [CommandArg::Buf] receive buffer, see
    /// [cmd_int](Self::cmd_int).
    ///
    /// Submission takes the device mutex for the enqueue only; waiting for
    /// the reply happens without it.
    pub fn cmd(
        &self,
        name: &str,
        args: &mut [CommandArg<'_>],
    ) -> Result<CommandResponse, Error> {
        let wait = {
            let _guard = self.mutex.lock();
            self.submit(name, args)?
        };
        self.finish(name, args, wait)
    }

    /// [cmd](Self::cmd) for commands with a string reply. An empty reply is
    /// an empty string; any other tag fails with
    /// [ErrorKind::ResponseType].
    pub fn cmd_str(&self, name: &str, args: &mut [CommandArg<'_>]) -> Result<String, Error> {
        match self.cmd(name, args)? {
            CommandResponse::Empty => Ok(String::new()),
            CommandResponse::Str(s) => Ok(s),
            _ => Err(self.fail(name, ErrorKind::ResponseType)),
        }
    }

    /// [cmd](Self::cmd) for commands with an integer reply, i.e. the number
    /// of bytes pulled into a leading [CommandArg::Buf] receive buffer by
    /// `+CIPRECVDATA=`. Bytes beyond the buffer are discarded by the module
    /// driver; a missing or empty buffer discards everything and replies 0.
    pub fn cmd_int(&self, name: &str, args: &mut [CommandArg<'_>]) -> Result<usize, Error> {
        match self.cmd(name, args)? {
            CommandResponse::Int(n) => Ok(n),
            _ => Err(self.fail(name, ErrorKind::ResponseType)),
        }
    }

    /// [cmd](Self::cmd) for dial commands replying with a new connection.
    pub fn cmd_conn(
        &self,
        name: &str,
        args: &mut [CommandArg<'_>],
    ) -> Result<Connection, Error> {
        match self.cmd(name, args)? {
            CommandResponse::Conn(conn) => Ok(conn),
            _ => Err(self.fail(name, ErrorKind::ResponseType)),
        }
    }

    /// Takes the device mutex and returns a guard for a lock-span sequence.
    ///
    /// A lock span is what keeps a `+CIPSEND` command, its raw payload bytes
    /// and the completion synchronizer adjacent on the wire:
    ///
    /// ```
    /// # use std::io::Cursor;
    /// # use esp_at_link::command::CommandArg;
    /// # use esp_at_link::device::Device;
    /// # let replies = Cursor::new(b"\r\nOK\r\n\r\nSEND OK\r\n".to_vec());
    /// # let dev = Device::new("esp0", replies, Vec::new());
    /// let lock = dev.lock();
    /// lock.cmd("+CIPSEND=", &mut [CommandArg::Int(0), CommandArg::Int(5)])?;
    /// lock.write(b"hello")?;
    /// lock.cmd("", &mut [])?; // completes on SEND OK / SEND FAIL
    /// drop(lock);
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn lock(&self) -> DeviceLock<'_> {
        DeviceLock {
            dev: self,
            _guard: self.mutex.lock(),
        }
    }

    /// Observer of unsolicited module reports and receive-side errors.
    ///
    /// The channel is bounded; when it overflows, the oldest events are
    /// dropped and an empty marker event
    /// ([AsyncEvent::is_overrun]) records the loss.
    pub fn async_events(&self) -> Receiver<AsyncEvent> {
        self.shared.async_rx.clone()
    }

    /// The accept channel for inbound connections, if
    /// [set_server](Self::set_server) enabled it.
    pub fn server(&self) -> Option<Receiver<Connection>> {
        self.shared
            .server
            .read()
            .as_ref()
            .map(|(_, accept)| accept.clone())
    }

    /// Installs or removes the server accept channel.
    ///
    /// While installed, `CONNECT` reports deliver new connections there and
    /// never into a pending command's reply.
    pub fn set_server(&self, enable: bool) {
        *self.shared.server.write() = enable.then(|| crossbeam_channel::bounded(SERVER_DEPTH));
    }

    /// Brings the module to a known state:
    ///
    /// ```text
    /// ATE0          disable command echo
    /// AT+SYSLOG=1   report error codes as lines
    /// ```
    ///
    /// With `reset` (recommended), stale async events are drained first,
    /// `AT+RST` is issued and the `ready` report is awaited for up to two
    /// seconds before the commands above run. The wait consumes from the
    /// async channel; do not consume async events concurrently while `init`
    /// runs.
    pub fn init(&self, reset: bool) -> Result<(), Error> {
        if reset {
            let events = &self.shared.async_rx;
            let deadline = Instant::now() + DRAIN_WINDOW;
            while Instant::now() < deadline {
                let left = deadline.saturating_duration_since(Instant::now());
                match events.recv_timeout(left) {
                    Ok(stale) => trace!("{}: drained {:?}", self.name, stale),
                    Err(_) => break,
                }
            }

            self.cmd("+RST", &mut [])?;

            let deadline = Instant::now() + READY_TIMEOUT;
            loop {
                let left = deadline.saturating_duration_since(Instant::now());
                match events.recv_timeout(left) {
                    Ok(event) if event.text == "ready" => break,
                    Ok(_) => continue,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(self.fail("ready", ErrorKind::Timeout));
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(self.fail("ready", closed()));
                    }
                }
            }
        }
        self.cmd("E0", &mut [])?;
        self.cmd("+SYSLOG=1", &mut [])?;
        Ok(())
    }

    /// Validates arguments and enqueues the command record.
    fn submit(
        &self,
        name: &str,
        args: &[CommandArg<'_>],
    ) -> Result<Receiver<CommandResult>, Error> {
        let (recv_len, wire) = split_args(args).map_err(|kind| self.fail(name, kind))?;
        let (cmd, wait) = Command::new(name, wire, recv_len);
        self.queue
            .send(cmd)
            .map_err(|_| self.fail(name, closed()))?;
        Ok(wait)
    }

    /// Waits for completion, copies pulled data back into the caller's
    /// receive buffer and maps the reply.
    fn finish(
        &self,
        name: &str,
        args: &mut [CommandArg<'_>],
        wait: Receiver<CommandResult>,
    ) -> Result<CommandResponse, Error> {
        let result = wait.recv().map_err(|_| self.fail(name, closed()))?;
        match result {
            Ok(Reply::Empty) => Ok(CommandResponse::Empty),
            Ok(Reply::Str(s)) => Ok(CommandResponse::Str(s)),
            Ok(Reply::Conn(conn)) => Ok(CommandResponse::Conn(conn)),
            Ok(Reply::Data(data)) => {
                if let Some(CommandArg::Buf(buf)) = args.first_mut() {
                    buf[..data.len()].copy_from_slice(&data);
                }
                Ok(CommandResponse::Int(data.len()))
            }
            Err(kind) => Err(self.fail(name, kind)),
        }
    }

    fn fail(&self, command: &str, kind: ErrorKind) -> Error {
        Error::new(&self.name, command, kind)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device").field("name", &self.name).finish()
    }
}

/// A held device mutex.
///
/// Commands and raw writes issued through the guard stay adjacent on the
/// wire; no other caller can interleave until the guard is dropped. See
/// [Device::lock] for the payload transmission sequence this exists for.
pub struct DeviceLock<'a> {
    dev: &'a Device,
    _guard: MutexGuard<'a, ()>,
}

impl DeviceLock<'_> {
    /// [Device::cmd] without re-taking the mutex; the reply wait happens
    /// while the lock stays held.
    pub fn cmd(
        &self,
        name: &str,
        args: &mut [CommandArg<'_>],
    ) -> Result<CommandResponse, Error> {
        let wait = self.dev.submit(name, args)?;
        self.dev.finish(name, args, wait)
    }

    /// Writes raw payload bytes to the transport. The module must be ready
    /// to accept them, i.e. a `+CIPSEND=` for at least this many bytes was
    /// issued within this lock span.
    pub fn write(&self, payload: &[u8]) -> io::Result<()> {
        self.dev.sink.lock().write_all(payload)
    }

    /// [write](Self::write) for string payloads.
    pub fn write_str(&self, payload: &str) -> io::Result<()> {
        self.write(payload.as_bytes())
    }
}

fn closed() -> ErrorKind {
    ErrorKind::Transport("device closed".into())
}
