use thiserror::Error;

/// Failure kinds produced by the driver or reported by the module.
///
/// Command-level failures reach the caller wrapped in [Error]; failures with
/// no pending command are delivered on the async event channel.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ErrorKind {
    /// The ready wait after reset expired, or the module answered a payload
    /// transmission with `SEND FAIL`.
    #[error("timeout")]
    Timeout,

    /// Malformed `+IPD` / `+CIPRECVDATA` header or broken payload framing.
    #[error("parse")]
    Parse,

    /// A receive buffer argument in a position other than the first.
    #[error("argument type")]
    ArgType,

    /// An inbound data header referenced a connection id with no open channel.
    #[error("unknown connection")]
    UnknownConnection,

    /// The serialized command frame does not fit the 128 byte scratch buffer.
    #[error("Tx buffer overflow")]
    TxOverflow,

    /// A typed command wrapper was used but the reply carried a different tag.
    #[error("response type")]
    ResponseType,

    /// The module answered `ERROR`. The code is the response body, or
    /// `"socket"` when the body was empty.
    #[error("{0}")]
    Esp(String),

    /// The byte transport failed while reading or writing.
    #[error("{0}")]
    Transport(String),
}

/// A failed device operation: which device, which command, what went wrong.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{device}: {command}: {kind}")]
pub struct Error {
    /// Device name passed to [Device::new](crate::device::Device::new).
    pub device: String,

    /// Command name without the `AT` prefix, or `"ready"` for the reset wait.
    pub command: String,

    /// The underlying failure.
    #[source]
    pub kind: ErrorKind,
}

impl Error {
    pub(crate) fn new(device: &str, command: &str, kind: ErrorKind) -> Self {
        Self {
            device: device.into(),
            command: command.into(),
            kind,
        }
    }

    /// Returns true if the operation failed because a deadline expired.
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}
