//! Connection handles and unsolicited events.

use crossbeam_channel::Receiver;

use crate::error::ErrorKind;

/// A single TCP or UDP connection held open by the module.
///
/// Handles are produced by dial commands
/// ([cmd_conn](crate::device::Device::cmd_conn)) or, with the server channel
/// enabled, by remote peers connecting in.
#[derive(Debug)]
pub struct Connection {
    /// Connection id in multi-connection mode, `-1` in single-connection
    /// mode.
    pub id: i32,

    /// Inbound channel for this connection.
    ///
    /// In active receive mode every item is one [Packet::Data] frame; in
    /// passive receive mode the module announces buffered data with
    /// [Packet::Available] and the host pulls it via `+CIPRECVDATA=`.
    /// Channel disconnection is the end-of-stream signal: the receiver task
    /// drops its sender when the module reports `CLOSED`.
    ///
    /// The channel holds a few frames only and the receiver task blocks while
    /// it is full, which stalls all traffic from the module. Consume it
    /// promptly.
    pub rx: Receiver<Packet>,
}

/// One item delivered on a connection channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    /// An owned inbound frame (active receive mode).
    Data(Vec<u8>),
    /// Data is buffered on the module and ready to be pulled (passive
    /// receive mode).
    Available,
}

/// An unsolicited line from the module, or a receive-side failure.
///
/// ESP-AT documentation calls these Active Message Reports: state changes
/// like `ready`, `WIFI CONNECTED` or `WIFI GOT IP`. Transport and parse
/// errors with no pending command are delivered here as well, with
/// [error](AsyncEvent::error) set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AsyncEvent {
    /// The reported line, without CRLF for module state lines. Empty for the
    /// overrun marker.
    pub text: String,

    /// The failure this event reports, if any.
    pub error: Option<ErrorKind>,
}

impl AsyncEvent {
    pub(crate) fn line(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            error: None,
        }
    }

    pub(crate) fn failure(text: String, kind: ErrorKind) -> Self {
        Self {
            text,
            error: Some(kind),
        }
    }

    pub(crate) fn overrun() -> Self {
        Self {
            text: String::new(),
            error: None,
        }
    }

    /// True for the marker event inserted when older events were dropped
    /// because the async channel was full.
    pub fn is_overrun(&self) -> bool {
        self.text.is_empty() && self.error.is_none()
    }
}
