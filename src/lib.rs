//! # ESP-AT link driver
//!
//! Host-side driver core for [ESP-AT](https://docs.espressif.com/projects/esp-at/)
//! Wi-Fi/TCP-IP offload modules, driven over a bidirectional byte stream
//! (typically a serial UART).
//!
//! One writer task serializes AT commands from any number of caller threads
//! onto the wire; one receiver task classifies every inbound line and routes
//! it to the right destination: the waiting command, a per-connection data
//! channel, the async event channel or the server accept channel. A
//! zero-capacity rendezvous between the two tasks keeps exactly one command
//! in flight, so replies always pair with commands in submission order.
//!
//! This crate provides the command/event multiplexer only. Socket and
//! listener facades, Wi-Fi configuration helpers and retry policies belong
//! to the layers above it.
//!
//! ## Example
//!
//! ```
//! use std::io::Cursor;
//!
//! use esp_at_link::command::CommandArg;
//! use esp_at_link::device::Device;
//!
//! // Canned module responses; a real transport would be a serial port.
//! let replies = Cursor::new(b"\r\nOK\r\nAT version:2.1.0\r\n\r\nOK\r\n".to_vec());
//! let dev = Device::new("esp0", replies, Vec::new());
//!
//! // Join an access point.
//! dev.cmd(
//!     "+CWJAP=",
//!     &mut [CommandArg::Str("test_wifi"), CommandArg::Str("secret")],
//! )
//! .unwrap();
//!
//! // Query the firmware version; the response body is the reply.
//! let version = dev.cmd_str("+GMR", &mut []).unwrap();
//! assert_eq!("AT version:2.1.0\n", version);
//! ```
//!
//! The module must be configured with `AT+CIPDINFO=0`; with peer address
//! info enabled the inbound data headers would not parse.
#![cfg_attr(feature = "strict", deny(warnings))]

pub mod command;
pub mod connection;
pub mod device;
pub mod error;
pub(crate) mod receiver;
pub(crate) mod transport;

#[cfg(test)]
mod tests;
