//! Transport and framing engine for fiscal cash registers ("KKT") speaking
//! the Shtrih-M style binary protocol over RS-232.
//!
//! The host is the bus master. Every command is a framed `(opcode, params)`
//! pair, answered by the device with a control byte and a framed response:
//!
//! ```text
//! host   -> STX len opcode params.. lrc
//! host   -> ENQ
//! device -> ACK            (answer is being prepared)
//! device -> STX len opcode error data.. lrc
//! host   -> ACK
//! ```
//!
//! [`Master::ask`] runs one such exchange. The command catalog itself is
//! not part of the engine; [`commands`] shows how individual commands are
//! built on top of it.
//!
//! ## Example
//! ```no_run
//! use kkt_proto::{Master, PortConfig};
//! # fn main() -> Result<(), kkt_proto::Error> {
//! let mut kkt = Master::serial(PortConfig::new("/dev/ttyUSB0"));
//! let status = kkt_proto::commands::short_status(&mut kkt)?;
//! println!("mode {}", status.mode);
//! # Ok(()) }
//! ```
#![warn(missing_debug_implementations)]

pub mod channel;
pub mod commands;
pub mod config;
pub mod frame;
pub mod handshake;
pub mod master;
pub mod retry;
#[cfg(feature = "serialport")]
pub mod serial;
pub mod types;

pub use channel::{ByteChannel, Connector, Delay, ThreadDelay};
pub use config::{BaudRate, Parity, PortConfig, StopBits};
pub use frame::Opcode;
pub use master::{AskOptions, Error, ErrorKind, Master, Reply, TransportError};
pub use retry::RetryPolicy;
pub use types::Credential;

/// Control bytes of the transport layer.
pub mod ascii {
    /// Enquiry, asks the device for its state.
    pub const ENQ: u8 = 0x05;
    /// Start of a framed message.
    pub const STX: u8 = 0x02;
    /// Positive acknowledgement.
    pub const ACK: u8 = 0x06;
    /// Negative acknowledgement.
    pub const NAK: u8 = 0x15;
}

/// Longitudinal redundancy check: XOR of all bytes.
pub(crate) fn lrc(data: &[u8]) -> u8 {
    data.iter().fold(0, |checksum, byte| checksum ^ byte)
}
