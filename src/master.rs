//! Host (bus master) side of the protocol. See [`Master`] for details.

use std::fmt;
use std::io;
use std::time::Duration;

use log::{debug, warn};
use snafu::Snafu;

use crate::ascii::{ACK, NAK};
use crate::channel::{ByteChannel, Connector, Delay, ThreadDelay};
use crate::config::{BaudRate, PortConfig};
use crate::frame::{self, Opcode, Response};
use crate::handshake::Handshake;
use crate::retry::RetryPolicy;
use crate::types;

/// Why the line to the device failed. The connection is always closed
/// after one of these.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum TransportError {
    /// The device did not answer within the retry budget.
    #[snafu(display("No answer from device while waiting for {}", stage))]
    NoResponse { stage: &'static str },
    /// The device answered ENQ with something other than ACK or NAK.
    #[snafu(display("Unexpected byte {:#04x} in reply to {}", byte, stage))]
    UnexpectedByte { byte: u8, stage: &'static str },
    /// The device kept reporting that it is waiting for a command.
    #[snafu(display("Device never started preparing an answer"))]
    NotReady,
    /// Only stray bytes arrived where the answer should start.
    #[snafu(display("Answer never started with STX"))]
    NoStx,
    /// The serial port is closed.
    #[snafu(display("Serial port is closed"))]
    PortClosed,
    /// The port could not be opened.
    #[snafu(display("Cannot open {}: {}", path, message))]
    Open { path: String, message: String },
    #[snafu(display("Serial I/O failed: {}", source))]
    Io { source: io::Error },
}

/// Error type of [`Master::ask`] and the commands built on it.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The link is down or the device is silent.
    #[snafu(display("Transport error: {}", source))]
    Transport { source: TransportError },
    /// A frame could not be built, or a malformed answer was received.
    #[snafu(display("Framing error: {}", source))]
    Framing { source: frame::Error },
    /// The device executed the command and reported an error code.
    #[snafu(display("Device reported error {:#04x}", code))]
    Device { code: u8, data: Vec<u8> },
    /// A command argument is out of range; nothing was sent.
    #[snafu(display("Invalid argument: {}", source))]
    InvalidArgument { source: types::Error },
    /// A well-formed answer whose data does not match the command layout.
    #[snafu(display("Unexpected answer to {}: {}", opcode, reason))]
    UnexpectedAnswer {
        opcode: Opcode,
        reason: &'static str,
    },
}

/// Coarse classification of [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Framing,
    Device,
    InvalidArgument,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport { .. } => ErrorKind::Transport,
            Error::Framing { .. } | Error::UnexpectedAnswer { .. } => ErrorKind::Framing,
            Error::Device { .. } => ErrorKind::Device,
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// The error code reported by the device, if any.
    pub fn device_code(&self) -> Option<u8> {
        match self {
            Error::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<TransportError> for Error {
    fn from(source: TransportError) -> Self {
        Error::Transport { source }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        TransportError::Io { source }.into()
    }
}

impl From<frame::Error> for Error {
    fn from(source: frame::Error) -> Self {
        Error::Framing { source }
    }
}

impl From<types::Error> for Error {
    fn from(source: types::Error) -> Self {
        Error::InvalidArgument { source }
    }
}

/// Per-call switches of [`Master::ask`].
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AskOptions {
    /// Send the operator password when no parameters are given.
    pub use_password: bool,
    /// Close the connection after a completed exchange.
    pub disconnect_after: bool,
    /// Pause between sending the command and polling for the answer.
    pub sleep: Duration,
    /// Skip the pre-send flush, the pause and the disconnect. For
    /// commands issued back to back, like printing consecutive lines.
    pub fast: bool,
}

impl AskOptions {
    /// Options for latency sensitive commands issued back to back.
    pub fn fast() -> Self {
        Self {
            fast: true,
            ..Self::default()
        }
    }

    /// Do not send the default operator password.
    pub fn without_password(mut self) -> Self {
        self.use_password = false;
        self
    }

    pub fn keep_connected(mut self) -> Self {
        self.disconnect_after = false;
        self
    }

    pub fn sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            use_password: true,
            disconnect_after: true,
            sleep: Duration::from_secs(0),
            fast: false,
        }
    }
}

/// A successful answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Answer data following the error byte.
    pub data: Vec<u8>,
    /// Always zero, non-zero codes are returned as [`Error::Device`].
    pub error_code: u8,
    /// The opcode echoed by the device.
    pub opcode: Opcode,
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            data: response.data,
            error_code: response.error_code,
            opcode: response.opcode,
        }
    }
}

/// A lazily opened channel plus the settings it is opened with.
pub struct Connection<K: Connector> {
    connector: K,
    config: PortConfig,
    channel: Option<K::Channel>,
}

impl<K: Connector> Connection<K> {
    pub fn new(connector: K, config: PortConfig) -> Self {
        Self {
            connector,
            config,
            channel: None,
        }
    }

    pub fn config(&self) -> &PortConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Open the channel unless it is already open.
    pub fn connect(&mut self) -> Result<&mut K::Channel, TransportError> {
        if self.channel.is_none() {
            debug!(
                "connecting to {} at {} baud",
                self.config.path,
                self.config.baud_rate.bps()
            );
            self.channel = Some(self.connector.connect(&self.config)?);
        }
        match self.channel.as_mut() {
            Some(channel) if channel.is_open() => Ok(channel),
            _ => PortClosedSnafu.fail(),
        }
    }

    /// Close the channel. The next exchange opens a new one.
    pub fn disconnect(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            debug!("disconnecting from {}", self.config.path);
            channel.close();
        }
    }

    /// Change the settings. Takes effect on the next connect.
    fn reconfigure(&mut self, config: PortConfig) {
        self.disconnect();
        self.config = config;
    }
}

impl<K: Connector> fmt::Debug for Connection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Host side of the protocol: runs one command exchange at a time.
///
/// The connection is opened on first use. Every failure on the line closes
/// it; the next call opens a fresh one. A `Master` is not meant to be
/// shared, wrap it in a mutex if several threads talk to the same device.
#[derive(Debug)]
pub struct Master<K: Connector, D: Delay = ThreadDelay> {
    connection: Connection<K>,
    delay: D,
    policy: RetryPolicy,
}

#[cfg(feature = "serialport")]
impl Master<crate::serial::SerialConnector> {
    /// A master talking to a local serial port.
    pub fn serial(config: PortConfig) -> Self {
        Self::new(crate::serial::SerialConnector, config)
    }
}

impl<K: Connector> Master<K> {
    pub fn new(connector: K, config: PortConfig) -> Self {
        Self::with_delay(connector, config, ThreadDelay)
    }
}

impl<K: Connector, D: Delay> Master<K, D> {
    pub fn with_delay(connector: K, config: PortConfig, delay: D) -> Self {
        Self {
            connection: Connection::new(connector, config),
            delay,
            policy: RetryPolicy::default(),
        }
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &PortConfig {
        self.connection.config()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn connect(&mut self) -> Result<(), Error> {
        self.connection.connect()?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.connection.disconnect()
    }

    /// Switch the host side to another line speed. The port is reopened
    /// on the next exchange.
    pub fn set_baud_rate(&mut self, baud_rate: BaudRate) {
        let config = self.connection.config().clone().baud_rate(baud_rate);
        self.connection.reconfigure(config);
    }

    /// Drop an answer that may still be pending in the device.
    ///
    /// Returns `false` if the device was still busy after every attempt.
    pub fn clear(&mut self) -> Result<bool, Error> {
        let timeout = self.connection.config().timeout;
        let result = match self.connection.connect() {
            Ok(channel) => {
                Handshake::new(channel, &mut self.delay, &self.policy, timeout).clear()
            }
            Err(e) => Err(e),
        };
        result.map_err(|e| {
            self.connection.disconnect();
            e.into()
        })
    }

    /// Send a command and return the answer.
    ///
    /// `params` defaults to the operator password when `None` and
    /// `options.use_password` is set. Malformed answers are rejected with
    /// NAK and never retried; the connection is closed on every transport
    /// or framing error. A non-zero device error code is returned as
    /// [`Error::Device`].
    pub fn ask(
        &mut self,
        opcode: impl Into<Opcode>,
        params: Option<&[u8]>,
        options: AskOptions,
    ) -> Result<Reply, Error> {
        let opcode = opcode.into();
        let mut options = options;
        if options.fast {
            options.disconnect_after = false;
            options.sleep = Duration::from_secs(0);
        }

        let password = self.connection.config().password;
        let params: &[u8] = match params {
            None if options.use_password => password.as_bytes(),
            None => &[],
            Some(params) => params,
        };
        let frame = frame::encode_request(opcode, params)?;

        let response = match self.exchange(opcode, &frame, &options) {
            Ok(response) => response,
            Err(e) => {
                warn!("command {} failed: {}", opcode, e);
                self.connection.disconnect();
                return Err(e);
            }
        };
        if response.opcode != opcode {
            warn!("command {} answered as {}", opcode, response.opcode);
        }
        if options.disconnect_after {
            self.connection.disconnect();
        }
        if response.error_code != 0 {
            warn!(
                "command {} failed with device error {:#04x}",
                opcode, response.error_code
            );
            return DeviceSnafu {
                code: response.error_code,
                data: response.data,
            }
            .fail();
        }
        Ok(response.into())
    }

    /// Send the frame, read and acknowledge the answer.
    fn exchange(
        &mut self,
        opcode: Opcode,
        frame: &[u8],
        options: &AskOptions,
    ) -> Result<Response, Error> {
        let timeout = self.connection.config().timeout;
        let channel = self.connection.connect()?;

        if !options.fast {
            channel.flush()?;
        }
        debug!("sending {} {:02x?}", opcode, frame);
        channel.write(frame)?;
        channel.flush()?;
        if options.sleep > Duration::from_secs(0) {
            self.delay.delay(options.sleep);
        }

        let result =
            Handshake::new(&mut *channel, &mut self.delay, &self.policy, timeout)
                .read_response(opcode.len());
        match result {
            Ok(response) => {
                channel.write(&[ACK])?;
                channel.flush()?;
                Ok(response)
            }
            Err(Error::Framing { source }) => {
                warn!("rejecting answer to {}: {}", opcode, source);
                // best effort, the connection is dropped either way
                let _ = channel.write(&[NAK]);
                Err(Error::Framing { source })
            }
            Err(e) => Err(e),
        }
    }
}
