//! [`ByteChannel`] over a local serial port, using the `serialport` crate.

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{DataBits, FlowControl, SerialPort};

use crate::channel::{ByteChannel, Connector};
use crate::config::{Parity, PortConfig, StopBits};
use crate::master::{OpenSnafu, TransportError};

/// Opens serial ports, 8 data bits and no flow control.
#[derive(Debug, Default, Copy, Clone)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    type Channel = SerialChannel;

    fn connect(&mut self, config: &PortConfig) -> Result<SerialChannel, TransportError> {
        let parity = match config.parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        };
        let stop_bits = match config.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };
        let port = serialport::new(config.path.as_str(), config.baud_rate.bps())
            .data_bits(DataBits::Eight)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()
            .map_err(|e| {
                OpenSnafu {
                    path: config.path.clone(),
                    message: e.to_string(),
                }
                .build()
            })?;
        debug!("opened {}", config.path);
        Ok(SerialChannel {
            port: Some(port),
            write_timeout: config.write_timeout,
        })
    }
}

/// An open serial port. Closing drops the underlying handle.
pub struct SerialChannel {
    port: Option<Box<dyn SerialPort>>,
    write_timeout: Duration,
}

impl SerialChannel {
    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl ByteChannel for SerialChannel {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        let timeout = self.write_timeout;
        let port = self.port()?;
        port.set_timeout(timeout)?;
        port.write_all(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        let mut filled = 0;
        while filled < buf.len() {
            match port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(len) => filled += len,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port()?.flush()
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn close(&mut self) {
        self.port = None;
    }
}

impl fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.port.as_ref().and_then(|port| port.name());
        f.debug_struct("SerialChannel")
            .field("port", &name)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}
