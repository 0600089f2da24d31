//! The byte-level seams of the engine: the serial line, the way it is
//! opened, and the way the engine sleeps between polls.

use std::io;
use std::time::Duration;

use crate::config::PortConfig;
use crate::master::TransportError;

/// A blocking, half-duplex serial connection.
pub trait ByteChannel {
    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout` for each.
    /// Returns the number of bytes read. A short count, including zero,
    /// means the line went quiet.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Block until everything written has been transmitted.
    fn flush(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    fn close(&mut self);
}

impl<T: ByteChannel + ?Sized> ByteChannel for Box<T> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).read(buf, timeout)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Opens a [`ByteChannel`] for a given configuration.
///
/// The dispatcher calls this lazily, and again after every forced
/// disconnect.
pub trait Connector {
    type Channel: ByteChannel;

    fn connect(&mut self, config: &PortConfig) -> Result<Self::Channel, TransportError>;
}

/// Pauses the calling thread between polls.
pub trait Delay {
    fn delay(&mut self, duration: Duration);
}

/// [`Delay`] backed by [`std::thread::sleep`].
#[derive(Debug, Default, Copy, Clone)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn delay(&mut self, duration: Duration) {
        (**self).delay(duration)
    }
}
