//! Port and session settings, passed explicitly to the dispatcher.

use core::convert::TryFrom;
use core::time::Duration;

use crate::types::Credential;

/// Line speeds supported by the device. The discriminant is the speed code
/// used by the exchange parameter commands.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BaudRate {
    B2400 = 0,
    B4800 = 1,
    B9600 = 2,
    B19200 = 3,
    B38400 = 4,
    B57600 = 5,
    B115200 = 6,
}

impl BaudRate {
    pub const ALL: [BaudRate; 7] = [
        BaudRate::B2400,
        BaudRate::B4800,
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
    ];

    /// Bits per second.
    pub const fn bps(self) -> u32 {
        match self {
            BaudRate::B2400 => 2400,
            BaudRate::B4800 => 4800,
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115_200,
        }
    }

    /// Speed code on the wire.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Look up a speed by its wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(usize::from(code)).copied()
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = u32;

    fn try_from(bps: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|rate| rate.bps() == bps)
            .ok_or(bps)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

/// Settings of one connection to a device.
///
/// Data bits are always 8.
///
/// ## Example
/// ```
/// use kkt_proto::{BaudRate, Credential, PortConfig};
/// use std::time::Duration;
/// let config = PortConfig::new("/dev/ttyS0")
///     .baud_rate(BaudRate::B115200)
///     .timeout(Duration::from_millis(300))
///     .password(Credential::new(2).unwrap());
/// assert_eq!(config.baud_rate.bps(), 115_200);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PortConfig {
    pub path: String,
    pub baud_rate: BaudRate,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// How long to wait for each read.
    pub timeout: Duration,
    pub write_timeout: Duration,
    /// Operator credential, sent by default with every command.
    pub password: Credential,
    /// System administrator credential, used by privileged commands.
    pub admin_password: Credential,
}

impl PortConfig {
    pub const DEFAULT_PATH: &'static str = "/dev/ttyUSB0";
    pub const DEFAULT_BAUD_RATE: BaudRate = BaudRate::B4800;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(700);

    /// Default settings for the device at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: Self::DEFAULT_BAUD_RATE,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Self::DEFAULT_TIMEOUT,
            write_timeout: Self::DEFAULT_TIMEOUT,
            password: Credential::OPERATOR,
            admin_password: Credential::ADMINISTRATOR,
        }
    }

    pub fn baud_rate(mut self, baud_rate: BaudRate) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn password(mut self, password: Credential) -> Self {
        self.password = password;
        self
    }

    pub fn admin_password(mut self, password: Credential) -> Self {
        self.admin_password = password;
        self
    }
}

impl Default for PortConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PortConfig::default();
        assert_eq!(config.path, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate.bps(), 4800);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.timeout, Duration::from_millis(700));
        assert_eq!(config.password.as_bytes(), &[1, 0, 0, 0]);
        assert_eq!(config.admin_password.as_bytes(), &[30, 0, 0, 0]);
    }

    #[test]
    fn test_baud_codes() {
        for (code, rate) in BaudRate::ALL.iter().enumerate() {
            assert_eq!(usize::from(rate.code()), code);
            assert_eq!(BaudRate::from_code(code as u8), Some(*rate));
            assert_eq!(BaudRate::try_from(rate.bps()), Ok(*rate));
        }
        assert_eq!(BaudRate::from_code(7), None);
        assert_eq!(BaudRate::try_from(1200), Err(1200));
    }
}
