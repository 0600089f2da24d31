//! This module defines range-checked value types used to fill command
//! payloads: access credentials and fixed-width packed integers.

use snafu::{ensure, Snafu};

use arrayvec::ArrayVec;
use core::convert::{TryFrom, TryInto};
use core::ops::Deref;

/// Error type for this module
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// Numeric credentials are limited to four decimal digits.
    #[snafu(display("Credential must be in 0..=9999, got {}", value))]
    CredentialOutOfRange { value: i64 },
    /// A credential is at most four bytes long.
    #[snafu(display("Credential must be at most 4 bytes, got {}", len))]
    CredentialTooLong { len: usize },
    /// A fixed-size text field received too much text.
    #[snafu(display("Text is {} bytes, the field holds {}", len, max))]
    TextTooLong { len: usize, max: usize },
    /// A single byte command argument is out of its documented range.
    #[snafu(display("Invalid {}: {}", what, value))]
    InvalidArgument { what: &'static str, value: i64 },
}

const CREDENTIAL_MAX: i64 = 9999;

/// A 4-byte access code, sent at the start of most command payloads.
///
/// Operator and administrator passwords share this encoding, the command
/// decides which one it needs.
///
/// ## Example
/// ```
/// use kkt_proto::Credential;
/// let operator = Credential::new(1).unwrap();
/// assert_eq!(operator.as_bytes(), &[1, 0, 0, 0]);
/// let raw = Credential::from_bytes(&[0x1e]).unwrap();
/// assert_eq!(raw, Credential::new(30).unwrap());
/// ```
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
#[repr(transparent)]
pub struct Credential([u8; 4]);

/// Create a new [`Credential`] from a number, panics if it is out of range.
pub const fn credential(n: u16) -> Credential {
    if n as i64 > CREDENTIAL_MAX {
        panic!("Credential out of range.")
    }
    let b = (n as u32).to_le_bytes();
    Credential(b)
}

impl Credential {
    /// Default operator password.
    pub const OPERATOR: Credential = credential(1);
    /// Default system administrator password.
    pub const ADMINISTRATOR: Credential = credential(30);

    /// Create a credential from a number in \[0, 9999\], packed as a
    /// little-endian 4-byte integer.
    /// # Errors
    /// Returns [`Error::CredentialOutOfRange`] if `value` is out of range.
    pub fn new(value: impl TryInto<i64>) -> Result<Self, Error> {
        let value = value.try_into().unwrap_or(i64::MIN);
        ensure!(
            (0..=CREDENTIAL_MAX).contains(&value),
            CredentialOutOfRangeSnafu { value }
        );
        Ok(Self((value as u32).to_le_bytes()))
    }

    /// Create a credential from up to four explicit bytes. Missing trailing
    /// bytes are zero.
    /// # Errors
    /// Returns [`Error::CredentialTooLong`] for more than four bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        ensure!(bytes.len() <= 4, CredentialTooLongSnafu { len: bytes.len() });
        let mut buf = [0; 4];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// The on-wire representation.
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl Deref for Credential {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u16> for Credential {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}


/// A little-endian integer occupying exactly `W` bytes of a payload.
///
/// Packing truncates values that do not fit; the field width is fixed by
/// each command's layout. Unpacking zero-pads short input. Widths 2, 4
/// and 8 are signed on the wire, 3, 5, 6 and 7 are unsigned.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub struct PackedInt<const W: usize>(pub i64);

pub type Int2 = PackedInt<2>;
pub type Int3 = PackedInt<3>;
pub type Int4 = PackedInt<4>;
pub type Int5 = PackedInt<5>;
pub type Int6 = PackedInt<6>;
pub type Int7 = PackedInt<7>;
pub type Int8 = PackedInt<8>;

pub type PackedBytes = ArrayVec<u8, 8>;

impl<const W: usize> PackedInt<W> {
    const SIGNED: bool = matches!(W, 2 | 4 | 8);

    /// Format the value into the on-wire representation.
    pub fn to_bytes(self) -> PackedBytes {
        let mut buf = PackedBytes::new();
        buf.extend(self.0.to_le_bytes().iter().copied().take(W));
        buf
    }

    /// Parse a payload field. At most `W` bytes of `bytes` are used.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 8];
        let len = bytes.len().min(W).min(8);
        buf[..len].copy_from_slice(&bytes[..len]);
        let raw = i64::from_le_bytes(buf);
        if Self::SIGNED && W < 8 {
            let shift = 64 - 8 * W as u32;
            Self((raw << shift) >> shift)
        } else {
            Self(raw)
        }
    }
}

impl<const W: usize> From<PackedInt<W>> for i64 {
    fn from(value: PackedInt<W>) -> Self {
        value.0
    }
}

impl<const W: usize> Deref for PackedInt<W> {
    type Target = i64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
