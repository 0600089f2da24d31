//! Wire format of request and response frames.
//!
//! ```text
//! request:  STX len opcode(1|2) params..          lrc
//! response:     len opcode(1|2) error   data..    lrc
//! ```
//!
//! `len` counts every byte between itself and `lrc`. `lrc` is the XOR of
//! `len` and all bytes following it, up to the checksum.

use arrayvec::ArrayVec;
use core::fmt;
use nom::combinator::{consumed, map};
use nom::multi::length_data;
use nom::number::streaming::u8;
use nom::sequence::tuple;
use nom::IResult;
use snafu::{ensure, OptionExt, Snafu};

use crate::ascii::STX;
use crate::lrc;

type Buf = [u8];

/// First byte of a two byte opcode.
pub const EXTENDED_PREFIX: u8 = 0xFF;

/// Longest parameter block a request can carry.
pub const MAX_PAYLOAD: usize = 253;

/// STX, length, 255 counted bytes, checksum.
pub const MAX_FRAME_LEN: usize = 258;

/// Encoded request frame.
pub type FrameBytes = ArrayVec<u8, MAX_FRAME_LEN>;

/// Error type for this module
#[derive(Debug, Snafu, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The parameters do not fit in a single frame.
    #[snafu(display("Payload of {} bytes exceeds the {} byte limit", len, max))]
    PayloadTooLong { len: usize, max: usize },
    /// No bytes at all, not even the length byte.
    #[snafu(display("Empty frame"))]
    Truncated,
    /// The request does not start with STX.
    #[snafu(display("Expected STX, found {:#04x}", found))]
    MissingStx { found: u8 },
    /// The length byte disagrees with the number of bytes received.
    #[snafu(display("Frame declares {} bytes but {} are available", declared, available))]
    LengthMismatch { declared: usize, available: usize },
    /// The length byte is too small to hold the fixed fields.
    #[snafu(display("Frame length {} is shorter than its header ({})", declared, min))]
    LengthTooShort { declared: usize, min: usize },
    /// The received LRC does not match the computed one.
    #[snafu(display("Checksum {:#04x} does not match computed {:#04x}", received, computed))]
    ChecksumMismatch { computed: u8, received: u8 },
    /// A one byte opcode that collides with the extended prefix.
    #[snafu(display("Opcode {:02X}h is reserved for extended commands", code))]
    ReservedOpcode { code: u8 },
}

/// Command code, either one byte or the `0xFF NN` extended form.
///
/// `Short(0xFF)` has no wire form, the encoders reject it.
#[derive(PartialEq, Eq, Debug, Copy, Clone, Hash)]
pub enum Opcode {
    Short(u8),
    Extended(u8),
}

impl Opcode {
    /// Create an extended `0xFF NN` opcode.
    pub const fn extended(code: u8) -> Self {
        Self::Extended(code)
    }

    /// Number of bytes the opcode occupies on the wire.
    pub const fn len(self) -> usize {
        match self {
            Self::Short(_) => 1,
            Self::Extended(_) => 2,
        }
    }

    pub fn to_bytes(self) -> ArrayVec<u8, 2> {
        let mut buf = ArrayVec::new();
        match self {
            Self::Short(code) => buf.push(code),
            Self::Extended(code) => {
                buf.push(EXTENDED_PREFIX);
                buf.push(code);
            }
        }
        buf
    }

    /// Read an opcode of `len` bytes from the start of `buf`.
    fn from_wire(buf: &Buf, len: usize) -> Option<Self> {
        match (len, buf) {
            (1, [code, ..]) => Some(Self::Short(*code)),
            (2, [_, code, ..]) => Some(Self::Extended(*code)),
            _ => None,
        }
    }
}

impl From<u8> for Opcode {
    fn from(code: u8) -> Self {
        Self::Short(code)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short(code) => write!(f, "{:02X}h", code),
            Self::Extended(code) => write!(f, "FF{:02X}h", code),
        }
    }
}

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

/// A decoded and checksum-verified response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: Opcode,
    pub error_code: u8,
    pub data: Vec<u8>,
}

/// Build the request frame for `opcode` with the given parameter bytes.
///
/// # Errors
/// Returns [`Error::PayloadTooLong`] if `payload` is longer than
/// [`MAX_PAYLOAD`]; nothing is ever truncated. Returns
/// [`Error::ReservedOpcode`] for `Short(0xFF)`.
pub fn encode_request(opcode: Opcode, payload: &[u8]) -> Result<FrameBytes, Error> {
    check_opcode(opcode)?;
    ensure!(
        payload.len() <= MAX_PAYLOAD,
        PayloadTooLongSnafu {
            len: payload.len(),
            max: MAX_PAYLOAD
        }
    );
    let mut frame = FrameBytes::new();
    frame.push(STX);
    frame.push((opcode.len() + payload.len()) as u8);
    frame.extend(opcode.to_bytes());
    // the length check above guarantees room for the payload and checksum
    frame.extend(payload.iter().copied());
    frame.push(lrc(&frame[1..]));
    Ok(frame)
}

/// Build the answer frame a device sends for `opcode`, STX included.
/// Used by device emulators.
///
/// # Errors
/// Returns [`Error::PayloadTooLong`] if `data` does not fit, and
/// [`Error::ReservedOpcode`] for `Short(0xFF)`.
pub fn encode_response(opcode: Opcode, error_code: u8, data: &[u8]) -> Result<FrameBytes, Error> {
    check_opcode(opcode)?;
    ensure!(
        data.len() < MAX_PAYLOAD,
        PayloadTooLongSnafu {
            len: data.len(),
            max: MAX_PAYLOAD - 1
        }
    );
    let mut frame = FrameBytes::new();
    frame.push(STX);
    frame.push((opcode.len() + 1 + data.len()) as u8);
    frame.extend(opcode.to_bytes());
    frame.push(error_code);
    frame.extend(data.iter().copied());
    frame.push(lrc(&frame[1..]));
    Ok(frame)
}

fn check_opcode(opcode: Opcode) -> Result<(), Error> {
    ensure!(
        opcode != Opcode::Short(EXTENDED_PREFIX),
        ReservedOpcodeSnafu {
            code: EXTENDED_PREFIX
        }
    );
    Ok(())
}

/// Recompute the LRC over `length_byte ++ body` and compare it to `checksum`.
pub fn verify_checksum(length_byte: u8, body: &[u8], checksum: u8) -> bool {
    length_byte ^ lrc(body) == checksum
}

/// Parse a request frame, including the leading STX.
pub fn decode_request(buf: &[u8]) -> Result<Request, Error> {
    let (stx, rest) = buf.split_first().context(TruncatedSnafu)?;
    ensure!(*stx == STX, MissingStxSnafu { found: *stx });
    let body = checked_body(rest)?;
    let opcode_len = if body.first() == Some(&EXTENDED_PREFIX) {
        2
    } else {
        1
    };
    let opcode = Opcode::from_wire(body, opcode_len).context(LengthTooShortSnafu {
        declared: body.len(),
        min: opcode_len,
    })?;
    Ok(Request {
        opcode,
        payload: body[opcode_len..].to_vec(),
    })
}

/// Parse a response frame. `buf` starts at the length byte (the STX has
/// already been consumed by the handshake). `opcode_len` is the width of
/// the opcode that was sent, the device echoes it with the same width.
pub fn decode_response(buf: &[u8], opcode_len: usize) -> Result<Response, Error> {
    let body = checked_body(buf)?;
    let min = opcode_len + 1;
    ensure!(
        body.len() >= min,
        LengthTooShortSnafu {
            declared: body.len(),
            min
        }
    );
    let opcode = Opcode::from_wire(body, opcode_len).context(LengthTooShortSnafu {
        declared: body.len(),
        min,
    })?;
    Ok(Response {
        opcode,
        error_code: body[opcode_len],
        data: body[min..].to_vec(),
    })
}

/// Split off the length-prefixed body, check that exactly `len + 1` bytes
/// follow the length byte and verify the checksum.
fn checked_body(buf: &Buf) -> Result<&Buf, Error> {
    let declared = usize::from(*buf.first().context(TruncatedSnafu)?);
    let available = buf.len() - 1;
    match length_prefixed(buf) {
        Ok((rest, (covered, body, received))) => {
            ensure!(
                rest.is_empty(),
                LengthMismatchSnafu {
                    declared,
                    available: available - 1
                }
            );
            let computed = lrc(covered);
            ensure!(
                computed == received,
                ChecksumMismatchSnafu { computed, received }
            );
            Ok(body)
        }
        Err(_) => LengthMismatchSnafu {
            declared,
            available: available.min(declared),
        }
        .fail(),
    }
}

fn length_prefixed(buf: &Buf) -> IResult<&Buf, (&Buf, &Buf, u8)> {
    map(
        tuple((consumed(length_data(u8)), u8)),
        |((covered, body), checksum)| (covered, body, checksum),
    )(buf)
}
