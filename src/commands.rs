//! A handful of device commands built on [`Master::ask`].
//!
//! The full command catalog of a fiscal register is several hundred
//! entries long and lives outside of this crate. The commands here cover
//! the common shapes: operator and administrator passwords, fixed-width
//! text fields, the fast path, and extended opcodes.
//!
//! Text is passed as already encoded bytes, in the code page the device is
//! configured for.

use snafu::ensure;

use crate::channel::{Connector, Delay};
use crate::config::BaudRate;
use crate::frame::Opcode;
use crate::master::{AskOptions, Error, Master, Reply, UnexpectedAnswerSnafu};
use crate::types::{Int2, InvalidArgumentSnafu, TextTooLongSnafu};

pub const SHORT_STATUS: Opcode = Opcode::Short(0x10);
pub const BEEP: Opcode = Opcode::Short(0x13);
pub const SET_EXCHANGE_PARAMS: Opcode = Opcode::Short(0x14);
pub const READ_EXCHANGE_PARAMS: Opcode = Opcode::Short(0x15);
pub const PRINT_LINE: Opcode = Opcode::Short(0x17);
pub const CUT_RECEIPT: Opcode = Opcode::Short(0x25);
pub const OPEN_CASH_DRAWER: Opcode = Opcode::Short(0x28);
pub const X_REPORT: Opcode = Opcode::Short(0x40);
pub const Z_REPORT: Opcode = Opcode::Short(0x41);
pub const CANCEL_CHECK: Opcode = Opcode::Short(0x88);
pub const DEVICE_TYPE: Opcode = Opcode::Short(0xFC);
pub const FISCAL_STORAGE_NUMBER: Opcode = Opcode::Extended(0x02);

/// Width of the text field of [`print_line`].
pub const LINE_WIDTH: usize = 40;

/// Device port the host is wired to.
pub const HOST_PORT: u8 = 0;

/// Answer to [`short_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortStatus {
    /// Number of the operator that issued the command, 1..=30.
    pub operator: u8,
    pub flags: u16,
    pub mode: u8,
    pub submode: u8,
    /// Operations in the current receipt.
    pub operations: u16,
    /// Backup battery voltage, raw units.
    pub battery_voltage: u8,
    /// Power supply voltage, raw units.
    pub power_voltage: u8,
    pub fiscal_memory_error: u8,
    pub eklz_error: u8,
}

/// Answer to [`device_type`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceType {
    pub device_type: u8,
    pub subtype: u8,
    pub protocol_version: u8,
    pub protocol_subversion: u8,
    pub model: u8,
    pub language: u8,
    /// Device name in the device's code page.
    pub name: Vec<u8>,
}

/// Line settings of one device port, as reported by
/// [`read_exchange_params`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExchangeParams {
    pub port: u8,
    pub baud_rate: BaudRate,
    /// Byte timeout in the device's nonlinear encoding.
    pub byte_timeout: u8,
}

/// Paper selection of [`print_line`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Tape {
    Control,
    Receipt,
}

impl Tape {
    fn flags(self) -> u8 {
        match self {
            Tape::Control => 0b01,
            Tape::Receipt => 0b10,
        }
    }
}

/// Check that the answer carries at least `len` data bytes.
fn expect_data(reply: &Reply, len: usize) -> Result<&[u8], Error> {
    ensure!(
        reply.data.len() >= len,
        UnexpectedAnswerSnafu {
            opcode: reply.opcode,
            reason: "answer too short",
        }
    );
    Ok(&reply.data)
}

/// The operator number most commands answer with.
fn operator(reply: &Reply) -> Result<u8, Error> {
    Ok(expect_data(reply, 1)?[0])
}

fn with_admin<K: Connector, D: Delay>(kkt: &Master<K, D>, extra: &[u8]) -> Vec<u8> {
    let mut params = kkt.config().admin_password.to_vec();
    params.extend_from_slice(extra);
    params
}

fn with_operator<K: Connector, D: Delay>(kkt: &Master<K, D>, extra: &[u8]) -> Vec<u8> {
    let mut params = kkt.config().password.to_vec();
    params.extend_from_slice(extra);
    params
}

/// Short state request, 10h.
pub fn short_status<K: Connector, D: Delay>(kkt: &mut Master<K, D>) -> Result<ShortStatus, Error> {
    let reply = kkt.ask(SHORT_STATUS, None, AskOptions::default())?;
    let data = expect_data(&reply, 11)?;
    Ok(ShortStatus {
        operator: data[0],
        flags: u16::from_le_bytes([data[1], data[2]]),
        mode: data[3],
        submode: data[4],
        operations: *Int2::from_bytes(&[data[5], data[10]]) as u16,
        battery_voltage: data[6],
        power_voltage: data[7],
        fiscal_memory_error: data[8],
        eklz_error: data[9],
    })
}

/// Beep, 13h. Returns the operator number.
pub fn beep<K: Connector, D: Delay>(kkt: &mut Master<K, D>) -> Result<u8, Error> {
    let reply = kkt.ask(BEEP, None, AskOptions::default())?;
    operator(&reply)
}

/// Set the line settings of a device port, 14h.
///
/// The device acknowledges at the old speed. If `port` is [`HOST_PORT`],
/// the host side follows to `baud_rate` once the answer arrived, and the
/// next command goes out at the new speed. Other ports leave the host
/// speed alone.
pub fn set_exchange_params<K: Connector, D: Delay>(
    kkt: &mut Master<K, D>,
    port: u8,
    baud_rate: BaudRate,
    byte_timeout: u8,
) -> Result<(), Error> {
    let params = with_admin(kkt, &[port, baud_rate.code(), byte_timeout]);
    kkt.ask(SET_EXCHANGE_PARAMS, Some(&params), AskOptions::default())?;
    if port == HOST_PORT {
        kkt.set_baud_rate(baud_rate);
    }
    Ok(())
}

/// Read the line settings of a device port, 15h.
pub fn read_exchange_params<K: Connector, D: Delay>(
    kkt: &mut Master<K, D>,
    port: u8,
) -> Result<ExchangeParams, Error> {
    let params = with_admin(kkt, &[port]);
    let reply = kkt.ask(READ_EXCHANGE_PARAMS, Some(&params), AskOptions::default())?;
    let data = expect_data(&reply, 2)?;
    let baud_rate = BaudRate::from_code(data[0]).ok_or_else(|| {
        UnexpectedAnswerSnafu {
            opcode: READ_EXCHANGE_PARAMS,
            reason: "unknown speed code",
        }
        .build()
    })?;
    Ok(ExchangeParams {
        port,
        baud_rate,
        byte_timeout: data[1],
    })
}

/// Print one line of up to [`LINE_WIDTH`] bytes, 17h.
///
/// Uses the fast path, so consecutive lines go out without reopening the
/// port. Returns the operator number.
pub fn print_line<K: Connector, D: Delay>(
    kkt: &mut Master<K, D>,
    text: &[u8],
    tape: Tape,
) -> Result<u8, Error> {
    if text.len() > LINE_WIDTH {
        let source = TextTooLongSnafu {
            len: text.len(),
            max: LINE_WIDTH,
        }
        .build();
        return Err(source.into());
    }
    let mut field = [0u8; LINE_WIDTH];
    field[..text.len()].copy_from_slice(text);
    let mut params = with_operator(kkt, &[tape.flags()]);
    params.extend_from_slice(&field);
    let reply = kkt.ask(PRINT_LINE, Some(&params), AskOptions::fast())?;
    operator(&reply)
}

/// Cut the receipt, 25h. Returns the operator number.
pub fn cut_receipt<K: Connector, D: Delay>(
    kkt: &mut Master<K, D>,
    full: bool,
) -> Result<u8, Error> {
    let params = with_operator(kkt, &[if full { 0 } else { 1 }]);
    let reply = kkt.ask(CUT_RECEIPT, Some(&params), AskOptions::default())?;
    operator(&reply)
}

/// Open cash drawer 0 or 1, 28h. Returns the operator number.
pub fn open_cash_drawer<K: Connector, D: Delay>(
    kkt: &mut Master<K, D>,
    drawer: u8,
) -> Result<u8, Error> {
    if drawer > 1 {
        return Err(InvalidArgumentSnafu {
            what: "cash drawer",
            value: i64::from(drawer),
        }
        .build()
        .into());
    }
    let params = with_admin(kkt, &[drawer]);
    let reply = kkt.ask(OPEN_CASH_DRAWER, Some(&params), AskOptions::default())?;
    operator(&reply)
}

/// Daily report without closing the shift, 40h.
pub fn x_report<K: Connector, D: Delay>(kkt: &mut Master<K, D>) -> Result<u8, Error> {
    let params = with_admin(kkt, &[]);
    let reply = kkt.ask(X_REPORT, Some(&params), AskOptions::default())?;
    operator(&reply)
}

/// Daily report closing the shift, 41h.
pub fn z_report<K: Connector, D: Delay>(kkt: &mut Master<K, D>) -> Result<u8, Error> {
    let params = with_admin(kkt, &[]);
    let reply = kkt.ask(Z_REPORT, Some(&params), AskOptions::default())?;
    operator(&reply)
}

/// Cancel the open receipt, 88h.
pub fn cancel_check<K: Connector, D: Delay>(kkt: &mut Master<K, D>) -> Result<u8, Error> {
    let reply = kkt.ask(CANCEL_CHECK, None, AskOptions::default())?;
    operator(&reply)
}

/// Identify the device, FCh. Sent without a password.
pub fn device_type<K: Connector, D: Delay>(kkt: &mut Master<K, D>) -> Result<DeviceType, Error> {
    let reply = kkt.ask(
        DEVICE_TYPE,
        None,
        AskOptions::default().without_password(),
    )?;
    let data = expect_data(&reply, 6)?;
    Ok(DeviceType {
        device_type: data[0],
        subtype: data[1],
        protocol_version: data[2],
        protocol_subversion: data[3],
        model: data[4],
        language: data[5],
        name: data[6..].to_vec(),
    })
}

/// Serial number of the fiscal storage, FF02h. Sixteen ASCII digits.
pub fn fiscal_storage_number<K: Connector, D: Delay>(
    kkt: &mut Master<K, D>,
) -> Result<String, Error> {
    let params = with_admin(kkt, &[]);
    let reply = kkt.ask(FISCAL_STORAGE_NUMBER, Some(&params), AskOptions::default())?;
    let data = expect_data(&reply, 16)?;
    Ok(String::from_utf8_lossy(&data[..16])
        .trim_end_matches(char::from(0))
        .to_string())
}
