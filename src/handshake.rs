//! The ENQ/ACK/NAK exchange around every command.
//!
//! After a command frame has been written, the host asks for the device
//! state with ENQ. `NAK` means the device is idle and waiting for a
//! command, `ACK` means an answer is being prepared. The answer starts with
//! STX, which may take a while to arrive, so the host polls for it with a
//! growing pause between reads.
//!
//! Any error returned from here leaves the line in an unknown state. The
//! owner of the connection must drop it.

use std::time::Duration;

use log::{debug, trace, warn};
use snafu::ResultExt;

use crate::ascii::{ACK, ENQ, NAK, STX};
use crate::channel::{ByteChannel, Delay};
use crate::frame::{self, Response};
use crate::master::{
    Error, IoSnafu, NoResponseSnafu, NotReadySnafu, TransportError,
    UnexpectedByteSnafu,
};
use crate::retry::RetryPolicy;

/// Device state as reported in reply to ENQ.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// NAK: idle, waiting for a command.
    AwaitingCommand,
    /// ACK: busy preparing an answer.
    PreparingAnswer,
}

/// Handshake on a borrowed channel.
#[derive(Debug)]
pub struct Handshake<'a, C: ?Sized, D: ?Sized> {
    channel: &'a mut C,
    delay: &'a mut D,
    policy: &'a RetryPolicy,
    timeout: Duration,
}

impl<'a, C, D> Handshake<'a, C, D>
where
    C: ByteChannel + ?Sized,
    D: Delay + ?Sized,
{
    /// `timeout` is the per-read timeout of the connection.
    pub fn new(
        channel: &'a mut C,
        delay: &'a mut D,
        policy: &'a RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            channel,
            delay,
            policy,
            timeout,
        }
    }

    /// Send ENQ and return the device state.
    ///
    /// # Errors
    /// [`TransportError::NoResponse`] if the device stays silent,
    /// [`TransportError::UnexpectedByte`] for anything but ACK or NAK.
    pub fn check_state(&mut self) -> Result<DeviceState, TransportError> {
        self.write_control(ENQ)?;
        let mut answer = self.read_byte()?;
        if answer.is_none() {
            self.delay.delay(self.policy.min_timeout);
            answer = self.read_byte()?;
        }
        match answer {
            Some(NAK) => Ok(DeviceState::AwaitingCommand),
            Some(ACK) => Ok(DeviceState::PreparingAnswer),
            Some(byte) => UnexpectedByteSnafu { byte, stage: "ENQ" }.fail(),
            None => NoResponseSnafu { stage: "ENQ" }.fail(),
        }
    }

    /// Wait for the first byte of an answer, backing off between reads.
    ///
    /// Returns `true` if the byte was STX and `false` for any other byte.
    ///
    /// # Errors
    /// [`TransportError::NoResponse`] once the retry budget is spent.
    pub fn check_stx(&mut self) -> Result<bool, TransportError> {
        let mut answer = self.read_byte()?;
        let mut backoff = self.policy.backoff();
        while answer.is_none() {
            let sleep = match backoff.next() {
                Some(sleep) => sleep,
                None => return NoResponseSnafu { stage: "STX" }.fail(),
            };
            trace!("no STX yet, sleeping {:?}", sleep);
            self.delay.delay(sleep);
            answer = self.read_byte()?;
        }
        Ok(answer == Some(STX))
    }

    /// Drop an answer that is still pending in the device.
    ///
    /// Returns `true` once the device reports that nothing is pending, or
    /// `false` if it still had something to say after every attempt.
    pub fn clear(&mut self) -> Result<bool, TransportError> {
        for _ in 0..self.policy.max_attempts {
            self.write_control(ENQ)?;
            match self.read_byte()? {
                None | Some(NAK) => return Ok(true),
                Some(byte) => {
                    trace!("answer pending ({:#04x}), retrying", byte);
                    self.delay.delay(self.policy.min_timeout * 10);
                }
            }
        }
        warn!("device still busy after {} rounds", self.policy.max_attempts);
        Ok(false)
    }

    /// Read a complete answer to a command whose opcode is `opcode_len`
    /// bytes wide.
    ///
    /// # Errors
    /// [`Error::Transport`] if the device does not get ready or never
    /// starts its answer, [`Error::Framing`] if the answer is malformed.
    /// The answer is not acknowledged, that is up to the caller.
    pub fn read_response(&mut self, opcode_len: usize) -> Result<Response, Error> {
        if self.check_state()? == DeviceState::AwaitingCommand {
            self.await_answer()?;
        }

        let mut stx = false;
        for _ in 0..self.policy.max_attempts {
            if self.check_stx()? {
                stx = true;
                break;
            }
            warn!("discarding stray byte while waiting for STX");
        }
        if !stx {
            return Err(TransportError::NoStx.into());
        }

        let declared = self.read_byte()?.ok_or(frame::Error::Truncated)?;
        let mut frame = vec![0; usize::from(declared) + 2];
        frame[0] = declared;
        let received = self
            .channel
            .read(&mut frame[1..], self.timeout)?;
        frame.truncate(received + 1);
        debug!("received {:02x?}", frame);

        Ok(frame::decode_response(&frame, opcode_len)?)
    }

    /// Poll with ENQ until the device reports that it is preparing the
    /// answer.
    fn await_answer(&mut self) -> Result<(), TransportError> {
        for _ in 0..self.policy.max_attempts {
            if self.check_state()? == DeviceState::PreparingAnswer {
                return Ok(());
            }
        }
        NotReadySnafu.fail()
    }

    fn write_control(&mut self, byte: u8) -> Result<(), TransportError> {
        trace!("-> {:#04x}", byte);
        self.channel.write(&[byte]).context(IoSnafu)
    }

    fn read_byte(&mut self) -> Result<Option<u8>, TransportError> {
        let mut buf = [0];
        let len = self.channel.read(&mut buf, self.timeout).context(IoSnafu)?;
        let byte = if len == 0 { None } else { Some(buf[0]) };
        trace!("<- {:02x?}", byte);
        Ok(byte)
    }
}
