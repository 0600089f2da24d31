#![allow(dead_code)]

pub mod sync;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::rc::Rc;
use std::time::Duration;

use kkt_proto::ascii::{ACK, NAK};
use kkt_proto::frame::{self, Opcode};
use kkt_proto::{ByteChannel, Connector, Delay, Master, PortConfig, TransportError};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// What the host did to the line, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(Vec<u8>),
    Flush,
    Close,
}

/// Scripted device side of a serial line.
///
/// `rx` holds the bytes the device will send. `None` is a silent period:
/// a read that reaches it stops there, as if the timeout expired.
#[derive(Debug, Default)]
pub struct SerialInterface {
    rx: VecDeque<Option<u8>>,
    pub events: Vec<Event>,
    pub open: bool,
    pub connects: usize,
    do_read_error: bool,
    do_write_error: bool,
}

impl SerialInterface {
    pub fn new(rx: &[u8]) -> Rc<RefCell<SerialInterface>> {
        let serial = Rc::new(RefCell::new(SerialInterface::default()));
        serial.borrow_mut().push(rx);
        serial
    }

    pub fn push(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied().map(Some));
    }

    pub fn push_silence(&mut self, count: usize) {
        self.rx.extend((0..count).map(|_| None));
    }

    pub fn trigger_write_error(&mut self) {
        self.do_write_error = true;
    }

    pub fn trigger_read_error(&mut self) {
        self.do_read_error = true;
    }

    /// All bytes written by the host.
    pub fn tx(&self) -> Vec<u8> {
        self.writes().into_iter().flatten().collect()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.events
            .iter()
            .filter_map(|event| match event {
                Event::Write(data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of single-byte writes of `byte`.
    pub fn control_count(&self, byte: u8) -> usize {
        self.writes().iter().filter(|w| **w == [byte]).count()
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

#[derive(Debug)]
pub struct SerialIOPlane(Rc<RefCell<SerialInterface>>);

impl SerialIOPlane {
    pub fn new(serial_if: &Rc<RefCell<SerialInterface>>) -> SerialIOPlane {
        SerialIOPlane(serial_if.clone())
    }
}

impl ByteChannel for SerialIOPlane {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.do_write_error {
            inner.do_write_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO write error"));
        }
        inner.events.push(Event::Write(data.to_vec()));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        let mut inner = self.0.borrow_mut();
        if inner.do_read_error {
            inner.do_read_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO read error"));
        }
        let mut len = 0;
        while len < buf.len() {
            match inner.rx.pop_front() {
                Some(Some(byte)) => {
                    buf[len] = byte;
                    len += 1;
                }
                Some(None) | None => break,
            }
        }
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.borrow_mut().events.push(Event::Flush);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.0.borrow().open
    }

    fn close(&mut self) {
        let mut inner = self.0.borrow_mut();
        inner.open = false;
        inner.events.push(Event::Close);
    }
}

/// Hands out channels on one shared [`SerialInterface`].
#[derive(Debug)]
pub struct MockConnector(pub Rc<RefCell<SerialInterface>>);

impl Connector for MockConnector {
    type Channel = SerialIOPlane;

    fn connect(&mut self, _config: &PortConfig) -> Result<SerialIOPlane, TransportError> {
        {
            let mut inner = self.0.borrow_mut();
            inner.open = true;
            inner.connects += 1;
        }
        Ok(SerialIOPlane::new(&self.0))
    }
}

/// Records every sleep instead of sleeping.
#[derive(Debug, Default, Clone)]
pub struct RecordingDelay(Rc<RefCell<Vec<Duration>>>);

impl RecordingDelay {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.0.borrow().clone()
    }

    pub fn total(&self) -> Duration {
        self.0.borrow().iter().sum()
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.0.borrow_mut().push(duration);
    }
}

pub type MockMaster = Master<MockConnector, RecordingDelay>;

/// A master wired to a scripted line that will send `rx`.
pub fn mock_master(rx: &[u8]) -> (MockMaster, Rc<RefCell<SerialInterface>>, RecordingDelay) {
    init_logging();
    let serial = SerialInterface::new(rx);
    let delay = RecordingDelay::default();
    let master = Master::with_delay(
        MockConnector(serial.clone()),
        PortConfig::default(),
        delay.clone(),
    );
    (master, serial, delay)
}

/// A complete device answer, STX included.
pub fn answer(opcode: impl Into<Opcode>, error_code: u8, data: &[u8]) -> Vec<u8> {
    frame::encode_response(opcode.into(), error_code, data)
        .unwrap()
        .to_vec()
}

/// ACK to ENQ followed by the answer.
pub fn ready_answer(opcode: impl Into<Opcode>, error_code: u8, data: &[u8]) -> Vec<u8> {
    let mut rx = vec![ACK];
    rx.extend(answer(opcode, error_code, data));
    rx
}

/// NAK to the first ENQ, ACK to the second, then the answer.
pub fn delayed_answer(opcode: impl Into<Opcode>, error_code: u8, data: &[u8]) -> Vec<u8> {
    let mut rx = vec![NAK];
    rx.extend(ready_answer(opcode, error_code, data));
    rx
}
