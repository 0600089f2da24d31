//! A full-duplex in-memory serial line and a small register emulator that
//! runs on the far end in its own thread.

use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use kkt_proto::ascii::{ACK, ENQ, NAK, STX};
use kkt_proto::frame::{self, Opcode, Request};
use kkt_proto::{ByteChannel, Connector, Credential, PortConfig, TransportError};

#[derive(Default)]
struct Direction {
    data: Mutex<VecDeque<u8>>,
    available: Condvar,
}

impl Direction {
    fn send(&self, bytes: &[u8]) {
        self.data.lock().unwrap().extend(bytes.iter().copied());
        self.available.notify_all();
    }

    /// Pop one byte, waiting at most `timeout` for it.
    fn recv(&self, timeout: Duration) -> Option<u8> {
        let deadline = Instant::now() + timeout;
        let mut data = self.data.lock().unwrap();
        loop {
            if let Some(byte) = data.pop_front() {
                return Some(byte);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            data = self
                .available
                .wait_timeout(data, deadline - now)
                .expect("Mutex lock failed")
                .0;
        }
    }
}

/// Both directions of one serial cable.
#[derive(Default)]
pub struct SerialLine {
    to_device: Direction,
    to_host: Direction,
    shutdown: AtomicBool,
}

impl SerialLine {
    pub fn new() -> Arc<SerialLine> {
        Default::default()
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, SeqCst);
        self.to_device.available.notify_all();
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(SeqCst)
    }
}

/// Host end of a [`SerialLine`].
pub struct HostInterface {
    line: Arc<SerialLine>,
    open: bool,
    pub do_read_error: bool,
}

impl ByteChannel for HostInterface {
    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        self.line.to_device.send(data);
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        if self.do_read_error {
            self.do_read_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO read error"));
        }
        let mut len = 0;
        while len < buf.len() {
            match self.line.to_host.recv(timeout) {
                Some(byte) => {
                    buf[len] = byte;
                    len += 1;
                }
                None => break,
            }
        }
        Ok(len)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// Opens host ends of one shared line, counting the baud rates asked for.
pub struct LineConnector {
    line: Arc<SerialLine>,
    pub baud_rates: Arc<Mutex<Vec<u32>>>,
}

impl LineConnector {
    pub fn new(line: &Arc<SerialLine>) -> LineConnector {
        LineConnector {
            line: Arc::clone(line),
            baud_rates: Default::default(),
        }
    }
}

impl Connector for LineConnector {
    type Channel = HostInterface;

    fn connect(&mut self, config: &PortConfig) -> Result<HostInterface, TransportError> {
        self.baud_rates.lock().unwrap().push(config.baud_rate.bps());
        Ok(HostInterface {
            line: Arc::clone(&self.line),
            open: true,
            do_read_error: false,
        })
    }
}

/// Error codes the emulator answers with.
pub const ERR_PASSWORD: u8 = 0x4f;
pub const ERR_UNKNOWN_COMMAND: u8 = 0x37;

/// Emulated register on the device end of a [`SerialLine`].
///
/// Knows the short status, beep, exchange parameter, print and device type
/// commands. Every answer is resent on ENQ until the host acknowledges it.
pub struct DeviceEmulator {
    line: Arc<SerialLine>,
    answer: Option<Vec<u8>>,
    speed_code: u8,
    byte_timeout: u8,
    pub printed: Vec<Vec<u8>>,
    pub commands: Vec<Opcode>,
    /// Corrupt the checksum of the next `n` answers.
    pub corrupt_answers: usize,
}

impl DeviceEmulator {
    pub fn new(line: &Arc<SerialLine>) -> DeviceEmulator {
        DeviceEmulator {
            line: Arc::clone(line),
            answer: None,
            speed_code: 1,
            byte_timeout: 100,
            printed: Vec::new(),
            commands: Vec::new(),
            corrupt_answers: 0,
        }
    }

    fn recv(&self) -> Option<u8> {
        loop {
            if self.line.is_shut_down() {
                return None;
            }
            if let Some(byte) = self.line.to_device.recv(Duration::from_millis(20)) {
                return Some(byte);
            }
        }
    }

    fn send(&self, data: &[u8]) {
        self.line.to_host.send(data);
    }

    /// Serve the line until it is shut down.
    pub fn run(mut self) -> DeviceEmulator {
        while let Some(byte) = self.recv() {
            match byte {
                ENQ => match &self.answer {
                    Some(answer) => {
                        let mut answer = answer.clone();
                        if self.corrupt_answers > 0 {
                            self.corrupt_answers -= 1;
                            let last = answer.len() - 1;
                            answer[last] ^= 0xff;
                        }
                        self.send(&[ACK]);
                        self.send(&answer);
                    }
                    None => self.send(&[NAK]),
                },
                ACK => self.answer = None,
                STX => {
                    if let Some(request) = self.receive_request() {
                        let answer = self.execute(&request);
                        self.answer = Some(answer);
                    }
                }
                _ => {}
            }
        }
        self
    }

    fn receive_request(&mut self) -> Option<Request> {
        let len = self.recv()?;
        let mut buf = vec![STX, len];
        for _ in 0..=len {
            buf.push(self.recv()?);
        }
        frame::decode_request(&buf).ok()
    }

    fn execute(&mut self, request: &Request) -> Vec<u8> {
        self.commands.push(request.opcode);
        let (operator, admin) = (Credential::OPERATOR, Credential::ADMINISTRATOR);
        let password = request.payload.get(..4);
        let operator = Some(&operator.as_bytes()[..]);
        let admin = Some(&admin.as_bytes()[..]);
        let (error, data) = match request.opcode {
            Opcode::Short(0x10) if password == operator => {
                (0, vec![1, 0x02, 0x00, 4, 0, 3, 0x9a, 0xb4, 0, 0, 0, 0, 0, 0])
            }
            Opcode::Short(0x13) if password == operator => (0, vec![1]),
            Opcode::Short(0x14) if password == admin => {
                self.speed_code = request.payload[5];
                self.byte_timeout = request.payload[6];
                (0, vec![])
            }
            Opcode::Short(0x15) if password == admin => {
                (0, vec![self.speed_code, self.byte_timeout])
            }
            Opcode::Short(0x17) if password == operator => {
                self.printed.push(request.payload[5..].to_vec());
                (0, vec![1])
            }
            Opcode::Short(0xfc) if request.payload.is_empty() => {
                (0, vec![0, 0, 1, 2, 6, 0, b'K', b'K', b'T'])
            }
            Opcode::Short(0x10)
            | Opcode::Short(0x13)
            | Opcode::Short(0x14)
            | Opcode::Short(0x15)
            | Opcode::Short(0x17) => (ERR_PASSWORD, vec![]),
            _ => (ERR_UNKNOWN_COMMAND, vec![]),
        };
        frame::encode_response(request.opcode, error, &data)
            .unwrap()
            .to_vec()
    }
}
