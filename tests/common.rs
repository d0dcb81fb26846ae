//! Test fixtures: a scripted fake modem transport, a manually advanced
//! clock, and a recording power pin.
//!
//! The fakes are handle-based (`Rc` inside) so a test can keep a clone while
//! the engine owns the other. Everything is single-threaded, like the driver
//! itself.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use sim900::client::Sim900Client;
use sim900::config::ModemConfig;
use sim900::transport::{Clock, PowerPin, Transport};

pub type TestClient = Sim900Client<FakeTransport, FakePower, FakeClock>;

// ---------------------------------------------------------------------------
// FakeTransport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportState {
    rx: VecDeque<u8>,
    /// Bytes written since the last flush.
    tx: Vec<u8>,
    /// Every flushed chunk, in order.
    flushed: Vec<Vec<u8>>,
    /// Scripted exchanges: when a flushed chunk starts with the expected
    /// command line, the canned reply is queued onto `rx`.
    script: VecDeque<(Vec<u8>, Vec<u8>)>,
}

/// Scripted fake modem. Replies are played back when the engine flushes a
/// command line that matches the front of the script; raw data-mode bytes
/// can be injected directly with [`FakeTransport::feed`].
#[derive(Clone, Default)]
pub struct FakeTransport(Rc<RefCell<TransportState>>);

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue raw bytes as if the modem had sent them.
    pub fn feed(&self, bytes: &[u8]) {
        self.0.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Script the next expected command and the bytes the modem answers
    /// with (including the echo). Scripted entries are consumed in order.
    pub fn expect(&self, cmd: &str, reply: &[u8]) {
        self.0
            .borrow_mut()
            .script
            .push_back((format!("{cmd}\r\n").into_bytes(), reply.to_vec()));
    }

    /// Unconsumed scripted exchanges.
    pub fn script_len(&self) -> usize {
        self.0.borrow().script.len()
    }

    /// Every chunk flushed so far.
    pub fn flushed(&self) -> Vec<Vec<u8>> {
        self.0.borrow().flushed.clone()
    }

    /// All bytes ever flushed, concatenated.
    pub fn wire_log(&self) -> Vec<u8> {
        self.0.borrow().flushed.concat()
    }

    pub fn rx_len(&self) -> usize {
        self.0.borrow().rx.len()
    }
}

impl Transport for FakeTransport {
    fn pending(&mut self) -> usize {
        self.0.borrow().rx.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.0.borrow_mut().rx.pop_front()
    }

    fn write_all(&mut self, bytes: &[u8]) {
        self.0.borrow_mut().tx.extend_from_slice(bytes);
    }

    fn flush(&mut self) {
        let mut state = self.0.borrow_mut();
        let chunk = std::mem::take(&mut state.tx);
        let matches = state
            .script
            .front()
            .is_some_and(|(cmd, _)| chunk.starts_with(cmd));
        if matches {
            let (_, reply) = state.script.pop_front().unwrap();
            state.rx.extend(reply);
        }
        state.flushed.push(chunk);
    }
}

// ---------------------------------------------------------------------------
// FakeClock / FakePower
// ---------------------------------------------------------------------------

/// Clock that only moves when something sleeps on it, making every timeout
/// in the engine deterministic (and free).
#[derive(Clone, Default)]
pub struct FakeClock(Rc<Cell<u64>>);

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.0.get()
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }

    fn sleep_ms(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

/// Records every power line transition (`true` = high).
#[derive(Clone, Default)]
pub struct FakePower(Rc<RefCell<Vec<bool>>>);

impl FakePower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of high pulses driven onto the line.
    pub fn pulses(&self) -> usize {
        self.0.borrow().iter().filter(|&&high| high).count()
    }
}

impl PowerPin for FakePower {
    fn set_high(&mut self) {
        self.0.borrow_mut().push(true);
    }

    fn set_low(&mut self) {
        self.0.borrow_mut().push(false);
    }
}

// ---------------------------------------------------------------------------
// Reply builders and lifecycle scripts
// ---------------------------------------------------------------------------

/// Echo plus an arbitrary response body.
pub fn reply(cmd: &str, body: &str) -> Vec<u8> {
    format!("{cmd}\r\n{body}").into_bytes()
}

/// Echo plus the standard `OK` status line.
pub fn ok_reply(cmd: &str) -> Vec<u8> {
    reply(cmd, "\r\nOK\r\n")
}

/// Build a client wired to the given fakes with default tuning. Also hooks
/// the log facade up to the test harness, so `RUST_LOG=debug cargo test`
/// shows the engine's protocol trace.
pub fn test_client(transport: &FakeTransport, power: &FakePower, clock: &FakeClock) -> TestClient {
    let _ = env_logger::builder().is_test(true).try_init();
    Sim900Client::with_clock(
        transport.clone(),
        power.clone(),
        clock.clone(),
        ModemConfig::default(),
    )
}

/// Script a successful `begin(speed)` exchange.
pub fn script_begin(transport: &FakeTransport, speed: u32) {
    transport.expect("AT", &ok_reply("AT"));
    let ipr = format!("AT+IPR={speed}");
    transport.expect(&ipr, &ok_reply(&ipr));
    transport.expect("AT&F", &ok_reply("AT&F"));
    transport.expect("AT+IFC=1,1", &ok_reply("AT+IFC=1,1"));
}

/// Script a successful `attach` exchange for the given credentials.
pub fn script_attach(transport: &FakeTransport, apn: &str, user: &str, pass: &str) {
    transport.expect("AT+CPIN?", &reply("AT+CPIN?", "\r\n+CPIN: READY\r\n"));
    transport.expect("AT+CIPSHUT", &reply("AT+CIPSHUT", "\r\nSHUT OK\r\n"));
    transport.expect("AT+CIPMODE=1", &ok_reply("AT+CIPMODE=1"));
    transport.expect("AT+CGATT=1", &ok_reply("AT+CGATT=1"));
    let cstt = format!("AT+CSTT=\"{apn}\",\"{user}\",\"{pass}\"");
    transport.expect(&cstt, &ok_reply(&cstt));
    transport.expect("AT+CIICR", &ok_reply("AT+CIICR"));
    // The engine matches CIFSR output against ERROR; an address line must
    // NOT match, which is what success looks like. Retries run into silence.
    transport.expect("AT+CIFSR", &reply("AT+CIFSR", "\r\n10.94.113.8\r\n"));
}

/// Script a successful `connect(host, port)` exchange.
pub fn script_connect(transport: &FakeTransport, host: &str, port: u16) {
    let cmd = format!("AT+CIPSTART=\"TCP\",\"{host}\",\"{port}\"");
    transport.expect(&cmd, &reply(&cmd, "\r\nOK\r\n\r\nCONNECT\r\n"));
}

/// Drive a fresh client all the way to `Connected` against scripted fakes.
pub fn connected_client(
    transport: &FakeTransport,
    power: &FakePower,
    clock: &FakeClock,
) -> TestClient {
    script_begin(transport, 9600);
    script_attach(transport, "internet", "", "");
    script_connect(transport, "203.0.113.5", 80);
    let mut client = test_client(transport, power, clock);
    client.begin(9600).expect("begin");
    client.attach("internet", "", "").expect("attach");
    client.connect("203.0.113.5", 80).expect("connect");
    client
}
