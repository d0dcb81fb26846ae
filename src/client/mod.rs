//! # Connection Engine
//!
//! [`Sim900Client`] owns the serial channel to the modem and drives it
//! through the whole lifecycle: power-on and line setup ([`begin`]), SIM
//! unlock ([`set_pin`]), packet-service attach ([`attach`]), TCP connect
//! ([`connect`]), and the connected-state stream surface (read/write/peek/
//! available) until the remote peer or [`stop`] tears the connection down.
//!
//! The engine is single-threaded and synchronous: every call may block up to
//! its configured timeout, polling the injected [`Clock`], and no call is
//! reentrant. State and buffer are owned exclusively by the engine; nothing
//! external can mutate them.
//!
//! [`begin`]: Sim900Client::begin
//! [`set_pin`]: Sim900Client::set_pin
//! [`attach`]: Sim900Client::attach
//! [`connect`]: Sim900Client::connect
//! [`stop`]: Sim900Client::stop

mod errors;

use std::net::Ipv4Addr;

use log::{debug, info, warn};

use crate::buffer::ReceiveBuffer;
use crate::config::ModemConfig;
use crate::protocol::{recv_expected, recv_query, MatchOutcome};
use crate::transport::{Clock, PowerPin, SystemClock, Transport};

pub use errors::{AttachStage, Error};

/// XON: ask the modem to resume sending data.
const FLOW_ON: u8 = 0x11;
/// XOFF: ask the modem to pause sending data.
const FLOW_OFF: u8 = 0x13;
/// SUB byte sent ahead of a connected-state flush.
const FLUSH_MARK: u8 = 0x1a;

/// Refill is triggered whenever fewer than this many bytes are buffered, so
/// a read never starves while the transport still has data queued.
const REFILL_THRESHOLD: usize = 10;

/// Lifecycle state of the engine. Progresses monotonically through the setup
/// phases, then cycles `Connected` -> `Closed` -> `EndOfStream` -> (via
/// [`Sim900Client::stop`]) back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed but the modem has not answered a probe yet.
    Inactive,
    /// Modem alive and line-configured; not attached to the packet service.
    Setup,
    /// Attached with an address; ready to open a connection.
    Idle,
    /// Transparent data connection established.
    Connected,
    /// Remote peer closed; buffered bytes may still be drained.
    Closed,
    /// Connection closed and every buffered byte consumed.
    EndOfStream,
}

/// Byte-stream capability surface of an established connection.
///
/// Application code that only needs to read and write a connected socket can
/// take `&mut dyn Stream` (or be generic over it) instead of naming the whole
/// engine type.
pub trait Stream {
    /// Write one byte. Returns how many bytes were accepted (0 when not
    /// connected).
    fn write_byte(&mut self, byte: u8) -> usize;
    /// Write a buffer. Returns how many bytes were accepted.
    fn write(&mut self, buf: &[u8]) -> usize;
    /// Read one byte, `None` at end of stream.
    fn read_byte(&mut self) -> Option<u8>;
    /// Read into `out`, returning the number of bytes read.
    fn read(&mut self, out: &mut [u8]) -> usize;
    /// Look at the next byte without consuming it.
    fn peek(&mut self) -> Option<u8>;
    /// Bytes ready to read, or `None` when the engine is not in a
    /// data-bearing state.
    fn available(&mut self) -> Option<usize>;
    /// Whether data may still be read (true while `Connected` or `Closed`).
    fn connected(&self) -> bool;
    /// Push any pending output to the wire.
    fn flush(&mut self);
}

/// Driver for a SIM900-class GPRS modem on a byte-oriented serial link.
///
/// Generic over the [`Transport`] (serial port in production), the
/// [`PowerPin`] used to toggle an unresponsive modem, and the [`Clock`] that
/// all timeouts are measured against.
pub struct Sim900Client<T, P, C = SystemClock> {
    transport: T,
    power: P,
    clock: C,
    config: ModemConfig,
    state: ConnectionState,
    flow_paused: bool,
    buf: ReceiveBuffer,
}

impl<T, P> Sim900Client<T, P, SystemClock>
where
    T: Transport,
    P: PowerPin,
{
    /// Create an engine using the wall clock.
    pub fn new(transport: T, power: P, config: ModemConfig) -> Self {
        Self::with_clock(transport, power, SystemClock::default(), config)
    }
}

impl<T, P, C> Sim900Client<T, P, C>
where
    T: Transport,
    P: PowerPin,
    C: Clock,
{
    /// Create an engine with an explicit clock. Tests pair this with a fake
    /// clock and fake transport to make every timeout deterministic.
    pub fn with_clock(transport: T, power: P, clock: C, config: ModemConfig) -> Self {
        Self {
            transport,
            power,
            clock,
            config,
            state: ConnectionState::Inactive,
            flow_paused: false,
            buf: ReceiveBuffer::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the engine is past setup, i.e. resembles a usable socket
    /// object. True for every state except `Inactive`.
    pub fn usable(&self) -> bool {
        self.state != ConnectionState::Inactive
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Bring the modem up and configure the serial line.
    ///
    /// Probes with `AT`; if the modem stays silent, pulses the power line
    /// and probes again, up to the configured number of rounds. Once the
    /// modem answers, fixes the baud rate to `speed`, restores factory
    /// settings, and enables software flow control.
    ///
    /// A definitive probe failure leaves the engine `Inactive`. A failure in
    /// one of the later steps leaves it in `Setup`, so a repeated `begin`
    /// retries those steps without power-cycling again.
    pub fn begin(&mut self, speed: u32) -> Result<(), Error> {
        let mut rounds = self.config.probe_rounds;
        let mut last = MatchOutcome::Timeout;
        while self.state == ConnectionState::Inactive && rounds > 0 {
            rounds -= 1;
            last = self.send_and_assert(
                "AT",
                "OK",
                self.config.probe_timeout_ms,
                self.config.probe_tries,
                0,
            );
            if last == MatchOutcome::Ok {
                self.state = ConnectionState::Setup;
                break;
            }
            info!("Modem unresponsive, toggling power line");
            self.power.set_high();
            self.clock.sleep_ms(self.config.power_pulse_ms);
            self.power.set_low();
            self.clock.sleep_ms(self.config.power_settle_ms);
        }
        if self.state == ConnectionState::Inactive {
            warn!("Modem did not answer the liveness probe, giving up");
            return Err(Error::from_outcome(last));
        }

        let ipr = format!("AT+IPR={speed}");
        self.assert_ok(&ipr, "OK", self.config.command_timeout_ms, 0)?;
        self.assert_ok("AT&F", "OK", self.config.command_timeout_ms, 0)?;
        self.assert_ok("AT+IFC=1,1", "OK", self.config.command_timeout_ms, 0)?;
        info!("Modem line setup complete at {} baud", speed);
        Ok(())
    }

    /// Unlock the SIM. Only meaningful between [`begin`](Self::begin) and
    /// [`attach`](Self::attach).
    pub fn set_pin(&mut self, code: &str) -> Result<(), Error> {
        self.require(ConnectionState::Setup, "SETUP")?;
        let cmd = format!("AT+CPIN={code}");
        self.assert_ok(&cmd, "OK", self.config.pin_timeout_ms, 0)
    }

    /// Attach to the packet service and bring up the wireless connection.
    ///
    /// Runs the staged sequence: SIM readiness, stale-connection shutdown,
    /// transparent mode, packet-service attach, access-point credentials,
    /// wireless bring-up, address confirmation. The first failing stage
    /// aborts with [`Error::Attach`] naming the stage and the match outcome;
    /// the engine stays in `Setup` so the attach can be retried.
    pub fn attach(&mut self, apn: &str, user: &str, pass: &str) -> Result<(), Error> {
        self.require(ConnectionState::Setup, "SETUP")?;

        self.attach_stage(
            AttachStage::SimCheck,
            "AT+CPIN?",
            "+CPIN: READY",
            self.config.command_timeout_ms,
            self.config.sim_check_fail_delay_ms,
        )?;
        self.attach_stage(
            AttachStage::Shutdown,
            "AT+CIPSHUT",
            "SHUT OK",
            self.config.command_timeout_ms,
            0,
        )?;
        self.attach_stage(
            AttachStage::ModeSet,
            "AT+CIPMODE=1",
            "OK",
            self.config.command_timeout_ms,
            self.config.long_fail_delay_ms,
        )?;
        self.attach_stage(
            AttachStage::Attach,
            "AT+CGATT=1",
            "OK",
            self.config.command_timeout_ms,
            self.config.long_fail_delay_ms,
        )?;

        // Credentials step: pause before every attempt, not just between
        // failures.
        let cstt = format!("AT+CSTT=\"{apn}\",\"{user}\",\"{pass}\"");
        let mut remaining = self.config.command_tries.max(1);
        let outcome = loop {
            self.clock.sleep_ms(self.config.start_retry_delay_ms);
            self.send_command(&cstt);
            let outcome = recv_expected(
                &mut self.transport,
                &self.clock,
                b"OK",
                self.config.command_timeout_ms,
            );
            if outcome == MatchOutcome::Ok {
                break outcome;
            }
            remaining -= 1;
            if remaining == 0 {
                break outcome;
            }
        };
        if outcome != MatchOutcome::Ok {
            return Err(Error::Attach {
                stage: AttachStage::Start,
                outcome,
            });
        }

        self.attach_stage(
            AttachStage::BringUp,
            "AT+CIICR",
            "OK",
            self.config.bring_up_timeout_ms,
            self.config.long_fail_delay_ms,
        )?;

        // Address confirmation: AT+CIFSR prints the assigned address, which
        // has no fixed literal to match. Match against ERROR instead and
        // treat a confirmed ERROR as the only failure.
        self.clock.sleep_ms(self.config.address_settle_ms);
        let outcome = self.send_and_assert(
            "AT+CIFSR",
            "ERROR",
            self.config.command_timeout_ms,
            self.config.command_tries,
            0,
        );
        if outcome == MatchOutcome::Ok {
            return Err(Error::Attach {
                stage: AttachStage::AddressFetch,
                outcome: MatchOutcome::NoMatch,
            });
        }

        self.buf.clear();
        self.flow_paused = false;
        self.state = ConnectionState::Idle;
        info!("Attached to packet service (APN {apn})");
        Ok(())
    }

    /// Open a TCP connection to `host:port`.
    ///
    /// Only reachable from `Idle`; any other state is rejected immediately
    /// without touching the transport. Each attempt re-issues the whole open
    /// command: acknowledgment first, then the connect confirmation on its
    /// much longer timeout.
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        self.require(ConnectionState::Idle, "IDLE")?;

        let cmd = format!("AT+CIPSTART=\"TCP\",\"{host}\",\"{port}\"");
        let mut remaining = self.config.connect_tries.max(1);
        let outcome = loop {
            self.send_command(&cmd);
            let mut outcome = recv_expected(
                &mut self.transport,
                &self.clock,
                b"OK",
                self.config.connect_ack_timeout_ms,
            );
            if outcome == MatchOutcome::Ok {
                outcome = recv_expected(
                    &mut self.transport,
                    &self.clock,
                    b"CONNECT",
                    self.config.connect_confirm_timeout_ms,
                );
                self.clock.sleep_ms(self.config.connect_settle_ms);
            }
            if outcome == MatchOutcome::Ok {
                break outcome;
            }
            remaining -= 1;
            if remaining == 0 {
                break outcome;
            }
        };

        if outcome == MatchOutcome::Ok {
            self.state = ConnectionState::Connected;
            info!("Connected to {host}:{port}");
            Ok(())
        } else {
            warn!("Connect to {host}:{port} failed ({outcome:?})");
            Err(Error::from_outcome(outcome))
        }
    }

    /// [`connect`](Self::connect) with a literal IPv4 address.
    pub fn connect_ip(&mut self, ip: Ipv4Addr, port: u16) -> Result<(), Error> {
        self.connect(&ip.to_string(), port)
    }

    /// Tear the connection down and return to `Idle`.
    ///
    /// No-op while `Inactive` or `Setup` (there is no connection lifecycle
    /// to reset before attach). Otherwise: reasserts flow-on if the receiver
    /// was paused, drains and discards everything buffered, and - if the
    /// connection is still up - escapes to command mode (`+++` inside its
    /// timed guard pauses) and closes it explicitly. Unconditional and
    /// idempotent: the engine always ends in `Idle` regardless of what the
    /// modem answers.
    pub fn stop(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Inactive | ConnectionState::Setup
        ) {
            return;
        }
        if self.flow_paused {
            self.flow_paused = false;
            self.transport.write_all(&[FLOW_ON]);
            self.transport.flush();
        }
        if self.state == ConnectionState::Connected {
            // Discard whatever the modem still has in flight.
            loop {
                self.buf.clear();
                if self.fill_buffer() == 0 {
                    break;
                }
            }
            if self.state == ConnectionState::Connected {
                self.clock.sleep_ms(self.config.close_guard_pre_ms);
                self.transport.write_all(b"+++");
                self.transport.flush();
                self.clock.sleep_ms(self.config.close_guard_post_ms);
                let _ = self.send_and_assert(
                    "AT+CIPCLOSE",
                    "OK",
                    self.config.command_timeout_ms,
                    self.config.command_tries,
                    0,
                );
            }
        }
        self.buf.clear();
        self.flow_paused = false;
        self.state = ConnectionState::Idle;
        debug!("Engine stopped, back to IDLE");
    }

    // ------------------------------------------------------------------
    // Stream surface
    // ------------------------------------------------------------------

    /// Write one payload byte. Accepted only while `Connected`.
    pub fn write_byte(&mut self, byte: u8) -> usize {
        self.write(&[byte])
    }

    /// Write payload bytes. Returns the number accepted (0 unless
    /// `Connected`).
    pub fn write(&mut self, buf: &[u8]) -> usize {
        if self.state != ConnectionState::Connected {
            return 0;
        }
        self.transport.write_all(buf);
        buf.len()
    }

    /// Push pending output to the wire. Only acts while `Connected`.
    pub fn flush(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        self.transport.write_all(&[FLUSH_MARK]);
        self.transport.flush();
    }

    /// Bytes ready to read. `None` when the engine is not in a data-bearing
    /// state (`Connected` or `Closed`); refills from the transport first
    /// when the buffer is running low.
    pub fn available(&mut self) -> Option<usize> {
        if !self.data_bearing() {
            return None;
        }
        if self.buf.len() < REFILL_THRESHOLD {
            self.fill_buffer();
        }
        Some(self.buf.len())
    }

    /// Next payload byte without consuming it. `None` at end of stream.
    pub fn peek(&mut self) -> Option<u8> {
        if !self.data_bearing() {
            return None;
        }
        if self.buf.len() < REFILL_THRESHOLD && self.fill_buffer() == 0 {
            return None;
        }
        self.buf.peek()
    }

    /// Read one payload byte. `None` at end of stream.
    pub fn read_byte(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.buf.pop();
        Some(byte)
    }

    /// Read payload bytes into `out`, returning how many were read.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut count = 0;
        while count < out.len() {
            match self.read_byte() {
                Some(byte) => {
                    out[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// True while data may still be read: `Connected`, or `Closed` with the
    /// buffer not yet drained. False once the stream has ended.
    pub fn connected(&self) -> bool {
        self.data_bearing()
    }

    // ------------------------------------------------------------------
    // Auxiliary queries
    // ------------------------------------------------------------------

    /// Read the device identifier (IMEI) into `out`. Returns the payload
    /// length; overlong payloads are truncated, not failed.
    pub fn get_device_id(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        self.require_command_state()?;
        self.query("AT+GSN", "", "OK", out)
    }

    /// Enable network time sync on the modem.
    pub fn setup_clock(&mut self) -> Result<(), Error> {
        self.require_command_state()?;
        self.assert_ok(
            "AT+CLTS=1",
            "OK",
            self.config.query_timeout_ms,
            self.config.query_fail_delay_ms,
        )
    }

    /// Read the modem clock into `out`.
    pub fn get_clock(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        self.require_command_state()?;
        self.query("AT+CCLK?", "+CCLK: ", "OK", out)
    }

    /// Read the signal quality report into `out`.
    pub fn get_signal_quality(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        self.require_command_state()?;
        self.query("AT+CSQ", "+CSQ: ", "OK", out)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn data_bearing(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Closed
        )
    }

    fn require(&self, wanted: ConnectionState, name: &'static str) -> Result<(), Error> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(Error::State {
                required: name,
                actual: self.state,
            })
        }
    }

    fn require_command_state(&self) -> Result<(), Error> {
        if matches!(self.state, ConnectionState::Setup | ConnectionState::Idle) {
            Ok(())
        } else {
            Err(Error::State {
                required: "SETUP or IDLE",
                actual: self.state,
            })
        }
    }

    /// Discard everything queued on the transport so a stale reply can never
    /// satisfy the next command's matcher.
    fn drain_input(&mut self) {
        while self.transport.read_byte().is_some() {}
    }

    fn send_command(&mut self, cmd: &str) {
        self.drain_input();
        debug!("--> {cmd}");
        self.transport.write_all(cmd.as_bytes());
        self.transport.write_all(b"\r\n");
        self.transport.flush();
    }

    /// Send `cmd` and match `expect`, retrying on failure with `fail_delay_ms`
    /// between attempts. Returns the last outcome; retry policy lives here
    /// and nowhere lower.
    fn send_and_assert(
        &mut self,
        cmd: &str,
        expect: &str,
        timeout_ms: u64,
        tries: u32,
        fail_delay_ms: u64,
    ) -> MatchOutcome {
        let mut remaining = tries.max(1);
        loop {
            self.send_command(cmd);
            let outcome = recv_expected(
                &mut self.transport,
                &self.clock,
                expect.as_bytes(),
                timeout_ms,
            );
            if outcome == MatchOutcome::Ok {
                return outcome;
            }
            debug!("{cmd}: {outcome:?}, {} attempt(s) left", remaining - 1);
            if fail_delay_ms > 0 {
                self.clock.sleep_ms(fail_delay_ms);
            }
            remaining -= 1;
            if remaining == 0 {
                return outcome;
            }
        }
    }

    /// [`send_and_assert`](Self::send_and_assert) with the command-tries
    /// budget, mapped into a `Result`.
    fn assert_ok(
        &mut self,
        cmd: &str,
        expect: &str,
        timeout_ms: u64,
        fail_delay_ms: u64,
    ) -> Result<(), Error> {
        match self.send_and_assert(cmd, expect, timeout_ms, self.config.command_tries, fail_delay_ms)
        {
            MatchOutcome::Ok => Ok(()),
            outcome => Err(Error::from_outcome(outcome)),
        }
    }

    fn attach_stage(
        &mut self,
        stage: AttachStage,
        cmd: &str,
        expect: &str,
        timeout_ms: u64,
        fail_delay_ms: u64,
    ) -> Result<(), Error> {
        match self.send_and_assert(cmd, expect, timeout_ms, self.config.command_tries, fail_delay_ms)
        {
            MatchOutcome::Ok => Ok(()),
            outcome => {
                warn!("Attach stage {stage:?} failed ({outcome:?})");
                Err(Error::Attach { stage, outcome })
            }
        }
    }

    /// Run a value-returning query with the standard retry budget.
    fn query(
        &mut self,
        cmd: &str,
        prefix: &str,
        trailer: &str,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let mut remaining = self.config.command_tries.max(1);
        loop {
            self.send_command(cmd);
            let (outcome, captured) = recv_query(
                &mut self.transport,
                &self.clock,
                prefix.as_bytes(),
                trailer.as_bytes(),
                out,
                self.config.query_timeout_ms,
            );
            if outcome == MatchOutcome::Ok {
                return Ok(captured);
            }
            debug!("{cmd}: {outcome:?}, {} attempt(s) left", remaining - 1);
            if self.config.query_fail_delay_ms > 0 {
                self.clock.sleep_ms(self.config.query_fail_delay_ms);
            }
            remaining -= 1;
            if remaining == 0 {
                return Err(Error::from_outcome(outcome));
            }
        }
    }

    /// Pull connected-state bytes from the transport into the ring buffer,
    /// applying software flow control, then scan for the closing marker.
    ///
    /// Returns the fill count afterwards. This is a non-blocking drain: it
    /// stops as soon as no byte is immediately available (after the brief
    /// low-backlog wait), not after a fixed read count.
    fn fill_buffer(&mut self) -> usize {
        if self.buf.is_empty() && self.state == ConnectionState::Closed {
            self.state = ConnectionState::EndOfStream;
            debug!("Receive buffer drained, end of stream");
        }
        if self.state != ConnectionState::Connected {
            return self.buf.len();
        }

        while !self.buf.is_full() {
            let backlog = self.transport.pending();
            let near_full = self
                .config
                .rx_queue_limit
                .saturating_sub(self.config.rx_queue_margin);
            if backlog > near_full {
                // The transport queue is close to overflowing. Once local
                // space is nearly gone too, ask the modem to pause.
                if self.buf.free() <= self.config.rx_low_water && !self.flow_paused {
                    self.transport.write_all(&[FLOW_OFF]);
                    self.transport.flush();
                    self.flow_paused = true;
                    debug!("Flow control: pause requested");
                }
            } else if backlog < self.config.rx_low_water {
                if self.flow_paused {
                    self.flow_paused = false;
                    self.transport.write_all(&[FLOW_ON]);
                    self.transport.flush();
                    debug!("Flow control: resume requested");
                }
                // Backlog has drained; give the line a moment before
                // concluding nothing more is coming.
                let start = self.clock.now_ms();
                while self.transport.pending() == 0
                    && self.clock.now_ms().saturating_sub(start) < self.config.drain_wait_ms
                {
                    self.clock.sleep_ms(1);
                }
            }

            match self.transport.read_byte() {
                Some(byte) => self.buf.push(byte),
                None => break,
            }
        }

        if self.buf.strip_closing_marker() {
            // Leaving Connected: the pause must not outlive the connection,
            // or the modem would stay throttled into the next session.
            if self.flow_paused {
                self.flow_paused = false;
                self.transport.write_all(&[FLOW_ON]);
                self.transport.flush();
                debug!("Flow control: resume on remote close");
            }
            self.state = if self.buf.is_empty() {
                ConnectionState::EndOfStream
            } else {
                ConnectionState::Closed
            };
            info!("Remote peer closed the connection ({:?})", self.state);
        }

        self.buf.len()
    }
}

impl<T, P, C> Stream for Sim900Client<T, P, C>
where
    T: Transport,
    P: PowerPin,
    C: Clock,
{
    fn write_byte(&mut self, byte: u8) -> usize {
        Sim900Client::write_byte(self, byte)
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        Sim900Client::write(self, buf)
    }

    fn read_byte(&mut self) -> Option<u8> {
        Sim900Client::read_byte(self)
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        Sim900Client::read(self, out)
    }

    fn peek(&mut self) -> Option<u8> {
        Sim900Client::peek(self)
    }

    fn available(&mut self) -> Option<usize> {
        Sim900Client::available(self)
    }

    fn connected(&self) -> bool {
        Sim900Client::connected(self)
    }

    fn flush(&mut self) {
        Sim900Client::flush(self)
    }
}
