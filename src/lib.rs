//! # sim900 - GPRS Modem Driver
//!
//! Sim900 turns the byte-oriented serial link to a SIM900-class cellular
//! modem into two things application code can actually use: a reliable AT
//! command/response channel, and a TCP-like stream socket once a data
//! connection is up.
//!
//! ## Features
//!
//! - **Command Channel**: Send-and-assert semantics over the modem's
//!   echo/status line protocol, with per-command timeouts and bounded retries
//! - **Value Queries**: Device identifier, clock, and signal quality reads
//!   with bounded payload capture
//! - **Stream Socket**: Transparent-mode TCP payload through a fixed 48-byte
//!   ring buffer with XON/XOFF software flow control
//! - **Close Detection**: Inline removal of the modem's `\r\nCLOSED\r\n`
//!   marker from live data, surfaced as an end-of-stream transition
//! - **Deterministic Testing**: Transport, power pin, and clock are injected
//!   traits, so the whole protocol engine runs against fakes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # fn run() -> anyhow::Result<()> {
//! use sim900::client::Sim900Client;
//! use sim900::config::ModemConfig;
//! use sim900::transport::{PowerPin, SerialTransport};
//!
//! struct PowerGpio;
//! impl PowerPin for PowerGpio {
//!     fn set_high(&mut self) { /* drive the modem power line */ }
//!     fn set_low(&mut self) {}
//! }
//!
//! let transport = SerialTransport::open("/dev/ttyUSB0", 9600)?;
//! let mut client = Sim900Client::new(transport, PowerGpio, ModemConfig::default());
//!
//! client.begin(9600)?;
//! client.attach("internet", "", "")?;
//! client.connect("203.0.113.5", 80)?;
//! client.write(b"GET / HTTP/1.0\r\n\r\n");
//! while let Some(byte) = client.read_byte() {
//!     print!("{}", byte as char);
//! }
//! client.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`client`] - the connection engine: lifecycle state machine, command
//!   orchestration, and the stream surface
//! - [`protocol`] - command/response and query matchers
//! - [`buffer`] - the connected-state receive ring buffer
//! - [`transport`] - hardware seams (byte channel, power pin, clock) and the
//!   serial-port transport
//! - [`config`] - protocol timing/retry tunables
//! - [`logutil`] - single-line escaping for raw modem traffic in logs
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │  Sim900Client    │ ← lifecycle + retries + stream API
//! └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │ protocol/buffer  │ ← matchers, ring buffer, flow control
//! └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │    Transport     │ ← serial byte channel
//! └──────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! The driver is single-threaded and synchronous by design - it targets
//! resource-constrained hosts with no scheduler assumptions. Calls block up
//! to their configured timeout and are not reentrant; the engine expects one
//! logical flow of control.

pub mod buffer;
pub mod client;
pub mod config;
pub mod logutil;
pub mod protocol;
pub mod transport;
