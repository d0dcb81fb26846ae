//! # Hardware Seams
//!
//! The driver core never touches hardware directly. Everything it consumes is
//! expressed as one of three small traits so the protocol engine can be driven
//! deterministically in tests with fake implementations:
//!
//! - [`Transport`] - the byte channel to the modem (a UART in production)
//! - [`PowerPin`] - the modem power line, used only during power-on
//! - [`Clock`] - a monotonic millisecond time source with a blocking sleep
//!
//! The production transport over a real serial port lives in [`serial`] behind
//! the `serial` feature. [`SystemClock`] is the production clock.

use std::time::Instant;

#[cfg(feature = "serial")]
pub mod serial;
#[cfg(feature = "serial")]
pub use serial::SerialTransport;

/// Byte channel to the modem.
///
/// The contract is intentionally minimal: FIFO order, non-blocking reads, and
/// a backlog count. No framing, no replay - bytes consumed through
/// [`Transport::read_byte`] are gone.
pub trait Transport {
    /// Number of received bytes waiting to be read.
    fn pending(&mut self) -> usize;

    /// Read one byte if any is waiting. Never blocks.
    fn read_byte(&mut self) -> Option<u8>;

    /// Queue bytes for transmission.
    fn write_all(&mut self, bytes: &[u8]);

    /// Push queued bytes out on the wire.
    fn flush(&mut self);
}

/// The modem power-toggle line. Only exercised while bringing an unresponsive
/// modem up during [`crate::client::Sim900Client::begin`].
pub trait PowerPin {
    fn set_high(&mut self);
    fn set_low(&mut self);
}

/// Monotonic millisecond clock.
///
/// All timeouts in the driver are measured against this trait, so a fake clock
/// that advances on [`Clock::sleep_ms`] makes every matcher and retry loop
/// fully deterministic.
pub trait Clock {
    /// Milliseconds elapsed since some fixed origin.
    fn now_ms(&self) -> u64;

    /// Block for at least `ms` milliseconds.
    fn sleep_ms(&self, ms: u64);
}

/// Wall-clock [`Clock`] backed by [`std::time::Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}
