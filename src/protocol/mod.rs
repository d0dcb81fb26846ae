//! # Command/Response Matching
//!
//! The SIM900 command interpreter echoes every command line before emitting
//! its reply, and replies are only framed by CR/LF line terminators. The two
//! matchers here classify that stream one byte at a time:
//!
//! - [`recv_expected`] - match one literal status line (e.g. `OK`,
//!   `SHUT OK`, `CONNECT`) after skipping the echo
//! - [`recv_query`] - additionally capture a payload segment (device id,
//!   clock, signal quality) between the echo and the trailing status word
//!
//! Both are pure consumers: bytes they drain from the transport are not
//! replayable. Neither retries - retry policy lives entirely in the command
//! wrappers of [`crate::client`].

use log::trace;

use crate::logutil::escape_bytes;
use crate::transport::{Clock, Transport};

/// Result of one matching pass.
///
/// `Timeout` (silence) and `NoMatch` (the modem answered, but not with the
/// expected line) are deliberately distinguishable: the first suggests a dead
/// or busy modem, the second a protocol desync or a modem-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The expected literal arrived, terminated by a line break.
    Ok,
    /// No byte arrived within the timeout, regardless of partial progress.
    Timeout,
    /// The reply line diverged from the expected literal.
    NoMatch,
}

/// Per-byte phase of the matchers. Mirrors the line structure of a modem
/// exchange: echoed command line first, then the reply line(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// At the start of a line; CR is ignored, LF begins the comparison, any
    /// other byte marks this line as echo to be discarded.
    LineStart,
    /// Inside the echoed command line, waiting for its LF.
    Echo,
    /// Comparing reply bytes against the expected literal.
    Matching,
    /// The literal matched fully; only the line terminator is outstanding.
    Matched,
    /// The reply diverged; draining the rest of the line before reporting.
    Diverged,
    /// Capturing payload bytes into the caller's buffer (query only).
    Capture,
}

/// Wait for a single byte, polling the transport until `timeout_ms` elapses
/// on `clock`. The 1 ms sleep keeps the busy-wait bounded and lets a fake
/// clock drive the deadline deterministically.
fn wait_byte<T, C>(transport: &mut T, clock: &C, timeout_ms: u64) -> Option<u8>
where
    T: Transport + ?Sized,
    C: Clock + ?Sized,
{
    let start = clock.now_ms();
    loop {
        if let Some(b) = transport.read_byte() {
            return Some(b);
        }
        if clock.now_ms().saturating_sub(start) >= timeout_ms {
            return None;
        }
        clock.sleep_ms(1);
    }
}

/// Consume transport bytes until `expected` is seen as a complete reply line,
/// the reply line diverges, or `timeout_ms` passes without a byte.
///
/// The echoed command line (and any blank lines) preceding the reply are
/// skipped. A mismatch is only reported once the divergent line's terminator
/// has been seen, so a partially arrived line never misfires as `NoMatch`.
pub fn recv_expected<T, C>(
    transport: &mut T,
    clock: &C,
    expected: &[u8],
    timeout_ms: u64,
) -> MatchOutcome
where
    T: Transport + ?Sized,
    C: Clock + ?Sized,
{
    let mut phase = Phase::LineStart;
    let mut pos = 0usize;

    loop {
        let Some(r) = wait_byte(transport, clock, timeout_ms) else {
            trace!(
                "recv_expected: timeout waiting for {:?} in phase {:?}",
                escape_bytes(expected),
                phase
            );
            return MatchOutcome::Timeout;
        };
        match phase {
            Phase::LineStart => {
                if r == b'\n' {
                    pos = 0;
                    phase = if expected.is_empty() {
                        Phase::Matched
                    } else {
                        Phase::Matching
                    };
                } else if r != b'\r' {
                    phase = Phase::Echo;
                }
            }
            Phase::Echo => {
                if r == b'\n' {
                    phase = Phase::LineStart;
                }
            }
            Phase::Matching => {
                if r == expected[pos] {
                    pos += 1;
                    if pos == expected.len() {
                        phase = Phase::Matched;
                    }
                } else {
                    phase = Phase::Diverged;
                }
            }
            Phase::Matched => {
                if r == b'\n' {
                    return MatchOutcome::Ok;
                }
            }
            Phase::Diverged => {
                if r == b'\n' {
                    return MatchOutcome::NoMatch;
                }
            }
            Phase::Capture => unreachable!("capture phase is query-only"),
        }
    }
}

/// Like [`recv_expected`], but extracts a payload segment on the way.
///
/// After the echo skip, the reply line must begin with `prefix` (when
/// non-empty); payload bytes following it are copied into `out` until a line
/// terminator arrives or only the terminator slot remains, then a NUL is
/// written after the payload. Matching then continues with `trailer`
/// (typically the final status word) on the next non-empty line.
///
/// Returns the outcome plus the number of payload bytes captured. Overlong
/// payloads truncate silently; they never fail the exchange.
pub fn recv_query<T, C>(
    transport: &mut T,
    clock: &C,
    prefix: &[u8],
    trailer: &[u8],
    out: &mut [u8],
    timeout_ms: u64,
) -> (MatchOutcome, usize)
where
    T: Transport + ?Sized,
    C: Clock + ?Sized,
{
    if out.is_empty() {
        return (MatchOutcome::Ok, 0);
    }

    let mut phase = Phase::LineStart;
    let mut pos = 0usize;
    let mut captured = 0usize;
    // True until the payload segment has been taken; afterwards the machine
    // is matching `trailer` instead of `prefix`.
    let mut first = true;

    loop {
        let Some(r) = wait_byte(transport, clock, timeout_ms) else {
            trace!("recv_query: timeout in phase {:?}", phase);
            return (MatchOutcome::Timeout, captured);
        };
        match phase {
            Phase::LineStart => {
                if r == b'\n' {
                    pos = 0;
                    phase = if first && prefix.is_empty() {
                        Phase::Capture
                    } else if first {
                        Phase::Matching
                    } else if trailer.is_empty() {
                        Phase::Matched
                    } else {
                        Phase::Matching
                    };
                } else if r != b'\r' {
                    phase = Phase::Echo;
                }
            }
            Phase::Echo => {
                if r == b'\n' {
                    phase = Phase::LineStart;
                }
            }
            Phase::Matching => {
                let needle = if first { prefix } else { trailer };
                if r == needle[pos] {
                    pos += 1;
                    if pos == needle.len() {
                        phase = if first { Phase::Capture } else { Phase::Matched };
                    }
                } else {
                    phase = Phase::Diverged;
                }
            }
            Phase::Capture => {
                if r == b'\n' || r == b'\r' || captured + 1 >= out.len() {
                    out[captured] = 0;
                    first = false;
                    // Skip the remainder of the payload line, then hunt for
                    // the trailing status word.
                    phase = Phase::Echo;
                } else {
                    out[captured] = r;
                    captured += 1;
                }
            }
            Phase::Matched => {
                if r == b'\n' {
                    trace!(
                        "recv_query: captured {} byte(s): {:?}",
                        captured,
                        escape_bytes(&out[..captured])
                    );
                    return (MatchOutcome::Ok, captured);
                }
            }
            Phase::Diverged => {
                if r == b'\n' {
                    return (MatchOutcome::NoMatch, captured);
                }
            }
        }
    }
}
