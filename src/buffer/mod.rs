//! # Connected-State Receive Buffer
//!
//! Once the modem is in transparent data mode the serial channel carries raw
//! TCP payload, interleaved only with the `\r\nCLOSED\r\n` marker the modem
//! injects when the remote peer disconnects. [`ReceiveBuffer`] is the fixed
//! 48-byte ring that payload accumulates in, plus the scan that detects and
//! removes that marker from live data.

/// Ring capacity in bytes. Small enough for a constrained controller, large
/// enough to hold the closing marker plus a useful run of payload.
pub const CAPACITY: usize = 48;

/// The marker the modem injects into the data stream when the remote peer
/// closes the connection.
pub const CLOSING_MARKER: &[u8] = b"\r\nCLOSED\r\n";

/// Fixed-capacity FIFO ring buffer.
///
/// Logical content is derived from the write index (next insertion slot) and
/// the fill count; the read position is `write_index - fill` modulo
/// [`CAPACITY`], so consuming a byte is just a fill-count decrement.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: [u8; CAPACITY],
    write_index: usize,
    fill: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0; CAPACITY],
            write_index: 0,
            fill: 0,
        }
    }

    /// Bytes currently buffered and unread. Always `<=` [`CAPACITY`].
    pub fn len(&self) -> usize {
        self.fill
    }

    pub fn is_empty(&self) -> bool {
        self.fill == 0
    }

    pub fn is_full(&self) -> bool {
        self.fill == CAPACITY
    }

    /// Free slots remaining.
    pub fn free(&self) -> usize {
        CAPACITY - self.fill
    }

    /// Append one byte at the write index. Caller must check [`is_full`]
    /// first; a push into a full ring would overwrite unread data.
    ///
    /// [`is_full`]: ReceiveBuffer::is_full
    pub fn push(&mut self, byte: u8) {
        debug_assert!(self.fill < CAPACITY);
        self.buf[self.write_index] = byte;
        self.write_index = (self.write_index + 1) % CAPACITY;
        self.fill += 1;
    }

    /// Oldest unread byte, without consuming it.
    pub fn peek(&self) -> Option<u8> {
        if self.fill == 0 {
            return None;
        }
        let i = (CAPACITY + self.write_index - self.fill) % CAPACITY;
        Some(self.buf[i])
    }

    /// Consume and return the oldest unread byte.
    pub fn pop(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.fill -= 1;
        Some(b)
    }

    /// Discard all buffered bytes.
    pub fn clear(&mut self) {
        self.fill = 0;
        self.write_index = 0;
    }

    /// Scan for [`CLOSING_MARKER`] and, if present, cut it (and anything
    /// buffered after it) out of the logical content. Returns whether the
    /// marker was found.
    ///
    /// The scan is anchored at the tail: candidate lengths run from the full
    /// fill count down to the marker length, each testing whether the marker
    /// starts exactly `len` bytes before the write index. The first match
    /// (earliest marker position) wins and everything from the marker onward
    /// is dropped.
    ///
    /// Known limitation: this assumes the modem emits the marker as the final
    /// chunk of the stream. If payload bytes arrive after the marker but
    /// before a scan runs, they are discarded along with it; a marker that is
    /// pushed out of the ring before scanning is missed entirely.
    pub fn strip_closing_marker(&mut self) -> bool {
        let mut len = self.fill;
        while len >= CLOSING_MARKER.len() {
            let mut i = (CAPACITY + self.write_index - len) % CAPACITY;
            let mut matched = true;
            for &m in CLOSING_MARKER {
                if self.buf[i] != m {
                    matched = false;
                    break;
                }
                i = (i + 1) % CAPACITY;
            }
            if matched {
                self.fill -= len;
                self.write_index = (self.write_index + CAPACITY - len) % CAPACITY;
                return true;
            }
            len -= 1;
        }
        false
    }
}
