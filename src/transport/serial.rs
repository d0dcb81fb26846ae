//! Production [`Transport`] over a real serial port.

use std::io::Read;
use std::io::Write;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::{debug, warn};
use serialport::SerialPort;

use super::Transport;

/// [`Transport`] implementation backed by the `serialport` crate.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` at `baud_rate` and prepare it for modem traffic.
    ///
    /// Applies explicit 8N1 settings (some USB serial adapters need them
    /// spelled out), raises DTR, and purges any startup noise the modem has
    /// already emitted so the first command starts from a clean line.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let mut builder = serialport::new(port_name, baud_rate).timeout(Duration::from_millis(10));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder
            .open()
            .map_err(|e| anyhow!("Failed to open serial port {}: {}", port_name, e))?;
        let _ = port.write_data_terminal_ready(true);

        // Clear any buffered startup chatter
        let mut purge_buf = [0u8; 512];
        if let Ok(available) = port.bytes_to_read() {
            if available > 0 {
                let _ = port.read(&mut purge_buf);
            }
        }
        debug!("Serial port {} initialized at {} baud", port_name, baud_rate);
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn pending(&mut self) -> usize {
        self.port.bytes_to_read().map(|n| n as usize).unwrap_or(0)
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.pending() == 0 {
            return None;
        }
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Some(buf[0]),
            Ok(_) => None,
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => None,
            Err(e) => {
                warn!("Serial read error: {}", e);
                None
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) {
        if let Err(e) = self.port.write_all(bytes) {
            warn!("Serial write error: {}", e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.port.flush() {
            warn!("Serial flush error: {}", e);
        }
    }
}
