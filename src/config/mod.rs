//! # Protocol Tuning Configuration
//!
//! Every timing and retry constant of the modem protocol lives in
//! [`ModemConfig`] rather than being hard-coded: close variants of this modem
//! family differ in exactly these parameters (confirmation timeouts, flow
//! control behavior), so they are configuration, not constants.
//!
//! The defaults are the stock SIM900 timings. A config can
//! be loaded from a TOML file, with any subset of fields present:
//!
//! ```toml
//! connect_confirm_timeout_ms = 75000
//! command_tries = 5
//! ```

use std::path::Path;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Tunable protocol parameters. All durations are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Timeout for each `AT` liveness probe during power-on.
    pub probe_timeout_ms: u64,
    /// Probe attempts per power-cycle round.
    pub probe_tries: u32,
    /// Power-cycle rounds before giving up on an unresponsive modem.
    pub probe_rounds: u32,
    /// How long the power line is held high to toggle the modem.
    pub power_pulse_ms: u64,
    /// Settle time after releasing the power line.
    pub power_settle_ms: u64,

    /// Default timeout for setup/attach commands.
    pub command_timeout_ms: u64,
    /// Attempts per command before the failure is surfaced.
    pub command_tries: u32,
    /// Timeout for the SIM PIN command (the SIM may need a moment).
    pub pin_timeout_ms: u64,
    /// Delay between SIM-readiness check attempts.
    pub sim_check_fail_delay_ms: u64,
    /// Delay between attempts of the slower attach steps.
    pub long_fail_delay_ms: u64,
    /// Pause before each APN-credentials attempt.
    pub start_retry_delay_ms: u64,
    /// Timeout for bringing up the wireless connection.
    pub bring_up_timeout_ms: u64,
    /// Pause before asking the modem for its assigned address.
    pub address_settle_ms: u64,

    /// Attempts to open a TCP connection.
    pub connect_tries: u32,
    /// Timeout for the open-command acknowledgment.
    pub connect_ack_timeout_ms: u64,
    /// Timeout for the connect confirmation; network setup is slow, so this
    /// is far longer than the command acknowledgment.
    pub connect_confirm_timeout_ms: u64,
    /// Settle time after a connect confirmation.
    pub connect_settle_ms: u64,

    /// Timeout for value-returning queries.
    pub query_timeout_ms: u64,
    /// Delay between query attempts.
    pub query_fail_delay_ms: u64,

    /// Guard pause before the `+++` escape sequence.
    pub close_guard_pre_ms: u64,
    /// Guard pause after the `+++` escape sequence.
    pub close_guard_post_ms: u64,

    /// Receive queue capacity of the underlying transport.
    pub rx_queue_limit: usize,
    /// Backlog within this margin of `rx_queue_limit` counts as near-full.
    pub rx_queue_margin: usize,
    /// Backlog below this resumes flow; local free space at or below this
    /// pauses it.
    pub rx_low_water: usize,
    /// How long a refill waits for more bytes once the backlog has drained.
    pub drain_wait_ms: u64,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 500,
            probe_tries: 10,
            probe_rounds: 3,
            power_pulse_ms: 1200,
            power_settle_ms: 6000,

            command_timeout_ms: 1000,
            command_tries: 3,
            pin_timeout_ms: 5000,
            sim_check_fail_delay_ms: 2000,
            long_fail_delay_ms: 5000,
            start_retry_delay_ms: 5000,
            bring_up_timeout_ms: 2000,
            address_settle_ms: 1000,

            connect_tries: 3,
            connect_ack_timeout_ms: 1000,
            connect_confirm_timeout_ms: 60_000,
            connect_settle_ms: 500,

            query_timeout_ms: 1000,
            query_fail_delay_ms: 5000,

            close_guard_pre_ms: 1000,
            close_guard_post_ms: 500,

            rx_queue_limit: 64,
            rx_queue_margin: 16,
            rx_low_water: 8,
            drain_wait_ms: 50,
        }
    }
}

impl ModemConfig {
    /// Load a configuration from a TOML file. Missing fields fall back to
    /// the defaults; the result is validated before being returned.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: Self = toml::from_str(&raw)
            .map_err(|e| anyhow!("Failed to parse config {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.probe_tries == 0 || self.probe_rounds == 0 {
            return Err(anyhow!("probe_tries and probe_rounds must be at least 1"));
        }
        if self.command_tries == 0 || self.connect_tries == 0 {
            return Err(anyhow!("command_tries and connect_tries must be at least 1"));
        }
        if self.rx_queue_margin >= self.rx_queue_limit {
            return Err(anyhow!(
                "rx_queue_margin ({}) must be below rx_queue_limit ({})",
                self.rx_queue_margin,
                self.rx_queue_limit
            ));
        }
        if self.rx_low_water == 0 {
            return Err(anyhow!("rx_low_water must be at least 1"));
        }
        Ok(())
    }
}
