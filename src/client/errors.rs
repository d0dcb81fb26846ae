use thiserror::Error;

use crate::client::ConnectionState;
use crate::protocol::MatchOutcome;

/// The attach step that failed. Attach is a strict sequence; the first
/// failing stage aborts it, so an error names exactly one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStage {
    /// SIM readiness check (`AT+CPIN?`).
    SimCheck,
    /// Forcing any stale connection shut (`AT+CIPSHUT`).
    Shutdown,
    /// Enabling transparent data mode (`AT+CIPMODE=1`).
    ModeSet,
    /// Attaching to the packet service (`AT+CGATT=1`).
    Attach,
    /// Setting access-point credentials (`AT+CSTT`).
    Start,
    /// Bringing up the wireless connection (`AT+CIICR`).
    BringUp,
    /// Confirming an address was assigned (`AT+CIFSR`).
    AddressFetch,
}

/// Errors surfaced by [`crate::client::Sim900Client`].
///
/// `Timeout` and `NoMatch` are the two transient failure kinds, already
/// retried by the command wrappers before they reach the caller. `State` is
/// rejected immediately with no transport I/O.
#[derive(Debug, Error)]
pub enum Error {
    /// The modem stayed silent past the deadline on every attempt.
    #[error("modem did not answer within the deadline")]
    Timeout,

    /// The modem answered, but not with the expected response. After retry
    /// exhaustion this points at a protocol desync or a modem-reported error
    /// rather than silence.
    #[error("modem gave an unexpected reply")]
    NoMatch,

    /// Operation invoked outside its required lifecycle state.
    #[error("operation requires {required} state, engine is in {actual:?}")]
    State {
        required: &'static str,
        actual: ConnectionState,
    },

    /// An attach stage failed; carries the stage and the underlying match
    /// outcome as separate fields.
    #[error("attach failed during {stage:?} ({outcome:?})")]
    Attach {
        stage: AttachStage,
        outcome: MatchOutcome,
    },
}

impl Error {
    /// Map a terminal (non-`Ok`) match outcome to the matching error kind.
    pub(crate) fn from_outcome(outcome: MatchOutcome) -> Self {
        match outcome {
            MatchOutcome::Timeout => Error::Timeout,
            _ => Error::NoMatch,
        }
    }
}
