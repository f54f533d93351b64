use thiserror::Error;

/// Errors raised by the domain model itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// A status string read from storage did not match any known variant.
    #[error("unknown {kind} status: {value}")]
    UnknownStatus { kind: &'static str, value: String },

    /// A lifecycle transition that the state machine forbids.
    #[error("invalid registration transition from {from} to {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}
