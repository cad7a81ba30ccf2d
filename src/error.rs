//! Error type shared by every component of the simulator.

use crate::registers::Bank;

/// Failures surfaced by the simulator core.
///
/// "Nothing written yet" is never an error: every read path reports it as
/// `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A record had the wrong number of fields or a field of the wrong type.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// The register-protocol header did not carry the expander opcode.
    #[error("invalid opcode {0:#09b}")]
    InvalidOpcode(u8),
    /// The address maps to no register in the active bank.
    #[error("no register at address {address:#04x} in {bank}")]
    UnknownRegister { address: u8, bank: Bank },
    /// A switch or light name outside the fixed name list.
    #[error("unknown switch or light {0:?}")]
    UnknownFlag(String),
    #[error("medium I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("record encoding failed: {0}")]
    Record(#[from] csv::Error),
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl SimError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        SimError::MalformedFrame(reason.into())
    }
}
