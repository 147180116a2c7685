//! core data model for the SatDama control plane

use thiserror::Error;

pub mod types;
pub mod fmt;
pub mod terminal_fmt;
pub mod request_history;
pub mod unit_converter;
pub mod sac;
pub mod messages;

pub use fmt::{nearest_fmt_id, CodingRate, FmtDefinition, FmtTable, Modulation};
pub use terminal_fmt::{TerminalFmtRegistry, TerminalFmtState};
pub use request_history::RequestHistory;
pub use unit_converter::UnitConverter;
pub use messages::{CapacityRequest, DamaMessage, LogonRequest, LogonResponse, Logoff, TimePlan, TimeTranslationPlan};
pub use sac::{SAC_FIELD_MAX_RBDC, SAC_FIELD_MAX_VBDC};
pub use types::*;

#[derive(Debug, Error, PartialEq)]
pub enum CoreError {
    #[error("FMT id {0} is already defined")]
    DuplicateFmtId(FmtId),

    #[error("FMT id {0} is reserved")]
    ReservedFmtId(FmtId),

    #[error("FMT id {0} is not defined")]
    UnknownFmt(FmtId),

    #[error("unknown modulation label '{0}'")]
    InvalidModulation(String),

    #[error("invalid coding rate label '{0}'")]
    InvalidCodingRate(String),

    #[error("FMT definition file, line {line}: {reason}")]
    MalformedDefinition { line: usize, reason: String },

    #[error("I/O failure: {0}")]
    Io(String),

    #[error("message codec failure: {0}")]
    Codec(String),
}
