//! DAMA control plane and link framing for SatDama

use satdama_core::{CoreError, FmtId, TerminalId};
use thiserror::Error;

pub mod agent;
pub mod carrier;
pub mod config;
pub mod controller;
pub mod framing;
pub mod packet;
pub mod scheduler;
pub mod telemetry;

pub use agent::{AgentState, DamaAgent, LegacyStrategy, RequestStrategy};
pub use carrier::{CarrierGroup, TerminalCategory};
pub use config::{AccessKind, CarrierGroupConfig, CategoryConfig, DamaConfig, StrategyKind, VcmTierConfig};
pub use controller::{DamaController, TerminalContext};
pub use framing::{Frame, FrameKind};
pub use packet::{Packet, PacketQueue, QueueAccess};
pub use scheduler::{ForwardScheduler, ReturnScheduler, ScheduleOutcome, UplinkScheduler};
pub use telemetry::{NullTelemetry, RecordingTelemetry, Telemetry};

#[derive(Debug, Error)]
pub enum DamaError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Terminal is not logged on")]
    NotLoggedOn,

    #[error("Terminal {0} is not logged on")]
    UnknownTerminal(TerminalId),

    #[error("Packet of {packet_len} bytes does not fit in an empty frame of {free_space} bytes (MODCOD {fmt_id})")]
    CapacityInconsistency {
        packet_len: usize,
        free_space: usize,
        fmt_id: FmtId,
    },

    #[error("Attempt to emit a frame without any packet")]
    EmptyFrame,
}
