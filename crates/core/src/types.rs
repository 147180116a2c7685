pub type TerminalId = u16;
pub type GroupId = u16;
pub type CarrierId = u8;
pub type FmtId = u8;
pub type SuperframeNumber = u16;
pub type FrameNumber = u8;

/// Rate in kbits/s.
pub type RateKbps = u32;
/// Volume in kbits.
pub type VolumeKb = u32;
/// Rate in packets per frame.
pub type RatePktpf = u32;
/// Volume in packets.
pub type VolumePkt = u32;
/// Volume in symbols.
pub type VolumeSym = u64;
pub type TimeMs = u32;
pub type TimeFrames = u16;

/// Destination id used for packets addressed to every terminal.
pub const BROADCAST_TERMINAL_ID: TerminalId = 31;
/// Identifier reported when no MODCOD fits a terminal.
pub const NO_FMT: FmtId = 0;
/// Upper bound of a return link burst, header included.
pub const MAX_RETURN_FRAME_BYTES: usize = 1200;

/// Kind of capacity carried by a request or served by a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum RequestKind {
    RateBased,
    VolumeBased,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::RateBased => write!(f, "RBDC"),
            RequestKind::VolumeBased => write!(f, "VBDC"),
        }
    }
}
