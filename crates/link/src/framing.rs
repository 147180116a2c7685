//! Size-bounded link frames: return link bursts and forward BBFrames

use satdama_core::{CarrierId, CodingRate, FmtId};

use crate::packet::Packet;

/// BBFrame header length.
pub const BBHEADER_BYTES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Burst,
    BbFrame,
}

/// Frame under construction or ready to be sent.
///
/// Packets only enter through [`Frame::add_packet`], which keeps
/// `header + payload <= max_size`.
#[derive(Debug, Clone)]
pub struct Frame {
    kind: FrameKind,
    fmt_id: FmtId,
    carrier_id: CarrierId,
    max_size: usize,
    header_size: usize,
    payload_len: usize,
    packets: Vec<Packet>,
}

impl Frame {
    pub fn burst(fmt_id: FmtId, carrier_id: CarrierId, max_size: usize, header_size: usize) -> Self {
        Self::new(FrameKind::Burst, fmt_id, carrier_id, max_size, header_size)
    }

    /// BBFrame whose data field is sized from the coding rate.
    pub fn bbframe(fmt_id: FmtId, carrier_id: CarrierId, coding: CodingRate) -> Self {
        Self::new(
            FrameKind::BbFrame,
            fmt_id,
            carrier_id,
            bbframe_payload_bytes(coding) + BBHEADER_BYTES,
            BBHEADER_BYTES,
        )
    }

    fn new(kind: FrameKind, fmt_id: FmtId, carrier_id: CarrierId, max_size: usize, header_size: usize) -> Self {
        Self {
            kind,
            fmt_id,
            carrier_id,
            max_size,
            header_size,
            payload_len: 0,
            packets: Vec::new(),
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn fmt_id(&self) -> FmtId {
        self.fmt_id
    }

    pub fn carrier_id(&self) -> CarrierId {
        self.carrier_id
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Bytes still available for packets.
    pub fn free_space(&self) -> usize {
        self.max_size.saturating_sub(self.header_size + self.payload_len)
    }

    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn into_packets(self) -> Vec<Packet> {
        self.packets
    }

    /// Append a packet, handing it back if it does not fit.
    pub fn add_packet(&mut self, packet: Packet) -> Result<(), Packet> {
        if packet.len() > self.free_space() {
            return Err(packet);
        }
        self.payload_len += packet.len();
        self.packets.push(packet);
        Ok(())
    }
}

/// DVB-S2 normal frame data field length for a coding rate.
pub fn bbframe_payload_bytes(coding: CodingRate) -> usize {
    match (coding.numerator(), coding.denominator()) {
        (1, 4) => 2001,
        (1, 3) => 2676,
        (2, 5) => 3216,
        (1, 2) => 4026,
        (3, 5) => 4836,
        (2, 3) => 5380,
        (3, 4) => 6051,
        (4, 5) => 6456,
        (5, 6) => 6730,
        (8, 9) => 7184,
        (9, 10) => 7274,
        _ => 8100,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_space_never_negative() {
        let mut frame = Frame::burst(2, 0, 100, 6);
        assert_eq!(frame.free_space(), 94);
        assert!(frame.add_packet(Packet::new(1, 0, vec![0u8; 90])).is_ok());
        assert_eq!(frame.free_space(), 4);
        let back = frame.add_packet(Packet::new(1, 0, vec![0u8; 5])).unwrap_err();
        assert_eq!(back.len(), 5);
        assert!(frame.add_packet(Packet::new(1, 0, vec![0u8; 4])).is_ok());
        assert_eq!(frame.free_space(), 0);
        assert_eq!(frame.packet_count(), 2);
        assert_eq!(frame.payload_len(), 94);
    }

    #[test]
    fn test_bbframe_sizes() {
        let half = CodingRate::new(1, 2).unwrap();
        let frame = Frame::bbframe(2, 10, half);
        assert_eq!(frame.kind(), FrameKind::BbFrame);
        assert_eq!(frame.free_space(), 4026);
        assert_eq!(bbframe_payload_bytes(CodingRate::new(9, 10).unwrap()), 7274);
        assert_eq!(bbframe_payload_bytes(CodingRate::new(7, 8).unwrap()), 8100);
    }
}
