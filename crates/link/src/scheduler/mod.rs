//! Turning granted capacity and queued packets into frames

use log::trace;
use satdama_core::{CarrierId, FmtId};

use crate::framing::Frame;
use crate::packet::{Packet, PacketQueue, QueueAccess};
use crate::DamaError;

pub mod forward;
pub mod return_link;
pub mod uplink;

pub use forward::ForwardScheduler;
pub use return_link::ReturnScheduler;
pub use uplink::UplinkScheduler;

/// Result of one scheduling pass.
#[derive(Debug, Default)]
pub struct ScheduleOutcome {
    pub frames: Vec<Frame>,
    /// Packets that left their queue whole.
    pub packets_sent: usize,
    /// Capacity left unused, in the unit the scheduler was given.
    pub remaining: u64,
}

impl ScheduleOutcome {
    pub(crate) fn merge(&mut self, other: ScheduleOutcome) {
        self.frames.extend(other.frames);
        self.packets_sent += other.packets_sent;
        self.remaining += other.remaining;
    }

    pub fn payload_bytes(&self) -> usize {
        self.frames.iter().map(Frame::payload_len).sum()
    }
}

/// Queue indices by ascending priority, slotted aloha excluded.
pub(crate) fn dama_queue_order(queues: &[PacketQueue]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..queues.len())
        .filter(|index| queues[*index].access() != QueueAccess::Saloha)
        .collect();
    order.sort_by_key(|index| queues[*index].priority());
    order
}

/// Fills fixed-size bursts, one granted burst slot per emitted frame.
pub(crate) struct BurstFiller {
    fmt_id: FmtId,
    carrier_id: CarrierId,
    max_size: usize,
    header_size: usize,
    bursts_left: u64,
    current: Frame,
    frames: Vec<Frame>,
    sent: usize,
}

impl BurstFiller {
    pub(crate) fn new(
        fmt_id: FmtId,
        carrier_id: CarrierId,
        max_size: usize,
        header_size: usize,
        bursts: u64,
    ) -> Result<Self, DamaError> {
        if max_size <= header_size {
            return Err(DamaError::Configuration(format!(
                "burst of {} bytes cannot hold a {} bytes header",
                max_size, header_size
            )));
        }
        Ok(Self {
            fmt_id,
            carrier_id,
            max_size,
            header_size,
            bursts_left: bursts,
            current: Frame::burst(fmt_id, carrier_id, max_size, header_size),
            frames: Vec::new(),
            sent: 0,
        })
    }

    /// Move due packets of `queue` into bursts.
    ///
    /// Returns false once every burst slot is used.
    pub(crate) fn fill_from(&mut self, queue: &mut PacketQueue, now: u64) -> Result<bool, DamaError> {
        while self.bursts_left > 0 {
            let Some(packet) = queue.pop_due(now) else {
                return Ok(true);
            };
            let free_space = self.current.free_space();
            match packet.split_at(free_space) {
                Ok((whole, None)) => {
                    self.place(whole)?;
                    self.sent += 1;
                    if self.current.free_space() == 0 {
                        self.seal()?;
                    }
                }
                Ok((chunk, Some(remainder))) => {
                    self.place(chunk)?;
                    queue.push_front(remainder);
                    self.seal()?;
                }
                Err(packet) => {
                    let packet_len = packet.len();
                    queue.push_front(packet);
                    if self.current.is_empty() {
                        return Err(DamaError::CapacityInconsistency {
                            packet_len,
                            free_space,
                            fmt_id: self.fmt_id,
                        });
                    }
                    self.seal()?;
                }
            }
        }
        Ok(false)
    }

    fn place(&mut self, packet: Packet) -> Result<(), DamaError> {
        self.current.add_packet(packet).map_err(|packet| DamaError::CapacityInconsistency {
            packet_len: packet.len(),
            free_space: self.current.free_space(),
            fmt_id: self.fmt_id,
        })
    }

    fn seal(&mut self) -> Result<(), DamaError> {
        if self.current.is_empty() {
            return Err(DamaError::EmptyFrame);
        }
        let fresh = Frame::burst(self.fmt_id, self.carrier_id, self.max_size, self.header_size);
        let frame = std::mem::replace(&mut self.current, fresh);
        trace!(
            "burst sealed on carrier {}: {} packets, {} bytes",
            self.carrier_id,
            frame.packet_count(),
            frame.payload_len()
        );
        self.frames.push(frame);
        self.bursts_left = self.bursts_left.saturating_sub(1);
        Ok(())
    }

    pub(crate) fn finish(mut self) -> ScheduleOutcome {
        if !self.current.is_empty() {
            self.frames.push(self.current);
            self.bursts_left = self.bursts_left.saturating_sub(1);
        }
        ScheduleOutcome {
            frames: self.frames,
            packets_sent: self.sent,
            remaining: self.bursts_left,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(sizes: &[usize]) -> PacketQueue {
        let mut queue = PacketQueue::new("q", 0, QueueAccess::Rbdc, 64);
        for size in sizes {
            queue.push(Packet::new(1, 0, vec![0u8; *size]), 0);
        }
        queue
    }

    #[test]
    fn test_fill_splits_across_bursts() {
        let mut queue = queue_with(&[60, 60, 60]);
        let mut filler = BurstFiller::new(2, 0, 106, 6, 10).unwrap();
        assert!(filler.fill_from(&mut queue, 0).unwrap());
        let outcome = filler.finish();
        // 100 bytes of payload per burst
        assert_eq!(outcome.frames.len(), 2);
        assert_eq!(outcome.frames[0].payload_len(), 100);
        assert_eq!(outcome.frames[1].payload_len(), 80);
        assert_eq!(outcome.packets_sent, 3);
        assert_eq!(outcome.remaining, 8);
    }

    #[test]
    fn test_fill_stops_when_slots_used() {
        let mut queue = queue_with(&[60, 60, 60]);
        let mut filler = BurstFiller::new(2, 0, 106, 6, 1).unwrap();
        assert!(!filler.fill_from(&mut queue, 0).unwrap());
        let outcome = filler.finish();
        assert_eq!(outcome.payload_bytes(), 100);
        assert_eq!(outcome.remaining, 0);
        assert_eq!(queue.byte_len(), 80);
    }

    #[test]
    fn test_unfragmentable_packet_larger_than_burst_fails() {
        let mut queue = PacketQueue::new("q", 0, QueueAccess::Vbdc, 4);
        queue.push(Packet::new(1, 0, vec![0u8; 200]).unfragmentable(), 0);
        let mut filler = BurstFiller::new(2, 0, 106, 6, 10).unwrap();
        assert!(matches!(
            filler.fill_from(&mut queue, 0),
            Err(DamaError::CapacityInconsistency { packet_len: 200, free_space: 100, .. })
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_unfragmentable_packets_never_exceed_slots() {
        let mut queue = PacketQueue::new("q", 0, QueueAccess::Vbdc, 4);
        for _ in 0..3 {
            queue.push(Packet::new(1, 0, vec![0u8; 53]).unfragmentable(), 0);
        }
        let mut filler = BurstFiller::new(2, 0, 106, 6, 2).unwrap();
        assert!(!filler.fill_from(&mut queue, 0).unwrap());
        let outcome = filler.finish();
        assert_eq!(outcome.frames.len(), 2);
        assert_eq!(outcome.payload_bytes(), 106);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_header_must_fit() {
        assert!(BurstFiller::new(2, 0, 6, 6, 100).is_err());
    }
}
