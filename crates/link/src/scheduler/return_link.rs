//! Terminal side scheduling of DAMA queues into return link bursts

use log::{debug, warn};
use satdama_core::{FmtId, SuperframeNumber};

use super::{dama_queue_order, BurstFiller, ScheduleOutcome};
use crate::packet::PacketQueue;
use crate::DamaError;

#[derive(Debug, Clone)]
pub struct ReturnScheduler {
    header_bytes: usize,
    max_frame_bytes: usize,
}

impl ReturnScheduler {
    pub fn new(header_bytes: usize, max_frame_bytes: usize) -> Self {
        Self {
            header_bytes,
            max_frame_bytes,
        }
    }

    /// Bytes a burst of `burst_bytes` occupies once framed.
    pub fn frame_size(&self, burst_bytes: usize) -> usize {
        (burst_bytes + self.header_bytes).min(self.max_frame_bytes)
    }

    /// Fill at most `bursts` bursts of `burst_bytes` from `queues`.
    ///
    /// `remaining` in the outcome counts the unused bursts.
    pub fn schedule(
        &self,
        superframe: SuperframeNumber,
        queues: &mut [PacketQueue],
        fmt_id: FmtId,
        burst_bytes: usize,
        bursts: u64,
        now: u64,
    ) -> Result<ScheduleOutcome, DamaError> {
        if bursts == 0 {
            return Ok(ScheduleOutcome::default());
        }
        if burst_bytes == 0 {
            warn!("SF#{}: no burst length for MODCOD {}, nothing scheduled", superframe, fmt_id);
            return Ok(ScheduleOutcome {
                remaining: bursts,
                ..ScheduleOutcome::default()
            });
        }

        let mut filler = BurstFiller::new(fmt_id, 0, self.frame_size(burst_bytes), self.header_bytes, bursts)?;
        for index in dama_queue_order(queues) {
            if !filler.fill_from(&mut queues[index], now)? {
                break;
            }
        }
        let outcome = filler.finish();
        debug!(
            "SF#{}: {} bursts, {} packets sent, {} bursts left",
            superframe,
            outcome.frames.len(),
            outcome.packets_sent,
            outcome.remaining
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Packet, QueueAccess};

    fn queues() -> Vec<PacketQueue> {
        vec![
            PacketQueue::new("BE", 3, QueueAccess::Vbdc, 100),
            PacketQueue::new("SA", 0, QueueAccess::Saloha, 100),
            PacketQueue::new("EF", 0, QueueAccess::Rbdc, 100),
        ]
    }

    #[test]
    fn test_priority_order_and_saloha_skipped() {
        let mut queues = queues();
        queues[0].push(Packet::new(1, 0, vec![3u8; 100]), 0);
        queues[1].push(Packet::new(1, 0, vec![1u8; 100]), 0);
        queues[2].push(Packet::new(1, 0, vec![0u8; 100]), 0);

        let scheduler = ReturnScheduler::new(6, 1200);
        let outcome = scheduler.schedule(1, &mut queues, 2, 134, 1, 0).unwrap();
        assert_eq!(outcome.payload_bytes(), 134);
        // EF first, then 34 bytes of BE
        assert_eq!(outcome.frames[0].packets()[0].payload()[0], 0);
        assert_eq!(queues[0].byte_len(), 66);
        assert_eq!(queues[1].byte_len(), 100);
        assert!(queues[2].is_empty());
    }

    #[test]
    fn test_frame_size_capped() {
        let scheduler = ReturnScheduler::new(6, 1200);
        assert_eq!(scheduler.frame_size(134), 140);
        assert_eq!(scheduler.frame_size(4000), 1200);
    }

    #[test]
    fn test_capacity_safety() {
        for bursts in [0u64, 1, 2, 5, 10, 40] {
            let mut queues = queues();
            for size in [40usize, 1400, 7, 300, 134, 60] {
                queues[2].push(Packet::new(1, 0, vec![0u8; size]), 0);
            }
            let scheduler = ReturnScheduler::new(6, 1200);
            let outcome = scheduler.schedule(1, &mut queues, 3, 134, bursts, 0).unwrap();
            assert!(outcome.payload_bytes() as u64 <= bursts * 134);
            assert_eq!(outcome.frames.len() as u64 + outcome.remaining, bursts);
            for frame in &outcome.frames {
                assert!(!frame.is_empty());
                assert!(frame.payload_len() + frame.header_size() <= 140);
            }
        }
    }

    #[test]
    fn test_no_burst_length_keeps_allocation() {
        let mut queues = queues();
        queues[2].push(Packet::new(1, 0, vec![0u8; 10]), 0);
        let outcome = ReturnScheduler::new(6, 1200)
            .schedule(1, &mut queues, 0, 0, 5, 0)
            .unwrap();
        assert!(outcome.frames.is_empty());
        assert_eq!(outcome.remaining, 5);
    }
}
