//! Encapsulated packets and the MAC queues holding them

use std::collections::VecDeque;

use bytes::Bytes;
use log::{debug, trace};
use satdama_core::{TerminalId, BROADCAST_TERMINAL_ID};
use serde::{Deserialize, Serialize};

/// One encapsulated packet; only its length and destination matter here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    source: TerminalId,
    destination: TerminalId,
    payload: Bytes,
    fragmentable: bool,
}

impl Packet {
    pub fn new(source: TerminalId, destination: TerminalId, payload: impl Into<Bytes>) -> Self {
        Self {
            source,
            destination,
            payload: payload.into(),
            fragmentable: true,
        }
    }

    /// Packet of a constant-length encapsulation that cannot be split.
    pub fn unfragmentable(mut self) -> Self {
        self.fragmentable = false;
        self
    }

    pub fn source(&self) -> TerminalId {
        self.source
    }

    pub fn destination(&self) -> TerminalId {
        self.destination
    }

    pub fn is_broadcast(&self) -> bool {
        self.destination == BROADCAST_TERMINAL_ID
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_fragmentable(&self) -> bool {
        self.fragmentable
    }

    /// Take at most `max_bytes` from the head of the packet.
    ///
    /// Returns the packet untouched in `Err` when it is larger than
    /// `max_bytes` and cannot be fragmented.
    pub fn split_at(mut self, max_bytes: usize) -> Result<(Packet, Option<Packet>), Packet> {
        if self.len() <= max_bytes {
            return Ok((self, None));
        }
        if !self.fragmentable || max_bytes == 0 {
            return Err(self);
        }
        let head = self.payload.split_to(max_bytes);
        let chunk = Packet {
            source: self.source,
            destination: self.destination,
            payload: head,
            fragmentable: true,
        };
        Ok((chunk, Some(self)))
    }
}

/// Access a queue is served by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueAccess {
    Rbdc,
    Vbdc,
    Saloha,
    Acm,
    Vcm(u8),
}

#[derive(Debug, Clone)]
struct Queued {
    packet: Packet,
    tick_out: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
    /// Packets or remainders given back with [`PacketQueue::push_front`].
    pub requeued: u64,
}

/// Bounded FIFO of packets waiting for capacity.
#[derive(Debug)]
pub struct PacketQueue {
    name: String,
    priority: u8,
    access: QueueAccess,
    max_packets: usize,
    packets: VecDeque<Queued>,
    bytes: usize,
    new_bytes: usize,
    new_packets: usize,
    stats: QueueStats,
}

impl PacketQueue {
    pub fn new(name: impl Into<String>, priority: u8, access: QueueAccess, max_packets: usize) -> Self {
        Self {
            name: name.into(),
            priority,
            access,
            max_packets,
            packets: VecDeque::new(),
            bytes: 0,
            new_bytes: 0,
            new_packets: 0,
            stats: QueueStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower values are served first.
    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn access(&self) -> QueueAccess {
        self.access
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.bytes
    }

    pub fn bit_len(&self) -> u64 {
        self.bytes as u64 * 8
    }

    /// Bits that entered the queue since the last [`PacketQueue::reset_new`].
    pub fn new_bits(&self) -> u64 {
        self.new_bytes as u64 * 8
    }

    pub fn new_packets(&self) -> usize {
        self.new_packets
    }

    pub fn reset_new(&mut self) {
        self.new_bytes = 0;
        self.new_packets = 0;
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Append a packet that must not leave before `tick_out`.
    ///
    /// Returns false and drops the packet when the queue is full.
    pub fn push(&mut self, packet: Packet, tick_out: u64) -> bool {
        if self.packets.len() >= self.max_packets {
            debug!("queue {} full, dropping {} bytes packet", self.name, packet.len());
            self.stats.dropped += 1;
            return false;
        }
        self.bytes += packet.len();
        self.new_bytes += packet.len();
        self.new_packets += 1;
        self.stats.pushed += 1;
        self.packets.push_back(Queued { packet, tick_out });
        true
    }

    /// Give back a packet (or a remainder) so that it leaves first.
    ///
    /// The bytes count again in the backlog but not as new arrivals, they
    /// were already requested for when first pushed.
    pub fn push_front(&mut self, packet: Packet) {
        trace!("queue {}: {} bytes back at front", self.name, packet.len());
        self.bytes += packet.len();
        self.stats.requeued += 1;
        self.packets.push_front(Queued { packet, tick_out: 0 });
    }

    pub fn pop(&mut self) -> Option<Packet> {
        let queued = self.packets.pop_front()?;
        self.bytes -= queued.packet.len();
        self.stats.popped += 1;
        Some(queued.packet)
    }

    /// Pop the head packet if its tick-out time is reached.
    pub fn pop_due(&mut self, now: u64) -> Option<Packet> {
        match self.packets.front() {
            Some(queued) if queued.tick_out <= now => self.pop(),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.packets.clear();
        self.bytes = 0;
        self.reset_new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_fragmentable_packet() {
        let packet = Packet::new(1, 2, vec![7u8; 100]);
        let (chunk, rest) = packet.split_at(30).unwrap();
        assert_eq!(chunk.len(), 30);
        let rest = rest.unwrap();
        assert_eq!(rest.len(), 70);
        assert_eq!(rest.destination(), 2);

        let (whole, none) = rest.split_at(70).unwrap();
        assert_eq!(whole.len(), 70);
        assert!(none.is_none());
    }

    #[test]
    fn test_unfragmentable_packet_is_returned() {
        let packet = Packet::new(1, 2, vec![0u8; 53]).unfragmentable();
        let packet = packet.split_at(52).unwrap_err();
        assert_eq!(packet.len(), 53);
        assert!(Packet::new(1, 2, vec![0u8; 5]).split_at(0).is_err());
    }

    #[test]
    fn test_queue_accounting() {
        let mut queue = PacketQueue::new("EF", 0, QueueAccess::Rbdc, 2);
        assert!(queue.push(Packet::new(1, 0, vec![0u8; 100]), 0));
        assert!(queue.push(Packet::new(1, 0, vec![0u8; 50]), 0));
        assert!(!queue.push(Packet::new(1, 0, vec![0u8; 10]), 0));
        assert_eq!(queue.byte_len(), 150);
        assert_eq!(queue.new_bits(), 1200);
        assert_eq!(queue.stats().dropped, 1);

        let head = queue.pop().unwrap();
        let (chunk, rest) = head.split_at(40).unwrap();
        assert_eq!(chunk.len(), 40);
        queue.push_front(rest.unwrap());
        assert_eq!(queue.byte_len(), 110);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.new_bits(), 1200);
        let stats = queue.stats();
        assert_eq!((stats.pushed, stats.popped, stats.requeued), (2, 1, 1));
        assert_eq!(stats.pushed + stats.requeued - stats.popped, queue.len() as u64);

        queue.reset_new();
        assert_eq!(queue.new_bits(), 0);
        assert_eq!(queue.byte_len(), 110);
    }

    #[test]
    fn test_tick_out_holds_packets() {
        let mut queue = PacketQueue::new("AF", 1, QueueAccess::Acm, 10);
        queue.push(Packet::new(0, 3, vec![1u8; 10]), 50);
        assert!(queue.pop_due(49).is_none());
        assert!(queue.pop_due(50).is_some());
        assert!(queue.is_empty());
    }
}
