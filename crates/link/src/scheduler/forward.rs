//! Forward link scheduling into MODCOD-sized BBFrames
//!
//! Each carrier (or VCM tier) keeps one BBFrame under construction per
//! MODCOD. A frame that is full but does not fit in the symbols left on the
//! carrier waits, ahead of any new traffic, for the next pass.

use std::collections::{BTreeMap, VecDeque};

use log::{debug, error, trace, warn};
use satdama_core::{CarrierId, FmtId, FmtTable, SuperframeNumber, TerminalFmtRegistry, VolumeSym};

use super::ScheduleOutcome;
use crate::carrier::{CarrierGroup, TerminalCategory};
use crate::config::AccessKind;
use crate::framing::Frame;
use crate::packet::{Packet, PacketQueue, QueueAccess};
use crate::DamaError;

type CarrierKey = (CarrierId, u8);

#[derive(Debug)]
struct Building {
    frame: Frame,
    idle_passes: u8,
}

#[derive(Debug, Default)]
pub struct ForwardScheduler {
    building: BTreeMap<(CarrierId, u8, FmtId), Building>,
    waiting: BTreeMap<CarrierKey, VecDeque<Frame>>,
    dropped_packets: u64,
}

/// Symbols needed to send `frame` at its MODCOD.
pub fn bbframe_symbols(table: &FmtTable, frame: &Frame) -> Result<VolumeSym, DamaError> {
    let definition = table.definition(frame.fmt_id())?;
    let efficiency = definition.spectral_efficiency() as f64;
    if efficiency <= 0.0 {
        return Err(DamaError::Configuration(format!(
            "MODCOD {} has no spectral efficiency",
            frame.fmt_id()
        )));
    }
    let bits = ((frame.max_size() - frame.header_size()) * 8) as f64;
    Ok((bits / efficiency).ceil() as VolumeSym)
}

fn serves(carrier: &CarrierGroup, access: QueueAccess) -> bool {
    match (carrier.access(), access) {
        (AccessKind::Acm, QueueAccess::Acm) => true,
        (AccessKind::Vcm, QueueAccess::Vcm(id)) => id == carrier.vcm_id(),
        _ => false,
    }
}

impl ForwardScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames complete but still waiting for capacity.
    pub fn waiting_frames(&self) -> usize {
        self.waiting.values().map(VecDeque::len).sum()
    }

    pub fn building_frames(&self) -> usize {
        self.building.len()
    }

    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }

    /// Schedule every ACM and VCM carrier of `category` for one frame.
    ///
    /// `remaining` in the outcome counts unused symbols. A carrier that
    /// fails stops for this frame, the others are still scheduled and the
    /// first failure is returned.
    pub fn schedule(
        &mut self,
        superframe: SuperframeNumber,
        category: &mut TerminalCategory,
        queues: &mut [PacketQueue],
        table: &FmtTable,
        registry: &TerminalFmtRegistry,
        now: u64,
    ) -> Result<ScheduleOutcome, DamaError> {
        let mut order: Vec<usize> = (0..queues.len()).collect();
        order.sort_by_key(|index| queues[*index].priority());

        let mut outcome = ScheduleOutcome::default();
        let mut failure = None;
        for carrier in category.carriers_mut() {
            if carrier.access() == AccessKind::Dama {
                continue;
            }
            if let Err(e) = self.schedule_carrier(superframe, carrier, queues, &order, table, registry, now, &mut outcome)
            {
                error!("SF#{}: carrier {} aborted: {}", superframe, carrier.id(), e);
                failure.get_or_insert(e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(outcome),
        }
    }

    /// MODCOD to frame `packet` with, None if its destination is unknown.
    fn packet_fmt(&self, packet: &Packet, carrier: &CarrierGroup, registry: &TerminalFmtRegistry) -> Option<FmtId> {
        let desired = if packet.is_broadcast() {
            match registry.lowest_modcod_terminal() {
                Some(terminal_id) => registry.current(terminal_id)?,
                None => return carrier.lowest_fmt(),
            }
        } else {
            registry.current(packet.destination())?
        };
        carrier.nearest_fmt(desired).or_else(|| carrier.lowest_fmt())
    }

    /// Send `frame` if it fits in `capacity`, else keep it waiting.
    ///
    /// Returns true when the frame was held back.
    fn send_or_hold(
        &mut self,
        key: CarrierKey,
        frame: Frame,
        capacity: &mut VolumeSym,
        table: &FmtTable,
        outcome: &mut ScheduleOutcome,
    ) -> Result<bool, DamaError> {
        let size = bbframe_symbols(table, &frame)?;
        if size <= *capacity {
            *capacity -= size;
            outcome.frames.push(frame);
            return Ok(false);
        }
        trace!("carrier {}: BBFrame of {} symbols waits, {} left", key.0, size, capacity);
        self.waiting.entry(key).or_default().push_back(frame);
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    fn schedule_carrier(
        &mut self,
        superframe: SuperframeNumber,
        carrier: &mut CarrierGroup,
        queues: &mut [PacketQueue],
        order: &[usize],
        table: &FmtTable,
        registry: &TerminalFmtRegistry,
        now: u64,
        outcome: &mut ScheduleOutcome,
    ) -> Result<(), DamaError> {
        let key = (carrier.id(), carrier.vcm_id());
        let per_frame = carrier.symbols_per_frame();
        let mut capacity = per_frame + carrier.take_carry_over(superframe);
        carrier.set_total_capacity(per_frame);

        if let Some(waiting) = self.waiting.get_mut(&key) {
            while let Some(frame) = waiting.front() {
                let size = bbframe_symbols(table, frame)?;
                if size > capacity {
                    break;
                }
                capacity -= size;
                if let Some(frame) = waiting.pop_front() {
                    outcome.frames.push(frame);
                }
            }
        }
        let mut full = self.waiting.get(&key).is_some_and(|waiting| !waiting.is_empty());
        let mut failure = None;

        'queues: for index in order {
            if full {
                break;
            }
            let queue = &mut queues[*index];
            if !serves(carrier, queue.access()) {
                continue;
            }
            while let Some(packet) = queue.pop_due(now) {
                let Some(fmt_id) = self.packet_fmt(&packet, carrier, registry) else {
                    warn!(
                        "SF#{}: no MODCOD for ST{}, {} bytes dropped",
                        superframe,
                        packet.destination(),
                        packet.len()
                    );
                    self.dropped_packets += 1;
                    continue;
                };
                let coding = table.definition(fmt_id)?.coding();
                let slot = (key.0, key.1, fmt_id);
                let building = self.building.entry(slot).or_insert_with(|| Building {
                    frame: Frame::bbframe(fmt_id, key.0, coding),
                    idle_passes: 0,
                });
                building.idle_passes = 0;

                let free_space = building.frame.free_space();
                let mut rejected = None;
                let completed = match packet.split_at(free_space) {
                    Ok((whole, None)) => match building.frame.add_packet(whole) {
                        Ok(()) => {
                            outcome.packets_sent += 1;
                            building.frame.free_space() == 0
                        }
                        Err(whole) => {
                            rejected = Some(whole.len());
                            queue.push_front(whole);
                            true
                        }
                    },
                    Ok((chunk, Some(remainder))) => {
                        queue.push_front(remainder);
                        if let Err(chunk) = building.frame.add_packet(chunk) {
                            rejected = Some(chunk.len());
                            queue.push_front(chunk);
                        }
                        true
                    }
                    Err(packet) => {
                        rejected = Some(packet.len());
                        queue.push_front(packet);
                        true
                    }
                };
                if let Some(packet_len) = rejected {
                    if building.frame.is_empty() {
                        self.building.remove(&slot);
                        failure = Some(DamaError::CapacityInconsistency {
                            packet_len,
                            free_space,
                            fmt_id,
                        });
                        break 'queues;
                    }
                }
                if !completed {
                    continue;
                }
                if let Some(building) = self.building.remove(&slot) {
                    if self.send_or_hold(key, building.frame, &mut capacity, table, outcome)? {
                        full = true;
                        break;
                    }
                }
            }
        }

        // frames under construction wait untouched when the carrier failed
        let slots: Vec<_> = self
            .building
            .keys()
            .filter(|(carrier_id, vcm_id, _)| failure.is_none() && (*carrier_id, *vcm_id) == key)
            .copied()
            .collect();
        for slot in slots {
            let Some(building) = self.building.get_mut(&slot) else {
                continue;
            };
            let size = bbframe_symbols(table, &building.frame)?;
            if !full && size <= capacity {
                capacity -= size;
                if let Some(building) = self.building.remove(&slot) {
                    outcome.frames.push(building.frame);
                }
                continue;
            }
            building.idle_passes += 1;
            if building.idle_passes > 1 {
                if let Some(abandoned) = self.building.remove(&slot) {
                    warn!(
                        "SF#{}: carrier {} abandons a MODCOD {} BBFrame with {} packets",
                        superframe,
                        key.0,
                        slot.2,
                        abandoned.frame.packet_count()
                    );
                    self.dropped_packets += abandoned.frame.packet_count() as u64;
                }
            }
        }

        carrier.set_remaining_capacity(capacity);
        carrier.carry_over(capacity.min(per_frame), superframe.wrapping_add(1));
        debug!(
            "SF#{}: carrier {}/{} {} symbols left, {} BBFrames waiting",
            superframe,
            key.0,
            key.1,
            capacity,
            self.waiting.get(&key).map_or(0, VecDeque::len)
        );
        outcome.remaining += capacity;
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
