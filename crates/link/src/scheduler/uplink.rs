//! Gateway side scheduling of its own return link traffic

use log::{debug, warn};
use satdama_core::{FmtId, FmtTable, SuperframeNumber, TerminalFmtRegistry, TerminalId, UnitConverter};

use super::{dama_queue_order, BurstFiller, ScheduleOutcome};
use crate::carrier::{CarrierGroup, TerminalCategory};
use crate::config::AccessKind;
use crate::packet::PacketQueue;
use crate::DamaError;

/// Schedules the gateway queues on every DAMA carrier of its category.
#[derive(Debug, Clone)]
pub struct UplinkScheduler {
    gateway_id: TerminalId,
    header_bytes: usize,
    max_frame_bytes: usize,
    converter: UnitConverter,
}

impl UplinkScheduler {
    pub fn new(
        gateway_id: TerminalId,
        frame_duration_ms: u32,
        burst_length_sym: u32,
        header_bytes: usize,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            gateway_id,
            header_bytes,
            max_frame_bytes,
            converter: UnitConverter::fixed_symbol_length(frame_duration_ms, 0, burst_length_sym),
        }
    }

    /// MODCOD used on `carrier`, None when the carrier is unusable.
    fn carrier_fmt(&self, carrier: &CarrierGroup, desired: FmtId, category_lowest: Option<FmtId>) -> Option<FmtId> {
        match carrier.nearest_fmt(desired) {
            Some(fmt_id) => Some(fmt_id),
            None if carrier.lowest_fmt() == category_lowest => carrier.lowest_fmt(),
            None => None,
        }
    }

    /// `remaining` in the outcome counts unused bursts.
    pub fn schedule(
        &mut self,
        superframe: SuperframeNumber,
        category: &mut TerminalCategory,
        queues: &mut [PacketQueue],
        table: &FmtTable,
        registry: &TerminalFmtRegistry,
        now: u64,
    ) -> Result<ScheduleOutcome, DamaError> {
        let category_lowest = category.lowest_fmt();
        let desired = match registry.current(self.gateway_id) {
            Some(fmt_id) => fmt_id,
            None => {
                warn!(
                    "SF#{}: no MODCOD known for gateway ST{}, using the most robust one",
                    superframe, self.gateway_id
                );
                category_lowest.unwrap_or_default()
            }
        };
        let order = dama_queue_order(queues);
        let mut outcome = ScheduleOutcome::default();

        for carrier in category.carriers_mut() {
            if carrier.access() != AccessKind::Dama {
                continue;
            }
            let carried = carrier.take_carry_over(superframe);
            let Some(fmt_id) = self.carrier_fmt(carrier, desired, category_lowest) else {
                debug!(
                    "SF#{}: carrier {} cannot carry MODCOD {}, no capacity",
                    superframe,
                    carrier.id(),
                    desired
                );
                carrier.set_total_capacity(0);
                continue;
            };

            self.converter.set_modulation_efficiency(table.modulation_efficiency(fmt_id));
            let capacity_pkt = self.converter.sym_to_pkt(carrier.symbols_per_frame()) as u64;
            carrier.set_total_capacity(capacity_pkt);
            let burst_bytes = (self.converter.packet_bit_length() / 8) as usize;
            if burst_bytes == 0 {
                continue;
            }

            let mut filler = BurstFiller::new(
                fmt_id,
                carrier.id(),
                (burst_bytes + self.header_bytes).min(self.max_frame_bytes),
                self.header_bytes,
                capacity_pkt + carried,
            )?;
            for index in &order {
                if !filler.fill_from(&mut queues[*index], now)? {
                    break;
                }
            }
            let carrier_outcome = filler.finish();
            let unused_pkt = carrier_outcome.remaining;
            carrier.set_remaining_capacity(unused_pkt);
            carrier.carry_over(unused_pkt.min(capacity_pkt), superframe.wrapping_add(1));
            debug!(
                "SF#{}: carrier {} MODCOD {}: {} bursts of {} bytes, {} unused",
                superframe,
                carrier.id(),
                fmt_id,
                carrier_outcome.frames.len(),
                burst_bytes,
                unused_pkt
            );
            outcome.merge(carrier_outcome);
        }
        Ok(outcome)
    }
}
