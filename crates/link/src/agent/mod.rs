//! Terminal side of the DAMA protocol: requests capacity and spends what is granted

pub mod strategy;

pub use strategy::{strategy_for, LegacyStrategy, RbdcInput, RequestStrategy, VbdcInput};

use std::sync::Arc;

use log::{debug, info, trace, warn};
use satdama_core::{
    CapacityRequest, FmtId, FmtTable, GroupId, LogonRequest, LogonResponse, Logoff, RateKbps, RequestHistory,
    RequestKind, SuperframeNumber, TerminalId, TimeFrames, TimeMs, TimeTranslationPlan, UnitConverter, VolumeKb,
    VolumePkt, NO_FMT,
};

use crate::config::DamaConfig;
use crate::packet::{Packet, PacketQueue, QueueAccess};
use crate::scheduler::{ReturnScheduler, ScheduleOutcome};
use crate::telemetry::{NullTelemetry, Telemetry};
use crate::DamaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    LoggedOff,
    LoggedOn { group_id: GroupId },
}

#[derive(Debug, Default)]
struct AgentStats {
    requests_sent: u64,
    frames_sent: u64,
    packets_sent: u64,
}

pub struct DamaAgent {
    terminal_id: TerminalId,
    state: AgentState,
    cra_kbps: RateKbps,
    max_rbdc_kbps: RateKbps,
    max_vbdc_kb: VolumeKb,
    rbdc_enabled: bool,
    vbdc_enabled: bool,
    frame_duration_ms: TimeMs,
    msl_frames: TimeFrames,
    history_len: usize,
    table: Arc<FmtTable>,
    history: RequestHistory,
    converter: UnitConverter,
    strategy: Box<dyn RequestStrategy>,
    scheduler: ReturnScheduler,
    queues: Vec<PacketQueue>,
    superframe: SuperframeNumber,
    /// Frames since the last RBDC request.
    rbdc_timer: u32,
    /// Granted by the last time plan, applied from the next superframe.
    allocated_pkt: VolumePkt,
    dynamic_allocation_pkt: VolumePkt,
    remaining_allocation_pkt: VolumePkt,
    fmt_id: FmtId,
    /// VBDC volume requested so far.
    vbdc_credit_kb: VolumeKb,
    cni_db: Option<f64>,
    telemetry: Box<dyn Telemetry>,
    stats: AgentStats,
}

impl DamaAgent {
    pub fn new(
        terminal_id: TerminalId,
        config: &DamaConfig,
        table: Arc<FmtTable>,
        cra_kbps: RateKbps,
        max_rbdc_kbps: RateKbps,
        max_vbdc_kb: VolumeKb,
    ) -> Result<Self, DamaError> {
        if config.frame_duration_ms == 0 {
            return Err(DamaError::Configuration("frame duration is 0 ms".into()));
        }
        if config.burst_length_sym == 0 {
            return Err(DamaError::Configuration("burst length is 0 symbol".into()));
        }
        let rbdc_enabled = max_rbdc_kbps > 0;
        let vbdc_enabled = max_vbdc_kb > 0;
        let history_len = if rbdc_enabled { config.request_history_len() } else { 0 };
        let strategy = strategy_for(config.strategy);
        let scheduler = strategy.return_scheduler(config);
        debug!(
            "ST{}: {} agent, CRA {} kb/s, max RBDC {} kb/s, max VBDC {} kb, history of {} requests",
            terminal_id,
            strategy.name(),
            cra_kbps,
            max_rbdc_kbps,
            max_vbdc_kb,
            history_len
        );

        Ok(Self {
            terminal_id,
            state: AgentState::LoggedOff,
            cra_kbps,
            max_rbdc_kbps,
            max_vbdc_kb,
            rbdc_enabled,
            vbdc_enabled,
            frame_duration_ms: config.frame_duration_ms,
            msl_frames: config.msl_frames,
            history_len,
            table,
            history: RequestHistory::new(history_len),
            converter: UnitConverter::fixed_symbol_length(config.frame_duration_ms, 0, config.burst_length_sym),
            strategy,
            scheduler,
            queues: Vec::new(),
            superframe: 0,
            rbdc_timer: 0,
            allocated_pkt: 0,
            dynamic_allocation_pkt: 0,
            remaining_allocation_pkt: 0,
            fmt_id: NO_FMT,
            vbdc_credit_kb: 0,
            cni_db: None,
            telemetry: Box::new(NullTelemetry),
            stats: AgentStats::default(),
        })
    }

    pub fn with_telemetry(mut self, telemetry: Box<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn terminal_id(&self) -> TerminalId {
        self.terminal_id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn is_logged_on(&self) -> bool {
        matches!(self.state, AgentState::LoggedOn { .. })
    }

    pub fn superframe(&self) -> SuperframeNumber {
        self.superframe
    }

    pub fn allocated_pkt(&self) -> VolumePkt {
        self.allocated_pkt
    }

    pub fn dynamic_allocation_pkt(&self) -> VolumePkt {
        self.dynamic_allocation_pkt
    }

    pub fn remaining_allocation_pkt(&self) -> VolumePkt {
        self.remaining_allocation_pkt
    }

    pub fn fmt_id(&self) -> FmtId {
        self.fmt_id
    }

    pub fn vbdc_credit_kb(&self) -> VolumeKb {
        self.vbdc_credit_kb
    }

    pub fn rbdc_timer(&self) -> u32 {
        self.rbdc_timer
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    fn group_id(&self) -> Result<GroupId, DamaError> {
        match self.state {
            AgentState::LoggedOn { group_id } => Ok(group_id),
            AgentState::LoggedOff => Err(DamaError::NotLoggedOn),
        }
    }

    pub fn logon_request(&self) -> LogonRequest {
        LogonRequest {
            terminal_id: self.terminal_id,
            cra_kbps: self.cra_kbps,
            max_rbdc_kbps: self.max_rbdc_kbps,
            max_vbdc_kb: self.max_vbdc_kb,
        }
    }

    /// Returns false when the response is addressed to another terminal.
    pub fn on_logon_response(&mut self, response: &LogonResponse) -> bool {
        if response.terminal_id != self.terminal_id {
            warn!(
                "ST{}: logon response for ST{} ignored",
                self.terminal_id, response.terminal_id
            );
            return false;
        }
        self.state = AgentState::LoggedOn {
            group_id: response.group_id,
        };
        self.reset_allocation();
        info!("ST{}: logged on in group {}", self.terminal_id, response.group_id);
        true
    }

    pub fn on_logoff(&mut self) -> Logoff {
        if self.is_logged_on() {
            info!("ST{}: logging off", self.terminal_id);
        }
        self.state = AgentState::LoggedOff;
        self.reset_allocation();
        Logoff {
            terminal_id: self.terminal_id,
        }
    }

    fn reset_allocation(&mut self) {
        self.history = RequestHistory::new(self.history_len);
        self.rbdc_timer = 0;
        self.allocated_pkt = 0;
        self.dynamic_allocation_pkt = 0;
        self.remaining_allocation_pkt = 0;
        self.fmt_id = NO_FMT;
        self.vbdc_credit_kb = 0;
    }

    pub fn on_start_of_frame(&mut self, superframe: SuperframeNumber) -> Result<(), DamaError> {
        self.group_id()?;
        self.superframe = superframe;
        self.rbdc_timer += 1;
        self.dynamic_allocation_pkt = self.allocated_pkt;
        self.allocated_pkt = 0;
        self.remaining_allocation_pkt = self.dynamic_allocation_pkt;
        trace!(
            "SF#{}: ST{} allocation {} bursts at MODCOD {}",
            superframe,
            self.terminal_id,
            self.dynamic_allocation_pkt,
            self.fmt_id
        );
        Ok(())
    }

    /// Refill the per-frame allocation within the current superframe.
    pub fn on_frame_tick(&mut self) -> Result<(), DamaError> {
        self.group_id()?;
        self.remaining_allocation_pkt = self.dynamic_allocation_pkt;
        Ok(())
    }

    /// Returns false when the plan is not meant for this terminal's group.
    pub fn on_time_plan(&mut self, plan: &TimeTranslationPlan) -> bool {
        let Ok(group_id) = self.group_id() else {
            debug!("ST{}: time plan received before logon", self.terminal_id);
            return false;
        };
        if plan.group_id != group_id {
            warn!(
                "SF#{}: ST{} time plan for group {} ignored, terminal is in group {}",
                plan.superframe, self.terminal_id, plan.group_id, group_id
            );
            return false;
        }

        let entries: Vec<_> = plan.plans_for(self.terminal_id).collect();
        if entries.len() > 1 {
            warn!(
                "SF#{}: ST{} has {} assignments in one time plan",
                plan.superframe,
                self.terminal_id,
                entries.len()
            );
        }

        let mut allocated: VolumePkt = 0;
        let mut allocated_kbits: u64 = 0;
        let mut fmt_id = NO_FMT;
        for entry in entries {
            let known = entry.fmt_id != NO_FMT && self.table.contains(entry.fmt_id);
            if known && fmt_id == NO_FMT {
                fmt_id = entry.fmt_id;
            } else if !known && entry.assignment_count > 0 {
                warn!(
                    "SF#{}: ST{} assignment of {} at unknown MODCOD {} counted at efficiency 0",
                    plan.superframe, self.terminal_id, entry.assignment_count, entry.fmt_id
                );
            }
            allocated = allocated.saturating_add(entry.assignment_count);

            let mut slice = self.converter.clone();
            slice.set_modulation_efficiency(self.table.modulation_efficiency(entry.fmt_id));
            allocated_kbits += slice.pkt_to_kbits(entry.assignment_count) as u64;
        }

        self.allocated_pkt = allocated;
        self.fmt_id = fmt_id;
        self.converter
            .set_modulation_efficiency(self.table.modulation_efficiency(fmt_id));
        self.telemetry.put("allocation_pkt", allocated as f64);
        self.telemetry.put("allocation_kbits", allocated_kbits as f64);
        debug!(
            "SF#{}: ST{} granted {} bursts at MODCOD {}",
            plan.superframe, self.terminal_id, allocated, fmt_id
        );
        true
    }

    pub fn set_cni(&mut self, cni_db: f64) {
        self.cni_db = Some(cni_db);
    }

    pub fn add_queue(&mut self, queue: PacketQueue) {
        self.queues.push(queue);
    }

    pub fn queues(&self) -> &[PacketQueue] {
        &self.queues
    }

    pub fn queue_mut(&mut self, name: &str) -> Option<&mut PacketQueue> {
        self.queues.iter_mut().find(|queue| queue.name() == name)
    }

    /// Queue a packet on the first queue served by `access`.
    pub fn enqueue(&mut self, access: QueueAccess, packet: Packet, tick_out: u64) -> bool {
        match self.queues.iter_mut().find(|queue| queue.access() == access) {
            Some(queue) => queue.push(packet, tick_out),
            None => {
                warn!("ST{}: no {:?} queue, packet dropped", self.terminal_id, access);
                false
            }
        }
    }

    /// Bits waiting in the queues served by `access`.
    pub fn mac_buffer_bits(&self, access: QueueAccess) -> u64 {
        self.queues
            .iter()
            .filter(|queue| queue.access() == access)
            .map(PacketQueue::bit_len)
            .sum()
    }

    /// Bits that entered the queues served by `access` since the last RBDC request.
    pub fn mac_arrival_bits(&self, access: QueueAccess) -> u64 {
        self.queues
            .iter()
            .filter(|queue| queue.access() == access)
            .map(PacketQueue::new_bits)
            .sum()
    }

    /// Compute the capacity request of this superframe, None if nothing is worth sending.
    pub fn build_request(&mut self) -> Result<Option<CapacityRequest>, DamaError> {
        let group_id = self.group_id()?;
        let mut request = CapacityRequest::new(self.terminal_id, group_id);
        request.cni_db = self.cni_db;

        if self.rbdc_enabled {
            let input = RbdcInput {
                queued_bits: self.mac_buffer_bits(QueueAccess::Rbdc),
                arrived_bits: self.mac_arrival_bits(QueueAccess::Rbdc),
                recent_requests_kbps: self.history.sum(),
                timer_frames: self.rbdc_timer,
                frame_duration_ms: self.frame_duration_ms,
                msl_frames: self.msl_frames as u32,
                max_rbdc_kbps: self.max_rbdc_kbps,
            };
            let rbdc_kbps = self.strategy.compute_rbdc_request(&input);
            // a zero request is only worth sending to release a previous one
            if rbdc_kbps > 0 || rbdc_kbps != self.history.current() {
                request.add(RequestKind::RateBased, rbdc_kbps);
                self.history.push(rbdc_kbps);
                self.rbdc_timer = 0;
                for queue in self.queues.iter_mut().filter(|q| q.access() == QueueAccess::Rbdc) {
                    queue.reset_new();
                }
                self.telemetry.put("rbdc_request_kbps", rbdc_kbps as f64);
                debug!(
                    "SF#{}: ST{} RBDC request {} kb/s",
                    self.superframe, self.terminal_id, rbdc_kbps
                );
            }
        }

        if self.vbdc_enabled {
            let input = VbdcInput {
                queued_bits: self.mac_buffer_bits(QueueAccess::Vbdc),
                credit_kb: self.vbdc_credit_kb,
                max_vbdc_kb: self.max_vbdc_kb,
            };
            let vbdc_kb = self.strategy.compute_vbdc_request(&input);
            if vbdc_kb > 0 {
                request.add(RequestKind::VolumeBased, vbdc_kb);
                self.vbdc_credit_kb = self.vbdc_credit_kb.saturating_add(vbdc_kb);
                self.telemetry.put("vbdc_request_kb", vbdc_kb as f64);
                debug!(
                    "SF#{}: ST{} VBDC request {} kb, credit {} kb",
                    self.superframe, self.terminal_id, vbdc_kb, self.vbdc_credit_kb
                );
            }
        }

        if request.is_empty() {
            trace!("SF#{}: ST{} nothing to request", self.superframe, self.terminal_id);
            return Ok(None);
        }
        self.stats.requests_sent += 1;
        Ok(Some(request))
    }

    /// Turn queued packets into bursts within the remaining allocation.
    pub fn schedule_outgoing(&mut self, now: u64) -> Result<ScheduleOutcome, DamaError> {
        self.group_id()?;
        if self.fmt_id == NO_FMT || self.remaining_allocation_pkt == 0 {
            return Ok(ScheduleOutcome::default());
        }
        let burst_bytes = (self.converter.packet_bit_length() / 8) as usize;
        let outcome = self.scheduler.schedule(
            self.superframe,
            &mut self.queues,
            self.fmt_id,
            burst_bytes,
            self.remaining_allocation_pkt as u64,
            now,
        )?;
        self.remaining_allocation_pkt = outcome.remaining.min(VolumePkt::MAX as u64) as VolumePkt;
        self.stats.frames_sent += outcome.frames.len() as u64;
        self.stats.packets_sent += outcome.packets_sent as u64;
        self.telemetry
            .put("remaining_allocation_pkt", self.remaining_allocation_pkt as f64);
        Ok(outcome)
    }

    /// (requests sent, bursts sent, packets sent)
    pub fn get_stats(&self) -> (u64, u64, u64) {
        (self.stats.requests_sent, self.stats.frames_sent, self.stats.packets_sent)
    }
}
