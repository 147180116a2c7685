//! Network side of the DAMA protocol: collects requests and shares return capacity

mod allocation;
mod terminal;

pub use terminal::TerminalContext;

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info, trace, warn};
use satdama_core::{
    CapacityRequest, CarrierId, FmtId, FmtTable, GroupId, LogonRequest, LogonResponse, Logoff, RateKbps,
    RequestKind, SuperframeNumber, TerminalFmtRegistry, TerminalId, TimePlan, TimeTranslationPlan, UnitConverter,
    NO_FMT,
};

use self::allocation::{share_fca, share_rbdc, share_vbdc, FcaShare, RbdcShare, VbdcShare};
use crate::carrier::TerminalCategory;
use crate::config::{AccessKind, DamaConfig};
use crate::telemetry::{NullTelemetry, Telemetry};
use crate::DamaError;

#[derive(Debug, Default)]
struct ControllerStats {
    cra_kbps: u64,
    max_rbdc_kbps: u64,
    requests_received: u64,
    requests_discarded: u64,
    rbdc_granted_kbps: u64,
    vbdc_granted_kb: u64,
    fca_granted_kbps: u64,
}

pub struct DamaController {
    group_id: GroupId,
    config: DamaConfig,
    table: Arc<FmtTable>,
    registry: TerminalFmtRegistry,
    categories: Vec<TerminalCategory>,
    terminals: BTreeMap<TerminalId, TerminalContext>,
    converter: UnitConverter,
    superframe: SuperframeNumber,
    telemetry: Box<dyn Telemetry>,
    stats: ControllerStats,
}

fn dama_carriers(category: &TerminalCategory) -> Vec<CarrierId> {
    category
        .carriers()
        .iter()
        .filter(|carrier| carrier.access() == AccessKind::Dama)
        .map(|carrier| carrier.id())
        .collect()
}

fn remaining_pkt(category: &TerminalCategory, carrier_id: CarrierId) -> u32 {
    category
        .carrier(carrier_id)
        .map(|carrier| carrier.remaining_capacity().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}

fn set_remaining_pkt(category: &mut TerminalCategory, carrier_id: CarrierId, remaining: u32) {
    if let Some(carrier) = category.carrier_mut(carrier_id) {
        carrier.set_remaining_capacity(remaining as u64);
    }
}

impl DamaController {
    pub fn new(
        group_id: GroupId,
        config: DamaConfig,
        table: Arc<FmtTable>,
        registry: TerminalFmtRegistry,
    ) -> Result<Self, DamaError> {
        config.validate()?;
        let categories: Vec<TerminalCategory> = config
            .categories
            .iter()
            .map(|category| TerminalCategory::from_config(category, config.frame_duration_ms))
            .collect();
        for category in &categories {
            for carrier in category.carriers() {
                if let Some(missing) = carrier.fmt_ids().iter().find(|id| !table.contains(**id)) {
                    return Err(DamaError::Configuration(format!(
                        "carrier {} of {} uses undefined MODCOD {}",
                        carrier.id(),
                        category.label(),
                        missing
                    )));
                }
            }
        }
        info!(
            "DAMA controller for group {}: {} categories, {} MODCODs, FCA {} kb/s",
            group_id,
            categories.len(),
            table.len(),
            config.fca_kbps
        );

        Ok(Self {
            group_id,
            converter: UnitConverter::fixed_symbol_length(config.frame_duration_ms, 0, config.burst_length_sym),
            config,
            table,
            registry,
            categories,
            terminals: BTreeMap::new(),
            superframe: 0,
            telemetry: Box::new(NullTelemetry),
            stats: ControllerStats::default(),
        })
    }

    pub fn with_telemetry(mut self, telemetry: Box<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    pub fn superframe(&self) -> SuperframeNumber {
        self.superframe
    }

    pub fn registry(&self) -> &TerminalFmtRegistry {
        &self.registry
    }

    pub fn terminal(&self, terminal_id: TerminalId) -> Option<&TerminalContext> {
        self.terminals.get(&terminal_id)
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    pub fn categories(&self) -> &[TerminalCategory] {
        &self.categories
    }

    pub fn category(&self, label: &str) -> Option<&TerminalCategory> {
        self.categories.iter().find(|category| category.label() == label)
    }

    /// Register a terminal; None when it is already logged on or has no category.
    pub fn on_logon(&mut self, logon: &LogonRequest) -> Option<LogonResponse> {
        let terminal_id = logon.terminal_id;
        if self.terminals.contains_key(&terminal_id) {
            warn!("SF#{}: duplicate logon of ST{} ignored", self.superframe, terminal_id);
            return None;
        }
        let label = self.config.category_of(terminal_id).to_string();
        let Some(category) = self.categories.iter_mut().find(|category| category.label() == label) else {
            warn!(
                "SF#{}: ST{} logon refused, category {} does not exist",
                self.superframe, terminal_id, label
            );
            return None;
        };
        let Some(carrier_id) = category.add_terminal(terminal_id) else {
            warn!(
                "SF#{}: ST{} logon refused, category {} has no carrier",
                self.superframe, terminal_id, label
            );
            return None;
        };

        // the least robust MODCOD until the terminal reports its C/N
        let required_fmt = self.table.max_id().unwrap_or(NO_FMT);
        if !self.registry.add(terminal_id, required_fmt) {
            self.registry.set(terminal_id, required_fmt);
        }

        let max_capacity_kbps: u64 = category
            .carriers()
            .iter()
            .filter_map(|carrier| {
                let fmt_id = *carrier.fmt_ids().last()?;
                let symbols_per_second = self.converter.pf_to_ps(carrier.symbols_per_frame());
                self.table.symbols_to_kbits(fmt_id, symbols_per_second).ok()
            })
            .sum();
        if logon.cra_kbps as u64 > max_capacity_kbps {
            warn!(
                "SF#{}: ST{} CRA of {} kb/s exceeds the {} kb/s of category {}",
                self.superframe, terminal_id, logon.cra_kbps, max_capacity_kbps, label
            );
        }

        let context = TerminalContext::new(
            terminal_id,
            label.clone(),
            logon.cra_kbps,
            logon.max_rbdc_kbps,
            self.config.rbdc_timeout_frames,
            logon.max_vbdc_kb,
            carrier_id,
            required_fmt,
        );
        self.terminals.insert(terminal_id, context);
        self.stats.cra_kbps += logon.cra_kbps as u64;
        self.stats.max_rbdc_kbps += logon.max_rbdc_kbps as u64;
        self.telemetry.put("logged_terminals", self.terminals.len() as f64);
        info!(
            "SF#{}: ST{} logged on in {} (CRA {} kb/s, max RBDC {} kb/s, max VBDC {} kb)",
            self.superframe, terminal_id, label, logon.cra_kbps, logon.max_rbdc_kbps, logon.max_vbdc_kb
        );

        Some(LogonResponse {
            group_id: self.group_id,
            terminal_id,
        })
    }

    pub fn on_logoff(&mut self, logoff: &Logoff) -> bool {
        let Some(context) = self.terminals.remove(&logoff.terminal_id) else {
            debug!("SF#{}: logoff of unknown ST{}", self.superframe, logoff.terminal_id);
            return false;
        };
        if let Some(category) = self
            .categories
            .iter_mut()
            .find(|category| category.label() == context.category())
        {
            category.remove_terminal(logoff.terminal_id);
        }
        self.registry.remove(logoff.terminal_id);
        self.stats.cra_kbps = self.stats.cra_kbps.saturating_sub(context.cra_kbps() as u64);
        self.stats.max_rbdc_kbps = self.stats.max_rbdc_kbps.saturating_sub(context.max_rbdc_kbps() as u64);
        self.telemetry.put("logged_terminals", self.terminals.len() as f64);
        info!("SF#{}: ST{} logged off", self.superframe, logoff.terminal_id);
        true
    }

    /// Record a capacity request; false when the terminal is unknown.
    pub fn on_capacity_request(&mut self, request: &CapacityRequest) -> bool {
        let Some(terminal) = self.terminals.get_mut(&request.terminal_id) else {
            warn!(
                "SF#{}: capacity request from unknown ST{} discarded",
                self.superframe, request.terminal_id
            );
            self.stats.requests_discarded += 1;
            return false;
        };
        self.stats.requests_received += 1;

        if let Some(cni_db) = request.cni_db {
            if let Some(fmt_id) =
                self.registry
                    .update_from_snr(request.terminal_id, &self.table, cni_db, self.config.loop_margin_db)
            {
                trace!(
                    "SF#{}: ST{} C/N {:.2} dB, MODCOD {}",
                    self.superframe,
                    request.terminal_id,
                    cni_db,
                    fmt_id
                );
            }
        }

        for (kind, value) in &request.requests {
            match kind {
                RequestKind::RateBased => {
                    let rbdc_kbps = value.saturating_sub(terminal.cra_kbps());
                    terminal.set_required_rbdc(rbdc_kbps);
                    debug!(
                        "SF#{}: ST{} RBDC request {} kb/s, {} kb/s above CRA, {} kb/s kept",
                        self.superframe,
                        request.terminal_id,
                        value,
                        rbdc_kbps,
                        terminal.required_rbdc_kbps()
                    );
                }
                RequestKind::VolumeBased => {
                    terminal.add_required_vbdc(*value);
                    debug!(
                        "SF#{}: ST{} VBDC request {} kb, {} kb pending",
                        self.superframe,
                        request.terminal_id,
                        value,
                        terminal.required_vbdc_kb()
                    );
                }
            }
        }
        true
    }

    pub fn update_cra(&mut self, terminal_id: TerminalId, cra_kbps: RateKbps) -> bool {
        let Some(terminal) = self.terminals.get_mut(&terminal_id) else {
            warn!("SF#{}: CRA update for unknown ST{}", self.superframe, terminal_id);
            return false;
        };
        self.stats.cra_kbps = self.stats.cra_kbps.saturating_sub(terminal.cra_kbps() as u64) + cra_kbps as u64;
        terminal.set_cra(cra_kbps);
        info!("SF#{}: ST{} CRA set to {} kb/s", self.superframe, terminal_id, cra_kbps);
        true
    }

    pub fn update_max_rbdc(&mut self, terminal_id: TerminalId, max_rbdc_kbps: RateKbps) -> bool {
        let Some(terminal) = self.terminals.get_mut(&terminal_id) else {
            warn!("SF#{}: max RBDC update for unknown ST{}", self.superframe, terminal_id);
            return false;
        };
        self.stats.max_rbdc_kbps =
            self.stats.max_rbdc_kbps.saturating_sub(terminal.max_rbdc_kbps() as u64) + max_rbdc_kbps as u64;
        terminal.set_max_rbdc(max_rbdc_kbps);
        info!("SF#{}: ST{} max RBDC set to {} kb/s", self.superframe, terminal_id, max_rbdc_kbps);
        true
    }

    /// Request RBDC on behalf of a terminal, as if it had sent the request itself.
    pub fn inject_rbdc(&mut self, terminal_id: TerminalId, rbdc_kbps: RateKbps) -> bool {
        let Some(terminal) = self.terminals.get_mut(&terminal_id) else {
            warn!("SF#{}: RBDC injection for unknown ST{}", self.superframe, terminal_id);
            return false;
        };
        terminal.set_required_rbdc(rbdc_kbps);
        info!("SF#{}: ST{} RBDC set to {} kb/s", self.superframe, terminal_id, rbdc_kbps);
        true
    }

    /// Run one allocation cycle and build its time plan.
    pub fn on_superframe_start(&mut self, superframe: SuperframeNumber) -> TimeTranslationPlan {
        self.superframe = superframe;
        self.reset_terminals();
        self.update_required_fmts();
        self.update_waveforms();
        self.reset_carriers_capacity();
        self.stats.rbdc_granted_kbps = self.run_rbdc();
        self.stats.vbdc_granted_kb = self.run_vbdc();
        self.stats.fca_granted_kbps = self.run_fca();
        let plan = self.build_time_plan();

        let remaining: u64 = self
            .categories
            .iter()
            .flat_map(|category| category.carriers())
            .map(|carrier| carrier.remaining_capacity())
            .sum();
        self.telemetry.put("rbdc_granted_kbps", self.stats.rbdc_granted_kbps as f64);
        self.telemetry.put("vbdc_granted_kb", self.stats.vbdc_granted_kb as f64);
        self.telemetry.put("fca_granted_kbps", self.stats.fca_granted_kbps as f64);
        self.telemetry.put("remaining_capacity_pkt", remaining as f64);
        debug!(
            "SF#{}: granted RBDC {} kb/s, VBDC {} kb, FCA {} kb/s, {} packets left",
            superframe,
            self.stats.rbdc_granted_kbps,
            self.stats.vbdc_granted_kb,
            self.stats.fca_granted_kbps,
            remaining
        );
        plan
    }

    fn reset_terminals(&mut self) {
        for terminal in self.terminals.values_mut() {
            let slot_kbps = self.table.get(terminal.fmt_id()).map(|definition| {
                self.converter
                    .set_modulation_efficiency(definition.modulation_efficiency());
                self.converter.pktpf_to_kbps(1)
            });
            terminal.reset_for_superframe(slot_kbps);
        }
    }

    fn update_required_fmts(&mut self) {
        let fallback = self.table.min_id().unwrap_or(NO_FMT);
        for terminal in self.terminals.values_mut() {
            let fmt_id = self
                .registry
                .current(terminal.terminal_id())
                .filter(|fmt_id| *fmt_id != NO_FMT)
                .unwrap_or(fallback);
            terminal.set_required_fmt(fmt_id);
        }
    }

    /// Give every terminal a MODCOD and a carrier able to carry it.
    fn update_waveforms(&mut self) {
        for terminal in self.terminals.values_mut() {
            let Some(category) = self
                .categories
                .iter_mut()
                .find(|category| category.label() == terminal.category())
            else {
                warn!(
                    "SF#{}: ST{} belongs to missing category {}",
                    self.superframe,
                    terminal.terminal_id(),
                    terminal.category()
                );
                terminal.set_fmt(NO_FMT);
                continue;
            };
            let required = terminal.required_fmt();
            let current = terminal.carrier_id();

            let mut chosen: Option<(CarrierId, FmtId)> = category
                .carrier(current)
                .filter(|carrier| carrier.access() == AccessKind::Dama)
                .and_then(|carrier| carrier.nearest_fmt(required))
                .map(|fmt_id| (current, fmt_id));
            if chosen.is_none() {
                for carrier in category.carriers().iter().filter(|c| c.access() == AccessKind::Dama) {
                    let Some(fmt_id) = carrier.nearest_fmt(required) else {
                        continue;
                    };
                    if fmt_id == required {
                        chosen = Some((carrier.id(), fmt_id));
                        break;
                    }
                    if chosen.map_or(true, |(_, best)| fmt_id > best) {
                        chosen = Some((carrier.id(), fmt_id));
                    }
                }
            }

            match chosen {
                Some((carrier_id, fmt_id)) => {
                    if carrier_id != current {
                        category.move_terminal(terminal.terminal_id(), carrier_id);
                        terminal.set_carrier(carrier_id);
                    }
                    trace!(
                        "SF#{}: ST{} on carrier {} at MODCOD {}",
                        self.superframe,
                        terminal.terminal_id(),
                        carrier_id,
                        fmt_id
                    );
                    terminal.set_fmt(fmt_id);
                }
                None => {
                    warn!(
                        "SF#{}: no carrier of {} supports MODCOD {} or below for ST{}",
                        self.superframe,
                        category.label(),
                        required,
                        terminal.terminal_id()
                    );
                    terminal.set_fmt(NO_FMT);
                }
            }
        }
    }

    fn reset_carriers_capacity(&mut self) {
        for category in self.categories.iter_mut() {
            for carrier in category.carriers_mut() {
                let capacity = if carrier.access() == AccessKind::Dama {
                    self.converter.sym_to_pkt(carrier.symbols_per_frame()) as u64
                } else {
                    0
                };
                carrier.set_total_capacity(capacity);
                trace!(
                    "SF#{}: carrier {} starts with {} packets per frame",
                    self.superframe,
                    carrier.id(),
                    capacity
                );
            }
        }
    }

    /// Returns the RBDC granted over every carrier, in kb/s.
    fn run_rbdc(&mut self) -> u64 {
        let mut granted_kbps = 0u64;
        for category in self.categories.iter_mut() {
            for carrier_id in dama_carriers(category) {
                let remaining = remaining_pkt(category, carrier_id);
                let mut shares = Vec::new();
                for terminal_id in category.terminals_in_carrier(carrier_id) {
                    let Some(terminal) = self.terminals.get(&terminal_id) else {
                        continue;
                    };
                    let Some(definition) = self.table.get(terminal.fmt_id()) else {
                        continue;
                    };
                    self.converter
                        .set_modulation_efficiency(definition.modulation_efficiency());
                    shares.push(RbdcShare {
                        terminal_id,
                        request_pkt: self
                            .converter
                            .kbps_to_pktpf(definition.add_fec(terminal.required_rbdc_kbps())),
                        max_pkt: self
                            .converter
                            .kbps_to_pktpf(definition.add_fec(terminal.max_rbdc_kbps())),
                        credit: terminal.rbdc_credit_pkt(),
                        granted_pkt: 0,
                    });
                }
                if shares.iter().all(|share| share.request_pkt == 0) {
                    continue;
                }

                let left = share_rbdc(&mut shares, remaining);
                for share in shares {
                    let Some(terminal) = self.terminals.get_mut(&share.terminal_id) else {
                        continue;
                    };
                    let Some(definition) = self.table.get(terminal.fmt_id()) else {
                        continue;
                    };
                    self.converter
                        .set_modulation_efficiency(definition.modulation_efficiency());
                    terminal.rbdc_pkt = share.granted_pkt;
                    terminal.rbdc_kbps = definition.remove_fec(self.converter.pktpf_to_kbps(share.granted_pkt));
                    terminal.set_rbdc_credit(share.credit);
                    granted_kbps += terminal.rbdc_kbps as u64;
                    trace!(
                        "SF#{}: ST{} RBDC {} packets ({} kb/s)",
                        self.superframe,
                        share.terminal_id,
                        terminal.rbdc_pkt,
                        terminal.rbdc_kbps
                    );
                }
                debug!(
                    "SF#{}: carrier {} of {}: {} packets left after RBDC",
                    self.superframe,
                    carrier_id,
                    category.label(),
                    left
                );
                set_remaining_pkt(category, carrier_id, left);
            }
        }
        granted_kbps
    }

    /// Returns the VBDC granted over every carrier, in kb.
    fn run_vbdc(&mut self) -> u64 {
        let mut granted_kb = 0u64;
        for category in self.categories.iter_mut() {
            for carrier_id in dama_carriers(category) {
                let remaining = remaining_pkt(category, carrier_id);
                if remaining == 0 {
                    continue;
                }
                let mut shares = Vec::new();
                for terminal_id in category.terminals_in_carrier(carrier_id) {
                    let Some(terminal) = self.terminals.get(&terminal_id) else {
                        continue;
                    };
                    let Some(definition) = self.table.get(terminal.fmt_id()) else {
                        continue;
                    };
                    self.converter
                        .set_modulation_efficiency(definition.modulation_efficiency());
                    shares.push(VbdcShare {
                        terminal_id,
                        request_pkt: self
                            .converter
                            .kbits_to_pkt(definition.add_fec(terminal.required_vbdc_kb())),
                        granted_pkt: 0,
                    });
                }

                let left = share_vbdc(&mut shares, remaining);
                for share in shares.iter().filter(|share| share.granted_pkt > 0) {
                    let Some(terminal) = self.terminals.get_mut(&share.terminal_id) else {
                        continue;
                    };
                    let Some(definition) = self.table.get(terminal.fmt_id()) else {
                        continue;
                    };
                    self.converter
                        .set_modulation_efficiency(definition.modulation_efficiency());
                    terminal.vbdc_pkt = share.granted_pkt;
                    terminal.vbdc_kb = definition.remove_fec(self.converter.pkt_to_kbits(share.granted_pkt));
                    terminal.consume_vbdc(terminal.vbdc_kb, share.granted_pkt >= share.request_pkt);
                    granted_kb += terminal.vbdc_kb as u64;
                    trace!(
                        "SF#{}: ST{} VBDC {} packets ({} kb), {} kb still pending",
                        self.superframe,
                        share.terminal_id,
                        terminal.vbdc_pkt,
                        terminal.vbdc_kb,
                        terminal.required_vbdc_kb()
                    );
                }
                set_remaining_pkt(category, carrier_id, left);
            }
        }
        granted_kb
    }

    /// Returns the free capacity granted over every carrier, in kb/s.
    fn run_fca(&mut self) -> u64 {
        if self.config.fca_kbps == 0 {
            return 0;
        }
        let mut granted_kbps = 0u64;
        for category in self.categories.iter_mut() {
            for carrier_id in dama_carriers(category) {
                let remaining = remaining_pkt(category, carrier_id);
                if remaining == 0 {
                    continue;
                }
                let mut shares = Vec::new();
                for terminal_id in category.terminals_in_carrier(carrier_id) {
                    let Some(terminal) = self.terminals.get(&terminal_id) else {
                        continue;
                    };
                    let Some(definition) = self.table.get(terminal.fmt_id()) else {
                        continue;
                    };
                    self.converter
                        .set_modulation_efficiency(definition.modulation_efficiency());
                    shares.push(FcaShare {
                        terminal_id,
                        credit: terminal.rbdc_credit_pkt(),
                        quantum_pkt: self.converter.kbps_to_pktpf(definition.add_fec(self.config.fca_kbps)),
                        granted_pkt: 0,
                    });
                }

                let left = share_fca(&mut shares, remaining);
                for share in shares.iter().filter(|share| share.granted_pkt > 0) {
                    let Some(terminal) = self.terminals.get_mut(&share.terminal_id) else {
                        continue;
                    };
                    let Some(definition) = self.table.get(terminal.fmt_id()) else {
                        continue;
                    };
                    self.converter
                        .set_modulation_efficiency(definition.modulation_efficiency());
                    terminal.fca_pkt = share.granted_pkt;
                    terminal.fca_kbps = definition.remove_fec(self.converter.pktpf_to_kbps(share.granted_pkt));
                    granted_kbps += terminal.fca_kbps as u64;
                }
                set_remaining_pkt(category, carrier_id, left);
            }
        }
        granted_kbps
    }

    fn build_time_plan(&mut self) -> TimeTranslationPlan {
        let mut plan = TimeTranslationPlan::new(self.group_id, self.superframe);
        for terminal in self.terminals.values_mut() {
            if let Some(definition) = self.table.get(terminal.fmt_id()) {
                self.converter
                    .set_modulation_efficiency(definition.modulation_efficiency());
                terminal.cra_pkt = self.converter.kbps_to_pktpf(terminal.cra_kbps());
            }
            plan.add(TimePlan {
                terminal_id: terminal.terminal_id(),
                frame: 0,
                offset: 0,
                assignment_count: terminal.total_allocation_pkt(),
                fmt_id: terminal.fmt_id(),
                priority: 0,
            });
        }
        plan
    }

    /// (logged terminals, CRA sum in kb/s, max RBDC sum in kb/s, requests received)
    pub fn get_stats(&self) -> (usize, u64, u64, u64) {
        (
            self.terminals.len(),
            self.stats.cra_kbps,
            self.stats.max_rbdc_kbps,
            self.stats.requests_received,
        )
    }

    /// Granted (RBDC kb/s, VBDC kb, FCA kb/s) of the last superframe.
    pub fn last_grants(&self) -> (u64, u64, u64) {
        (
            self.stats.rbdc_granted_kbps,
            self.stats.vbdc_granted_kb,
            self.stats.fca_granted_kbps,
        )
    }

    pub fn discarded_requests(&self) -> u64 {
        self.stats.requests_discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CarrierGroupConfig, CategoryConfig};
    use crate::telemetry::RecordingTelemetry;
    use satdama_core::{CodingRate, FmtDefinition, Modulation, VolumeKb};

    fn carrier(id: CarrierId, fmt_ids: Vec<FmtId>, access: AccessKind) -> CarrierGroupConfig {
        // 10 ms frames of 53600 symbols: 100 bursts of 536 symbols
        CarrierGroupConfig {
            id,
            symbol_rate: 5_360_000,
            carriers: 1,
            fmt_ids,
            access,
            vcm: Vec::new(),
        }
    }

    fn config(return_carriers: Vec<CarrierGroupConfig>) -> DamaConfig {
        let rate = CodingRate::new(1, 1).unwrap();
        DamaConfig {
            frame_duration_ms: 10,
            categories: vec![CategoryConfig {
                label: "Standard".to_string(),
                carriers: return_carriers,
            }],
            forward: CategoryConfig {
                label: "Forward".to_string(),
                carriers: vec![carrier(10, vec![1, 2], AccessKind::Acm)],
            },
            // one burst per frame is 1072 bits at QPSK: 107 kb/s
            fmt_definitions: vec![
                FmtDefinition::new(1, Modulation::Qpsk, rate, 2.0, 1.0).with_burst_length(536),
                FmtDefinition::new(2, Modulation::Psk8, rate, 3.0, 5.0).with_burst_length(536),
            ],
            ..DamaConfig::default()
        }
    }

    fn controller_with(config: DamaConfig) -> DamaController {
        let table = Arc::new(config.fmt_table().unwrap());
        DamaController::new(1, config, table, TerminalFmtRegistry::new()).unwrap()
    }

    fn controller() -> DamaController {
        controller_with(config(vec![carrier(0, vec![1], AccessKind::Dama)]))
    }

    fn logon(terminal_id: TerminalId, cra_kbps: RateKbps, max_vbdc_kb: VolumeKb) -> LogonRequest {
        LogonRequest {
            terminal_id,
            cra_kbps,
            max_rbdc_kbps: 10_000,
            max_vbdc_kb,
        }
    }

    fn rbdc(terminal_id: TerminalId, kbps: u32) -> CapacityRequest {
        let mut request = CapacityRequest::new(terminal_id, 1);
        request.add(RequestKind::RateBased, kbps);
        request
    }

    fn assignment(plan: &TimeTranslationPlan, terminal_id: TerminalId) -> (u32, FmtId) {
        let entry = plan.plans_for(terminal_id).next().unwrap();
        (entry.assignment_count, entry.fmt_id)
    }

    #[test]
    fn test_congested_rbdc_split_evenly() {
        let mut controller = controller();
        controller.on_logon(&logon(1, 0, 0)).unwrap();
        controller.on_logon(&logon(2, 0, 0)).unwrap();
        // 60 bursts per frame each, 100 available
        assert!(controller.on_capacity_request(&rbdc(1, 6432)));
        assert!(controller.on_capacity_request(&rbdc(2, 6432)));

        let plan = controller.on_superframe_start(1);
        assert_eq!(plan.group_id, 1);
        assert_eq!(plan.superframe, 1);
        assert_eq!(assignment(&plan, 1), (50, 1));
        assert_eq!(assignment(&plan, 2), (50, 1));
        assert_eq!(controller.terminal(1).unwrap().granted_rbdc_kbps(), 5360);
        assert_eq!(controller.category("Standard").unwrap().carrier(0).unwrap().remaining_capacity(), 0);
        assert_eq!(controller.last_grants().0, 10_720);
    }

    #[test]
    fn test_rbdc_granted_in_full_below_capacity() {
        let mut controller = controller();
        controller.on_logon(&logon(1, 0, 0)).unwrap();
        controller.on_logon(&logon(2, 0, 0)).unwrap();
        controller.on_capacity_request(&rbdc(1, 1072));
        controller.on_capacity_request(&rbdc(2, 2144));
        let plan = controller.on_superframe_start(1);
        assert_eq!(assignment(&plan, 1).0, 10);
        assert_eq!(assignment(&plan, 2).0, 20);
        assert_eq!(controller.category("Standard").unwrap().carrier(0).unwrap().remaining_capacity(), 70);
    }

    #[test]
    fn test_duplicate_logon_ignored() {
        let mut controller = controller();
        assert!(controller.on_logon(&logon(3, 100, 0)).is_some());
        assert!(controller.on_logon(&logon(3, 500, 0)).is_none());
        assert_eq!(controller.terminal_count(), 1);
        assert_eq!(controller.terminal(3).unwrap().cra_kbps(), 100);
        assert_eq!(controller.get_stats(), (1, 100, 10_000, 0));
    }

    #[test]
    fn test_request_from_unknown_terminal_discarded() {
        let mut controller = controller();
        controller.on_logon(&logon(1, 0, 0)).unwrap();
        assert!(!controller.on_capacity_request(&rbdc(9, 1000)));
        assert_eq!(controller.terminal_count(), 1);
        assert_eq!(controller.discarded_requests(), 1);
        // the superframe still runs for everybody else
        let plan = controller.on_superframe_start(1);
        assert_eq!(plan.plans.len(), 1);
    }

    #[test]
    fn test_rbdc_request_reduced_by_cra_and_clamped() {
        let mut controller = controller();
        controller.on_logon(&logon(1, 1000, 0)).unwrap();
        controller.on_capacity_request(&rbdc(1, 3000));
        assert_eq!(controller.terminal(1).unwrap().required_rbdc_kbps(), 2000);
        controller.on_capacity_request(&rbdc(1, 500));
        assert_eq!(controller.terminal(1).unwrap().required_rbdc_kbps(), 0);
        controller.on_capacity_request(&rbdc(1, 50_000));
        assert_eq!(controller.terminal(1).unwrap().required_rbdc_kbps(), 10_000);
    }

    #[test]
    fn test_cra_announced_in_time_plan() {
        let mut controller = controller();
        controller.on_logon(&logon(1, 214, 0)).unwrap();
        let plan = controller.on_superframe_start(1);
        assert_eq!(assignment(&plan, 1), (2, 1));
    }

    #[test]
    fn test_vbdc_served_once() {
        let mut controller = controller();
        controller.on_logon(&logon(1, 0, 1000)).unwrap();
        let mut request = CapacityRequest::new(1, 1);
        request.add(RequestKind::VolumeBased, 100);
        controller.on_capacity_request(&request);

        let plan = controller.on_superframe_start(1);
        // 100 kb in bursts of 1072 bits
        assert_eq!(assignment(&plan, 1).0, 94);
        assert_eq!(controller.terminal(1).unwrap().required_vbdc_kb(), 0);
        let plan = controller.on_superframe_start(2);
        assert_eq!(assignment(&plan, 1).0, 0);
    }

    #[test]
    fn test_fca_shares_leftover() {
        let mut config = config(vec![carrier(0, vec![1], AccessKind::Dama)]);
        config.fca_kbps = 107;
        let mut controller = controller_with(config);
        controller.on_logon(&logon(1, 0, 0)).unwrap();
        controller.on_logon(&logon(2, 0, 0)).unwrap();
        let plan = controller.on_superframe_start(1);
        assert_eq!(assignment(&plan, 1).0, 1);
        assert_eq!(assignment(&plan, 2).0, 1);
        assert_eq!(controller.terminal(1).unwrap().granted_fca_kbps(), 107);
    }

    #[test]
    fn test_terminal_moves_to_carrier_supporting_its_modcod() {
        let mut controller = controller_with(config(vec![
            carrier(0, vec![2], AccessKind::Dama),
            carrier(1, vec![1], AccessKind::Dama),
        ]));
        controller.on_logon(&logon(1, 0, 0)).unwrap();
        let plan = controller.on_superframe_start(1);
        assert_eq!(assignment(&plan, 1).1, 2);
        assert_eq!(controller.terminal(1).unwrap().carrier_id(), 0);

        // a poor C/N only allows the most robust MODCOD
        let mut request = rbdc(1, 1072);
        request.cni_db = Some(0.0);
        controller.on_capacity_request(&request);
        let plan = controller.on_superframe_start(2);
        assert_eq!(assignment(&plan, 1), (10, 1));
        assert_eq!(controller.terminal(1).unwrap().carrier_id(), 1);
        assert_eq!(controller.category("Standard").unwrap().carrier_of(1), Some(1));
    }

    #[test]
    fn test_no_allocation_without_usable_modcod() {
        let mut controller = controller_with(config(vec![carrier(0, vec![2], AccessKind::Dama)]));
        controller.on_logon(&logon(1, 214, 0)).unwrap();
        controller.registry().set(1, 1);
        controller.on_capacity_request(&rbdc(1, 2000));
        let plan = controller.on_superframe_start(1);
        assert_eq!(assignment(&plan, 1), (0, NO_FMT));
    }

    #[test]
    fn test_logoff_removes_terminal() {
        let mut controller = controller();
        controller.on_logon(&logon(1, 100, 0)).unwrap();
        assert!(controller.on_logoff(&Logoff { terminal_id: 1 }));
        assert!(!controller.on_logoff(&Logoff { terminal_id: 1 }));
        assert_eq!(controller.terminal_count(), 0);
        assert!(!controller.registry().contains(1));
        assert!(!controller.category("Standard").unwrap().contains(1));
        assert!(!controller.on_capacity_request(&rbdc(1, 1000)));
        assert_eq!(controller.get_stats(), (0, 0, 0, 0));
    }

    #[test]
    fn test_pep_commands() {
        let mut controller = controller();
        controller.on_logon(&logon(1, 0, 0)).unwrap();
        assert!(controller.inject_rbdc(1, 1072));
        let plan = controller.on_superframe_start(1);
        assert_eq!(assignment(&plan, 1).0, 10);

        assert!(controller.update_max_rbdc(1, 536));
        let plan = controller.on_superframe_start(2);
        assert_eq!(assignment(&plan, 1).0, 5);

        assert!(controller.update_cra(1, 107));
        assert_eq!(controller.get_stats().1, 107);
        assert!(!controller.update_cra(7, 107));
        assert!(!controller.inject_rbdc(7, 107));
    }

    #[test]
    fn test_telemetry_samples() {
        let telemetry = RecordingTelemetry::new();
        let mut controller = controller().with_telemetry(Box::new(telemetry.clone()));
        controller.on_logon(&logon(1, 0, 0)).unwrap();
        controller.on_logon(&logon(2, 0, 0)).unwrap();
        controller.on_capacity_request(&rbdc(1, 1072));
        controller.on_superframe_start(1);
        assert_eq!(telemetry.last("logged_terminals"), Some(2.0));
        assert_eq!(telemetry.last("rbdc_granted_kbps"), Some(1072.0));
        assert_eq!(telemetry.last("remaining_capacity_pkt"), Some(90.0));
    }

    #[test]
    fn test_undefined_modcod_rejected() {
        let config = config(vec![carrier(0, vec![1], AccessKind::Dama)]);
        let rate = CodingRate::new(1, 1).unwrap();
        let table = FmtTable::from_definitions(vec![FmtDefinition::new(2, Modulation::Psk8, rate, 3.0, 5.0)]).unwrap();
        assert!(matches!(
            DamaController::new(1, config, Arc::new(table), TerminalFmtRegistry::new()),
            Err(DamaError::Configuration(_))
        ));
    }
}
