//! Per-terminal bookkeeping held by the controller

use log::trace;
use satdama_core::{CarrierId, FmtId, RateKbps, RatePktpf, TerminalId, TimeFrames, VolumeKb, VolumePkt, NO_FMT};

/// What the controller knows about one logged-on terminal.
#[derive(Debug, Clone)]
pub struct TerminalContext {
    terminal_id: TerminalId,
    category: String,
    cra_kbps: RateKbps,
    max_rbdc_kbps: RateKbps,
    rbdc_timeout: TimeFrames,
    max_vbdc_kb: VolumeKb,
    carrier_id: CarrierId,
    required_fmt: FmtId,
    fmt_id: FmtId,
    required_rbdc_kbps: RateKbps,
    required_vbdc_kb: VolumeKb,
    /// Fractional packets owed by previous fair shares.
    rbdc_credit_pkt: f64,
    timer: TimeFrames,
    pub(crate) cra_pkt: RatePktpf,
    pub(crate) rbdc_pkt: RatePktpf,
    pub(crate) rbdc_kbps: RateKbps,
    pub(crate) vbdc_pkt: VolumePkt,
    pub(crate) vbdc_kb: VolumeKb,
    pub(crate) fca_pkt: RatePktpf,
    pub(crate) fca_kbps: RateKbps,
}

impl TerminalContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        terminal_id: TerminalId,
        category: impl Into<String>,
        cra_kbps: RateKbps,
        max_rbdc_kbps: RateKbps,
        rbdc_timeout: TimeFrames,
        max_vbdc_kb: VolumeKb,
        carrier_id: CarrierId,
        required_fmt: FmtId,
    ) -> Self {
        Self {
            terminal_id,
            category: category.into(),
            cra_kbps,
            max_rbdc_kbps,
            rbdc_timeout,
            max_vbdc_kb,
            carrier_id,
            required_fmt,
            fmt_id: NO_FMT,
            required_rbdc_kbps: 0,
            required_vbdc_kb: 0,
            rbdc_credit_pkt: 0.0,
            timer: 0,
            cra_pkt: 0,
            rbdc_pkt: 0,
            rbdc_kbps: 0,
            vbdc_pkt: 0,
            vbdc_kb: 0,
            fca_pkt: 0,
            fca_kbps: 0,
        }
    }

    pub fn terminal_id(&self) -> TerminalId {
        self.terminal_id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn cra_kbps(&self) -> RateKbps {
        self.cra_kbps
    }

    pub fn max_rbdc_kbps(&self) -> RateKbps {
        self.max_rbdc_kbps
    }

    pub fn max_vbdc_kb(&self) -> VolumeKb {
        self.max_vbdc_kb
    }

    pub fn carrier_id(&self) -> CarrierId {
        self.carrier_id
    }

    pub fn required_fmt(&self) -> FmtId {
        self.required_fmt
    }

    /// MODCOD granted this superframe, [`NO_FMT`] when none fits.
    pub fn fmt_id(&self) -> FmtId {
        self.fmt_id
    }

    pub fn required_rbdc_kbps(&self) -> RateKbps {
        self.required_rbdc_kbps
    }

    pub fn required_vbdc_kb(&self) -> VolumeKb {
        self.required_vbdc_kb
    }

    pub fn rbdc_credit_pkt(&self) -> f64 {
        self.rbdc_credit_pkt
    }

    pub fn timer(&self) -> TimeFrames {
        self.timer
    }

    pub fn granted_rbdc_kbps(&self) -> RateKbps {
        self.rbdc_kbps
    }

    pub fn granted_vbdc_kb(&self) -> VolumeKb {
        self.vbdc_kb
    }

    pub fn granted_fca_kbps(&self) -> RateKbps {
        self.fca_kbps
    }

    /// Packets per frame announced in the time plan.
    pub fn total_allocation_pkt(&self) -> u32 {
        if self.fmt_id == NO_FMT {
            return 0;
        }
        self.cra_pkt
            .saturating_add(self.rbdc_pkt)
            .saturating_add(self.fca_pkt)
            .saturating_add(self.vbdc_pkt)
    }

    pub(crate) fn set_cra(&mut self, cra_kbps: RateKbps) {
        self.cra_kbps = cra_kbps;
    }

    pub(crate) fn set_max_rbdc(&mut self, max_rbdc_kbps: RateKbps) {
        self.max_rbdc_kbps = max_rbdc_kbps;
        self.required_rbdc_kbps = self.required_rbdc_kbps.min(max_rbdc_kbps);
    }

    pub(crate) fn set_carrier(&mut self, carrier_id: CarrierId) {
        self.carrier_id = carrier_id;
    }

    pub(crate) fn set_required_fmt(&mut self, fmt_id: FmtId) {
        self.required_fmt = fmt_id;
    }

    pub(crate) fn set_fmt(&mut self, fmt_id: FmtId) {
        self.fmt_id = fmt_id;
    }

    /// A fresh RBDC request replaces the previous one and restarts its timeout.
    pub(crate) fn set_required_rbdc(&mut self, rbdc_kbps: RateKbps) {
        self.required_rbdc_kbps = rbdc_kbps.min(self.max_rbdc_kbps);
        self.rbdc_credit_pkt = 0.0;
        self.timer = self.rbdc_timeout;
        trace!(
            "ST{}: RBDC request {} kb/s, timeout {}",
            self.terminal_id,
            self.required_rbdc_kbps,
            self.timer
        );
    }

    /// VBDC requests add up until served.
    pub(crate) fn add_required_vbdc(&mut self, vbdc_kb: VolumeKb) {
        self.required_vbdc_kb = self.required_vbdc_kb.saturating_add(vbdc_kb).min(self.max_vbdc_kb);
    }

    pub(crate) fn set_rbdc_credit(&mut self, credit_pkt: f64) {
        self.rbdc_credit_pkt = credit_pkt;
    }

    /// Account for a VBDC grant of `granted_kb`, `served` when the whole request fit.
    pub(crate) fn consume_vbdc(&mut self, granted_kb: VolumeKb, served: bool) {
        self.required_vbdc_kb = if served {
            0
        } else {
            self.required_vbdc_kb.saturating_sub(granted_kb)
        };
    }

    /// Start of a superframe: age the RBDC request and clear every grant.
    ///
    /// `slot_kbps` is the rate of one packet per frame at the current MODCOD,
    /// None when the terminal has no MODCOD.
    pub(crate) fn reset_for_superframe(&mut self, slot_kbps: Option<RateKbps>) {
        self.timer = self.timer.saturating_sub(1);
        if self.timer > 0 {
            match slot_kbps {
                Some(slot_kbps) if self.rbdc_credit_pkt >= 1.0 => {
                    self.rbdc_credit_pkt -= 1.0;
                    self.required_rbdc_kbps = self.required_rbdc_kbps.saturating_add(slot_kbps);
                }
                Some(_) => {}
                None => self.rbdc_credit_pkt = 0.0,
            }
        } else {
            self.required_rbdc_kbps = 0;
            self.rbdc_credit_pkt = 0.0;
        }
        self.cra_pkt = 0;
        self.rbdc_pkt = 0;
        self.rbdc_kbps = 0;
        self.vbdc_pkt = 0;
        self.vbdc_kb = 0;
        self.fca_pkt = 0;
        self.fca_kbps = 0;
    }
}
