//! Capacity request computation, one implementation per DAMA flavour

use log::trace;
use satdama_core::{RateKbps, TimeMs, VolumeKb, SAC_FIELD_MAX_RBDC, SAC_FIELD_MAX_VBDC};

use crate::config::{DamaConfig, StrategyKind};
use crate::scheduler::ReturnScheduler;

/// Inputs of a rate-based request computation.
#[derive(Debug, Clone, Copy)]
pub struct RbdcInput {
    /// Bits queued on RBDC queues.
    pub queued_bits: u64,
    /// Bits that entered RBDC queues since the last request.
    pub arrived_bits: u64,
    /// Sum of the requests sent within the last MSL, in kb/s.
    pub recent_requests_kbps: u64,
    /// Frames elapsed since the last request.
    pub timer_frames: u32,
    pub frame_duration_ms: TimeMs,
    pub msl_frames: u32,
    pub max_rbdc_kbps: RateKbps,
}

#[derive(Debug, Clone, Copy)]
pub struct VbdcInput {
    pub queued_bits: u64,
    /// Volume already requested, in kbits.
    pub credit_kb: VolumeKb,
    pub max_vbdc_kb: VolumeKb,
}

pub trait RequestStrategy: Send + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn compute_rbdc_request(&self, input: &RbdcInput) -> RateKbps;

    fn compute_vbdc_request(&self, input: &VbdcInput) -> VolumeKb;

    fn return_scheduler(&self, config: &DamaConfig) -> ReturnScheduler;
}

/// Request computation of the legacy DVB-RCS2 agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyStrategy;

impl RequestStrategy for LegacyStrategy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn compute_rbdc_request(&self, input: &RbdcInput) -> RateKbps {
        let frame_ms = input.frame_duration_ms.max(1) as f64;
        let msl = input.msl_frames.max(1) as f64;
        let timer = input.timer_frames as f64;

        // bits still uncovered once the in-flight requests are served
        let uncovered = input.queued_bits as f64 - timer * frame_ms * input.recent_requests_kbps as f64;
        let need = (uncovered / (frame_ms * msl)).ceil().max(0.0);
        let request = if input.timer_frames > 0 {
            (input.arrived_bits as f64 / (timer * frame_ms)).ceil() + need
        } else {
            need
        };
        trace!(
            "RBDC: queued {} b, arrived {} b, in-flight {} kb/s, timer {} -> {} kb/s",
            input.queued_bits,
            input.arrived_bits,
            input.recent_requests_kbps,
            input.timer_frames,
            request
        );

        let request = request.min(u32::MAX as f64) as RateKbps;
        request.min(input.max_rbdc_kbps).min(SAC_FIELD_MAX_RBDC)
    }

    fn compute_vbdc_request(&self, input: &VbdcInput) -> VolumeKb {
        let need_kb = input.queued_bits.div_ceil(1000).min(u32::MAX as u64) as VolumeKb;
        need_kb
            .saturating_sub(input.credit_kb)
            .min(input.max_vbdc_kb)
            .min(SAC_FIELD_MAX_VBDC)
    }

    fn return_scheduler(&self, config: &DamaConfig) -> ReturnScheduler {
        ReturnScheduler::new(config.header_bytes, config.max_frame_bytes)
    }
}

pub fn strategy_for(kind: StrategyKind) -> Box<dyn RequestStrategy> {
    match kind {
        StrategyKind::Legacy => Box::new(LegacyStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rbdc(queued_bits: u64, arrived_bits: u64, recent: u64, timer: u32) -> RbdcInput {
        RbdcInput {
            queued_bits,
            arrived_bits,
            recent_requests_kbps: recent,
            timer_frames: timer,
            frame_duration_ms: 10,
            msl_frames: 2,
            max_rbdc_kbps: 100_000,
        }
    }

    #[test]
    fn test_rbdc_first_request() {
        // 100 kb queued over an MSL of 2 frames of 10 ms
        assert_eq!(LegacyStrategy.compute_rbdc_request(&rbdc(100_000, 100_000, 0, 0)), 5000);
    }

    #[test]
    fn test_rbdc_counts_arrivals_and_in_flight_requests() {
        // 20 kb arrived in 2 frames: 1000 kb/s; 40 kb queued minus 2*10*1000 in flight: 20 kb over 20 ms
        assert_eq!(LegacyStrategy.compute_rbdc_request(&rbdc(40_000, 20_000, 1000, 2)), 2000);
        // in-flight requests already cover the queue
        assert_eq!(LegacyStrategy.compute_rbdc_request(&rbdc(10_000, 0, 4000, 1)), 0);
    }

    #[test]
    fn test_rbdc_clamped() {
        let mut input = rbdc(100_000_000, 0, 0, 0);
        assert_eq!(LegacyStrategy.compute_rbdc_request(&input), SAC_FIELD_MAX_RBDC);
        input.max_rbdc_kbps = 512;
        assert_eq!(LegacyStrategy.compute_rbdc_request(&input), 512);
    }

    #[test]
    fn test_vbdc_subtracts_credit() {
        let input = VbdcInput {
            queued_bits: 12_500,
            credit_kb: 0,
            max_vbdc_kb: 1000,
        };
        assert_eq!(LegacyStrategy.compute_vbdc_request(&input), 13);
        let input = VbdcInput { credit_kb: 10, ..input };
        assert_eq!(LegacyStrategy.compute_vbdc_request(&input), 3);
        let input = VbdcInput { credit_kb: 20, ..input };
        assert_eq!(LegacyStrategy.compute_vbdc_request(&input), 0);
        let input = VbdcInput {
            queued_bits: 10_000_000,
            credit_kb: 0,
            max_vbdc_kb: 100_000,
        };
        assert_eq!(LegacyStrategy.compute_vbdc_request(&input), SAC_FIELD_MAX_VBDC);
    }
}
