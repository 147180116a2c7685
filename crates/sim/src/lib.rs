//! Simulation tools for SatDama

pub mod network;
pub mod scenarios;

use std::time::Duration;

use satdama_core::TerminalId;
use satdama_link::DamaConfig;

pub use network::{ChannelError, ChannelNode, SatelliteChannel};

/// Node id of the gateway on the satellite channel.
pub const GATEWAY_ID: TerminalId = 0;

/// Traffic profile shared by every simulated terminal.
#[derive(Debug, Clone)]
pub struct TrafficProfile {
    /// Mean offered load per terminal.
    pub mean_rate_kbps: f64,
    /// Fraction of the packets queued for VBDC, the rest goes to RBDC.
    pub vbdc_share: f64,
    pub packet_bytes: usize,
    pub cra_kbps: u32,
    pub max_rbdc_kbps: u32,
    pub max_vbdc_kb: u32,
    /// Forward traffic the gateway sends to each terminal.
    pub forward_rate_kbps: f64,
}

/// Return link C/N seen by the terminals.
#[derive(Debug, Clone, Copy)]
pub struct LinkConditions {
    pub mean_cni_db: f64,
    pub cni_std_db: f64,
}

#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub dama: DamaConfig,
    pub terminals: u16,
    pub superframes: u16,
    pub propagation_delay: Duration,
    pub traffic: TrafficProfile,
    pub link: LinkConditions,
    pub seed: u64,
}

pub struct SimulationPresets;

impl SimulationPresets {
    pub fn clear_sky() -> SimulationConfig {
        SimulationConfig {
            dama: DamaConfig::default(),
            terminals: 4,
            superframes: 200,
            propagation_delay: Duration::from_millis(250),
            traffic: TrafficProfile {
                mean_rate_kbps: 256.0,
                vbdc_share: 0.2,
                packet_bytes: 188,
                cra_kbps: 64,
                max_rbdc_kbps: 1024,
                max_vbdc_kb: 512,
                forward_rate_kbps: 512.0,
            },
            link: LinkConditions {
                mean_cni_db: 12.0,
                cni_std_db: 0.5,
            },
            seed: 7,
        }
    }

    /// Terminals fall back to robust MODCODs and lose capacity.
    pub fn rain_fade() -> SimulationConfig {
        SimulationConfig {
            link: LinkConditions {
                mean_cni_db: 3.0,
                cni_std_db: 2.0,
            },
            ..Self::clear_sky()
        }
    }

    /// More offered load than the return carrier can carry.
    pub fn congested() -> SimulationConfig {
        let mut config = Self::clear_sky();
        config.terminals = 12;
        config.traffic.mean_rate_kbps = 768.0;
        config.traffic.vbdc_share = 0.4;
        config.dama.fca_kbps = 16;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for preset in [
            SimulationPresets::clear_sky(),
            SimulationPresets::rain_fade(),
            SimulationPresets::congested(),
        ] {
            assert!(preset.dama.validate().is_ok());
            assert!(preset.terminals > 0);
            assert!(preset.traffic.vbdc_share <= 1.0);
        }
    }
}
