//! Conversions between packets, bits, kbits and symbols for a given frame duration

use serde::{Deserialize, Serialize};

use crate::{RateKbps, RatePktpf, TimeMs, VolumeKb, VolumePkt, VolumeSym};

/// What is fixed about a packet (a DVB-RCS cell or a DVB-RCS2 burst).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketLength {
    /// Constant number of bits per packet.
    Bits(u32),
    /// Constant number of symbols per packet; the bit length follows the
    /// current modulation efficiency.
    Symbols(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConverter {
    frame_duration_ms: TimeMs,
    length: PacketLength,
    modulation_efficiency: u32,
}

impl UnitConverter {
    pub fn fixed_bit_length(frame_duration_ms: TimeMs, packet_bits: u32) -> Self {
        Self {
            frame_duration_ms: frame_duration_ms.max(1),
            length: PacketLength::Bits(packet_bits),
            modulation_efficiency: 1,
        }
    }

    pub fn fixed_symbol_length(frame_duration_ms: TimeMs, modulation_efficiency: u32, packet_symbols: u32) -> Self {
        Self {
            frame_duration_ms: frame_duration_ms.max(1),
            length: PacketLength::Symbols(packet_symbols),
            modulation_efficiency,
        }
    }

    pub fn frame_duration_ms(&self) -> TimeMs {
        self.frame_duration_ms
    }

    pub fn modulation_efficiency(&self) -> u32 {
        self.modulation_efficiency
    }

    pub fn set_modulation_efficiency(&mut self, efficiency: u32) {
        self.modulation_efficiency = efficiency;
    }

    pub fn packet_bit_length(&self) -> u32 {
        match self.length {
            PacketLength::Bits(bits) => bits,
            PacketLength::Symbols(symbols) => symbols * self.modulation_efficiency,
        }
    }

    /// Symbols occupied by one packet, 0 if the modulation is unknown.
    pub fn packet_symbol_length(&self) -> u32 {
        match self.length {
            PacketLength::Symbols(symbols) => symbols,
            PacketLength::Bits(bits) if self.modulation_efficiency > 0 => bits.div_ceil(self.modulation_efficiency),
            PacketLength::Bits(_) => 0,
        }
    }

    pub fn pkt_to_bits(&self, pkt: VolumePkt) -> u64 {
        pkt as u64 * self.packet_bit_length() as u64
    }

    pub fn pkt_to_kbits(&self, pkt: VolumePkt) -> VolumeKb {
        (self.pkt_to_bits(pkt) / 1000) as VolumeKb
    }

    /// Packets needed for `bits`, rounded up.
    pub fn bits_to_pkt(&self, bits: u64) -> VolumePkt {
        let length = self.packet_bit_length() as u64;
        if length == 0 {
            return 0;
        }
        bits.div_ceil(length) as VolumePkt
    }

    pub fn kbits_to_pkt(&self, kbits: VolumeKb) -> VolumePkt {
        self.bits_to_pkt(kbits as u64 * 1000)
    }

    pub fn pktpf_to_kbps(&self, pktpf: RatePktpf) -> RateKbps {
        // bits per ms is kbits per second
        (self.pkt_to_bits(pktpf) / self.frame_duration_ms as u64) as RateKbps
    }

    pub fn kbps_to_pktpf(&self, kbps: RateKbps) -> RatePktpf {
        self.bits_to_pkt(kbps as u64 * self.frame_duration_ms as u64)
    }

    pub fn sym_to_pkt(&self, symbols: VolumeSym) -> VolumePkt {
        let per_packet = self.packet_symbol_length() as u64;
        if per_packet == 0 {
            return 0;
        }
        (symbols / per_packet) as VolumePkt
    }

    pub fn pkt_to_sym(&self, pkt: VolumePkt) -> VolumeSym {
        pkt as VolumeSym * self.packet_symbol_length() as VolumeSym
    }

    pub fn pktpf_to_symps(&self, pktpf: RatePktpf) -> u64 {
        self.pf_to_ps(self.pkt_to_sym(pktpf))
    }

    /// Per-frame quantity to per-second.
    pub fn pf_to_ps(&self, per_frame: u64) -> u64 {
        per_frame * 1000 / self.frame_duration_ms as u64
    }

    /// Per-second quantity to per-frame, rounded up.
    pub fn ps_to_pf(&self, per_second: u64) -> u64 {
        (per_second * self.frame_duration_ms as u64).div_ceil(1000)
    }
}
