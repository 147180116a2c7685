//! Satellite Access Control field encoding of capacity requests
//!
//! A request travels as a one byte value and a scale selector. RBDC uses a
//! 2 kb/s granularity and scaling factors 1, 16 and 32; VBDC counts kbits
//! with scaling factors 1 and 16.

use serde::{Deserialize, Serialize};

use crate::RequestKind;

pub const RBDC_GRANULARITY: u32 = 2;
pub const RBDC_SCALING_FACTOR: u32 = 16;
pub const RBDC_SCALING_FACTOR2: u32 = 32;
pub const RBDC_SCALING_OFFSET: u32 = 510;
pub const VBDC_SCALING_FACTOR: u32 = 16;
pub const VBDC_SCALING_OFFSET: u32 = 255;

/// Largest RBDC request a SAC field can carry, in kb/s.
pub const SAC_FIELD_MAX_RBDC: u32 = 255 * RBDC_GRANULARITY * RBDC_SCALING_FACTOR2;
/// Largest VBDC request a SAC field can carry, in kbits.
pub const SAC_FIELD_MAX_VBDC: u32 = 255 * VBDC_SCALING_FACTOR;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SacField {
    pub scale: u8,
    pub value: u8,
}

fn quantize(value: u32, step: u32) -> u8 {
    let quotient = value / step;
    let remainder = value % step;
    let rounded = if remainder < step / 2 { quotient } else { quotient + 1 };
    rounded.min(u8::MAX as u32) as u8
}

impl SacField {
    /// Encode `value` for `kind`, rounding to the nearest step and
    /// saturating at the field maximum.
    pub fn encode(kind: RequestKind, value: u32) -> Self {
        match kind {
            RequestKind::VolumeBased if value <= VBDC_SCALING_OFFSET => Self {
                scale: 0,
                value: value as u8,
            },
            RequestKind::VolumeBased => Self {
                scale: 1,
                value: quantize(value, VBDC_SCALING_FACTOR),
            },
            RequestKind::RateBased if value <= RBDC_SCALING_OFFSET => Self {
                scale: 0,
                value: quantize(value, RBDC_GRANULARITY),
            },
            RequestKind::RateBased if value <= RBDC_SCALING_OFFSET * RBDC_SCALING_FACTOR => Self {
                scale: 1,
                value: quantize(value, RBDC_GRANULARITY * RBDC_SCALING_FACTOR),
            },
            RequestKind::RateBased => Self {
                scale: 2,
                value: quantize(value, RBDC_GRANULARITY * RBDC_SCALING_FACTOR2),
            },
        }
    }

    pub fn decode(&self, kind: RequestKind) -> u32 {
        let value = self.value as u32;
        match (kind, self.scale) {
            (RequestKind::VolumeBased, 0) => value,
            (RequestKind::VolumeBased, _) => value * VBDC_SCALING_FACTOR,
            (RequestKind::RateBased, 0) => value * RBDC_GRANULARITY,
            (RequestKind::RateBased, 1) => value * RBDC_GRANULARITY * RBDC_SCALING_FACTOR,
            (RequestKind::RateBased, _) => value * RBDC_GRANULARITY * RBDC_SCALING_FACTOR2,
        }
    }
}
