//! Carrier groups and the terminal categories owning them

use std::collections::BTreeMap;

use log::{debug, trace};
use satdama_core::{nearest_fmt_id, CarrierId, FmtId, SuperframeNumber, TerminalId, TimeMs, VolumeSym};

use crate::config::{AccessKind, CarrierGroupConfig, CategoryConfig};

/// Capacity left unused by one pass, valid on a single later pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CarryOver {
    amount: u64,
    valid_for: SuperframeNumber,
}

/// Pool of carriers sharing the same MODCODs and access mode.
#[derive(Debug, Clone)]
pub struct CarrierGroup {
    id: CarrierId,
    access: AccessKind,
    vcm_id: u8,
    fmt_ids: Vec<FmtId>,
    symbols_per_frame: VolumeSym,
    total_capacity: u64,
    remaining_capacity: u64,
    carry: Option<CarryOver>,
}

impl CarrierGroup {
    pub fn new(id: CarrierId, access: AccessKind, mut fmt_ids: Vec<FmtId>, symbols_per_frame: VolumeSym) -> Self {
        fmt_ids.sort_unstable();
        fmt_ids.dedup();
        Self {
            id,
            access,
            vcm_id: 0,
            fmt_ids,
            symbols_per_frame,
            total_capacity: symbols_per_frame,
            remaining_capacity: symbols_per_frame,
            carry: None,
        }
    }

    /// One group per VCM tier, or a single group otherwise.
    pub fn from_config(config: &CarrierGroupConfig, frame_duration_ms: TimeMs) -> Vec<Self> {
        let symbols = config.symbol_rate * config.carriers as u64 * frame_duration_ms as u64 / 1000;
        if config.access != AccessKind::Vcm {
            return vec![Self::new(config.id, config.access, config.fmt_ids.clone(), symbols)];
        }
        let ratio_sum: u64 = config.vcm.iter().map(|tier| tier.ratio as u64).sum::<u64>().max(1);
        config
            .vcm
            .iter()
            .enumerate()
            .map(|(index, tier)| {
                let mut group = Self::new(
                    config.id,
                    AccessKind::Vcm,
                    tier.fmt_ids.clone(),
                    symbols * tier.ratio as u64 / ratio_sum,
                );
                group.vcm_id = index as u8;
                group
            })
            .collect()
    }

    pub fn id(&self) -> CarrierId {
        self.id
    }

    pub fn access(&self) -> AccessKind {
        self.access
    }

    pub fn vcm_id(&self) -> u8 {
        self.vcm_id
    }

    pub fn fmt_ids(&self) -> &[FmtId] {
        &self.fmt_ids
    }

    pub fn supports(&self, fmt_id: FmtId) -> bool {
        self.fmt_ids.binary_search(&fmt_id).is_ok()
    }

    /// Most robust MODCOD of the group.
    pub fn lowest_fmt(&self) -> Option<FmtId> {
        self.fmt_ids.first().copied()
    }

    /// Highest supported MODCOD not above `target`.
    pub fn nearest_fmt(&self, target: FmtId) -> Option<FmtId> {
        nearest_fmt_id(&self.fmt_ids, target)
    }

    pub fn symbols_per_frame(&self) -> VolumeSym {
        self.symbols_per_frame
    }

    pub fn total_capacity(&self) -> u64 {
        self.total_capacity
    }

    pub fn remaining_capacity(&self) -> u64 {
        self.remaining_capacity
    }

    /// Set the per-frame capacity in the allocation unit and refill.
    pub(crate) fn set_total_capacity(&mut self, capacity: u64) {
        self.total_capacity = capacity;
        self.remaining_capacity = capacity;
    }

    pub(crate) fn set_remaining_capacity(&mut self, capacity: u64) {
        self.remaining_capacity = capacity;
    }

    /// Keep `amount` for the pass of superframe `valid_for`.
    pub(crate) fn carry_over(&mut self, amount: u64, valid_for: SuperframeNumber) {
        self.carry = (amount > 0).then_some(CarryOver { amount, valid_for });
        if amount > 0 {
            trace!("carrier {}: {} carried to SF#{}", self.id, amount, valid_for);
        }
    }

    /// Carried capacity usable on `superframe`, dropped in any case.
    pub(crate) fn take_carry_over(&mut self, superframe: SuperframeNumber) -> u64 {
        match self.carry.take() {
            Some(carry) if carry.valid_for == superframe => carry.amount,
            Some(carry) => {
                debug!(
                    "carrier {}: {} carried capacity for SF#{} expired",
                    self.id, carry.amount, carry.valid_for
                );
                0
            }
            None => 0,
        }
    }
}

/// Group of terminals sharing a set of carriers.
#[derive(Debug, Clone)]
pub struct TerminalCategory {
    label: String,
    carriers: Vec<CarrierGroup>,
    members: BTreeMap<TerminalId, CarrierId>,
}

impl TerminalCategory {
    pub fn new(label: impl Into<String>, carriers: Vec<CarrierGroup>) -> Self {
        Self {
            label: label.into(),
            carriers,
            members: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &CategoryConfig, frame_duration_ms: TimeMs) -> Self {
        let carriers = config
            .carriers
            .iter()
            .flat_map(|group| CarrierGroup::from_config(group, frame_duration_ms))
            .collect();
        Self::new(config.label.clone(), carriers)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn carriers(&self) -> &[CarrierGroup] {
        &self.carriers
    }

    pub(crate) fn carriers_mut(&mut self) -> &mut [CarrierGroup] {
        &mut self.carriers
    }

    pub fn carrier(&self, id: CarrierId) -> Option<&CarrierGroup> {
        self.carriers.iter().find(|group| group.id == id)
    }

    pub(crate) fn carrier_mut(&mut self, id: CarrierId) -> Option<&mut CarrierGroup> {
        self.carriers.iter_mut().find(|group| group.id == id)
    }

    /// Most robust MODCOD over every carrier of the category.
    pub fn lowest_fmt(&self) -> Option<FmtId> {
        self.carriers.iter().filter_map(CarrierGroup::lowest_fmt).min()
    }

    /// Attach a terminal to the first carrier of the category.
    pub fn add_terminal(&mut self, terminal_id: TerminalId) -> Option<CarrierId> {
        let carrier_id = self.carriers.first()?.id;
        self.members.insert(terminal_id, carrier_id);
        Some(carrier_id)
    }

    pub fn remove_terminal(&mut self, terminal_id: TerminalId) -> bool {
        self.members.remove(&terminal_id).is_some()
    }

    pub fn contains(&self, terminal_id: TerminalId) -> bool {
        self.members.contains_key(&terminal_id)
    }

    pub fn carrier_of(&self, terminal_id: TerminalId) -> Option<CarrierId> {
        self.members.get(&terminal_id).copied()
    }

    pub(crate) fn move_terminal(&mut self, terminal_id: TerminalId, carrier_id: CarrierId) {
        if let Some(current) = self.members.get_mut(&terminal_id) {
            if *current != carrier_id {
                debug!("ST{} moves to carrier {} in {}", terminal_id, carrier_id, self.label);
                *current = carrier_id;
            }
        }
    }

    pub fn terminal_count(&self) -> usize {
        self.members.len()
    }

    pub fn terminals(&self) -> impl Iterator<Item = TerminalId> + '_ {
        self.members.keys().copied()
    }

    /// Members bound to `carrier_id`, by ascending terminal id.
    pub fn terminals_in_carrier(&self, carrier_id: CarrierId) -> Vec<TerminalId> {
        self.members
            .iter()
            .filter(|(_, carrier)| **carrier == carrier_id)
            .map(|(terminal_id, _)| *terminal_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VcmTierConfig;

    fn group_config(access: AccessKind) -> CarrierGroupConfig {
        CarrierGroupConfig {
            id: 3,
            symbol_rate: 1_000_000,
            carriers: 2,
            fmt_ids: vec![5, 2, 3],
            access,
            vcm: Vec::new(),
        }
    }

    #[test]
    fn test_capacity_from_symbol_rate() {
        let groups = CarrierGroup::from_config(&group_config(AccessKind::Dama), 26);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].symbols_per_frame(), 52_000);
        assert_eq!(groups[0].fmt_ids(), &[2, 3, 5]);
        assert_eq!(groups[0].nearest_fmt(4), Some(3));
        assert_eq!(groups[0].nearest_fmt(1), None);
        assert_eq!(groups[0].lowest_fmt(), Some(2));
    }

    #[test]
    fn test_vcm_tiers_split_carrier() {
        let mut config = group_config(AccessKind::Vcm);
        config.vcm = vec![
            VcmTierConfig { ratio: 1, fmt_ids: vec![2] },
            VcmTierConfig { ratio: 3, fmt_ids: vec![6] },
        ];
        let groups = CarrierGroup::from_config(&config, 10);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].symbols_per_frame(), 5_000);
        assert_eq!(groups[1].symbols_per_frame(), 15_000);
        assert_eq!(groups[1].vcm_id(), 1);
        assert_eq!(groups[1].id(), 3);
    }

    #[test]
    fn test_carry_over_lives_one_pass() {
        let mut group = CarrierGroup::new(0, AccessKind::Acm, vec![1], 1000);
        group.carry_over(300, 8);
        assert_eq!(group.take_carry_over(8), 300);
        assert_eq!(group.take_carry_over(8), 0);

        group.carry_over(300, 8);
        assert_eq!(group.take_carry_over(9), 0);
        assert_eq!(group.take_carry_over(8), 0);
    }

    #[test]
    fn test_category_membership() {
        let mut category = TerminalCategory::new(
            "Standard",
            vec![
                CarrierGroup::new(0, AccessKind::Dama, vec![1, 2], 1000),
                CarrierGroup::new(1, AccessKind::Dama, vec![3, 4], 1000),
            ],
        );
        assert_eq!(category.add_terminal(5), Some(0));
        assert_eq!(category.add_terminal(2), Some(0));
        category.add_terminal(9);
        category.move_terminal(9, 1);
        assert_eq!(category.terminals_in_carrier(0), vec![2, 5]);
        assert_eq!(category.terminals_in_carrier(1), vec![9]);
        assert_eq!(category.lowest_fmt(), Some(1));
        assert!(category.remove_terminal(5));
        assert!(!category.remove_terminal(5));
        assert_eq!(category.terminal_count(), 2);
    }
}
