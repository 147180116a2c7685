//! Per-terminal MODCOD tracking shared between scheduling and the channel quality feed

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};

use crate::{FmtId, FmtTable, TerminalId};

/// Current and previous MODCOD of one terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalFmtState {
    terminal_id: TerminalId,
    current: FmtId,
    previous: FmtId,
    changed: bool,
}

impl TerminalFmtState {
    pub fn new(terminal_id: TerminalId, initial: FmtId) -> Self {
        Self {
            terminal_id,
            current: initial,
            previous: initial,
            changed: false,
        }
    }

    pub fn terminal_id(&self) -> TerminalId {
        self.terminal_id
    }

    pub fn current(&self) -> FmtId {
        self.current
    }

    pub fn previous(&self) -> FmtId {
        self.previous
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub fn update(&mut self, new_id: FmtId) {
        if new_id == self.current {
            return;
        }
        self.previous = self.current;
        self.current = new_id;
        self.changed = true;
    }

    /// Move to the MODCOD matching `snr_db`.
    ///
    /// Stepping down to a more robust MODCOD uses `snr_db - margin_db` so
    /// that small fluctuations around a threshold do not flip the grant.
    pub fn update_from_snr(&mut self, table: &FmtTable, snr_db: f64, margin_db: f64) -> FmtId {
        let candidate = match table.required_modcod(snr_db) {
            Some(id) if id < self.current => table.required_modcod(snr_db - margin_db).unwrap_or(id),
            Some(id) => id,
            None => return self.current,
        };
        self.update(candidate);
        self.current
    }

    /// Read and clear the change flag.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

/// Thread-safe map of terminal id to [`TerminalFmtState`].
///
/// Every method takes the lock for the duration of one call; iteration goes
/// through [`TerminalFmtRegistry::snapshot`].
#[derive(Debug, Clone, Default)]
pub struct TerminalFmtRegistry {
    states: Arc<RwLock<HashMap<TerminalId, TerminalFmtState>>>,
}

impl TerminalFmtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TerminalId, TerminalFmtState>> {
        self.states.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TerminalId, TerminalFmtState>> {
        self.states.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a terminal; returns false if it was already present.
    pub fn add(&self, terminal_id: TerminalId, initial: FmtId) -> bool {
        let mut states = self.write();
        if states.contains_key(&terminal_id) {
            warn!("ST{} already has a MODCOD state", terminal_id);
            return false;
        }
        debug!("ST{} starts with MODCOD {}", terminal_id, initial);
        states.insert(terminal_id, TerminalFmtState::new(terminal_id, initial));
        true
    }

    pub fn remove(&self, terminal_id: TerminalId) -> bool {
        self.write().remove(&terminal_id).is_some()
    }

    pub fn contains(&self, terminal_id: TerminalId) -> bool {
        self.read().contains_key(&terminal_id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn current(&self, terminal_id: TerminalId) -> Option<FmtId> {
        self.read().get(&terminal_id).map(TerminalFmtState::current)
    }

    pub fn previous(&self, terminal_id: TerminalId) -> Option<FmtId> {
        self.read().get(&terminal_id).map(TerminalFmtState::previous)
    }

    /// Explicit MODCOD push; returns false for an unknown terminal.
    pub fn set(&self, terminal_id: TerminalId, fmt_id: FmtId) -> bool {
        match self.write().get_mut(&terminal_id) {
            Some(state) => {
                state.update(fmt_id);
                true
            }
            None => false,
        }
    }

    pub fn update_from_snr(
        &self,
        terminal_id: TerminalId,
        table: &FmtTable,
        snr_db: f64,
        margin_db: f64,
    ) -> Option<FmtId> {
        self.write()
            .get_mut(&terminal_id)
            .map(|state| state.update_from_snr(table, snr_db, margin_db))
    }

    pub fn take_changed(&self, terminal_id: TerminalId) -> bool {
        self.write()
            .get_mut(&terminal_id)
            .map(TerminalFmtState::take_changed)
            .unwrap_or(false)
    }

    /// Copy of every state, sorted by terminal id.
    pub fn snapshot(&self) -> Vec<TerminalFmtState> {
        let mut states: Vec<_> = self.read().values().cloned().collect();
        states.sort_by_key(TerminalFmtState::terminal_id);
        states
    }

    /// Terminal whose current MODCOD is the most robust one (lowest id).
    pub fn lowest_modcod_terminal(&self) -> Option<TerminalId> {
        self.read()
            .values()
            .min_by_key(|state| (state.current, state.terminal_id))
            .map(TerminalFmtState::terminal_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmt::tests::sample_table;

    #[test]
    fn test_update_sets_changed_only_on_difference() {
        let mut state = TerminalFmtState::new(3, 2);
        state.update(2);
        assert!(!state.has_changed());
        state.update(4);
        assert!(state.has_changed());
        assert_eq!(state.previous(), 2);
        assert_eq!(state.current(), 4);
        assert!(state.take_changed());
        assert!(!state.take_changed());
    }

    #[test]
    fn test_update_from_snr_margin_only_when_decreasing() {
        let table = sample_table();
        let mut state = TerminalFmtState::new(1, 1);
        // going up ignores the margin
        assert_eq!(state.update_from_snr(&table, 6.7, 1.0), 4);
        // 6.0 dB alone would give MODCOD 3, with 3 dB margin it is 2
        assert_eq!(state.update_from_snr(&table, 6.0, 3.0), 2);
        assert_eq!(state.previous(), 4);
    }

    #[test]
    fn test_registry_basic_operations() {
        let registry = TerminalFmtRegistry::new();
        assert!(registry.add(1, 3));
        assert!(!registry.add(1, 5));
        assert!(registry.add(2, 1));
        assert_eq!(registry.current(1), Some(3));
        assert!(registry.set(1, 5));
        assert!(!registry.set(9, 5));
        assert_eq!(registry.previous(1), Some(3));
        assert!(registry.take_changed(1));
        assert_eq!(registry.lowest_modcod_terminal(), Some(2));
        assert!(registry.remove(2));
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_registry_shared_between_threads() {
        let registry = TerminalFmtRegistry::new();
        for id in 0..8 {
            registry.add(id, 1);
        }
        let table = sample_table();
        let writer = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for round in 0..100 {
                    for id in 0..8 {
                        registry.update_from_snr(id, &table, (round % 20) as f64, 0.5);
                    }
                }
            })
        };
        for _ in 0..100 {
            for state in registry.snapshot() {
                assert!(state.current() >= 1 && state.current() <= 6);
            }
        }
        writer.join().unwrap();
        assert_eq!(registry.len(), 8);
    }
}
