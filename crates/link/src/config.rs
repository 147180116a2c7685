//! Static DAMA configuration loaded once at startup

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::debug;
use satdama_core::{
    CarrierId, CodingRate, FmtDefinition, FmtId, FmtTable, Modulation, RateKbps, TerminalId, TimeFrames, TimeMs,
    MAX_RETURN_FRAME_BYTES,
};
use serde::{Deserialize, Serialize};

use crate::DamaError;

/// How a carrier group is accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    /// Return link capacity shared by demand assignment.
    #[default]
    Dama,
    /// Forward link, MODCOD chosen per destination.
    Acm,
    /// Forward link split into fixed MODCOD tiers.
    Vcm,
}

/// Request computation flavour used by the agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Legacy,
}

/// One VCM tier of a forward carrier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VcmTierConfig {
    /// Share of the carrier symbol rate, relative to the other tiers.
    pub ratio: u32,
    pub fmt_ids: Vec<FmtId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierGroupConfig {
    pub id: CarrierId,
    /// Symbol rate of one carrier, in symbols per second.
    pub symbol_rate: u64,
    #[serde(default = "default_carrier_count")]
    pub carriers: u32,
    #[serde(default)]
    pub fmt_ids: Vec<FmtId>,
    #[serde(default)]
    pub access: AccessKind,
    #[serde(default)]
    pub vcm: Vec<VcmTierConfig>,
}

fn default_carrier_count() -> u32 {
    1
}

impl CarrierGroupConfig {
    /// Every MODCOD referenced by this group, tiers included.
    pub fn all_fmt_ids(&self) -> impl Iterator<Item = FmtId> + '_ {
        self.fmt_ids
            .iter()
            .chain(self.vcm.iter().flat_map(|tier| tier.fmt_ids.iter()))
            .copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    pub label: String,
    pub carriers: Vec<CarrierGroupConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DamaConfig {
    pub frame_duration_ms: TimeMs,
    pub frames_per_superframe: u8,
    /// Minimum scheduling latency, in frames.
    pub msl_frames: TimeFrames,
    /// Period between two capacity requests, in frames.
    pub sync_period_frames: TimeFrames,
    pub rbdc_timeout_frames: TimeFrames,
    /// Free capacity quantum granted per terminal, 0 disables FCA.
    pub fca_kbps: RateKbps,
    /// Length of a return link burst, in symbols.
    pub burst_length_sym: u32,
    pub header_bytes: usize,
    pub max_frame_bytes: usize,
    pub loop_margin_db: f64,
    pub default_category: String,
    /// Return link categories.
    pub categories: Vec<CategoryConfig>,
    /// Forward link carriers.
    pub forward: CategoryConfig,
    pub terminal_affectations: BTreeMap<TerminalId, String>,
    pub fmt_definitions: Vec<FmtDefinition>,
    /// Classic definition file, used instead of `fmt_definitions` when set.
    pub fmt_file: Option<PathBuf>,
    pub strategy: StrategyKind,
}

fn default_fmt_definitions() -> Vec<FmtDefinition> {
    // DVB-RCS2 waveforms sharing one burst length
    let rows: [(FmtId, Modulation, u32, u32, f32, f64); 6] = [
        (1, Modulation::Qpsk, 1, 3, 0.66, -0.51),
        (2, Modulation::Qpsk, 1, 2, 1.00, 1.85),
        (3, Modulation::Qpsk, 2, 3, 1.33, 4.15),
        (4, Modulation::Qpsk, 3, 4, 1.50, 5.08),
        (5, Modulation::Psk8, 2, 3, 2.00, 7.69),
        (6, Modulation::Apsk16, 3, 4, 3.00, 10.69),
    ];
    rows.iter()
        .filter_map(|(id, modulation, num, den, spectral, es_n0)| {
            let coding = CodingRate::new(*num, *den).ok()?;
            Some(FmtDefinition::new(*id, *modulation, coding, *spectral, *es_n0).with_burst_length(536))
        })
        .collect()
}

impl Default for DamaConfig {
    fn default() -> Self {
        Self {
            frame_duration_ms: 26,
            frames_per_superframe: 1,
            msl_frames: 23,
            sync_period_frames: 1,
            rbdc_timeout_frames: 16,
            fca_kbps: 0,
            burst_length_sym: 536,
            header_bytes: 6,
            max_frame_bytes: MAX_RETURN_FRAME_BYTES,
            loop_margin_db: 0.5,
            default_category: "Standard".to_string(),
            categories: vec![CategoryConfig {
                label: "Standard".to_string(),
                carriers: vec![CarrierGroupConfig {
                    id: 0,
                    symbol_rate: 1_000_000,
                    carriers: 1,
                    fmt_ids: vec![1, 2, 3, 4, 5, 6],
                    access: AccessKind::Dama,
                    vcm: Vec::new(),
                }],
            }],
            forward: CategoryConfig {
                label: "Forward".to_string(),
                carriers: vec![CarrierGroupConfig {
                    id: 10,
                    symbol_rate: 10_000_000,
                    carriers: 1,
                    fmt_ids: vec![1, 2, 3, 4, 5, 6],
                    access: AccessKind::Acm,
                    vcm: Vec::new(),
                }],
            },
            terminal_affectations: BTreeMap::new(),
            fmt_definitions: default_fmt_definitions(),
            fmt_file: None,
            strategy: StrategyKind::Legacy,
        }
    }
}

impl DamaConfig {
    pub fn from_json_str(json: &str) -> Result<Self, DamaError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DamaError::Configuration(format!("cannot parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, DamaError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| DamaError::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        debug!("Loading DAMA configuration from {}", path.display());
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, DamaError> {
        serde_json::to_string_pretty(self).map_err(|e| DamaError::Configuration(e.to_string()))
    }

    /// Build the MODCOD catalog, from the definition file if one is set.
    pub fn fmt_table(&self) -> Result<FmtTable, DamaError> {
        let table = match &self.fmt_file {
            Some(path) => FmtTable::from_file(path)?,
            None => FmtTable::from_definitions(self.fmt_definitions.iter().cloned())?,
        };
        Ok(table)
    }

    /// Label of the category a terminal belongs to.
    pub fn category_of(&self, terminal_id: TerminalId) -> &str {
        self.terminal_affectations
            .get(&terminal_id)
            .map(String::as_str)
            .unwrap_or(&self.default_category)
    }

    /// Capacity request history length, 0 when averaging is disabled.
    pub fn request_history_len(&self) -> usize {
        if self.sync_period_frames == 0 {
            return 0;
        }
        (self.msl_frames / self.sync_period_frames) as usize
    }

    pub fn validate(&self) -> Result<(), DamaError> {
        if self.frame_duration_ms == 0 {
            return Err(DamaError::Configuration("frame duration is 0 ms".into()));
        }
        if self.frames_per_superframe == 0 {
            return Err(DamaError::Configuration("superframe without frame".into()));
        }
        if self.burst_length_sym == 0 {
            return Err(DamaError::Configuration("burst length is 0 symbol".into()));
        }
        if self.header_bytes >= self.max_frame_bytes {
            return Err(DamaError::Configuration(format!(
                "frame header ({} bytes) leaves no room in a {} bytes frame",
                self.header_bytes, self.max_frame_bytes
            )));
        }
        if self.categories.is_empty() {
            return Err(DamaError::Configuration("no terminal category defined".into()));
        }
        if !self.categories.iter().any(|c| c.label == self.default_category) {
            return Err(DamaError::Configuration(format!(
                "default category {} is not defined",
                self.default_category
            )));
        }
        for (terminal_id, label) in &self.terminal_affectations {
            if !self.categories.iter().any(|c| &c.label == label) {
                return Err(DamaError::Configuration(format!(
                    "ST{} is affected to unknown category {}",
                    terminal_id, label
                )));
            }
        }

        let table = self.fmt_table()?;
        let mut labels = BTreeSet::new();
        for category in self.categories.iter().chain(std::iter::once(&self.forward)) {
            if !labels.insert(category.label.as_str()) {
                return Err(DamaError::Configuration(format!("category {} defined twice", category.label)));
            }
            self.validate_category(category, &table)?;
        }
        for category in &self.categories {
            if let Some(group) = category.carriers.iter().find(|g| g.access != AccessKind::Dama) {
                return Err(DamaError::Configuration(format!(
                    "return carrier {} of {} is not a DAMA carrier",
                    group.id, category.label
                )));
            }
        }
        if let Some(group) = self.forward.carriers.iter().find(|g| g.access == AccessKind::Dama) {
            return Err(DamaError::Configuration(format!("forward carrier {} uses DAMA access", group.id)));
        }
        Ok(())
    }

    fn validate_category(&self, category: &CategoryConfig, table: &FmtTable) -> Result<(), DamaError> {
        if category.carriers.is_empty() {
            return Err(DamaError::Configuration(format!(
                "category {} has no carrier group",
                category.label
            )));
        }
        let mut ids = BTreeSet::new();
        for group in &category.carriers {
            if !ids.insert(group.id) {
                return Err(DamaError::Configuration(format!(
                    "carrier {} defined twice in {}",
                    group.id, category.label
                )));
            }
            if group.symbol_rate == 0 || group.carriers == 0 {
                return Err(DamaError::Configuration(format!("carrier {} has no capacity", group.id)));
            }
            let tiers_ok = match group.access {
                AccessKind::Vcm => !group.vcm.is_empty() && group.vcm.iter().all(|t| !t.fmt_ids.is_empty()),
                _ => !group.fmt_ids.is_empty(),
            };
            if !tiers_ok {
                return Err(DamaError::Configuration(format!(
                    "carrier {} of {} has no MODCOD",
                    group.id, category.label
                )));
            }
            if let Some(missing) = group.all_fmt_ids().find(|id| !table.contains(*id)) {
                return Err(DamaError::Configuration(format!(
                    "carrier {} of {} uses undefined MODCOD {}",
                    group.id, category.label, missing
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DamaConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fmt_table().unwrap().len(), 6);
        assert_eq!(config.request_history_len(), 23);
        assert_eq!(config.category_of(7), "Standard");
    }

    #[test]
    fn test_json_round_trip_and_partial_documents() {
        let config = DamaConfig::default();
        let json = config.to_json_string().unwrap();
        let parsed = DamaConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.categories, config.categories);
        assert_eq!(parsed.fmt_definitions, config.fmt_definitions);

        let parsed = DamaConfig::from_json_str(r#"{ "frame_duration_ms": 10, "msl_frames": 2 }"#).unwrap();
        assert_eq!(parsed.frame_duration_ms, 10);
        assert_eq!(parsed.request_history_len(), 2);
        assert_eq!(parsed.burst_length_sym, 536);
    }

    #[test]
    fn test_invalid_configurations() {
        let mut config = DamaConfig::default();
        config.categories.clear();
        assert!(matches!(config.validate(), Err(DamaError::Configuration(_))));

        let mut config = DamaConfig::default();
        config.default_category = "Premium".into();
        assert!(config.validate().is_err());

        let mut config = DamaConfig::default();
        config.categories[0].carriers[0].fmt_ids = vec![2, 9];
        assert!(config.validate().is_err());

        let mut config = DamaConfig::default();
        config.categories[0].carriers.clear();
        assert!(config.validate().is_err());

        let mut config = DamaConfig::default();
        config.frame_duration_ms = 0;
        assert!(config.validate().is_err());

        let mut config = DamaConfig::default();
        config.terminal_affectations.insert(3, "Nowhere".into());
        assert!(config.validate().is_err());

        assert!(DamaConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_duplicate_fmt_definition_rejected() {
        let mut config = DamaConfig::default();
        let first = config.fmt_definitions[0].clone();
        config.fmt_definitions.push(first);
        assert!(matches!(config.validate(), Err(DamaError::Core(_))));
    }

    #[test]
    fn test_vcm_tiers_need_modcods() {
        let mut config = DamaConfig::default();
        config.forward.carriers[0].access = AccessKind::Vcm;
        assert!(config.validate().is_err());
        config.forward.carriers[0].vcm = vec![
            VcmTierConfig { ratio: 1, fmt_ids: vec![2] },
            VcmTierConfig { ratio: 3, fmt_ids: vec![5] },
        ];
        config.validate().unwrap();
    }
}
