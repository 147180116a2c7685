//! MODCOD (FMT) catalog and symbol/kbit conversions

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{CoreError, FmtId, VolumeSym, NO_FMT};

/// Largest number of definitions a definition file may declare.
pub const MAX_FMT: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Modulation {
    Bpsk,
    Qpsk,
    Psk8,
    Apsk16,
    Apsk32,
}

impl Modulation {
    /// Bits carried by one symbol.
    pub fn efficiency(self) -> u32 {
        match self {
            Modulation::Bpsk => 1,
            Modulation::Qpsk => 2,
            Modulation::Psk8 => 3,
            Modulation::Apsk16 => 4,
            Modulation::Apsk32 => 5,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Modulation::Bpsk => "BPSK",
            Modulation::Qpsk => "QPSK",
            Modulation::Psk8 => "8PSK",
            Modulation::Apsk16 => "16APSK",
            Modulation::Apsk32 => "32APSK",
        }
    }
}

impl FromStr for Modulation {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BPSK" => Ok(Modulation::Bpsk),
            "QPSK" => Ok(Modulation::Qpsk),
            "8PSK" => Ok(Modulation::Psk8),
            "16APSK" => Ok(Modulation::Apsk16),
            "32APSK" => Ok(Modulation::Apsk32),
            _ => Err(CoreError::InvalidModulation(s.to_string())),
        }
    }
}

impl TryFrom<String> for Modulation {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Modulation> for String {
    fn from(value: Modulation) -> Self {
        value.label().to_string()
    }
}

impl std::fmt::Display for Modulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Forward error correction rate kept as an exact fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CodingRate {
    num: u32,
    den: u32,
}

impl CodingRate {
    pub fn new(num: u32, den: u32) -> Result<Self, CoreError> {
        if num == 0 || den == 0 || num > den {
            return Err(CoreError::InvalidCodingRate(format!("{}/{}", num, den)));
        }
        Ok(Self { num, den })
    }

    pub fn numerator(&self) -> u32 {
        self.num
    }

    pub fn denominator(&self) -> u32 {
        self.den
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl FromStr for CodingRate {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::InvalidCodingRate(s.to_string());
        let (num, den) = s.trim().split_once('/').ok_or_else(invalid)?;
        let num = num.trim().parse::<u32>().map_err(|_| invalid())?;
        let den = den.trim().parse::<u32>().map_err(|_| invalid())?;
        CodingRate::new(num, den).map_err(|_| invalid())
    }
}

impl TryFrom<String> for CodingRate {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CodingRate> for String {
    fn from(value: CodingRate) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for CodingRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// One modulation and coding scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FmtDefinition {
    id: FmtId,
    modulation: Modulation,
    coding: CodingRate,
    spectral_efficiency: f32,
    required_es_n0: f64,
    #[serde(default)]
    burst_length: Option<u32>,
}

impl FmtDefinition {
    pub fn new(
        id: FmtId,
        modulation: Modulation,
        coding: CodingRate,
        spectral_efficiency: f32,
        required_es_n0: f64,
    ) -> Self {
        Self {
            id,
            modulation,
            coding,
            spectral_efficiency,
            required_es_n0,
            burst_length: None,
        }
    }

    /// Fixed burst length in symbols (DVB-RCS2 waveforms).
    pub fn with_burst_length(mut self, length_sym: u32) -> Self {
        self.burst_length = Some(length_sym);
        self
    }

    pub fn id(&self) -> FmtId {
        self.id
    }

    pub fn modulation(&self) -> Modulation {
        self.modulation
    }

    pub fn coding(&self) -> CodingRate {
        self.coding
    }

    pub fn modulation_efficiency(&self) -> u32 {
        self.modulation.efficiency()
    }

    pub fn spectral_efficiency(&self) -> f32 {
        self.spectral_efficiency
    }

    pub fn required_es_n0(&self) -> f64 {
        self.required_es_n0
    }

    pub fn burst_length(&self) -> Option<u32> {
        self.burst_length
    }

    /// Information kbits carried by `symbols`, rounded up.
    pub fn symbols_to_kbits(&self, symbols: VolumeSym) -> u64 {
        let bits = symbols as u128 * self.modulation_efficiency() as u128 * self.coding.num as u128;
        bits.div_ceil(self.coding.den as u128 * 1000) as u64
    }

    /// Symbols needed to carry `kbits`, rounded up.
    pub fn kbits_to_symbols(&self, kbits: u64) -> VolumeSym {
        let scaled = kbits as u128 * 1000 * self.coding.den as u128;
        let per_symbol = self.modulation_efficiency() as u128 * self.coding.num as u128;
        scaled.div_ceil(per_symbol) as VolumeSym
    }

    /// Coded amount needed to carry `value` information units.
    pub fn add_fec(&self, value: u32) -> u32 {
        (value as u64 * self.coding.den as u64).div_ceil(self.coding.num as u64) as u32
    }

    /// Information units left once coding overhead is removed from `value`.
    pub fn remove_fec(&self, value: u32) -> u32 {
        (value as u64 * self.coding.num as u64 / self.coding.den as u64) as u32
    }
}

/// Largest id of `ids` that does not exceed `target`.
pub fn nearest_fmt_id(ids: &[FmtId], target: FmtId) -> Option<FmtId> {
    ids.iter().copied().filter(|id| *id != NO_FMT && *id <= target).max()
}

/// Catalog of MODCOD definitions ordered by id.
#[derive(Debug, Clone, Default)]
pub struct FmtTable {
    definitions: BTreeMap<FmtId, FmtDefinition>,
}

impl FmtTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions<I>(definitions: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = FmtDefinition>,
    {
        let mut table = Self::new();
        for definition in definitions {
            table.add(definition)?;
        }
        Ok(table)
    }

    pub fn add(&mut self, definition: FmtDefinition) -> Result<(), CoreError> {
        if definition.id == NO_FMT {
            return Err(CoreError::ReservedFmtId(definition.id));
        }
        if self.definitions.contains_key(&definition.id) {
            return Err(CoreError::DuplicateFmtId(definition.id));
        }
        trace!(
            "add FMT {}: {} {} (Es/N0 {} dB)",
            definition.id, definition.modulation, definition.coding, definition.required_es_n0
        );
        self.definitions.insert(definition.id, definition);
        Ok(())
    }

    pub fn get(&self, id: FmtId) -> Option<&FmtDefinition> {
        self.definitions.get(&id)
    }

    pub fn definition(&self, id: FmtId) -> Result<&FmtDefinition, CoreError> {
        self.get(id).ok_or(CoreError::UnknownFmt(id))
    }

    pub fn contains(&self, id: FmtId) -> bool {
        self.definitions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = FmtId> + '_ {
        self.definitions.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FmtDefinition> {
        self.definitions.values()
    }

    pub fn min_id(&self) -> Option<FmtId> {
        self.definitions.keys().next().copied()
    }

    pub fn max_id(&self) -> Option<FmtId> {
        self.definitions.keys().next_back().copied()
    }

    /// Modulation efficiency of `id`, 0 when the id is unknown.
    pub fn modulation_efficiency(&self, id: FmtId) -> u32 {
        self.get(id).map(FmtDefinition::modulation_efficiency).unwrap_or(0)
    }

    pub fn symbols_to_kbits(&self, id: FmtId, symbols: VolumeSym) -> Result<u64, CoreError> {
        Ok(self.definition(id)?.symbols_to_kbits(symbols))
    }

    pub fn kbits_to_symbols(&self, id: FmtId, kbits: u64) -> Result<VolumeSym, CoreError> {
        Ok(self.definition(id)?.kbits_to_symbols(kbits))
    }

    /// Nearest defined id that does not exceed `target`.
    pub fn nearest_id(&self, target: FmtId) -> Option<FmtId> {
        self.definitions.range(..=target).next_back().map(|(id, _)| *id)
    }

    /// MODCOD to use for a link measured at `snr_db`.
    ///
    /// Definitions are scanned in ascending id order; a definition whose
    /// required Es/N0 is met replaces the candidate only when its requirement
    /// is at least the candidate's. Falls back to the lowest id when nothing
    /// qualifies. Returns `None` only for an empty table.
    pub fn required_modcod(&self, snr_db: f64) -> Option<FmtId> {
        let first = self.definitions.values().next()?;
        let mut candidate = first.id;
        let mut candidate_es_n0 = first.required_es_n0;
        for definition in self.definitions.values() {
            if definition.required_es_n0 > snr_db {
                continue;
            }
            if definition.required_es_n0 >= candidate_es_n0 {
                candidate = definition.id;
                candidate_es_n0 = definition.required_es_n0;
            }
        }
        Some(candidate)
    }

    /// Parse the text definition format:
    ///
    /// ```text
    /// /* id  modulation  coding  spectral_eff  required_es_n0  [burst_length] */
    /// nb_fmt = 2
    /// 1 QPSK 1/4 0.490 -2.35
    /// 2 QPSK 1/3 0.656 -1.24
    /// ```
    pub fn parse_definitions(text: &str) -> Result<Self, CoreError> {
        let mut table = Self::new();
        let mut declared: Option<usize> = None;
        let mut read = 0usize;

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let malformed = |reason: &str| CoreError::MalformedDefinition {
                line: line_no,
                reason: reason.to_string(),
            };
            let mut tokens = line.split_whitespace();
            let first = match tokens.next() {
                Some(token) => token,
                None => continue,
            };
            if first.starts_with("/*") {
                continue;
            }
            if first == "nb_fmt" {
                if declared.is_some() {
                    return Err(malformed("nb_fmt declared twice"));
                }
                if tokens.next() != Some("=") {
                    return Err(malformed("expected 'nb_fmt = N'"));
                }
                let count = tokens
                    .next()
                    .and_then(|token| token.parse::<usize>().ok())
                    .ok_or_else(|| malformed("invalid nb_fmt value"))?;
                if count == 0 || count > MAX_FMT {
                    return Err(malformed("nb_fmt out of range"));
                }
                declared = Some(count);
                continue;
            }

            let count = declared.ok_or_else(|| malformed("definition before nb_fmt"))?;
            let id = first
                .parse::<FmtId>()
                .ok()
                .filter(|id| *id != NO_FMT && (*id as usize) <= MAX_FMT)
                .ok_or_else(|| malformed("invalid FMT id"))?;
            read += 1;
            if read > count {
                return Err(malformed("more definitions than declared"));
            }
            let fields: Vec<&str> = tokens.collect();
            if fields.len() < 4 {
                return Err(malformed("expected modulation, coding, spectral efficiency and Es/N0"));
            }
            let modulation: Modulation = fields[0].parse()?;
            let coding: CodingRate = fields[1].parse()?;
            let spectral_efficiency = fields[2]
                .parse::<f32>()
                .map_err(|_| malformed("invalid spectral efficiency"))?;
            let required_es_n0 = fields[3]
                .parse::<f64>()
                .map_err(|_| malformed("invalid required Es/N0"))?;
            let mut definition =
                FmtDefinition::new(id, modulation, coding, spectral_efficiency, required_es_n0);
            if let Some(burst) = fields.get(4) {
                let burst = burst
                    .parse::<u32>()
                    .map_err(|_| malformed("invalid burst length"))?;
                definition = definition.with_burst_length(burst);
            }
            table.add(definition)?;
        }

        match declared {
            Some(count) if count == read => {
                debug!("loaded {} FMT definitions", read);
                Ok(table)
            }
            Some(count) => Err(CoreError::MalformedDefinition {
                line: text.lines().count(),
                reason: format!("{} definitions declared, {} found", count, read),
            }),
            None => Err(CoreError::MalformedDefinition {
                line: 0,
                reason: "missing nb_fmt".to_string(),
            }),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Io(format!("{}: {}", path.display(), e)))?;
        Self::parse_definitions(&text)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const DVB_S2_SAMPLE: &str = "\
/* id modulation coding spectral_eff required_es_n0 */
nb_fmt = 6
1 QPSK 1/4 0.490 -2.35
2 QPSK 1/2 0.989 1.00
3 QPSK 3/4 1.487 4.03
4 8PSK 2/3 1.980 6.62
5 16APSK 3/4 2.967 10.21
6 32APSK 9/10 4.453 16.05
";

    pub(crate) fn sample_table() -> FmtTable {
        FmtTable::parse_definitions(DVB_S2_SAMPLE).unwrap()
    }

    #[test]
    fn test_parse_definition_file() {
        let table = sample_table();
        assert_eq!(table.len(), 6);
        assert_eq!(table.min_id(), Some(1));
        assert_eq!(table.max_id(), Some(6));

        let def = table.get(4).unwrap();
        assert_eq!(def.modulation(), Modulation::Psk8);
        assert_eq!(def.coding(), CodingRate::new(2, 3).unwrap());
        assert_eq!(def.modulation_efficiency(), 3);
    }

    #[test]
    fn test_parse_rejects_count_mismatch() {
        let text = "nb_fmt = 2\n1 QPSK 1/4 0.49 -2.35\n";
        assert!(matches!(
            FmtTable::parse_definitions(text),
            Err(CoreError::MalformedDefinition { .. })
        ));
    }

    #[test]
    fn test_parse_burst_length() {
        let text = "nb_fmt = 1\n/* rcs2 */\n3 QPSK 1/3 0.66 -0.5 536\n";
        let table = FmtTable::parse_definitions(text).unwrap();
        assert_eq!(table.get(3).unwrap().burst_length(), Some(536));
    }

    #[test]
    fn test_add_duplicate_fails() {
        let mut table = sample_table();
        let dup = FmtDefinition::new(2, Modulation::Qpsk, CodingRate::new(1, 2).unwrap(), 0.99, 1.0);
        assert_eq!(table.add(dup), Err(CoreError::DuplicateFmtId(2)));
        assert_eq!(table.len(), 6);
    }

    #[test]
    fn test_invalid_labels() {
        assert!("64QAM".parse::<Modulation>().is_err());
        assert!("4/3".parse::<CodingRate>().is_err());
        assert!("0/2".parse::<CodingRate>().is_err());
        assert_eq!("8psk".parse::<Modulation>().unwrap(), Modulation::Psk8);
    }

    #[test]
    fn test_symbols_to_kbits_rounds_up() {
        let table = sample_table();
        // QPSK 1/4: 0.5 bit per symbol
        assert_eq!(table.symbols_to_kbits(1, 2000).unwrap(), 1);
        assert_eq!(table.symbols_to_kbits(1, 2001).unwrap(), 2);
        assert_eq!(table.kbits_to_symbols(1, 1).unwrap(), 2000);
        assert!(table.symbols_to_kbits(9, 100).is_err());
    }

    #[test]
    fn test_symbol_round_trip_never_under_converts() {
        let table = sample_table();
        for id in table.ids().collect::<Vec<_>>() {
            for symbols in [0u64, 1, 7, 333, 1000, 4096, 123_457, 9_999_999] {
                let kbits = table.symbols_to_kbits(id, symbols).unwrap();
                assert!(table.kbits_to_symbols(id, kbits).unwrap() >= symbols);
            }
        }
    }

    #[test]
    fn test_required_modcod() {
        let table = sample_table();
        assert_eq!(table.required_modcod(20.0), Some(6));
        assert_eq!(table.required_modcod(7.0), Some(4));
        assert_eq!(table.required_modcod(4.03), Some(3));
        // nothing qualifies: most robust
        assert_eq!(table.required_modcod(-10.0), Some(1));
        assert_eq!(FmtTable::new().required_modcod(3.0), None);
    }

    #[test]
    fn test_required_modcod_prefers_higher_requirement_on_tie() {
        let table = FmtTable::from_definitions(vec![
            FmtDefinition::new(1, Modulation::Qpsk, CodingRate::new(1, 4).unwrap(), 0.49, -2.0),
            FmtDefinition::new(2, Modulation::Qpsk, CodingRate::new(1, 3).unwrap(), 0.66, 1.0),
            FmtDefinition::new(3, Modulation::Bpsk, CodingRate::new(1, 2).unwrap(), 0.49, 1.0),
        ])
        .unwrap();
        assert_eq!(table.required_modcod(5.0), Some(3));
    }

    #[test]
    fn test_nearest_ids() {
        let table = sample_table();
        assert_eq!(table.nearest_id(4), Some(4));
        assert_eq!(table.nearest_id(200), Some(6));
        assert_eq!(table.nearest_id(0), None);
        assert_eq!(nearest_fmt_id(&[2, 5, 3], 4), Some(3));
        assert_eq!(nearest_fmt_id(&[5, 6], 4), None);
    }

    #[test]
    fn test_fec() {
        let table = sample_table();
        let def = table.get(2).unwrap();
        assert_eq!(def.add_fec(100), 200);
        assert_eq!(def.remove_fec(200), 100);
        let def = table.get(3).unwrap();
        assert_eq!(def.add_fec(10), 14);
    }
}
