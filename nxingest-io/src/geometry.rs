//! Instrument geometry and spectrum mapping from a JSON definition.
//!
//! ```json
//! {
//!   "instrument": {
//!     "name": "SNAP",
//!     "source_position": [0.0, 0.0, -15.0],
//!     "banks": [
//!       { "name": "bank1", "first_id": 100, "count": 3 },
//!       { "name": "bank2", "detector_ids": [200, 201] }
//!     ],
//!     "monitors": [1]
//!   },
//!   "spectra": [ { "spectrum": 1, "detectors": [100, 101] } ]
//! }
//! ```
//!
//! Without a `spectra` table every non-monitor detector gets its own channel.

use crate::{Error, Result};
use nxingest_core::{ChannelMapping, DetectorId, Instrument, Position, SpectrumNumber};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

#[derive(Deserialize)]
struct JsonGeometry {
    instrument: JsonInstrument,
    spectra: Option<Vec<JsonSpectrum>>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct JsonInstrument {
    name: String,
    source_position: Position,
    sample_position: Position,
    banks: Vec<JsonBank>,
    monitors: Vec<DetectorId>,
}

#[derive(Deserialize)]
struct JsonBank {
    name: String,
    detector_ids: Option<Vec<DetectorId>>,
    first_id: Option<DetectorId>,
    count: Option<u32>,
    positions: Option<Vec<Position>>,
}

#[derive(Deserialize)]
struct JsonSpectrum {
    spectrum: SpectrumNumber,
    detectors: Vec<DetectorId>,
}

/// Geometry plus the channel mapping derived from it.
#[derive(Debug, Clone)]
pub struct InstrumentDefinition {
    pub instrument: Arc<Instrument>,
    pub mapping: Arc<ChannelMapping>,
}

impl InstrumentDefinition {
    /// Loads a definition from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let geometry: JsonGeometry = serde_json::from_reader(BufReader::new(file))?;
        Self::from_json_geometry(geometry)
    }

    /// Loads a definition from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the JSON is malformed or the mapping is inconsistent.
    pub fn from_json(json: &str) -> Result<Self> {
        let geometry: JsonGeometry = serde_json::from_str(json)?;
        Self::from_json_geometry(geometry)
    }

    /// One channel per non-monitor detector of `instrument`.
    ///
    /// # Errors
    /// Returns an error if the mapping cannot be built.
    pub fn one_to_one(instrument: Instrument) -> Result<Self> {
        let monitors: BTreeSet<DetectorId> = instrument.monitors.iter().copied().collect();
        let mapping = ChannelMapping::one_to_one(
            instrument
                .detector_ids()
                .filter(|id| !monitors.contains(id)),
        )?;
        Ok(Self {
            instrument: Arc::new(instrument),
            mapping: Arc::new(mapping),
        })
    }

    fn from_json_geometry(geometry: JsonGeometry) -> Result<Self> {
        let json = geometry.instrument;
        log::debug!(
            "instrument '{}': {} banks, spectra table {}",
            json.name,
            json.banks.len(),
            if geometry.spectra.is_some() { "given" } else { "derived" }
        );
        let mut instrument = Instrument::new(json.name);
        instrument.source_position = json.source_position;
        instrument.sample_position = json.sample_position;
        instrument.monitors = json.monitors;

        let mut positions = BTreeMap::new();
        for bank in json.banks {
            let ids = bank_ids(&bank)?;
            if let Some(bank_positions) = bank.positions {
                if bank_positions.len() != ids.len() {
                    return Err(Error::InvalidFormat(format!(
                        "bank '{}' lists {} positions for {} detectors",
                        bank.name,
                        bank_positions.len(),
                        ids.len()
                    )));
                }
                positions.extend(ids.iter().copied().zip(bank_positions));
            }
            instrument = instrument.with_bank(bank.name, ids);
        }
        instrument.detector_positions = positions;

        match geometry.spectra {
            None => Self::one_to_one(instrument),
            Some(spectra) => {
                let table: Vec<(SpectrumNumber, Vec<DetectorId>)> = spectra
                    .into_iter()
                    .map(|s| (s.spectrum, s.detectors))
                    .collect();
                let mapping = ChannelMapping::from_spectra_table(&table)?;
                Ok(Self {
                    instrument: Arc::new(instrument),
                    mapping: Arc::new(mapping),
                })
            }
        }
    }
}

fn bank_ids(bank: &JsonBank) -> Result<Vec<DetectorId>> {
    match (&bank.detector_ids, bank.first_id, bank.count) {
        (Some(ids), None, None) => Ok(ids.clone()),
        (None, Some(first), Some(count)) => {
            let end = first.checked_add(count).ok_or_else(|| {
                Error::InvalidFormat(format!("bank '{}' detector range overflows", bank.name))
            })?;
            Ok((first..end).collect())
        }
        _ => Err(Error::InvalidFormat(format!(
            "bank '{}' needs either detector_ids or first_id + count",
            bank.name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SNAP: &str = r#"{
        "instrument": {
            "name": "SNAP",
            "source_position": [0.0, 0.0, -15.0],
            "banks": [
                { "name": "bank1", "first_id": 100, "count": 3 },
                { "name": "bank2", "detector_ids": [200, 201],
                  "positions": [[1.0, 0.0, 0.0], [1.0, 0.1, 0.0]] }
            ],
            "monitors": [1]
        }
    }"#;

    #[test]
    fn test_one_to_one_from_json() {
        let def = InstrumentDefinition::from_json(SNAP).unwrap();
        assert_eq!(def.instrument.name, "SNAP");
        assert_eq!(
            def.instrument.bank("bank1").unwrap().detector_ids,
            vec![100, 101, 102]
        );
        assert_eq!(def.mapping.n_channels(), 5);
        assert_eq!(def.mapping.channel_of_detector(200), Some(3));
        assert_eq!(def.instrument.detector_positions.len(), 2);
    }

    #[test]
    fn test_explicit_spectra_table() {
        let json = r#"{
            "instrument": { "banks": [ { "name": "b", "detector_ids": [1, 2, 3] } ] },
            "spectra": [
                { "spectrum": 10, "detectors": [1, 2] },
                { "spectrum": 20, "detectors": [3] }
            ]
        }"#;
        let def = InstrumentDefinition::from_json(json).unwrap();
        assert_eq!(def.mapping.n_channels(), 2);
        assert_eq!(def.mapping.channel_of_detector(2), Some(0));
        assert_eq!(def.mapping.spectrum_of(1), Some(20));
    }

    #[test]
    fn test_monitors_excluded() {
        let mut inst = Instrument::new("X").with_bank("b", vec![1, 2, 3]);
        inst.monitors = vec![2];
        let def = InstrumentDefinition::one_to_one(inst).unwrap();
        assert_eq!(def.mapping.n_channels(), 2);
        assert_eq!(def.mapping.channel_of_detector(2), None);
    }

    #[test]
    fn test_bad_bank_rejected() {
        let json = r#"{ "instrument": { "banks": [ { "name": "b" } ] } }"#;
        let err = InstrumentDefinition::from_json(json).unwrap_err();
        assert!(err.to_string().contains("first_id"), "{err}");

        let json = r#"{ "instrument": { "banks": [
            { "name": "b", "detector_ids": [1], "positions": [] } ] } }"#;
        assert!(InstrumentDefinition::from_json(json).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.json");
        std::fs::write(&path, SNAP).unwrap();
        let def = InstrumentDefinition::from_file(&path).unwrap();
        assert_eq!(def.instrument.banks.len(), 2);
    }
}
