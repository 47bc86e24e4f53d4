//! Which sensor plays which part in head correction.
//!
//! Roles come from a JSON file keyed by coil index:
//!
//! ```json
//! {
//!   "0": {"place": "TT", "active": true,  "reference": false, "biteplate": false},
//!   "5": {"place": "BPL", "active": false, "reference": false, "biteplate": true},
//!   "9": [{"place": "REF1", "active": false, "reference": true, "biteplate": false}]
//! }
//! ```
//!
//! An index may hold one entry or a list of them.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

const LEFT_PLACES: [&str; 2] = ["BPL", "BP1"];
const RIGHT_PLACES: [&str; 2] = ["BPR", "BP2"];
const FRONT_PLACES: [&str; 2] = ["BPF", "BP3"];
const UPPER_INCISOR: &str = "UI";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRole {
    pub place: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub reference: bool,
    #[serde(default)]
    pub biteplate: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(SensorRole),
    Many(Vec<SensorRole>),
}

/// Sensor roles by coil index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensorRoles {
    roles: BTreeMap<usize, Vec<SensorRole>>,
}

impl SensorRoles {
    pub fn from_json(text: &str) -> Result<Self> {
        let raw: BTreeMap<String, OneOrMany> = serde_json::from_str(text)
            .map_err(|e| RelayError::parse_error("sensor roles", e.to_string()))?;
        let mut roles = BTreeMap::new();
        for (key, entry) in raw {
            let index: usize = key.trim().parse().map_err(|_| {
                RelayError::parse_error("sensor roles", format!("key '{key}' is not a coil index"))
            })?;
            let entries = match entry {
                OneOrMany::One(role) => vec![role],
                OneOrMany::Many(list) => list,
            };
            roles.insert(index, entries);
        }
        Ok(Self { roles })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RelayError::file_error(path, e))?;
        Self::from_json(&text)
    }

    pub fn insert(&mut self, index: usize, role: SensorRole) {
        self.roles.entry(index).or_default().push(role);
    }

    fn indices_where(&self, pred: impl Fn(&SensorRole) -> bool) -> Vec<usize> {
        self.roles
            .iter()
            .filter(|(_, entries)| entries.iter().any(&pred))
            .map(|(&index, _)| index)
            .collect()
    }

    /// Head-fixed sensors, in index order.
    pub fn reference_indices(&self) -> Vec<usize> {
        self.indices_where(|r| r.reference)
    }

    pub fn biteplate_indices(&self) -> Vec<usize> {
        self.indices_where(|r| r.biteplate)
    }

    pub fn active_indices(&self) -> Vec<usize> {
        self.indices_where(|r| r.active)
    }

    /// First index whose place is one of `places`, case-insensitively.
    pub fn find_place(&self, places: &[&str]) -> Option<usize> {
        self.indices_where(|r| places.iter().any(|p| r.place.eq_ignore_ascii_case(p)))
            .first()
            .copied()
    }

    /// Biteplate left, right and front sensors.
    pub fn biteplate_points(&self) -> Result<[usize; 3]> {
        let find = |places: &[&str]| {
            self.find_place(places).ok_or_else(|| {
                RelayError::calibration(format!("no sensor placed at {}", places.join(" or ")))
            })
        };
        Ok([find(&LEFT_PLACES)?, find(&RIGHT_PLACES)?, find(&FRONT_PLACES)?])
    }

    /// First three reference sensors.
    pub fn reference_points(&self) -> Result<[usize; 3]> {
        let found = self.reference_indices();
        match found[..] {
            [a, b, c, ..] => Ok([a, b, c]),
            _ => Err(RelayError::calibration(format!(
                "need three reference sensors, roles define {}",
                found.len()
            ))),
        }
    }

    pub fn upper_incisor(&self) -> Option<usize> {
        self.find_place(&[UPPER_INCISOR])
    }

    /// Place of the first role given to `index`.
    pub fn place(&self, index: usize) -> Option<&str> {
        self.roles.get(&index)?.first().map(|r| r.place.as_str())
    }

    /// Places for coils `0..count`, `Coil<n>` where no role is given.
    pub fn coil_names(&self, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| self.place(i).map_or_else(|| format!("Coil{i}"), str::to_string))
            .collect()
    }
}
