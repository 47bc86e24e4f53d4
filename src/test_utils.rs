//! Test utilities for building motion files, frames and sensor roles.
//!
//! These helpers produce small synthetic fixtures so parser, emulator, relay and calibration
//! tests do not depend on recorded data being present in the checkout.

#![cfg(any(test, feature = "benchmark"))]

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use nalgebra::{Quaternion, Vector3};

use crate::calibration::{SensorRole, SensorRoles};
use crate::error::{RelayError, Result};
use crate::types::{Coil, DataFrame};

/// Header line of an NDI Wave export with `sensors` sensors, newline included.
pub fn wave_tsv_header(sensors: usize) -> String {
    let mut header = String::from("Time\tMeasId\tWavId");
    for i in 1..=sensors {
        let _ = write!(header, "\tSensor {i} ID\tSensor {i} Status\tX\tY\tZ\tQ0\tQx\tQy\tQz");
    }
    header.push('\n');
    header
}

/// One Wave export record: timestamp in seconds, frame id, then one identity-rotation
/// sensor per location.
pub fn wave_tsv_row(seconds: f64, frame: usize, locations: &[Vector3<f32>]) -> String {
    let mut row = format!("{seconds:.6}\t{frame}\t0");
    for (id, p) in locations.iter().enumerate() {
        let _ = write!(row, "\t{id}\t8\t{}\t{}\t{}\t1\t0\t0\t0", p.x, p.y, p.z);
    }
    row.push('\n');
    row
}

/// Write a Wave export of `rows` records, `step` seconds apart, to `dir/name`.
///
/// Sensor `s` of record `i` sits at `(i, s, 0)`.
pub fn write_wave_tsv(
    dir: &Path,
    name: &str,
    rows: usize,
    sensors: usize,
    step: f64,
) -> Result<PathBuf> {
    let mut text = wave_tsv_header(sensors);
    for i in 0..rows {
        let locations: Vec<Vector3<f32>> =
            (0..sensors).map(|s| Vector3::new(i as f32, s as f32, 0.0)).collect();
        text.push_str(&wave_tsv_row(1.0 + i as f64 * step, i, &locations));
    }
    let path = dir.join(name);
    std::fs::write(&path, text).map_err(|e| RelayError::file_error(&path, e))?;
    Ok(path)
}

/// Locations of [`sample_roles`] sensors before any head movement.
pub const CALIBRATION_LAYOUT: [[f32; 3]; 8] = [
    [-50.0, 0.0, 0.0],
    [50.0, 0.0, 0.0],
    [0.0, 60.0, 10.0],
    [-20.0, -30.0, -40.0],
    [20.0, -30.0, -40.0],
    [0.0, -10.0, -45.0],
    [0.0, -5.0, -42.0],
    [0.0, -20.0, -60.0],
];

/// Eight-sensor frame with the head translated by `offset`.
pub fn calibration_frame(timestamp_micros: u64, offset: Vector3<f32>) -> DataFrame {
    let coils = CALIBRATION_LAYOUT
        .iter()
        .map(|&[x, y, z]| Coil::new_6d(Vector3::new(x, y, z) + offset, Quaternion::identity(), 0))
        .collect();
    DataFrame::six_dof((timestamp_micros / 10_000) as u32, timestamp_micros, coils)
}

/// Roles matching [`calibration_frame`]: three head references, a biteplate with mixed
/// naming, the upper incisor and a tongue tip.
pub fn sample_roles() -> SensorRoles {
    let role = |place: &str, active: bool, reference: bool, biteplate: bool| SensorRole {
        place: place.into(),
        active,
        reference,
        biteplate,
    };
    let mut roles = SensorRoles::default();
    roles.insert(0, role("REF_L", false, true, false));
    roles.insert(1, role("REF_R", false, true, false));
    roles.insert(2, role("REF_F", false, true, false));
    roles.insert(3, role("bpl", false, false, true));
    roles.insert(4, role("BP2", false, false, true));
    roles.insert(5, role("BPF", false, false, true));
    roles.insert(6, role("UI", true, false, false));
    roles.insert(7, role("TT", true, false, false));
    roles
}

/// Same roles as [`sample_roles`] in the JSON form read from disk.
pub const SAMPLE_ROLES_JSON: &str = r#"{
    "0": {"place": "REF_L", "reference": true},
    "1": {"place": "REF_R", "reference": true},
    "2": {"place": "REF_F", "reference": true},
    "3": {"place": "bpl", "biteplate": true},
    "4": {"place": "BP2", "biteplate": true},
    "5": {"place": "BPF", "biteplate": true},
    "6": {"place": "UI", "active": true},
    "7": {"place": "TT", "active": true}
}"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{MotionParser, ParserOptions, TsvParser};

    #[test]
    fn header_and_rows_agree_on_width() {
        let header = wave_tsv_header(3);
        let row = wave_tsv_row(1.5, 7, &[Vector3::zeros(); 3]);
        assert_eq!(header.split('\t').count(), row.split('\t').count());
        assert!(row.starts_with("1.500000\t7\t0\t0\t8\t"));
    }

    #[test]
    fn written_file_parses() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_wave_tsv(dir.path(), "fixture.tsv", 4, 3, 0.005)?;
        let parser = TsvParser::open(&path, &ParserOptions::default())?;
        assert_eq!(parser.frame_count(), 4);
        assert_eq!(parser.marker_names().len(), 3);
        Ok(())
    }

    #[test]
    fn json_roles_match_built_roles() -> anyhow::Result<()> {
        assert_eq!(SensorRoles::from_json(SAMPLE_ROLES_JSON)?, sample_roles());
        Ok(())
    }
}
