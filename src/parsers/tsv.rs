//! NDI Wave tab-separated exports.

use std::path::Path;

use super::{
    MotionFileInfo, MotionFormat, MotionParser, NextFrame, ParserOptions, read_file,
    timestamp_to_micros,
};
use crate::error::{RelayError, Result};
use crate::types::{ChannelMapping, DataFrame, EulerOrder, value_or_zero};

/// Leading fields before the first sensor: timestamp, frame id, wav id.
const LEADING_FIELDS: usize = 3;
/// Fields per sensor.
const SENSOR_FIELDS: usize = 9;

pub struct TsvParser {
    info: MotionFileInfo,
    markers: Vec<String>,
    rows: Vec<String>,
    timestamps: Vec<u64>,
    interval_micros: f64,
    mapping: ChannelMapping,
    order: EulerOrder,
    position: usize,
}

impl TsvParser {
    pub fn open(path: impl AsRef<Path>, options: &ParserOptions) -> Result<Self> {
        let path = path.as_ref();
        let text = String::from_utf8_lossy(&read_file(path)?).into_owned();
        let mut parser = Self::from_text(&text, options)?;
        parser.info = MotionFileInfo::discover(path, MotionFormat::Tsv);
        Ok(parser)
    }

    /// Parse file contents already in memory.
    pub fn from_text(text: &str, options: &ParserOptions) -> Result<Self> {
        let mut lines = text.lines().map(|l| l.trim_end_matches('\r'));
        let header = lines
            .next()
            .ok_or_else(|| RelayError::parse_error("tsv header", "file is empty"))?;
        let markers = marker_names(header);
        if markers.is_empty() {
            return Err(RelayError::parse_error(
                "tsv header",
                format!("need at least {} columns", LEADING_FIELDS + SENSOR_FIELDS),
            ));
        }

        let rows: Vec<String> = lines
            .filter(|l| !l.trim().is_empty())
            .skip(options.tsv_skip_leading_records)
            .map(str::to_string)
            .collect();

        let timestamps = rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let field = row.split('\t').next().unwrap_or_default();
                timestamp_to_micros(field).ok_or_else(|| {
                    RelayError::parse_error(
                        "tsv timestamp",
                        format!("record {}: '{field}' is not a timestamp", i + 1),
                    )
                })
            })
            .collect::<Result<Vec<u64>>>()?;

        let (Some(&first), Some(&last)) = (timestamps.first(), timestamps.last()) else {
            return Err(RelayError::parse_error("tsv data", "no records after header"));
        };
        if timestamps.len() < 2 {
            return Err(RelayError::parse_error(
                "tsv data",
                "need at least two records to measure the frame interval",
            ));
        }
        // mean of consecutive deltas telescopes to the overall span
        let interval_micros = (last as f64 - first as f64) / (timestamps.len() - 1) as f64;
        if interval_micros <= 0.0 {
            return Err(RelayError::parse_error("tsv timestamps", "timestamps do not increase"));
        }

        Ok(Self {
            info: MotionFileInfo {
                path: "<memory>".into(),
                format: MotionFormat::Tsv,
                audio: None,
                video: None,
            },
            markers,
            rows,
            timestamps,
            interval_micros,
            mapping: options.tsv_layout.mapping(),
            order: options.euler_order,
            position: 0,
        })
    }

    fn frame_at(&self, index: usize) -> DataFrame {
        let fields: Vec<&str> = self.rows[index].split('\t').collect();
        let sensors = fields.get(LEADING_FIELDS..).unwrap_or_default();

        let coils = (0..self.markers.len())
            .map(|sensor| {
                let start = sensor * SENSOR_FIELDS;
                let values: Vec<f32> = (start..start + SENSOR_FIELDS)
                    .map(|i| sensors.get(i).map_or(0.0, |f| value_or_zero(f)))
                    .collect();
                self.mapping.build_coil(&values, self.order)
            })
            .collect();

        let timestamp = self.timestamps[index].saturating_sub(self.timestamps[0]);
        DataFrame::six_dof(index as u32, timestamp, coils)
    }
}

/// Sensor names from the header: the first column of each 9-column group, minus an `ID` suffix.
fn marker_names(header: &str) -> Vec<String> {
    let fields: Vec<&str> = header.split('\t').collect();
    let sensors = fields.len().saturating_sub(LEADING_FIELDS) / SENSOR_FIELDS;
    (0..sensors)
        .map(|i| {
            let raw = fields[LEADING_FIELDS + i * SENSOR_FIELDS].trim();
            let name = raw.strip_suffix("ID").or_else(|| raw.strip_suffix("Id")).unwrap_or(raw).trim();
            if name.is_empty() { format!("Sensor{i}") } else { name.to_string() }
        })
        .collect()
}

impl MotionParser for TsvParser {
    fn info(&self) -> &MotionFileInfo {
        &self.info
    }

    fn marker_names(&self) -> &[String] {
        &self.markers
    }

    fn frame_interval_micros(&self) -> f64 {
        self.interval_micros
    }

    fn frame_count(&self) -> usize {
        self.rows.len()
    }

    fn frames_read(&self) -> usize {
        self.position
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        if self.position >= self.rows.len() {
            return Ok(NextFrame::NoMoreData);
        }
        let frame = self.frame_at(self.position);
        self.position += 1;
        Ok(NextFrame::Frame(frame))
    }

    fn skip_frame(&mut self) -> Result<bool> {
        if self.position >= self.rows.len() {
            return Ok(false);
        }
        self.position += 1;
        Ok(true)
    }

    fn rewind(&mut self) {
        self.position = 0;
    }
}
