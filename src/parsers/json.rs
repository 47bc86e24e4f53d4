//! Pre-aligned JSON recordings.
//!
//! ```json
//! {
//!   "samplingFrequency": 250,
//!   "timestamps": [0.0, 0.004],
//!   "channels": {
//!     "TT": { "eulerAngles": [ex, ey, ez, ...], "position": [x, y, z, ...] }
//!   }
//! }
//! ```
//!
//! Channel arrays hold three values per frame. Channels are ordered by name.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::{MotionFileInfo, MotionFormat, MotionParser, NextFrame, ParserOptions, read_file};
use crate::error::{RelayError, Result};
use crate::types::{ChannelMapping, DataFrame, EulerOrder};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlignedRecording {
    sampling_frequency: f64,
    timestamps: Vec<serde_json::Number>,
    channels: BTreeMap<String, AlignedChannel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlignedChannel {
    euler_angles: Vec<f32>,
    position: Vec<f32>,
}

pub struct JsonParser {
    info: MotionFileInfo,
    names: Vec<String>,
    channels: Vec<AlignedChannel>,
    timestamps: Vec<u64>,
    interval_micros: f64,
    order: EulerOrder,
    position: usize,
}

impl JsonParser {
    pub fn open(path: impl AsRef<Path>, options: &ParserOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut parser = Self::from_slice(&read_file(path)?, options)?;
        parser.info = MotionFileInfo::discover(path, MotionFormat::Json);
        Ok(parser)
    }

    pub fn from_slice(data: &[u8], options: &ParserOptions) -> Result<Self> {
        let recording: AlignedRecording = serde_json::from_slice(data)
            .map_err(|e| RelayError::parse_error("json recording", e.to_string()))?;

        if !(recording.sampling_frequency.is_finite() && recording.sampling_frequency > 0.0) {
            return Err(RelayError::parse_error(
                "json recording",
                format!("bad samplingFrequency {}", recording.sampling_frequency),
            ));
        }

        let timestamps = recording
            .timestamps
            .iter()
            .map(number_to_micros)
            .collect::<Option<Vec<u64>>>()
            .ok_or_else(|| RelayError::parse_error("json recording", "negative or invalid timestamp"))?;

        let frames = timestamps.len();
        for (name, channel) in &recording.channels {
            if channel.euler_angles.len() < frames * 3 || channel.position.len() < frames * 3 {
                return Err(RelayError::parse_error(
                    "json recording",
                    format!("channel {name} holds fewer than {frames} frames"),
                ));
            }
        }

        let (names, channels) = recording.channels.into_iter().unzip();
        Ok(Self {
            info: MotionFileInfo {
                path: "<memory>".into(),
                format: MotionFormat::Json,
                audio: None,
                video: None,
            },
            names,
            channels,
            timestamps,
            interval_micros: 1_000_000.0 / recording.sampling_frequency,
            order: options.euler_order,
            position: 0,
        })
    }

    fn frame_at(&self, index: usize) -> DataFrame {
        let mapping = ChannelMapping::euler([0, 1, 2, 3, 4, 5]);
        let span = index * 3..index * 3 + 3;
        let coils = self
            .channels
            .iter()
            .map(|channel| {
                let mut values = [0.0f32; 6];
                values[..3].copy_from_slice(&channel.euler_angles[span.clone()]);
                values[3..].copy_from_slice(&channel.position[span.clone()]);
                mapping.build_coil(&values, self.order)
            })
            .collect();
        let timestamp = self.timestamps[index].saturating_sub(self.timestamps[0]);
        DataFrame::six_dof(index as u32, timestamp, coils)
    }
}

/// Integers are microseconds already, fractions are seconds.
fn number_to_micros(number: &serde_json::Number) -> Option<u64> {
    if let Some(micros) = number.as_u64() {
        return Some(micros);
    }
    let seconds = number.as_f64()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| (seconds * 1_000_000.0).round() as u64)
}

impl MotionParser for JsonParser {
    fn info(&self) -> &MotionFileInfo {
        &self.info
    }

    fn marker_names(&self) -> &[String] {
        &self.names
    }

    fn frame_interval_micros(&self) -> f64 {
        self.interval_micros
    }

    fn frame_count(&self) -> usize {
        self.timestamps.len()
    }

    fn frames_read(&self) -> usize {
        self.position
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        if self.position >= self.timestamps.len() {
            return Ok(NextFrame::NoMoreData);
        }
        let frame = self.frame_at(self.position);
        self.position += 1;
        Ok(NextFrame::Frame(frame))
    }

    fn rewind(&mut self) {
        self.position = 0;
    }
}
