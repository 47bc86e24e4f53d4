//! Motion file readers.
//!
//! Four on-disk formats are normalised into [`DataFrame`]s of 6-DOF coils:
//!
//! | Extension | Parser | Layout |
//! |-----------|--------|--------|
//! | `.tsv`  | [`TsvParser`]  | NDI Wave tab-separated export, 9 columns per sensor |
//! | `.bvh`  | [`BvhParser`]  | Biovision hierarchy, channels inferred from labels |
//! | `.pos`  | [`PosParser`]  | Carstens AG500/AG501 binary, little-endian `f32` records |
//! | `.json` | [`JsonParser`] | Pre-aligned per-channel Euler angle and position arrays |
//!
//! Every parser loads its file at open time and then hands out frames lazily through
//! [`MotionParser::next_frame`]. [`MotionParser::rewind`] restarts from the first frame
//! after the header, which is how the emulator loops.
//!
//! ```rust,no_run
//! use emarelay::parsers::{NextFrame, ParserOptions, open_motion_file};
//!
//! fn dump() -> emarelay::Result<()> {
//!     let mut parser = open_motion_file("session.tsv", &ParserOptions::default())?;
//!     println!("{} markers at {:?} Hz", parser.marker_names().len(), parser.sampling_rate());
//!     while let NextFrame::Frame(frame) = parser.next_frame()? {
//!         println!("{:?} {}", frame.timestamp_micros(), frame.coil_count());
//!     }
//!     Ok(())
//! }
//! ```

mod bvh;
mod json;
mod labels;
mod multimodal;
mod params;
mod pos;
mod tsv;

pub use bvh::BvhParser;
pub use json::JsonParser;
pub use labels::{FixedLabels, KeywordLabels, LabelMapping, LabelStrategy};
pub use multimodal::{Companions, find_companions};
pub use params::{ParameterSet, frequency_from_xml};
pub use pos::PosParser;
pub use tsv::TsvParser;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::types::{ChannelMapping, DataFrame, EulerOrder};

/// Result of asking a parser for its next frame.
#[derive(Debug, Clone, PartialEq)]
pub enum NextFrame {
    Frame(DataFrame),
    /// The file is exhausted; [`MotionParser::rewind`] starts over.
    NoMoreData,
}

/// Recognised motion file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionFormat {
    Tsv,
    Bvh,
    Pos,
    Json,
}

impl MotionFormat {
    /// Format for a path, by case-insensitive extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension =
            path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
        match extension.as_str() {
            "tsv" => Ok(MotionFormat::Tsv),
            "bvh" => Ok(MotionFormat::Bvh),
            "pos" => Ok(MotionFormat::Pos),
            "json" => Ok(MotionFormat::Json),
            _ => Err(RelayError::UnsupportedFormat { extension }),
        }
    }
}

impl fmt::Display for MotionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MotionFormat::Tsv => "tsv",
            MotionFormat::Bvh => "bvh",
            MotionFormat::Pos => "pos",
            MotionFormat::Json => "json",
        };
        f.write_str(name)
    }
}

/// Where a motion file came from and which recordings accompany it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionFileInfo {
    pub path: PathBuf,
    pub format: MotionFormat,
    pub audio: Option<PathBuf>,
    pub video: Option<PathBuf>,
}

impl MotionFileInfo {
    pub(crate) fn discover(path: &Path, format: MotionFormat) -> Self {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let companions = find_companions(&path);
        Self { path, format, audio: companions.audio, video: companions.video }
    }
}

/// Column layout of `.tsv` files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TsvLayout {
    /// NDI Wave export.
    #[default]
    Wave,
    /// Files written by the relay's frame recorder.
    Recording,
}

impl TsvLayout {
    pub fn mapping(self) -> ChannelMapping {
        match self {
            TsvLayout::Wave => ChannelMapping::wave_tsv(),
            TsvLayout::Recording => ChannelMapping::recording(),
        }
    }
}

/// Knobs shared by all parsers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserOptions {
    /// Order used when turning Euler or elevation/azimuth angles into quaternions.
    pub euler_order: EulerOrder,
    /// Data records dropped after the `.tsv` header line.
    pub tsv_skip_leading_records: usize,
    pub tsv_layout: TsvLayout,
    /// Sampling rate of header-less V001 `.pos` files, in Hz.
    pub pos_default_rate: f64,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            euler_order: EulerOrder::Xyz,
            tsv_skip_leading_records: 0,
            tsv_layout: TsvLayout::Wave,
            pos_default_rate: 200.0,
        }
    }
}

/// Common surface of every motion file reader.
pub trait MotionParser: Send {
    fn info(&self) -> &MotionFileInfo;

    /// Sensor names in coil order.
    fn marker_names(&self) -> &[String];

    /// Fixed time between frames, in microseconds.
    fn frame_interval_micros(&self) -> f64;

    /// Total frames in one pass over the file.
    fn frame_count(&self) -> usize;

    /// Frames handed out since the last rewind.
    fn frames_read(&self) -> usize;

    fn next_frame(&mut self) -> Result<NextFrame>;

    /// Start over at the first frame after the header.
    fn rewind(&mut self);

    /// Problems found while opening that did not stop parsing.
    fn warnings(&self) -> &[String] {
        &[]
    }

    /// Advance one frame without building it. Returns `false` at end of data.
    fn skip_frame(&mut self) -> Result<bool> {
        Ok(matches!(self.next_frame()?, NextFrame::Frame(_)))
    }

    fn sampling_rate(&self) -> Option<f64> {
        let interval = self.frame_interval_micros();
        (interval.is_finite() && interval > 0.0).then(|| 1_000_000.0 / interval)
    }

    /// Parameter document describing this file and the progress through it.
    fn parameters(&self) -> ParameterSet {
        let info = self.info();
        ParameterSet {
            mocap_file: Some(info.path.clone()),
            audio_file: info.audio.clone(),
            video_file: info.video.clone(),
            frames_sent: self.frames_read(),
            frequency: self.sampling_rate(),
        }
    }
}

/// Open a motion file with the parser its extension selects.
pub fn open_motion_file(
    path: impl AsRef<Path>,
    options: &ParserOptions,
) -> Result<Box<dyn MotionParser>> {
    let path = path.as_ref();
    let parser: Box<dyn MotionParser> = match MotionFormat::from_path(path)? {
        MotionFormat::Tsv => Box::new(TsvParser::open(path, options)?),
        MotionFormat::Bvh => Box::new(BvhParser::open(path, options)?),
        MotionFormat::Pos => Box::new(PosParser::open(path, options)?),
        MotionFormat::Json => Box::new(JsonParser::open(path, options)?),
    };
    for warning in parser.warnings() {
        tracing::warn!(file = %path.display(), "{warning}");
    }
    tracing::info!(
        file = %path.display(),
        format = %parser.info().format,
        markers = parser.marker_names().len(),
        frames = parser.frame_count(),
        rate_hz = parser.sampling_rate(),
        "opened motion file"
    );
    Ok(parser)
}

/// Timestamp text to microseconds: fractional values are seconds, integers are kept.
pub(crate) fn timestamp_to_micros(field: &str) -> Option<u64> {
    let field = field.trim();
    if field.contains(['.', 'e', 'E']) {
        let seconds: f64 = field.parse().ok()?;
        (seconds.is_finite() && seconds >= 0.0).then(|| (seconds * 1_000_000.0).round() as u64)
    } else {
        field.parse().ok()
    }
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| RelayError::file_error(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_selects_format() {
        assert_eq!(MotionFormat::from_path(Path::new("a/b.TSV")).ok(), Some(MotionFormat::Tsv));
        assert_eq!(MotionFormat::from_path(Path::new("x.bvh")).ok(), Some(MotionFormat::Bvh));
        assert!(matches!(
            MotionFormat::from_path(Path::new("x.c3d")),
            Err(RelayError::UnsupportedFormat { extension }) if extension == "c3d"
        ));
        assert!(MotionFormat::from_path(Path::new("noext")).is_err());
    }

    #[test]
    fn timestamps_in_seconds_are_rounded() {
        assert_eq!(timestamp_to_micros("0.03"), Some(30_000));
        assert_eq!(timestamp_to_micros("1.000001"), Some(1_000_001));
        assert_eq!(timestamp_to_micros("10000"), Some(10_000));
        assert_eq!(timestamp_to_micros(" 12 "), Some(12));
        assert_eq!(timestamp_to_micros("-0.5"), None);
        assert_eq!(timestamp_to_micros("abc"), None);
    }

    #[test]
    fn options_default_from_empty_yaml() {
        let options: ParserOptions = serde_yaml_ng::from_str("{}").expect("yaml");
        assert_eq!(options, ParserOptions::default());

        let options: ParserOptions =
            serde_yaml_ng::from_str("euler_order: ZYX\ntsv_layout: recording\n").expect("yaml");
        assert_eq!(options.euler_order, EulerOrder::Zyx);
        assert_eq!(options.tsv_layout.mapping(), ChannelMapping::recording());
    }

    #[test]
    fn unknown_extension_fails_before_io() {
        let result = open_motion_file("/does/not/exist.xyz", &ParserOptions::default());
        assert!(matches!(result, Err(RelayError::UnsupportedFormat { .. })));
    }
}
