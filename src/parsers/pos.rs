//! Carstens AG500/AG501 `.pos` files.
//!
//! V002 and V003 start with an ASCII header:
//!
//! ```text
//! AG50xDATA_V002
//! 00000062            <- total header length in bytes
//! NumberOfChannels=16
//! SamplingFrequencyHz=250
//! ...                 <- further V003 fields, skipped
//! ```
//!
//! V001 files have no header and always carry 12 channels. Each frame holds, per channel,
//! seven little-endian `f32`: `x, y, z, phi, theta, rms, extra`.

use std::path::Path;

use bytes::Buf;

use super::{MotionFileInfo, MotionFormat, MotionParser, NextFrame, ParserOptions, read_file};
use crate::error::{RelayError, Result};
use crate::types::{ChannelMapping, DataFrame, EulerOrder};

const VALUES_PER_CHANNEL: usize = 7;
const V001_CHANNELS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosVersion {
    V001,
    V002,
    V003,
}

pub struct PosParser {
    info: MotionFileInfo,
    version: PosVersion,
    data: Vec<u8>,
    data_start: usize,
    channels: usize,
    frame_len: usize,
    names: Vec<String>,
    interval_micros: f64,
    frame_count: usize,
    order: EulerOrder,
    warnings: Vec<String>,
    position: usize,
}

impl PosParser {
    pub fn open(path: impl AsRef<Path>, options: &ParserOptions) -> Result<Self> {
        let path = path.as_ref();
        let mut parser = Self::from_bytes(read_file(path)?, options)?;
        parser.info = MotionFileInfo::discover(path, MotionFormat::Pos);
        Ok(parser)
    }

    pub fn from_bytes(data: Vec<u8>, options: &ParserOptions) -> Result<Self> {
        let first_line = header_lines(&data).next().unwrap_or_default();
        let version = if first_line.contains("V002") {
            PosVersion::V002
        } else if first_line.contains("V003") {
            PosVersion::V003
        } else {
            PosVersion::V001
        };

        let (data_start, channels, rate) = match version {
            PosVersion::V001 => (0, V001_CHANNELS, options.pos_default_rate),
            PosVersion::V002 | PosVersion::V003 => {
                let mut lines = header_lines(&data).skip(1);
                let header_len: usize = lines
                    .next()
                    .and_then(|l| l.trim().parse().ok())
                    .ok_or_else(|| RelayError::parse_error("pos header", "bad header length"))?;
                let channels: usize = key_value(lines.next(), "NumberOfChannels")?;
                let rate: f64 = key_value(lines.next(), "SamplingFrequencyHz")?;
                if header_len > data.len() {
                    return Err(RelayError::parse_error(
                        "pos header",
                        format!("header length {header_len} beyond file size {}", data.len()),
                    ));
                }
                (header_len, channels, rate)
            }
        };
        if channels == 0 {
            return Err(RelayError::parse_error("pos header", "zero channels"));
        }
        if !(rate.is_finite() && rate > 0.0) {
            return Err(RelayError::parse_error("pos header", format!("bad sampling rate {rate}")));
        }

        let body = data.len() - data_start;
        let frame_len = channels
            .checked_mul(VALUES_PER_CHANNEL * 4)
            .filter(|&len| len <= body)
            .ok_or_else(|| {
                RelayError::parse_error(
                    "pos header",
                    format!("{channels} channels do not fit in {body} bytes of frame data"),
                )
            })?;
        let mut warnings = Vec::new();
        if body % frame_len != 0 {
            warnings.push(format!(
                "{} trailing bytes after the last complete frame",
                body % frame_len
            ));
        }

        Ok(Self {
            info: MotionFileInfo {
                path: "<memory>".into(),
                format: MotionFormat::Pos,
                audio: None,
                video: None,
            },
            version,
            data,
            data_start,
            channels,
            frame_len,
            names: (1..=channels).map(|i| format!("Channel{i}")).collect(),
            interval_micros: 1_000_000.0 / rate,
            frame_count: body / frame_len,
            order: options.euler_order,
            warnings,
            position: 0,
        })
    }

    pub fn version(&self) -> PosVersion {
        self.version
    }

    fn frame_at(&self, index: usize) -> DataFrame {
        let start = self.data_start + index * self.frame_len;
        let mut raw = &self.data[start..start + self.frame_len];
        let mapping = ChannelMapping::carstens_pos();

        let coils = (0..self.channels)
            .map(|_| {
                let mut values = [0.0f32; VALUES_PER_CHANNEL];
                for value in &mut values {
                    *value = raw.get_f32_le();
                }
                mapping.build_coil(&values, self.order)
            })
            .collect();

        let timestamp = (index as f64 * self.interval_micros).round() as u64;
        DataFrame::six_dof(index as u32, timestamp, coils)
    }
}

/// Text lines at the start of a binary file, stopping at the first non-UTF-8 line.
fn header_lines(data: &[u8]) -> impl Iterator<Item = &str> {
    data.split(|&b| b == b'\n')
        .map_while(|line| std::str::from_utf8(line).ok())
        .map(|line| line.trim_end_matches('\r'))
}

fn key_value<T: std::str::FromStr>(line: Option<&str>, key: &str) -> Result<T> {
    line.and_then(|l| l.split_once('='))
        .filter(|(k, _)| k.trim() == key)
        .and_then(|(_, v)| v.trim().parse().ok())
        .ok_or_else(|| RelayError::parse_error("pos header", format!("missing '{key}='")))
}

impl MotionParser for PosParser {
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
        self.frame_count
    }

    fn frames_read(&self) -> usize {
        self.position
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        if self.position >= self.frame_count {
            return Ok(NextFrame::NoMoreData);
        }
        let frame = self.frame_at(self.position);
        self.position += 1;
        Ok(NextFrame::Frame(frame))
    }

    fn skip_frame(&mut self) -> Result<bool> {
        if self.position >= self.frame_count {
            return Ok(false);
        }
        self.position += 1;
        Ok(true)
    }

    fn rewind(&mut self) {
        self.position = 0;
    }

    fn warnings(&self) -> &[String] {
        &self.warnings
    }
}
