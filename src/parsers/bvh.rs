//! Biovision hierarchy files.

use std::path::Path;

use super::labels::{KeywordLabels, LabelStrategy};
use super::{MotionFileInfo, MotionFormat, MotionParser, NextFrame, ParserOptions, read_file};
use crate::error::{RelayError, Result};
use crate::types::{ChannelMapping, DataFrame, EulerOrder};

struct Marker {
    name: String,
    channels: Vec<String>,
    mapping: ChannelMapping,
}

pub struct BvhParser {
    info: MotionFileInfo,
    markers: Vec<Marker>,
    names: Vec<String>,
    motion: Vec<String>,
    interval_micros: f64,
    order: EulerOrder,
    warnings: Vec<String>,
    position: usize,
}

impl BvhParser {
    pub fn open(path: impl AsRef<Path>, options: &ParserOptions) -> Result<Self> {
        Self::open_with(path, options, &KeywordLabels)
    }

    /// Open with a specific label strategy.
    pub fn open_with(
        path: impl AsRef<Path>,
        options: &ParserOptions,
        labels: &dyn LabelStrategy,
    ) -> Result<Self> {
        let path = path.as_ref();
        let text = String::from_utf8_lossy(&read_file(path)?).into_owned();
        let mut parser = Self::from_text(&text, options, labels)?;
        parser.info = MotionFileInfo::discover(path, MotionFormat::Bvh);
        Ok(parser)
    }

    pub fn from_text(
        text: &str,
        options: &ParserOptions,
        labels: &dyn LabelStrategy,
    ) -> Result<Self> {
        let mut lines = text.lines().map(str::trim);
        let mut names = Vec::new();
        let mut channel_lists: Vec<Vec<String>> = Vec::new();

        loop {
            let Some(line) = lines.next() else {
                return Err(RelayError::parse_error("bvh header", "no MOTION section"));
            };
            if line.starts_with("MOTION") {
                break;
            }
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some("ROOT" | "JOINT") => {
                    let name = tokens.next().ok_or_else(|| {
                        RelayError::parse_error("bvh header", format!("unnamed joint: '{line}'"))
                    })?;
                    names.push(name.to_string());
                }
                Some("CHANNELS") => {
                    let declared: usize =
                        tokens.next().and_then(|n| n.parse().ok()).ok_or_else(|| {
                            RelayError::parse_error("bvh header", format!("bad channel count: '{line}'"))
                        })?;
                    let list: Vec<String> = tokens.map(str::to_string).collect();
                    if list.len() != declared {
                        return Err(RelayError::parse_error(
                            "bvh header",
                            format!("CHANNELS declares {declared} but lists {}", list.len()),
                        ));
                    }
                    channel_lists.push(list);
                }
                _ => {}
            }
        }

        let declared_frames = header_value(lines.next(), "Frames")?;
        let frame_time = header_value(lines.next(), "Frame Time")?;
        if !(frame_time.is_finite() && frame_time > 0.0) {
            return Err(RelayError::parse_error("bvh header", "Frame Time must be positive"));
        }

        let motion: Vec<String> =
            lines.filter(|l| !l.is_empty()).map(str::to_string).collect();

        let mut warnings = Vec::new();
        if names.len() != channel_lists.len() {
            warnings.push(format!(
                "{} joints but {} CHANNELS lines",
                names.len(),
                channel_lists.len()
            ));
        }
        if declared_frames as usize != motion.len() {
            warnings.push(format!(
                "header declares {declared_frames} frames, file holds {}",
                motion.len()
            ));
        }

        let first_channels = channel_lists.first().cloned().unwrap_or_default();
        let markers: Vec<Marker> = channel_lists
            .into_iter()
            .enumerate()
            .map(|(i, channels)| {
                let name = names.get(i).cloned().unwrap_or_else(|| format!("Marker{i}"));
                if channels != first_channels {
                    warnings.push(format!(
                        "{name}: channels [{}] differ from the first marker's [{}]",
                        channels.join(" "),
                        first_channels.join(" ")
                    ));
                }
                let declared = EulerOrder::from_bvh_channels(&channels)
                    .filter(|&declared| declared != options.euler_order);
                if let Some(declared) = declared {
                    warnings.push(format!(
                        "{name}: CHANNELS rotate in {declared:?} order, angles are read as {:?}",
                        options.euler_order
                    ));
                }
                let result = labels.map_labels(&channels);
                warnings.extend(result.warnings.into_iter().map(|w| format!("{name}: {w}")));
                Marker { name, channels, mapping: result.mapping }
            })
            .collect();
        let names = markers.iter().map(|m| m.name.clone()).collect();

        Ok(Self {
            info: MotionFileInfo {
                path: "<memory>".into(),
                format: MotionFormat::Bvh,
                audio: None,
                video: None,
            },
            markers,
            names,
            motion,
            interval_micros: frame_time * 1_000_000.0,
            order: options.euler_order,
            warnings,
            position: 0,
        })
    }

    fn frame_at(&self, index: usize) -> Result<DataFrame> {
        let values = self.motion[index]
            .split_whitespace()
            .map(|v| {
                v.parse::<f32>().map_err(|_| {
                    RelayError::parse_error(
                        "bvh motion",
                        format!("frame {index}: '{v}' is not a number"),
                    )
                })
            })
            .collect::<Result<Vec<f32>>>()?;

        let mut offset = 0;
        let mut coils = Vec::with_capacity(self.markers.len());
        for marker in &self.markers {
            let end = offset + marker.channels.len();
            let slice = values.get(offset..end).ok_or_else(|| {
                RelayError::parse_error(
                    "bvh motion",
                    format!("frame {index} has {} values, need {end}", values.len()),
                )
            })?;
            coils.push(marker.mapping.build_coil(slice, self.order));
            offset = end;
        }

        let timestamp = (index as f64 * self.interval_micros).round() as u64;
        Ok(DataFrame::six_dof(index as u32, timestamp, coils))
    }
}

fn header_value(line: Option<&str>, key: &str) -> Result<f64> {
    line.and_then(|l| l.strip_prefix(key))
        .and_then(|rest| rest.trim_start().strip_prefix(':'))
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| RelayError::parse_error("bvh header", format!("missing '{key}:' line")))
}

impl MotionParser for BvhParser {
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
        self.motion.len()
    }

    fn frames_read(&self) -> usize {
        self.position
    }

    fn next_frame(&mut self) -> Result<NextFrame> {
        if self.position >= self.motion.len() {
            return Ok(NextFrame::NoMoreData);
        }
        let frame = self.frame_at(self.position);
        self.position += 1;
        frame.map(NextFrame::Frame)
    }

    fn skip_frame(&mut self) -> Result<bool> {
        if self.position >= self.motion.len() {
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
