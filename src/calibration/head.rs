//! Head and biteplate correction.

use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use nalgebra::{Matrix4, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::outliers::{robust_average, trim_warm_up};
use super::{CoordinateFrame, SensorRoles};
use crate::error::{RelayError, Result};
use crate::parsers::{MotionParser, NextFrame, ParserOptions, TsvParser};
use crate::types::DataFrame;

/// Matrix and position a viewer needs to follow the corrected head.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTransform {
    /// Global to biteplate-local transform.
    pub matrix: Matrix4<f64>,
    /// Head reference origin in biteplate-local coordinates.
    pub position: Vector3<f64>,
}

impl CameraTransform {
    /// 16 big-endian `f32` of the matrix in row-major order, then 3 for the position.
    pub fn to_blob(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(19 * 4);
        for row in 0..4 {
            for col in 0..4 {
                out.put_f32(self.matrix[(row, col)] as f32);
            }
        }
        for value in self.position.iter() {
            out.put_f32(*value as f32);
        }
        out.freeze()
    }
}

/// Calibrated reference and biteplate frames.
///
/// `reference` is built from the head sensors in global space, `biteplate` from the
/// biteplate sensors expressed in that reference space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadCorrector {
    pub reference: CoordinateFrame,
    pub biteplate: CoordinateFrame,
    /// Set once the biteplate origin has moved to the upper incisor.
    #[serde(default)]
    pub incisor_origin: bool,
}

fn location(frame: &DataFrame, index: usize) -> Result<Vector3<f64>> {
    frame
        .coil(index)
        .map(|c| c.location.cast::<f64>())
        .ok_or_else(|| {
            RelayError::calibration(format!(
                "frame has {} coils, roles need coil {index}",
                frame.coil_count()
            ))
        })
}

fn reference_frame(frame: &DataFrame, roles: &SensorRoles) -> Result<CoordinateFrame> {
    let [a, b, c] = roles.reference_points()?;
    CoordinateFrame::reference(location(frame, a)?, location(frame, b)?, location(frame, c)?)
}

impl HeadCorrector {
    /// Calibrate from a recorded window: drop the warm-up, average robustly, build frames.
    pub fn calibrate(frames: &[DataFrame], roles: &SensorRoles, exclude_ms: u64) -> Result<Self> {
        if frames.len() < 2 {
            return Err(RelayError::calibration(format!(
                "need more than one frame, got {}",
                frames.len()
            )));
        }
        let kept = trim_warm_up(frames, exclude_ms);
        let average = robust_average(&kept).ok_or_else(|| {
            RelayError::calibration(format!("no frames left after the first {exclude_ms} ms"))
        })?;
        debug!(frames = frames.len(), kept = kept.len(), "averaged calibration window");
        Self::from_average(&average, roles)
    }

    /// Build both frames from one representative frame.
    pub fn from_average(average: &DataFrame, roles: &SensorRoles) -> Result<Self> {
        let reference = reference_frame(average, roles)?;
        let [left, right, front] = roles.biteplate_points()?;
        let biteplate = CoordinateFrame::from_points(
            reference.to_local(&location(average, left)?),
            reference.to_local(&location(average, right)?),
            reference.to_local(&location(average, front)?),
        )?;
        info!(origin = ?reference.origin, "head correction calibrated");
        Ok(Self { reference, biteplate, incisor_origin: false })
    }

    /// Calibrate from a recorded `.tsv` file.
    pub fn from_tsv(
        path: impl AsRef<Path>,
        roles: &SensorRoles,
        exclude_ms: u64,
        options: &ParserOptions,
    ) -> Result<Self> {
        let mut parser = TsvParser::open(path, options)?;
        let mut frames = Vec::with_capacity(parser.frame_count());
        while let NextFrame::Frame(frame) = parser.next_frame()? {
            frames.push(frame);
        }
        Self::calibrate(&frames, roles, exclude_ms)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RelayError::file_error(path, e))?;
        serde_yaml_ng::from_str(&text)
            .map_err(|e| RelayError::parse_error("head calibration", e.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_yaml_ng::to_string(self)
            .map_err(|e| RelayError::parse_error("head calibration", e.to_string()))?;
        std::fs::write(path, text).map_err(|e| RelayError::file_error(path, e))
    }

    /// Fill in reference and biteplate-corrected locations for every coil of `frame`.
    ///
    /// The reference frame is rebuilt from this frame's head sensors, so head movement since
    /// calibration cancels out. The first call moves the biteplate origin to the upper incisor.
    pub fn correct(&mut self, frame: &mut DataFrame, roles: &SensorRoles) -> Result<CameraTransform> {
        let current = reference_frame(frame, roles)?;

        if !self.incisor_origin {
            if let Some(ui) = roles.upper_incisor() {
                let incisor = current.to_local(&location(frame, ui)?);
                self.biteplate.set_origin(incisor);
                self.incisor_origin = true;
                debug!(origin = ?incisor, "biteplate origin moved to upper incisor");
            }
        }

        for coil in frame.coils_mut() {
            let head = current.to_local(&coil.location.cast::<f64>());
            let corrected = self.biteplate.to_local(&head);
            coil.ref_location = Some(head.cast::<f32>());
            coil.corrected_location = Some(corrected.cast::<f32>());
        }

        Ok(CameraTransform {
            matrix: self.biteplate.global_to_local() * current.global_to_local(),
            position: self.biteplate.to_local(&current.to_local(&self.reference.origin)),
        })
    }
}
