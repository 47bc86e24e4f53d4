//! Head and biteplate correction applied to relayed frames.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::calibration::{CameraTransform, HeadCorrector, SensorRoles};
use crate::config::{CalibrationSource, HeadCorrectionSettings};
use crate::error::{RelayError, Result};
use crate::parsers::ParserOptions;
use crate::types::DataFrame;

/// Correction state shared by all consumers of one relay.
///
/// Without roles correction is off. With roles but no calibration yet, frames pass through
/// unchanged.
#[derive(Debug, Default)]
pub struct HeadCorrection {
    roles: Option<SensorRoles>,
    corrector: Option<HeadCorrector>,
    last_transform: Option<CameraTransform>,
    exclude_ms: u64,
    save_to: Option<PathBuf>,
}

impl HeadCorrection {
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Correction with `roles` and an optional starting calibration.
    pub fn new(roles: SensorRoles, corrector: Option<HeadCorrector>, exclude_ms: u64) -> Self {
        Self { roles: Some(roles), corrector, last_transform: None, exclude_ms, save_to: None }
    }

    /// Load roles and the configured start-up calibration.
    ///
    /// A calibration source that fails to load is logged and correction starts uncalibrated.
    pub fn from_settings(settings: &HeadCorrectionSettings, options: &ParserOptions) -> Result<Self> {
        if !settings.enabled {
            return Ok(Self::disabled());
        }
        let path = settings
            .roles
            .as_ref()
            .ok_or_else(|| RelayError::config("head correction needs a roles file"))?;
        let roles = SensorRoles::load(path)?;

        let loaded = match &settings.calibration {
            CalibrationSource::None => Ok(None),
            CalibrationSource::Saved { path } => HeadCorrector::load(path).map(Some),
            CalibrationSource::Tsv { path } => {
                HeadCorrector::from_tsv(path, &roles, settings.exclude_ms, options).map(Some)
            }
        };
        let corrector = loaded.unwrap_or_else(|e| {
            warn!(error = %e, "start-up calibration unavailable, passing frames through");
            None
        });
        info!(calibrated = corrector.is_some(), "head correction enabled");

        let mut correction = Self::new(roles, corrector, settings.exclude_ms);
        correction.save_to = settings.save_to.clone();
        Ok(correction)
    }

    pub fn is_enabled(&self) -> bool {
        self.roles.is_some()
    }

    pub fn is_calibrated(&self) -> bool {
        self.corrector.is_some()
    }

    pub fn roles(&self) -> Option<&SensorRoles> {
        self.roles.as_ref()
    }

    /// Transform of the most recent successful correction.
    pub fn camera_transform(&self) -> Option<&CameraTransform> {
        self.last_transform.as_ref()
    }

    /// Rewrite coil locations into biteplate space.
    ///
    /// A frame that cannot be corrected (missing sensors, degenerate geometry) is left as
    /// received.
    pub fn apply(&mut self, frame: &mut DataFrame) {
        let (Some(roles), Some(corrector)) = (self.roles.as_ref(), self.corrector.as_mut()) else {
            return;
        };
        match corrector.correct(frame, roles) {
            Ok(transform) => {
                for coil in frame.coils_mut() {
                    coil.location = coil.best_location();
                }
                self.last_transform = Some(transform);
            }
            Err(e) => warn!(error = %e, "frame not corrected"),
        }
    }

    /// Replace the calibration with one computed from `frames`.
    ///
    /// On failure the previous calibration stays in place.
    pub fn calibrate(&mut self, frames: &[DataFrame]) -> Result<()> {
        let roles = self
            .roles
            .as_ref()
            .ok_or_else(|| RelayError::calibration("head correction is not enabled"))?;
        let corrector = HeadCorrector::calibrate(frames, roles, self.exclude_ms)?;
        if let Some(path) = &self.save_to {
            match corrector.save(path) {
                Ok(()) => debug!(path = %path.display(), "calibration saved"),
                Err(e) => warn!(error = %e, "calibration not saved"),
            }
        }
        self.corrector = Some(corrector);
        self.last_transform = None;
        info!(frames = frames.len(), "live calibration applied");
        Ok(())
    }
}
