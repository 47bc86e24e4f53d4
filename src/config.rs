//! Settings for the relay and the emulator, loaded from YAML.
//!
//! Every field has a default, so an empty file (or none at all) is a valid configuration:
//!
//! ```yaml
//! relay:
//!   listen: 127.0.0.1:1111
//!   upstream: 127.0.0.1:9995
//!   smoothing: { mode: frames, value: 4 }
//!   head_correction:
//!     enabled: true
//!     roles: sensors.json
//!     calibration: { source: saved, path: calibration.yaml }
//! emulator:
//!   listen: 127.0.0.1:9995
//!   looping: false
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};
use crate::parsers::ParserOptions;
use crate::types::Smoothing;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub emulator: EmulatorSettings,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RelayError::file_error(path, e))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let settings: Self = serde_yaml_ng::from_str(yaml)
            .map_err(|e| RelayError::config(format!("invalid settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.relay.validate()?;
        self.emulator.validate()
    }
}

/// Upstream connection, smoothing, correction and recording for the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub listen: String,
    pub upstream: String,
    pub smoothing: Smoothing,
    /// Frequency requested when streaming starts, in Hz.
    pub stream_frequency: u32,
    /// Frames kept before the smoothing length is known.
    pub history_len: usize,
    pub queue_capacity: usize,
    pub request_timeout_ms: u64,
    pub status_poll_ms: u64,
    pub shutdown_timeout_ms: u64,
    pub head_correction: HeadCorrectionSettings,
    pub recording: RecordingSettings,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:1111".into(),
            upstream: "127.0.0.1:9995".into(),
            smoothing: Smoothing::default(),
            stream_frequency: 100,
            history_len: 5,
            queue_capacity: 256,
            request_timeout_ms: 2000,
            status_poll_ms: 100,
            shutdown_timeout_ms: 50,
            head_correction: HeadCorrectionSettings::default(),
            recording: RecordingSettings::default(),
        }
    }
}

impl RelaySettings {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr("relay.listen", &self.listen)
    }

    pub fn upstream_addr(&self) -> Result<SocketAddr> {
        parse_addr("relay.upstream", &self.upstream)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn status_poll(&self) -> Duration {
        Duration::from_millis(self.status_poll_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        self.upstream_addr()?;
        match self.smoothing {
            Smoothing::Milliseconds(0) | Smoothing::Frames(0) => {
                return Err(RelayError::config("relay.smoothing value must be positive"));
            }
            _ => {}
        }
        if self.stream_frequency == 0 {
            return Err(RelayError::config("relay.stream_frequency must be positive"));
        }
        if self.history_len == 0 || self.queue_capacity == 0 {
            return Err(RelayError::config(
                "relay.history_len and relay.queue_capacity must be positive",
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(RelayError::config("relay.request_timeout_ms must be positive"));
        }
        if self.head_correction.enabled && self.head_correction.roles.is_none() {
            return Err(RelayError::config("relay.head_correction needs a roles file"));
        }
        Ok(())
    }
}

/// Where an initial head calibration comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum CalibrationSource {
    /// Pass-through until a `CALIBRATE` command succeeds.
    #[default]
    None,
    /// A calibration previously saved as YAML.
    Saved { path: PathBuf },
    /// A recorded `.tsv` calibration window.
    Tsv { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadCorrectionSettings {
    pub enabled: bool,
    /// Sensor roles JSON.
    pub roles: Option<PathBuf>,
    pub calibration: CalibrationSource,
    /// Warm-up dropped from the start of a calibration window.
    pub exclude_ms: u64,
    /// Length of a live `CALIBRATE` window when none is given.
    pub live_seconds: u64,
    /// Where a successful live calibration is written, if anywhere.
    pub save_to: Option<PathBuf>,
}

impl Default for HeadCorrectionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            roles: None,
            calibration: CalibrationSource::None,
            exclude_ms: 500,
            live_seconds: 5,
            save_to: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub enabled: bool,
    pub directory: PathBuf,
    pub prefix: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self { enabled: false, directory: PathBuf::from("output"), prefix: "EMA_".into() }
    }
}

/// Listen address, looping and parser options for the file emulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorSettings {
    pub listen: String,
    pub looping: bool,
    pub parser: ParserOptions,
    pub shutdown_timeout_ms: u64,
}

impl Default for EmulatorSettings {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9995".into(),
            looping: true,
            parser: ParserOptions::default(),
            shutdown_timeout_ms: 50,
        }
    }
}

impl EmulatorSettings {
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_addr("emulator.listen", &self.listen)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        self.listen_addr()?;
        let rate = self.parser.pos_default_rate;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(RelayError::config("emulator.parser.pos_default_rate must be positive"));
        }
        Ok(())
    }
}

fn parse_addr(field: &str, value: &str) -> Result<SocketAddr> {
    value
        .parse()
        .map_err(|e| RelayError::config(format!("{field}: '{value}' is not a socket address ({e})")))
}
