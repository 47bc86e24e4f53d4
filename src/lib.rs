//! Real-time articulography (EMA) relay.
//!
//! `emarelay` moves sensor data from an upstream source, a live measurement device or a
//! recorded file replayed as if live, to downstream consumers over a length-prefixed binary
//! protocol, smoothing it and optionally correcting it for head movement on the way.
//!
//! # Layers
//!
//! - [`protocol`]: packet framing, data-frame bodies and the base command vocabulary.
//! - [`parsers`]: `.tsv`, `.bvh`, `.pos` and `.json` motion files behind one trait.
//! - [`emulator`]: a file-backed stand-in for a live device.
//! - [`reader`]: the upstream connection, split into typed queues with a frame history.
//! - [`relay`]: the consumer-facing server and its command table.
//! - [`calibration`]: coordinate frames, robust averaging and head/biteplate correction.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use emarelay::config::Settings;
//! use emarelay::emulator::EmulatorHandle;
//! use emarelay::relay::RelayHandle;
//!
//! #[tokio::main]
//! async fn main() -> emarelay::Result<()> {
//!     let settings = Settings::default();
//!     let emulator = EmulatorHandle::start("session.tsv", &settings.emulator).await?;
//!     let relay = RelayHandle::start(&settings.relay, &settings.emulator.parser).await?;
//!
//!     relay.closed().await;
//!     relay.shutdown().await;
//!     emulator.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod calibration;
pub mod config;
pub mod emulator;
mod error;
pub mod parsers;
pub mod protocol;
pub mod reader;
pub mod relay;
pub mod stream;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

pub use error::{RelayError, Result};
pub use types::{Coil, DataFrame, StreamStatus};
