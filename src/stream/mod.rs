//! Stream adapters for frame streams.

mod smoothed;

pub use smoothed::{Smoothed, SmoothedExt};
