//! Bounded recent-frame history used for smoothing.

use std::collections::VecDeque;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::DataFrame;

/// Ring buffer of the N most recent frames.
#[derive(Debug, Clone)]
pub struct SmoothingWindow {
    frames: VecDeque<Arc<DataFrame>>,
    capacity: usize,
}

impl SmoothingWindow {
    /// Window holding at most `capacity` frames (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { frames: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, frame: Arc<DataFrame>) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Change the capacity, dropping the oldest frames if it shrinks.
    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames oldest first.
    pub fn frames(&self) -> Vec<Arc<DataFrame>> {
        self.frames.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Arc<DataFrame>> {
        self.frames.back()
    }

    /// Average of the current window, `None` when empty.
    pub fn average(&self) -> Option<DataFrame> {
        DataFrame::average(self.frames.iter().map(Arc::as_ref))
    }
}

/// How many frames the smoothing window spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "lowercase")]
pub enum Smoothing {
    /// Span a duration, converted to frames with the upstream sampling frequency.
    Milliseconds(u32),
    /// Span a fixed number of frames.
    Frames(usize),
}

impl Default for Smoothing {
    fn default() -> Self {
        Smoothing::Milliseconds(20)
    }
}

impl Smoothing {
    /// Window length in frames: `floor(frequency * ms / 1000)` for a duration, the count for
    /// frames. Falls back to 1 without a usable frequency, and never returns 0.
    pub fn window_length(&self, frequency_hz: Option<f64>) -> usize {
        let frames = match *self {
            Smoothing::Frames(n) => n,
            Smoothing::Milliseconds(ms) => match frequency_hz {
                Some(hz) if hz.is_finite() && hz > 0.0 => {
                    (hz * f64::from(ms) / 1000.0).floor() as usize
                }
                _ => 1,
            },
        };
        frames.max(1)
    }
}
