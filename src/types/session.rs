//! Per-stream session state.

use std::fmt;
use std::time::Duration;

/// Streaming status of a session.
///
/// `Ready → Streaming → Ready`, with `Eof` reachable from either and left only through
/// [`SessionState::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    #[default]
    Ready,
    Streaming,
    Eof,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamStatus::Ready => "READY",
            StreamStatus::Streaming => "STREAMING",
            StreamStatus::Eof => "EOF",
        };
        f.write_str(name)
    }
}

/// State of one stream, mutated only by command handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub status: StreamStatus,
    /// Restart from the first frame at end of data instead of going to `Eof`.
    pub looping: bool,
    /// Frames read from the current pass over the source.
    pub frame_index: usize,
    /// Pacing overrun carried into the next streamed frame.
    pub last_delay: Duration,
    /// Bumped each time streaming starts, so a stale pacing loop can tell it was replaced.
    pub stream_generation: u64,
}

impl SessionState {
    pub fn new(looping: bool) -> Self {
        Self {
            status: StreamStatus::Ready,
            looping,
            frame_index: 0,
            last_delay: Duration::ZERO,
            stream_generation: 0,
        }
    }

    /// Start streaming. Returns the generation the caller's loop must keep checking, or
    /// `None` when the session is at end of data.
    pub fn begin_streaming(&mut self) -> Option<u64> {
        if self.status == StreamStatus::Eof {
            return None;
        }
        self.status = StreamStatus::Streaming;
        self.last_delay = Duration::ZERO;
        self.stream_generation += 1;
        Some(self.stream_generation)
    }

    /// Stop streaming; an `Eof` session stays `Eof`.
    pub fn stop_streaming(&mut self) {
        if self.status == StreamStatus::Streaming {
            self.status = StreamStatus::Ready;
        }
    }

    pub fn is_streaming(&self, generation: u64) -> bool {
        self.status == StreamStatus::Streaming && self.stream_generation == generation
    }

    pub fn mark_eof(&mut self) {
        self.status = StreamStatus::Eof;
    }

    /// Back to `Ready` at the first frame, as after loading a new source.
    pub fn reset(&mut self) {
        self.status = StreamStatus::Ready;
        self.frame_index = 0;
        self.last_delay = Duration::ZERO;
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new(false)
    }
}
