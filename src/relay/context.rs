//! State one relay shares across its consumer connections.

use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::correction::HeadCorrection;
use crate::config::{RecordingSettings, RelaySettings};
use crate::parsers::frequency_from_xml;
use crate::protocol::Message;
use crate::reader::{FrameRecorder, StreamReader};
use crate::types::{DataFrame, SessionState, Smoothing, StreamStatus};

/// No-data reply text used by the relay.
pub const NO_FRAME: &str = "No data, EOF or no measurement";

/// Upstream reader, session, smoothing and correction behind one relay.
pub struct RelayContext {
    pub(crate) reader: StreamReader,
    pub(crate) session: Mutex<SessionState>,
    pub(crate) correction: Mutex<HeadCorrection>,
    smoothing: Smoothing,
    stream_frequency: u32,
    status_poll: Duration,
    live_calibration: Duration,
    recording: RecordingSettings,
    shutdown: CancellationToken,
}

impl RelayContext {
    pub fn new(
        reader: StreamReader,
        settings: &RelaySettings,
        correction: HeadCorrection,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            reader,
            session: Mutex::new(SessionState::new(false)),
            correction: Mutex::new(correction),
            smoothing: settings.smoothing,
            stream_frequency: settings.stream_frequency,
            status_poll: settings.status_poll(),
            live_calibration: Duration::from_secs(settings.head_correction.live_seconds),
            recording: settings.recording.clone(),
            shutdown,
        }
    }

    pub fn reader(&self) -> &StreamReader {
        &self.reader
    }

    pub fn status(&self) -> StreamStatus {
        self.session.lock().status
    }

    pub fn stream_frequency(&self) -> f64 {
        f64::from(self.stream_frequency)
    }

    pub fn status_poll(&self) -> Duration {
        self.status_poll
    }

    pub fn live_calibration(&self) -> Duration {
        self.live_calibration
    }

    /// Ask the relay to shut down once the current reply is out.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Record an upstream answer to a frame request in the session.
    pub(crate) fn note_upstream(&self, frame: Option<&DataFrame>) {
        let mut session = self.session.lock();
        match (frame, session.status) {
            (None, _) => session.mark_eof(),
            (Some(_), StreamStatus::Eof) => session.reset(),
            (Some(_), _) => {}
        }
    }

    /// Move a streaming session to `Eof` once the upstream has answered with no data.
    pub(crate) fn note_stream_end(&self) {
        if !self.reader.upstream_at_end() {
            return;
        }
        let mut session = self.session.lock();
        if session.status == StreamStatus::Streaming {
            session.mark_eof();
            info!("upstream ran out of data while streaming");
        }
    }

    /// Turn an optional frame into a reply, correcting it when correction is on.
    pub(crate) fn frame_reply(&self, frame: Option<DataFrame>) -> Message {
        match frame {
            Some(mut frame) => {
                self.correction.lock().apply(&mut frame);
                Message::Frame(frame)
            }
            None => Message::NoData(NO_FRAME.into()),
        }
    }

    /// Window length for the configured smoothing, using the upstream's frequency.
    pub(crate) async fn smoothing_window(&self) -> usize {
        let frequency = match self.smoothing {
            Smoothing::Frames(_) => None,
            Smoothing::Milliseconds(_) => match self.reader.parameters().await {
                Ok(xml) => frequency_from_xml(&xml),
                Err(e) => {
                    warn!(error = %e, "no upstream parameters, smoothing over one frame");
                    None
                }
            },
        };
        let window = self.smoothing.window_length(frequency);
        debug!(window, ?frequency, "smoothing window");
        window
    }

    /// Start recording streamed frames if recording is configured.
    pub(crate) fn start_recording(&self) {
        if !self.recording.enabled {
            return;
        }
        let path = FrameRecorder::timestamped_path(&self.recording.directory, &self.recording.prefix);
        let coils = self.reader.latest().map_or(0, |f| f.coil_count());
        let names = self
            .correction
            .lock()
            .roles()
            .map(|roles| roles.coil_names(coils))
            .unwrap_or_default();
        if let Err(e) = self.reader.start_recording(path, names) {
            warn!(error = %e, "could not start recording");
        }
    }
}
