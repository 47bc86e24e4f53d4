//! Stream reader: one connection to an upstream server, split into typed queues.
//!
//! A receive task reads packets off the socket and sorts them by type. Status text (errors
//! and command replies), parameter XML and blobs go to broadcast queues; data frames and
//! no-data replies go through a bounded queue to an updater task, which keeps the latest
//! frame, the smoothing history and an optional recording current. Callers never touch the
//! socket's read side, so a slow consumer cannot stall decoding.
//!
//! ```rust,no_run
//! use emarelay::reader::{ReaderOptions, StreamReader};
//!
//! # async fn run() -> emarelay::Result<()> {
//! let reader = StreamReader::connect("127.0.0.1:9995".parse().unwrap(), ReaderOptions::default()).await?;
//! println!("{}", reader.parameters().await?);
//! if let Some(frame) = reader.request_frame().await? {
//!     println!("{} coils", frame.coil_count());
//! }
//! reader.close().await;
//! # Ok(())
//! # }
//! ```

mod recorder;

pub use recorder::FrameRecorder;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::config::RelaySettings;
use crate::error::{RelayError, Result};
use crate::protocol::{BaseCommand, Inbound, Message, Packet, PacketCodec, PacketType, StreamRequest};
use crate::types::{DataFrame, SmoothingWindow};

type PacketSink = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, PacketCodec>;

/// Tuning for a [`StreamReader`].
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Capacity of each typed queue.
    pub queue_capacity: usize,
    /// Frames kept for smoothing.
    pub history_len: usize,
    /// How long request/reply calls wait.
    pub request_timeout: Duration,
    /// Quiet period after which the receive loop logs that nothing arrived.
    pub idle_interval: Duration,
    /// Bound on waiting for the reader tasks in [`StreamReader::close`].
    pub shutdown_timeout: Duration,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            history_len: 5,
            request_timeout: Duration::from_secs(2),
            idle_interval: Duration::from_millis(100),
            shutdown_timeout: Duration::from_millis(50),
        }
    }
}

impl From<&RelaySettings> for ReaderOptions {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            queue_capacity: settings.queue_capacity,
            history_len: settings.history_len,
            request_timeout: settings.request_timeout(),
            idle_interval: settings.status_poll(),
            shutdown_timeout: settings.shutdown_timeout(),
        }
    }
}

/// Latest entry of the frame queue.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameUpdate {
    Frame(Arc<DataFrame>),
    NoData(String),
}

/// State shared between the updater task and callers.
struct Shared {
    latest: Mutex<Option<Arc<DataFrame>>>,
    history: Mutex<SmoothingWindow>,
    recorder: Mutex<Option<FrameRecorder>>,
    audio_sample: Arc<AtomicU64>,
    frames_received: AtomicU64,
    malformed: AtomicU64,
    /// Set by a no-data reply, cleared by the next frame.
    end_of_data: AtomicBool,
}

impl Shared {
    fn accept(&self, frame: &Arc<DataFrame>) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.history.lock().push(Arc::clone(frame));
        *self.latest.lock() = Some(Arc::clone(frame));

        let mut recorder = self.recorder.lock();
        if let Some(active) = recorder.as_mut() {
            let sample = self.audio_sample.load(Ordering::Relaxed);
            if let Err(e) = active.record(frame, sample) {
                warn!(error = %e, "recording failed, stopping it");
                *recorder = None;
            }
        }
    }
}

/// Senders the receive task sorts packets into.
struct Queues {
    status: broadcast::Sender<String>,
    parameters: broadcast::Sender<String>,
    blobs: broadcast::Sender<Packet>,
    frames: mpsc::Sender<Result<Message>>,
}

/// Reader side of one upstream connection.
pub struct StreamReader {
    sink: tokio::sync::Mutex<PacketSink>,
    status: tokio::sync::Mutex<broadcast::Receiver<String>>,
    parameters: tokio::sync::Mutex<broadcast::Receiver<String>>,
    blobs: tokio::sync::Mutex<broadcast::Receiver<Packet>>,
    updates: watch::Receiver<Option<FrameUpdate>>,
    shared: Arc<Shared>,
    options: ReaderOptions,
    upstream_closed: CancellationToken,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl StreamReader {
    /// Connect to `addr` and start reading.
    pub async fn connect(addr: SocketAddr, options: ReaderOptions) -> Result<Self> {
        let stream = tokio::time::timeout(options.request_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RelayError::Timeout { duration: options.request_timeout })??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle");
        }
        info!(%addr, "connected to upstream");
        Ok(Self::spawn(stream, options))
    }

    /// Start reading from an already connected byte stream.
    pub fn spawn<T>(io: T, options: ReaderOptions) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let capacity = options.queue_capacity.max(1);

        let (status_tx, status_rx) = broadcast::channel(capacity);
        let (parameters_tx, parameters_rx) = broadcast::channel(capacity);
        let (blobs_tx, blobs_rx) = broadcast::channel(capacity);
        let (frames_tx, frames_rx) = mpsc::channel(capacity);
        let (updates_tx, updates_rx) = watch::channel(None);

        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            history: Mutex::new(SmoothingWindow::new(options.history_len)),
            recorder: Mutex::new(None),
            audio_sample: Arc::new(AtomicU64::new(0)),
            frames_received: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            end_of_data: AtomicBool::new(false),
        });

        let cancel = CancellationToken::new();
        let upstream_closed = CancellationToken::new();
        let tracker = TaskTracker::new();
        let queues = Queues {
            status: status_tx,
            parameters: parameters_tx,
            blobs: blobs_tx,
            frames: frames_tx,
        };
        tracker.spawn(receive_loop(
            FramedRead::new(read_half, PacketCodec::new()),
            queues,
            Arc::clone(&shared),
            options.idle_interval,
            cancel.clone(),
            upstream_closed.clone(),
        ));
        tracker.spawn(update_loop(frames_rx, Arc::clone(&shared), updates_tx, cancel.clone()));

        let write_half: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        Self {
            sink: tokio::sync::Mutex::new(FramedWrite::new(write_half, PacketCodec::new())),
            status: tokio::sync::Mutex::new(status_rx),
            parameters: tokio::sync::Mutex::new(parameters_rx),
            blobs: tokio::sync::Mutex::new(blobs_rx),
            updates: updates_rx,
            shared,
            options,
            upstream_closed,
            cancel,
            tracker,
        }
    }

    /// Send a command packet.
    pub async fn send(&self, command: &BaseCommand) -> Result<()> {
        self.send_text(&command.to_string()).await
    }

    /// Send raw command text, for vocabulary beyond [`BaseCommand`].
    pub async fn send_text(&self, text: &str) -> Result<()> {
        if self.upstream_closed.is_cancelled() {
            return Err(RelayError::ConnectionClosed);
        }
        trace!(command = text, "sending command");
        self.sink.lock().await.send(Packet::command(text)).await
    }

    /// Ask for one frame and wait for it. `None` means the upstream had no data.
    pub async fn request_frame(&self) -> Result<Option<Arc<DataFrame>>> {
        let mut updates = self.updates.clone();
        updates.mark_unchanged();
        self.send(&BaseCommand::SendCurrentFrame).await?;
        self.within_timeout(next_update(&mut updates)).await
    }

    /// Wait for the next frame-queue entry without asking for one.
    pub async fn next_update(&self) -> Result<FrameUpdate> {
        let mut updates = self.updates.clone();
        updates.mark_unchanged();
        let update = self.within_timeout(next_update(&mut updates)).await?;
        Ok(update.map_or_else(|| FrameUpdate::NoData(String::new()), FrameUpdate::Frame))
    }

    /// Fetch the parameter XML, discarding any stale copies first.
    pub async fn parameters(&self) -> Result<String> {
        let mut parameters = self.parameters.lock().await;
        while let Ok(stale) = parameters.try_recv() {
            trace!(bytes = stale.len(), "discarding stale parameters");
        }
        self.send(&BaseCommand::SendParameters(Vec::new())).await?;
        self.within_timeout(recv_latest(&mut parameters)).await
    }

    /// Next status line (error or command reply), waiting at most `wait`.
    pub async fn next_status(&self, wait: Duration) -> Option<String> {
        let mut status = self.status.lock().await;
        tokio::time::timeout(wait, recv_latest(&mut status)).await.ok()?.ok()
    }

    /// Drop status lines nobody asked for yet. Returns how many were dropped.
    pub async fn drain_status(&self) -> usize {
        let mut status = self.status.lock().await;
        let mut dropped = 0;
        loop {
            match status.try_recv() {
                Ok(_) => dropped += 1,
                Err(broadcast::error::TryRecvError::Lagged(missed)) => dropped += missed as usize,
                Err(_) => break,
            }
        }
        dropped
    }

    /// Next blob or unknown-type packet, waiting at most `wait`.
    pub async fn next_blob(&self, wait: Duration) -> Option<Packet> {
        let mut blobs = self.blobs.lock().await;
        tokio::time::timeout(wait, recv_latest(&mut blobs)).await.ok()?.ok()
    }

    /// Clear the history and ask the upstream to stream.
    pub async fn start_streaming(&self, frequency: Option<f64>) -> Result<()> {
        self.clear_history();
        self.shared.end_of_data.store(false, Ordering::Relaxed);
        self.send(&BaseCommand::StreamFrames(StreamRequest::Start { frequency })).await
    }

    /// Ask the upstream to stop and return what the history holds.
    pub async fn stop_streaming(&self) -> Result<Vec<Arc<DataFrame>>> {
        self.send(&BaseCommand::StreamFrames(StreamRequest::Stop)).await?;
        Ok(self.history())
    }

    /// Most recent frame received.
    pub fn latest(&self) -> Option<Arc<DataFrame>> {
        self.shared.latest.lock().clone()
    }

    /// History, oldest first.
    pub fn history(&self) -> Vec<Arc<DataFrame>> {
        self.shared.history.lock().frames()
    }

    /// Element-wise average of the history.
    pub fn smoothed(&self) -> Option<DataFrame> {
        self.shared.history.lock().average()
    }

    pub fn clear_history(&self) {
        self.shared.history.lock().clear();
    }

    pub fn set_history_len(&self, len: usize) {
        self.shared.history.lock().resize(len);
        debug!(len, "history length changed");
    }

    pub fn history_len(&self) -> usize {
        self.shared.history.lock().capacity()
    }

    /// Frames as they arrive. Late subscribers start at the next frame.
    pub fn frames(&self) -> BoxStream<'static, Arc<DataFrame>> {
        WatchStream::from_changes(self.updates.clone())
            .filter_map(|update| async move {
                match update {
                    Some(FrameUpdate::Frame(frame)) => Some(frame),
                    _ => None,
                }
            })
            .boxed()
    }

    /// Record every received frame to `path` until [`stop_recording`](Self::stop_recording).
    pub fn start_recording(&self, path: impl Into<PathBuf>, names: Vec<String>) -> Result<PathBuf> {
        let recorder = FrameRecorder::create(path, names)?;
        let path = recorder.path().to_path_buf();
        if let Some(previous) = self.shared.recorder.lock().replace(recorder) {
            finish_recording(previous);
        }
        Ok(path)
    }

    /// Close the recording, if any, returning its path.
    pub fn stop_recording(&self) -> Option<PathBuf> {
        let recorder = self.shared.recorder.lock().take()?;
        finish_recording(recorder)
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recorder.lock().is_some()
    }

    /// Counter written into recordings as the nearest audio sample. An audio capture
    /// callback stores its running sample index here.
    pub fn audio_sample_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.shared.audio_sample)
    }

    pub fn request_timeout(&self) -> Duration {
        self.options.request_timeout
    }

    pub fn frames_received(&self) -> u64 {
        self.shared.frames_received.load(Ordering::Relaxed)
    }

    /// Whether the last frame-queue entry was a no-data reply.
    pub fn upstream_at_end(&self) -> bool {
        self.shared.end_of_data.load(Ordering::Relaxed)
    }

    /// Packets or frame bodies that could not be decoded.
    pub fn malformed_count(&self) -> u64 {
        self.shared.malformed.load(Ordering::Relaxed)
    }

    /// False once the upstream has closed the connection.
    pub fn is_connected(&self) -> bool {
        !self.upstream_closed.is_cancelled()
    }

    /// Resolves when the upstream connection ends.
    pub async fn disconnected(&self) {
        self.upstream_closed.cancelled().await
    }

    /// Say goodbye, stop the reader tasks and wait a bounded time for them.
    pub async fn close(&self) {
        if self.is_connected() {
            if let Err(e) = self.send(&BaseCommand::Bye).await {
                debug!(error = %e, "goodbye not delivered");
            }
        }
        if let Err(e) = self.sink.lock().await.close().await {
            trace!(error = %e, "closing upstream socket");
        }
        self.stop_recording();
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.options.shutdown_timeout, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "reader tasks still running after close");
        }
        info!(frames = self.frames_received(), "stream reader closed");
    }

    async fn within_timeout<T>(&self, wait: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.options.request_timeout, wait)
            .await
            .map_err(|_| RelayError::Timeout { duration: self.options.request_timeout })?
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn finish_recording(recorder: FrameRecorder) -> Option<PathBuf> {
    match recorder.finish() {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(error = %e, "closing recording failed");
            None
        }
    }
}

/// Wait for the next frame or no-data entry on a watch receiver.
async fn next_update(
    updates: &mut watch::Receiver<Option<FrameUpdate>>,
) -> Result<Option<Arc<DataFrame>>> {
    loop {
        updates.changed().await.map_err(|_| RelayError::ConnectionClosed)?;
        let update = updates.borrow_and_update().clone();
        match update {
            Some(FrameUpdate::Frame(frame)) => return Ok(Some(frame)),
            Some(FrameUpdate::NoData(text)) => {
                debug!(reply = %text, "upstream has no data");
                return Ok(None);
            }
            None => continue,
        }
    }
}

/// Receive from a broadcast queue, skipping over anything lost to lag.
async fn recv_latest<T: Clone>(queue: &mut broadcast::Receiver<T>) -> Result<T> {
    loop {
        match queue.recv().await {
            Ok(value) => return Ok(value),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                debug!(missed, "queue lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return Err(RelayError::ConnectionClosed),
        }
    }
}

async fn receive_loop<R>(
    mut packets: FramedRead<ReadHalf<R>, PacketCodec>,
    queues: Queues,
    shared: Arc<Shared>,
    idle: Duration,
    cancel: CancellationToken,
    upstream_closed: CancellationToken,
) where
    R: AsyncRead + Send + 'static,
{
    let mut received = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = tokio::time::timeout(idle, packets.next()) => next,
        };
        let packet = match next {
            Err(_) => {
                trace!("no packet within {:?}", idle);
                continue;
            }
            Ok(None) => {
                info!("upstream closed the connection");
                break;
            }
            Ok(Some(Err(e))) => {
                warn!(error = %e, "upstream connection failed");
                break;
            }
            Ok(Some(Ok(Inbound::Malformed(e)))) => {
                shared.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "skipping malformed packet");
                continue;
            }
            Ok(Some(Ok(Inbound::Packet(packet)))) => packet,
        };
        received += 1;

        match packet.kind {
            PacketType::Error | PacketType::Command => {
                let _ = queues.status.send(packet.body_text());
            }
            PacketType::Parameters => {
                let _ = queues.parameters.send(packet.body_text());
            }
            PacketType::DataFrame | PacketType::NoData => {
                let message = Message::from_packet(&packet);
                if queues.frames.send(message).await.is_err() {
                    break;
                }
            }
            _ => {
                let _ = queues.blobs.send(packet);
            }
        }
    }
    upstream_closed.cancel();
    debug!(received, "receive loop ended");
}

async fn update_loop(
    mut frames: mpsc::Receiver<Result<Message>>,
    shared: Arc<Shared>,
    updates: watch::Sender<Option<FrameUpdate>>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = frames.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        match item {
            Ok(Message::Frame(frame)) => {
                let frame = Arc::new(frame);
                shared.accept(&frame);
                shared.end_of_data.store(false, Ordering::Relaxed);
                updates.send_replace(Some(FrameUpdate::Frame(frame)));
            }
            Ok(Message::NoData(text)) => {
                shared.end_of_data.store(true, Ordering::Relaxed);
                updates.send_replace(Some(FrameUpdate::NoData(text)));
            }
            Ok(other) => trace!(kind = ?other.kind(), "ignoring non-frame message"),
            Err(e) => {
                shared.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropping undecodable data frame");
            }
        }
    }
    debug!("frame updater ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;
    use crate::test_utils::calibration_frame;
    use bytes::Bytes;
    use nalgebra::Vector3;
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    type Upstream = Framed<DuplexStream, PacketCodec>;

    fn pair() -> (StreamReader, Upstream) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let options = ReaderOptions {
            request_timeout: Duration::from_millis(500),
            history_len: 3,
            ..ReaderOptions::default()
        };
        (StreamReader::spawn(ours, options), Framed::new(theirs, PacketCodec::new()))
    }

    async fn expect_command(upstream: &mut Upstream) -> anyhow::Result<String> {
        let item = tokio::time::timeout(Duration::from_secs(1), upstream.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("reader hung up"))??;
        match item {
            Inbound::Packet(p) if p.kind == PacketType::Command => Ok(p.body_text()),
            other => anyhow::bail!("expected a command, got {other:?}"),
        }
    }

    fn frame_packet(ts: u64) -> Packet {
        let body = encode_frame(&calibration_frame(ts, Vector3::zeros())).expect("calibration frame encodes");
        Packet::new(PacketType::DataFrame, body)
    }

    #[tokio::test]
    async fn request_frame_waits_for_the_reply() -> anyhow::Result<()> {
        let (reader, mut upstream) = pair();
        let answer = async {
            assert_eq!(expect_command(&mut upstream).await?, "sendcurrentframe");
            upstream.send(Packet::command("OK-sendcurrentframe")).await?;
            upstream.send(frame_packet(40_000)).await?;
            anyhow::Ok(())
        };
        let (frame, answered) = tokio::join!(reader.request_frame(), answer);
        answered?;
        assert_eq!(frame?.and_then(|f| f.timestamp_micros()), Some(40_000));
        assert_eq!(reader.next_status(Duration::from_millis(200)).await.as_deref(), Some("OK-sendcurrentframe"));
        assert_eq!(reader.frames_received(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn no_data_answers_a_request_with_none() -> anyhow::Result<()> {
        let (reader, mut upstream) = pair();
        let answer = async {
            expect_command(&mut upstream).await?;
            upstream.send(Packet::no_data("No data, EOF or no measurement")).await?;
            anyhow::Ok(())
        };
        let (frame, answered) = tokio::join!(reader.request_frame(), answer);
        answered?;
        assert!(frame?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn parameters_skip_stale_copies() -> anyhow::Result<()> {
        let (reader, mut upstream) = pair();
        upstream.send(Packet::text(PacketType::Parameters, "<old/>")).await?;
        // let the stale copy land in the queue
        tokio::time::sleep(Duration::from_millis(50)).await;

        let answer = async {
            assert_eq!(expect_command(&mut upstream).await?, "sendparameters all");
            upstream.send(Packet::text(PacketType::Parameters, "<new/>")).await?;
            anyhow::Ok(())
        };
        let (xml, answered) = tokio::join!(reader.parameters(), answer);
        answered?;
        assert_eq!(xml?, "<new/>");
        Ok(())
    }

    #[tokio::test]
    async fn unanswered_requests_time_out() {
        let (reader, _upstream) = pair();
        assert!(matches!(reader.request_frame().await, Err(RelayError::Timeout { .. })));
    }

    #[tokio::test]
    async fn streamed_frames_fill_history_and_stream() -> anyhow::Result<()> {
        let (reader, mut upstream) = pair();
        let mut frames = reader.frames();

        reader.start_streaming(Some(100.0)).await?;
        assert_eq!(expect_command(&mut upstream).await?, "streamframes frequency:100");

        for i in 0..5u64 {
            upstream.send(frame_packet(i * 10_000)).await?;
            let frame = tokio::time::timeout(Duration::from_secs(1), frames.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("frame stream ended"))?;
            assert_eq!(frame.timestamp_micros(), Some(i * 10_000));
        }

        let history = reader.stop_streaming().await?;
        assert_eq!(expect_command(&mut upstream).await?, "streamframes stop");
        let stamps: Vec<_> = history.iter().filter_map(|f| f.timestamp_micros()).collect();
        assert_eq!(stamps, [20_000, 30_000, 40_000]);
        let smoothed = reader.smoothed().ok_or_else(|| anyhow::anyhow!("empty history"))?;
        assert_eq!(smoothed.timestamp_micros(), Some(40_000));
        assert_eq!(smoothed.coil_count(), 8);
        assert_eq!(reader.latest().and_then(|f| f.timestamp_micros()), Some(40_000));
        Ok(())
    }

    #[tokio::test]
    async fn no_data_while_streaming_marks_the_end() -> anyhow::Result<()> {
        let (reader, mut upstream) = pair();
        let mut frames = reader.frames();
        reader.start_streaming(None).await?;
        expect_command(&mut upstream).await?;

        upstream.send(frame_packet(0)).await?;
        tokio::time::timeout(Duration::from_secs(1), frames.next()).await?;
        assert!(!reader.upstream_at_end());

        upstream.send(Packet::no_data("No data, EOF or no measurement")).await?;
        tokio::time::timeout(Duration::from_secs(1), async {
            while !reader.upstream_at_end() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        // the window still holds the last frames
        assert!(reader.smoothed().is_some());

        reader.start_streaming(None).await?;
        assert!(!reader.upstream_at_end());
        Ok(())
    }

    #[tokio::test]
    async fn undecodable_frames_are_counted_and_skipped() -> anyhow::Result<()> {
        let (reader, mut upstream) = pair();
        let mut frames = reader.frames();
        upstream.send(Packet::new(PacketType::DataFrame, Bytes::from_static(&[0, 0, 0, 9]))).await?;
        upstream.send(frame_packet(0)).await?;
        upstream.send(Packet::new(PacketType::Blob, Bytes::from_static(b"blob"))).await?;
        // the good frame is queued behind the bad one
        tokio::time::timeout(Duration::from_secs(1), frames.next()).await?;

        let blob = reader.next_blob(Duration::from_secs(1)).await;
        assert_eq!(blob.map(|p| p.body), Some(Bytes::from_static(b"blob")));
        assert_eq!(reader.malformed_count(), 1);
        assert_eq!(reader.frames_received(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn recording_follows_received_frames() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (reader, mut upstream) = pair();
        let mut frames = reader.frames();
        reader.start_recording(dir.path().join("rec.tsv"), vec!["REF_L".into()])?;
        reader.audio_sample_counter().store(882, Ordering::Relaxed);

        for i in 0..2u64 {
            upstream.send(frame_packet(1_000_000 + i * 10_000)).await?;
            tokio::time::timeout(Duration::from_secs(1), frames.next()).await?;
        }
        let path = reader.stop_recording().ok_or_else(|| anyhow::anyhow!("no recording"))?;
        let text = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Time\tFrame\tAudioSample\tREF_L ID\t"));
        assert!(lines[2].starts_with("10000\t101\t882\tREF_L\tOK\t"), "{}", lines[2]);
        assert!(!reader.is_recording());
        Ok(())
    }

    #[tokio::test]
    async fn upstream_hangup_is_noticed() -> anyhow::Result<()> {
        let (reader, upstream) = pair();
        drop(upstream);
        tokio::time::timeout(Duration::from_secs(1), reader.disconnected()).await?;
        assert!(!reader.is_connected());
        assert!(matches!(reader.send(&BaseCommand::Bye).await, Err(RelayError::ConnectionClosed)));
        reader.close().await;
        Ok(())
    }
}
