//! File emulation server: a recorded motion file served as if it were a live device.
//!
//! The emulator speaks the base command vocabulary ([`BaseCommand`](crate::protocol::BaseCommand))
//! over framed TCP. Every accepted command is acknowledged with `OK-<command>` and then runs
//! on its own task, so a long `streamframes` never blocks the accept loop or a later
//! `streamframes stop` on the same connection.
//!
//! All connections share one source file and one [`SessionState`](crate::types::SessionState),
//! the way every client of a physical device sees the same measurement.
//!
//! ```rust,no_run
//! use emarelay::config::EmulatorSettings;
//! use emarelay::emulator::EmulatorHandle;
//!
//! # async fn run() -> emarelay::Result<()> {
//! let emulator = EmulatorHandle::start("session.tsv", &EmulatorSettings::default()).await?;
//! println!("serving on {}", emulator.local_addr());
//! emulator.change_loop(Some(false));
//! emulator.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod connection;
mod source;

pub use source::NO_DATA;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::EmulatorSettings;
use crate::error::Result;
use crate::parsers::{ParserOptions, open_motion_file};
use crate::types::StreamStatus;
use source::FileSource;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Control surface of a running emulator.
pub struct EmulatorHandle {
    local_addr: SocketAddr,
    source: Arc<Mutex<FileSource>>,
    options: ParserOptions,
    cancel: CancellationToken,
    tracker: TaskTracker,
    shutdown_timeout: Duration,
}

impl EmulatorHandle {
    /// Open `datafile`, bind the listen address and start accepting clients.
    pub async fn start(datafile: impl AsRef<Path>, settings: &EmulatorSettings) -> Result<Self> {
        let datafile = datafile.as_ref();
        settings.validate()?;
        let parser = open_motion_file(datafile, &settings.parser)?;
        let listener = TcpListener::bind(settings.listen_addr()?).await?;
        let local_addr = listener.local_addr()?;

        let source = Arc::new(Mutex::new(FileSource::new(parser, settings.looping)));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(accept_loop(listener, Arc::clone(&source), cancel.clone(), tracker.clone()));

        info!(%local_addr, file = %datafile.display(), looping = settings.looping, "emulator listening");
        Ok(Self {
            local_addr,
            source,
            options: settings.parser.clone(),
            cancel,
            tracker,
            shutdown_timeout: settings.shutdown_timeout(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve a different file. Any stream stops and an `Eof` session becomes `Ready`.
    pub fn change_datafile(&self, datafile: impl AsRef<Path>) -> Result<()> {
        let datafile = datafile.as_ref();
        let parser = open_motion_file(datafile, &self.options)?;
        self.source.lock().replace(parser);
        info!(file = %datafile.display(), "emulator data file changed");
        Ok(())
    }

    /// Set looping, or toggle it with `None`. Returns the new setting.
    pub fn change_loop(&self, looping: Option<bool>) -> bool {
        let mut source = self.source.lock();
        let looping = looping.unwrap_or(!source.session.looping);
        source.session.looping = looping;
        debug!(looping, "emulator looping changed");
        looping
    }

    pub fn status(&self) -> StreamStatus {
        self.source.lock().session.status
    }

    pub fn is_looping(&self) -> bool {
        self.source.lock().session.looping
    }

    /// Marker names of the file being served.
    pub fn marker_names(&self) -> Vec<String> {
        self.source.lock().parser().marker_names().to_vec()
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been requested.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Close the listener and every connection, then wait a bounded time for workers.
    ///
    /// Workers still running when the timeout expires are left to finish on their own.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "emulator workers still running after shutdown timeout, proceeding"
            );
        }
        info!("emulator stopped");
    }
}

impl Drop for EmulatorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    source: Arc<Mutex<FileSource>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "could not disable Nagle");
                }
                info!(%peer, "client connected");
                tracker.spawn(connection::serve(
                    stream,
                    peer,
                    Arc::clone(&source),
                    cancel.clone(),
                    tracker.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("emulator accept loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Inbound, Message, Packet, PacketCodec, PacketType};
    use crate::test_utils::write_wave_tsv;
    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;

    type Client = Framed<TcpStream, PacketCodec>;

    async fn start(rows: usize, looping: bool) -> anyhow::Result<(EmulatorHandle, tempfile::TempDir)> {
        let dir = tempfile::tempdir()?;
        let path = write_wave_tsv(dir.path(), "take.tsv", rows, 2, 0.01)?;
        let settings = EmulatorSettings {
            listen: "127.0.0.1:0".into(),
            looping,
            ..EmulatorSettings::default()
        };
        Ok((EmulatorHandle::start(&path, &settings).await?, dir))
    }

    async fn connect(handle: &EmulatorHandle) -> anyhow::Result<Client> {
        Ok(Framed::new(TcpStream::connect(handle.local_addr()).await?, PacketCodec::new()))
    }

    async fn next(client: &mut Client) -> anyhow::Result<Message> {
        let item = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
        match item {
            Inbound::Packet(packet) => Ok(Message::from_packet(&packet)?),
            Inbound::Malformed(e) => Err(e.into()),
        }
    }

    async fn request(client: &mut Client, text: &str) -> anyhow::Result<Message> {
        client.send(Packet::command(text)).await?;
        let ack = next(client).await?;
        anyhow::ensure!(ack == Message::Command(format!("OK-{text}")), "unexpected ack {ack:?}");
        next(client).await
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn current_frame_then_no_data_without_looping() -> anyhow::Result<()> {
        let (handle, _dir) = start(3, false).await?;
        let mut client = connect(&handle).await?;

        for expected in [0, 10_000, 20_000] {
            match request(&mut client, "sendcurrentframe").await? {
                Message::Frame(frame) => assert_eq!(frame.timestamp_micros(), Some(expected)),
                other => anyhow::bail!("expected a frame, got {other:?}"),
            }
        }
        for _ in 0..2 {
            assert_eq!(request(&mut client, "sendcurrentframe").await?, Message::NoData(NO_DATA.into()));
        }
        assert_eq!(handle.status(), StreamStatus::Eof);

        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_and_wrong_type_are_errors() -> anyhow::Result<()> {
        let (handle, _dir) = start(3, true).await?;
        let mut client = connect(&handle).await?;

        client.send(Packet::command("setbyteorder big")).await?;
        assert_eq!(next(&mut client).await?, Message::Error("Error-Unknown command: setbyteorder big".into()));

        client.send(Packet::text(PacketType::Parameters, "<x/>")).await?;
        assert_eq!(next(&mut client).await?, Message::Error("Error-Wrong command status: 2".into()));

        match request(&mut client, "sendparameters force").await? {
            Message::Error(text) => assert!(text.contains("force"), "{text}"),
            other => anyhow::bail!("expected an error, got {other:?}"),
        }
        match request(&mut client, "sendparameters all").await? {
            Message::Parameters(xml) => assert!(xml.contains("<Frequency>100</Frequency>"), "{xml}"),
            other => anyhow::bail!("expected parameters, got {other:?}"),
        }

        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn streaming_loops_and_stops() -> anyhow::Result<()> {
        let (handle, _dir) = start(4, true).await?;
        let mut client = connect(&handle).await?;

        client.send(Packet::command("streamframes frequency:100")).await?;
        assert_eq!(next(&mut client).await?, Message::Command("OK-streamframes frequency:100".into()));

        // frames may be skipped on a slow machine, but the file must come round again
        let mut stamps: Vec<u64> = Vec::new();
        while !stamps.windows(2).any(|w| w[1] < w[0]) {
            anyhow::ensure!(stamps.len() < 40, "no loop seen in {stamps:?}");
            if let Message::Frame(frame) = next(&mut client).await? {
                stamps.push(frame.timestamp_micros().unwrap_or(u64::MAX));
            }
        }
        assert_eq!(stamps[0], 0);
        assert!(stamps.iter().all(|ts| ts % 10_000 == 0 && *ts <= 30_000), "{stamps:?}");
        assert_eq!(handle.status(), StreamStatus::Streaming);

        client.send(Packet::command("streamframes stop")).await?;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while handle.status() == StreamStatus::Streaming {
            anyhow::ensure!(tokio::time::Instant::now() < deadline, "stream did not stop");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(handle.status(), StreamStatus::Ready);

        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stream_ends_with_one_no_data() -> anyhow::Result<()> {
        let (handle, dir) = start(2, false).await?;
        let mut client = connect(&handle).await?;

        client.send(Packet::command("streamframes")).await?;
        let mut replies = Vec::new();
        while !matches!(replies.last(), Some(Message::NoData(_))) {
            replies.push(next(&mut client).await?);
        }
        let frames = replies.iter().filter(|m| matches!(m, Message::Frame(_))).count();
        assert!((1..=2).contains(&frames), "{replies:?}");
        assert_eq!(handle.status(), StreamStatus::Eof);

        handle.change_datafile(dir.path().join("take.tsv"))?;
        assert_eq!(handle.status(), StreamStatus::Ready);
        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loop_setting_toggles() -> anyhow::Result<()> {
        let (handle, _dir) = start(2, true).await?;
        assert!(!handle.change_loop(None));
        assert!(handle.change_loop(Some(true)));
        assert!(handle.is_looping());
        assert_eq!(handle.marker_names(), ["Sensor 1", "Sensor 2"]);
        handle.shutdown().await;
        Ok(())
    }
}
