//! Streaming relay: the server downstream consumers talk to.
//!
//! The relay holds one [`StreamReader`] on the upstream (a live device or the
//! [emulator](crate::emulator)) and answers the relay command vocabulary in
//! [`commands`]. Replies that carry a frame go through head correction first when it is
//! enabled and calibrated.
//!
//! Consumers connect over TCP and exchange the same framed packets the upstream speaks.
//! Commands on one connection are answered in order; separate connections run concurrently
//! and share the relay's session, history and calibration.

pub mod commands;
mod context;
mod correction;

pub use commands::{CommandHandler, CommandRegistry};
pub use context::{NO_FRAME, RelayContext};
pub use correction::HeadCorrection;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::RelaySettings;
use crate::error::Result;
use crate::parsers::ParserOptions;
use crate::protocol::{Inbound, Message, Packet, PacketCodec, PacketType};
use crate::reader::{ReaderOptions, StreamReader};
use crate::types::StreamStatus;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Control surface of a running relay.
pub struct RelayHandle {
    local_addr: SocketAddr,
    context: Arc<RelayContext>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    shutdown_timeout: Duration,
}

impl RelayHandle {
    /// Connect to the configured upstream, load head correction and start listening.
    pub async fn start(settings: &RelaySettings, parser_options: &ParserOptions) -> Result<Self> {
        settings.validate()?;
        let correction = HeadCorrection::from_settings(&settings.head_correction, parser_options)?;
        let reader =
            StreamReader::connect(settings.upstream_addr()?, ReaderOptions::from(settings)).await?;
        Self::with_reader(reader, settings, correction).await
    }

    /// Serve consumers through an already connected reader.
    pub async fn with_reader(
        reader: StreamReader,
        settings: &RelaySettings,
        correction: HeadCorrection,
    ) -> Result<Self> {
        let registry = Arc::new(CommandRegistry::standard()?);
        let listener = TcpListener::bind(settings.listen_addr()?).await?;
        let local_addr = listener.local_addr()?;

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let context = Arc::new(RelayContext::new(reader, settings, correction, cancel.clone()));
        tracker.spawn(accept_loop(
            listener,
            Arc::clone(&context),
            registry,
            cancel.clone(),
            tracker.clone(),
        ));

        info!(%local_addr, upstream = %settings.upstream, "relay listening");
        Ok(Self {
            local_addr,
            context,
            cancel,
            tracker,
            shutdown_timeout: settings.shutdown_timeout(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn status(&self) -> StreamStatus {
        self.context.status()
    }

    pub fn context(&self) -> &RelayContext {
        &self.context
    }

    /// Resolves once shutdown is requested, by [`shutdown`](Self::shutdown) or `KILL_CLIENT`.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Stop accepting, close consumer connections and the upstream, and wait a bounded time.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.shutdown_timeout, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "relay connections still open after shutdown timeout, proceeding"
            );
        }
        self.context.reader.close().await;
        info!("relay stopped");
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<RelayContext>,
    registry: Arc<CommandRegistry>,
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
                info!(%peer, "consumer connected");
                tracker.spawn(serve(
                    stream,
                    peer,
                    Arc::clone(&context),
                    Arc::clone(&registry),
                    cancel.clone(),
                ));
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
    debug!("relay accept loop ended");
}

/// Answer one consumer's commands in order until it leaves.
async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    context: Arc<RelayContext>,
    registry: Arc<CommandRegistry>,
    cancel: CancellationToken,
) {
    let mut packets = Framed::new(stream, PacketCodec::new());
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = packets.next() => next,
        };
        let packet = match next {
            Some(Ok(Inbound::Packet(packet))) => packet,
            Some(Ok(Inbound::Malformed(e))) => {
                warn!(%peer, error = %e, "skipping malformed packet");
                continue;
            }
            Some(Err(e)) => {
                warn!(%peer, error = %e, "consumer connection failed");
                break;
            }
            None => break,
        };

        let reply = if packet.kind == PacketType::Command {
            registry.dispatch(&context, &packet.body_text()).await
        } else {
            Message::Error(format!("Wrong command status: {}", packet.kind.code()))
        };
        let packet = reply.to_packet().unwrap_or_else(|e| {
            warn!(%peer, error = %e, "reply could not be encoded");
            Packet::error(&e.to_string())
        });
        if let Err(e) = packets.send(packet).await {
            debug!(%peer, error = %e, "reply not delivered");
            break;
        }
    }
    info!(%peer, "consumer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::SensorRoles;
    use crate::protocol::{Packet, encode_frame};
    use crate::test_utils::{SAMPLE_ROLES_JSON, calibration_frame};
    use crate::types::Smoothing;
    use nalgebra::Vector3;
    use tokio::io::DuplexStream;

    type Peer = Framed<DuplexStream, PacketCodec>;
    type Consumer = Framed<TcpStream, PacketCodec>;

    /// Relay whose upstream is an in-memory pipe the test answers by hand.
    async fn relay(correction: HeadCorrection) -> anyhow::Result<(RelayHandle, Peer)> {
        let (ours, theirs) = tokio::io::duplex(256 * 1024);
        let settings = RelaySettings {
            listen: "127.0.0.1:0".into(),
            request_timeout_ms: 500,
            status_poll_ms: 20,
            smoothing: Smoothing::Frames(3),
            ..RelaySettings::default()
        };
        let reader = StreamReader::spawn(ours, ReaderOptions::from(&settings));
        let handle = RelayHandle::with_reader(reader, &settings, correction).await?;
        Ok((handle, Framed::new(theirs, PacketCodec::new())))
    }

    async fn consumer(handle: &RelayHandle) -> anyhow::Result<Consumer> {
        Ok(Framed::new(TcpStream::connect(handle.local_addr()).await?, PacketCodec::new()))
    }

    async fn receive<S>(framed: &mut Framed<S, PacketCodec>) -> anyhow::Result<Packet>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        match tokio::time::timeout(Duration::from_secs(2), framed.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))??
        {
            Inbound::Packet(packet) => Ok(packet),
            Inbound::Malformed(e) => Err(e.into()),
        }
    }

    async fn ask(client: &mut Consumer, command: &str) -> anyhow::Result<Message> {
        client.send(Packet::command(command)).await?;
        Ok(Message::from_packet(&receive(client).await?)?)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_commands_leave_the_session_alone() -> anyhow::Result<()> {
        let (handle, _upstream) = relay(HeadCorrection::disabled()).await?;
        let mut client = consumer(&handle).await?;

        assert_eq!(ask(&mut client, "FOO").await?, Message::Error("Unknown command: FOO".into()));
        assert_eq!(handle.status(), StreamStatus::Ready);
        assert_eq!(ask(&mut client, "test_alive").await?, Message::Command(commands::ALIVE.into()));

        client.send(Packet::text(PacketType::Blob, "x")).await?;
        let reply = Message::from_packet(&receive(&mut client).await?)?;
        assert_eq!(reply, Message::Error("Wrong command status: 5".into()));

        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn single_frames_are_relayed_and_no_data_marks_eof() -> anyhow::Result<()> {
        let (handle, mut upstream) = relay(HeadCorrection::disabled()).await?;
        let mut client = consumer(&handle).await?;

        let answer = async {
            for reply in [
                Packet::new(PacketType::DataFrame, encode_frame(&calibration_frame(10_000, Vector3::zeros()))?),
                Packet::no_data("No data, EOF or no measurement"),
            ] {
                let request = receive(&mut upstream).await?;
                anyhow::ensure!(request.body_text() == "sendcurrentframe", "got {request:?}");
                upstream.send(reply).await?;
            }
            anyhow::Ok(())
        };
        let asks = async {
            let first = ask(&mut client, "SINGLE_DF").await?;
            let second = ask(&mut client, "SINGLE_DF").await?;
            anyhow::Ok((first, second))
        };
        let (answered, asked) = tokio::join!(answer, asks);
        answered?;
        let (first, second) = asked?;

        match first {
            Message::Frame(frame) => assert_eq!(frame.timestamp_micros(), Some(10_000)),
            other => anyhow::bail!("expected a frame, got {other:?}"),
        }
        assert_eq!(second, Message::NoData(NO_FRAME.into()));
        assert_eq!(handle.status(), StreamStatus::Eof);

        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upstream_end_of_data_ends_the_stream() -> anyhow::Result<()> {
        let (handle, mut upstream) = relay(HeadCorrection::disabled()).await?;
        let mut client = consumer(&handle).await?;

        let answer = async {
            let request = receive(&mut upstream).await?;
            anyhow::ensure!(request.body_text().starts_with("streamframes"), "got {request:?}");
            let body = encode_frame(&calibration_frame(0, Vector3::zeros()))?;
            upstream.send(Packet::command("OK-streamframes")).await?;
            upstream.send(Packet::new(PacketType::DataFrame, body)).await?;
            upstream.send(Packet::no_data(NO_FRAME)).await?;
            anyhow::Ok(())
        };
        let (answered, started) = tokio::join!(answer, ask(&mut client, "START_STREAM"));
        answered?;
        assert_eq!(started?, Message::Command(commands::STREAMING_STARTED.into()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(ask(&mut client, "STREAM_DF").await?, Message::NoData(NO_FRAME.into()));
        assert_eq!(handle.status(), StreamStatus::Eof);

        // the frames seen before the end still make up the final average
        match ask(&mut client, "STREAM_STOP").await? {
            Message::Frame(frame) => assert_eq!(frame.timestamp_micros(), Some(0)),
            other => anyhow::bail!("expected a frame, got {other:?}"),
        }
        assert_eq!(handle.status(), StreamStatus::Eof);

        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn camera_transform_needs_a_correction_first() -> anyhow::Result<()> {
        let roles = SensorRoles::from_json(SAMPLE_ROLES_JSON)?;
        let (handle, mut upstream) = relay(HeadCorrection::new(roles, None, 0)).await?;
        let mut client = consumer(&handle).await?;

        assert_eq!(ask(&mut client, "CAM_TRANS").await?, Message::NoData(NO_FRAME.into()));

        // uncalibrated correction passes the frame through unchanged
        let frame = calibration_frame(0, Vector3::new(3.0, 0.0, 0.0));
        let expected = frame.clone();
        let answer = async {
            receive(&mut upstream).await?;
            upstream.send(Packet::new(PacketType::DataFrame, encode_frame(&frame)?)).await?;
            anyhow::Ok(())
        };
        let (answered, reply) = tokio::join!(answer, ask(&mut client, "single_df"));
        answered?;
        assert_eq!(reply?, Message::Frame(expected));

        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn kill_client_replies_then_closes() -> anyhow::Result<()> {
        let (handle, _upstream) = relay(HeadCorrection::disabled()).await?;
        let mut client = consumer(&handle).await?;

        assert_eq!(ask(&mut client, "KILL_CLIENT").await?, Message::Command(commands::KILLING.into()));
        tokio::time::timeout(Duration::from_secs(1), handle.closed()).await?;
        handle.shutdown().await;
        Ok(())
    }
}
