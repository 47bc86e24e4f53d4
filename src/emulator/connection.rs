//! One client connection to the emulator.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use super::source::{FileSource, NO_DATA};
use crate::protocol::{BaseCommand, Inbound, Packet, PacketCodec, PacketType, StreamRequest};
use crate::types::StreamStatus;

/// Replies queued per connection before workers wait for the socket.
const REPLY_QUEUE: usize = 64;

type Replies = mpsc::Sender<Packet>;

/// Read commands until the client leaves, acknowledging each and running it on its own task.
pub(crate) async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    source: Arc<Mutex<FileSource>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let (read_half, write_half) = stream.into_split();
    let (replies, outgoing) = mpsc::channel(REPLY_QUEUE);
    tracker.spawn(write_replies(FramedWrite::new(write_half, PacketCodec::new()), outgoing));

    let mut packets = FramedRead::new(read_half, PacketCodec::new());
    let mut said_bye = false;

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
                warn!(%peer, error = %e, "client connection failed");
                break;
            }
            None => break,
        };

        if packet.kind != PacketType::Command {
            let reply = format!("Error-Wrong command status: {}", packet.kind.code());
            if replies.send(Packet::error(&reply)).await.is_err() {
                break;
            }
            continue;
        }

        let text = packet.body_text().trim().trim_start_matches('_').to_string();
        let command = match BaseCommand::parse(&text) {
            Ok(command) => command,
            Err(_) => {
                debug!(%peer, command = %text, "unknown command");
                if replies.send(Packet::error(&format!("Error-Unknown command: {text}"))).await.is_err() {
                    break;
                }
                continue;
            }
        };

        trace!(%peer, command = %text, "command received");
        if replies.send(Packet::command(&format!("OK-{text}"))).await.is_err() {
            break;
        }
        said_bye = command == BaseCommand::Bye;
        tracker.spawn(run_command(
            command,
            text,
            Arc::clone(&source),
            replies.clone(),
            cancel.clone(),
        ));
        if said_bye {
            break;
        }
    }

    if !said_bye {
        source.lock().session.stop_streaming();
    }
    info!(%peer, "client disconnected");
}

async fn write_replies(
    mut sink: FramedWrite<OwnedWriteHalf, PacketCodec>,
    mut outgoing: mpsc::Receiver<Packet>,
) {
    while let Some(packet) = outgoing.recv().await {
        if let Err(e) = sink.send(packet).await {
            debug!(error = %e, "reply not delivered");
            break;
        }
    }
    if let Err(e) = sink.close().await {
        trace!(error = %e, "closing client socket");
    }
}

async fn run_command(
    command: BaseCommand,
    text: String,
    source: Arc<Mutex<FileSource>>,
    replies: Replies,
    cancel: CancellationToken,
) {
    let reply = match &command {
        BaseCommand::Version(_) => None,
        BaseCommand::SendParameters(_) => {
            let unsupported = command.unsupported_parameters();
            if unsupported.is_empty() {
                let xml = source.lock().parameters_xml();
                Some(match xml {
                    Ok(xml) => Packet::text(PacketType::Parameters, &xml),
                    Err(e) => execution_error(&text, &e),
                })
            } else {
                Some(Packet::error(&format!(
                    "Error-Requested parameters not supported: {}",
                    unsupported.join(" ")
                )))
            }
        }
        BaseCommand::SendCurrentFrame => {
            let packet = source.lock().next_packet();
            Some(packet.unwrap_or_else(|e| execution_error(&text, &e)))
        }
        BaseCommand::StreamFrames(StreamRequest::Stop) | BaseCommand::Bye => {
            source.lock().session.stop_streaming();
            None
        }
        BaseCommand::StreamFrames(StreamRequest::Start { frequency }) => {
            stream_frames(&source, &replies, &cancel, *frequency).await;
            None
        }
    };
    if let Some(reply) = reply {
        if replies.send(reply).await.is_err() {
            debug!(command = %text, "client left before the reply");
        }
    }
}

fn execution_error(text: &str, error: &crate::RelayError) -> Packet {
    warn!(command = %text, %error, "command failed");
    Packet::error(&format!("Error-Execution error: {text}"))
}

enum StreamStart {
    Begin { generation: u64, interval: Duration },
    AlreadyStreaming,
    AtEof,
}

/// Send frames at the file's rate until stopped, replaced or out of data.
///
/// After each frame the remaining time to the next tick is slept. When preparation overruns
/// the tick the overrun accumulates, and once it exceeds one interval the loop skips ahead
/// that many frames so the stream stays locked to wall-clock time.
async fn stream_frames(
    source: &Mutex<FileSource>,
    replies: &Replies,
    cancel: &CancellationToken,
    frequency: Option<f64>,
) {
    let start = {
        let mut source = source.lock();
        match source.session.status {
            StreamStatus::Streaming => StreamStart::AlreadyStreaming,
            _ => match source.session.begin_streaming() {
                Some(generation) => {
                    StreamStart::Begin { generation, interval: source.frame_interval() }
                }
                None => StreamStart::AtEof,
            },
        }
    };
    let (generation, interval) = match start {
        StreamStart::Begin { generation, interval } => (generation, interval),
        StreamStart::AlreadyStreaming => {
            debug!("already streaming");
            return;
        }
        StreamStart::AtEof => {
            if let Err(e) = replies.send(Packet::no_data(NO_DATA)).await {
                debug!(error = %e, "no-data reply not delivered");
            }
            return;
        }
    };
    if let Some(hz) = frequency {
        debug!(requested_hz = hz, "streaming at the file's own rate");
    }
    info!(interval_us = interval.as_micros() as u64, generation, "streaming started");

    let mut sent = 0u64;
    loop {
        let started = Instant::now();
        let next = {
            let mut source = source.lock();
            if !source.session.is_streaming(generation) {
                break;
            }
            let (frames, remainder) = catch_up(source.session.last_delay, interval);
            if frames > 0 {
                match source.skip(frames) {
                    Ok(skipped) => trace!(skipped, "catching up"),
                    Err(e) => warn!(error = %e, "skipping frames failed"),
                }
                source.session.last_delay = remainder;
            }
            source.next_packet()
        };
        let packet = match next {
            Ok(packet) => packet,
            Err(e) => {
                source.lock().session.stop_streaming();
                if let Err(e) = replies.send(execution_error("streamframes", &e)).await {
                    debug!(error = %e, "error reply not delivered");
                }
                break;
            }
        };

        let end_of_data = packet.kind == PacketType::NoData;
        if replies.send(packet).await.is_err() {
            source.lock().session.stop_streaming();
            break;
        }
        sent += 1;
        if end_of_data {
            break;
        }

        let elapsed = started.elapsed();
        match interval.checked_sub(elapsed) {
            Some(rest) if !rest.is_zero() => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(rest) => {}
                }
            }
            _ => {
                let overrun = elapsed.saturating_sub(interval);
                source.lock().session.last_delay += overrun;
            }
        }
    }
    info!(sent, generation, "streaming ended");
}

/// Frames to skip for an accumulated delay of `behind`, and the delay left over.
///
/// Nothing is skipped until the delay exceeds one interval.
fn catch_up(behind: Duration, interval: Duration) -> (usize, Duration) {
    if interval.is_zero() || behind <= interval {
        return (0, behind);
    }
    let step = interval.as_nanos();
    let frames = usize::try_from(behind.as_nanos() / step).unwrap_or(usize::MAX);
    let left = u64::try_from(behind.as_nanos() % step).unwrap_or(u64::MAX);
    (frames, Duration::from_nanos(left))
}
