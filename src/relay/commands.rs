//! Relay command table.
//!
//! Consumers send one command token per packet, optionally followed by space-separated
//! arguments. Each token maps to a [`CommandHandler`] in a [`CommandRegistry`]; lookup is
//! case-insensitive and a miss is answered with `Unknown command: <token>`.
//!
//! | Token          | Reply                                                           |
//! |----------------|-----------------------------------------------------------------|
//! | `SINGLE_DF`    | next upstream frame, unsmoothed                                 |
//! | `START_STREAM` | `streaming started`                                             |
//! | `STREAM_DF`    | average of the smoothing window, no-data once upstream ended    |
//! | `STREAM_STOP`  | final average of the smoothing window                           |
//! | `PARAMETERS`   | upstream parameter XML                                          |
//! | `TEST`         | upstream reply to `version 1.0`                                 |
//! | `TEST_ALIVE`   | `YES, RELAY IS RUNNING`                                         |
//! | `STATUS`       | next upstream status line, or the session status               |
//! | `KILL_CLIENT`  | `KILLINGSERVER`, then the relay shuts down                      |
//! | `CAM_TRANS`    | camera transform blob of the last correction                    |
//! | `CALIBRATE`    | live head calibration over `[seconds]`                          |

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::context::{NO_FRAME, RelayContext};
use crate::error::{RelayError, Result};
use crate::protocol::{BaseCommand, Message};
use crate::types::{DataFrame, StreamStatus};

pub const SINGLE_DF: &str = "SINGLE_DF";
pub const START_STREAM: &str = "START_STREAM";
pub const STREAM_DF: &str = "STREAM_DF";
pub const STREAM_STOP: &str = "STREAM_STOP";
pub const PARAMETERS: &str = "PARAMETERS";
pub const TEST: &str = "TEST";
pub const TEST_ALIVE: &str = "TEST_ALIVE";
pub const STATUS: &str = "STATUS";
pub const KILL_CLIENT: &str = "KILL_CLIENT";
pub const CAM_TRANS: &str = "CAM_TRANS";
pub const CALIBRATE: &str = "CALIBRATE";

/// Reply to `TEST_ALIVE`.
pub const ALIVE: &str = "YES, RELAY IS RUNNING";
/// Reply to `KILL_CLIENT`.
pub const KILLING: &str = "KILLINGSERVER";
/// Reply to `START_STREAM`.
pub const STREAMING_STARTED: &str = "streaming started";

/// One relay command.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Produce the reply. An `Err` is sent to the consumer as an `Error` reply.
    async fn handle(&self, ctx: &RelayContext, args: &[&str]) -> Result<Message>;
}

/// Token to handler table, checked as handlers are registered.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every relay command.
    pub fn standard() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(SINGLE_DF, SingleFrame)?;
        registry.register(START_STREAM, StartStream)?;
        registry.register(STREAM_DF, StreamFrame)?;
        registry.register(STREAM_STOP, StreamStop)?;
        registry.register(PARAMETERS, Parameters)?;
        registry.register(TEST, Test)?;
        registry.register(TEST_ALIVE, TestAlive)?;
        registry.register(STATUS, Status)?;
        registry.register(KILL_CLIENT, KillClient)?;
        registry.register(CAM_TRANS, CameraTransform)?;
        registry.register(CALIBRATE, Calibrate)?;
        Ok(registry)
    }

    /// Add a handler. Tokens must be non-empty upper case without whitespace, and unique.
    pub fn register(
        &mut self,
        token: &'static str,
        handler: impl CommandHandler + 'static,
    ) -> Result<()> {
        let valid = !token.is_empty()
            && token.chars().all(|c| !c.is_whitespace() && !c.is_ascii_lowercase());
        if !valid {
            return Err(RelayError::config(format!("invalid command token '{token}'")));
        }
        if self.handlers.insert(token, Box::new(handler)).is_some() {
            return Err(RelayError::config(format!("command '{token}' registered twice")));
        }
        Ok(())
    }

    pub fn contains(&self, token: &str) -> bool {
        self.handlers.contains_key(token.to_ascii_uppercase().as_str())
    }

    /// Registered tokens, sorted.
    pub fn tokens(&self) -> Vec<&'static str> {
        let mut tokens: Vec<_> = self.handlers.keys().copied().collect();
        tokens.sort_unstable();
        tokens
    }

    /// Run the command in `text` and return the reply to send.
    pub async fn dispatch(&self, ctx: &RelayContext, text: &str) -> Message {
        let mut words = text.split_whitespace();
        let Some(token) = words.next() else {
            return Message::Error("Unknown command: ".into());
        };
        let args: Vec<&str> = words.collect();
        let Some(handler) = self.handlers.get(token.to_ascii_uppercase().as_str()) else {
            debug!(token, "unknown relay command");
            return Message::Error(format!("Unknown command: {token}"));
        };
        match handler.handle(ctx, &args).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(command = token, error = %e, "relay command failed");
                Message::Error(e.to_string())
            }
        }
    }
}

fn average(frames: &[Arc<DataFrame>]) -> Option<DataFrame> {
    DataFrame::average(frames.iter().map(Arc::as_ref))
}

struct SingleFrame;

#[async_trait]
impl CommandHandler for SingleFrame {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        let frame = ctx.reader.request_frame().await?;
        ctx.note_upstream(frame.as_deref());
        Ok(ctx.frame_reply(frame.map(Arc::unwrap_or_clone)))
    }
}

struct StartStream;

#[async_trait]
impl CommandHandler for StartStream {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        // a new upstream file clears end of data
        if ctx.status() == StreamStatus::Eof {
            let answer = ctx.reader.request_frame().await?;
            ctx.note_upstream(answer.as_deref());
        }
        if ctx.session.lock().begin_streaming().is_none() {
            return Err(RelayError::protocol("upstream is at end of data"));
        }

        let window = ctx.smoothing_window().await;
        ctx.reader.set_history_len(window);
        ctx.start_recording();
        if let Err(e) = ctx.reader.start_streaming(Some(ctx.stream_frequency())).await {
            ctx.session.lock().stop_streaming();
            ctx.reader.stop_recording();
            return Err(e);
        }
        info!(window, "relay streaming started");
        Ok(Message::Command(STREAMING_STARTED.into()))
    }
}

struct StreamFrame;

#[async_trait]
impl CommandHandler for StreamFrame {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        ctx.note_stream_end();
        if ctx.status() == StreamStatus::Eof {
            return Ok(Message::NoData(NO_FRAME.into()));
        }
        Ok(ctx.frame_reply(ctx.reader.smoothed()))
    }
}

struct StreamStop;

#[async_trait]
impl CommandHandler for StreamStop {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        // stopping after end of data keeps Eof
        ctx.note_stream_end();
        ctx.session.lock().stop_streaming();
        let history = ctx.reader.stop_streaming().await?;
        if let Some(path) = ctx.reader.stop_recording() {
            info!(path = %path.display(), "recording written");
        }
        info!(frames = history.len(), "relay streaming stopped");
        Ok(ctx.frame_reply(average(&history)))
    }
}

struct Parameters;

#[async_trait]
impl CommandHandler for Parameters {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        Ok(Message::Parameters(ctx.reader.parameters().await?))
    }
}

struct Test;

#[async_trait]
impl CommandHandler for Test {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        ctx.reader.drain_status().await;
        ctx.reader.send(&BaseCommand::Version(Some("1.0".into()))).await?;
        let wait = ctx.reader.request_timeout();
        match ctx.reader.next_status(wait).await {
            Some(reply) => Ok(Message::Command(reply)),
            None => Err(RelayError::Timeout { duration: wait }),
        }
    }
}

struct TestAlive;

#[async_trait]
impl CommandHandler for TestAlive {
    async fn handle(&self, _ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        Ok(Message::Command(ALIVE.into()))
    }
}

struct Status;

#[async_trait]
impl CommandHandler for Status {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        ctx.note_stream_end();
        let line = ctx.reader.next_status(ctx.status_poll()).await;
        Ok(Message::Command(line.unwrap_or_else(|| ctx.status().to_string())))
    }
}

struct KillClient;

#[async_trait]
impl CommandHandler for KillClient {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        info!("shutdown requested by consumer");
        ctx.request_shutdown();
        Ok(Message::Command(KILLING.into()))
    }
}

struct CameraTransform;

#[async_trait]
impl CommandHandler for CameraTransform {
    async fn handle(&self, ctx: &RelayContext, _args: &[&str]) -> Result<Message> {
        let blob = ctx.correction.lock().camera_transform().map(|t| t.to_blob());
        Ok(blob.map_or_else(|| Message::NoData(NO_FRAME.into()), Message::Blob))
    }
}

struct Calibrate;

#[async_trait]
impl CommandHandler for Calibrate {
    async fn handle(&self, ctx: &RelayContext, args: &[&str]) -> Result<Message> {
        let window = match args.first() {
            Some(arg) => arg
                .parse::<f64>()
                .ok()
                .filter(|s| s.is_finite() && *s > 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| RelayError::protocol(format!("bad calibration length '{arg}'")))?,
            None => ctx.live_calibration(),
        };
        if !ctx.correction.lock().is_enabled() {
            return Err(RelayError::calibration("head correction is not enabled"));
        }
        if ctx.status() == StreamStatus::Streaming {
            return Err(RelayError::protocol("stop streaming before calibrating"));
        }

        let mut incoming = ctx.reader.frames();
        ctx.reader.start_streaming(Some(ctx.stream_frequency())).await?;
        let mut frames = Vec::new();
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                next = incoming.next() => match next {
                    Some(frame) => frames.push(Arc::unwrap_or_clone(frame)),
                    None => break,
                },
            }
        }
        ctx.reader.stop_streaming().await?;
        info!(frames = frames.len(), seconds = window.as_secs_f64(), "calibration window recorded");

        ctx.correction.lock().calibrate(&frames)?;
        Ok(Message::Command(format!("calibrated from {} frames", frames.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        async fn handle(&self, _ctx: &RelayContext, args: &[&str]) -> Result<Message> {
            Ok(Message::Command(args.join(",")))
        }
    }

    #[test]
    fn standard_registry_has_every_command() -> anyhow::Result<()> {
        let registry = CommandRegistry::standard()?;
        assert_eq!(
            registry.tokens(),
            [
                CALIBRATE,
                CAM_TRANS,
                KILL_CLIENT,
                PARAMETERS,
                SINGLE_DF,
                START_STREAM,
                STATUS,
                STREAM_DF,
                STREAM_STOP,
                TEST,
                TEST_ALIVE
            ]
        );
        assert!(registry.contains("single_df"));
        assert!(!registry.contains("FOO"));
        Ok(())
    }

    #[test]
    fn bad_tokens_are_rejected() {
        let mut registry = CommandRegistry::new();
        assert!(registry.register("echo", Echo).is_err());
        assert!(registry.register("TWO WORDS", Echo).is_err());
        assert!(registry.register("", Echo).is_err());
        assert!(registry.register("ECHO", Echo).is_ok());
        assert!(matches!(registry.register("ECHO", Echo), Err(RelayError::Config { .. })));
    }
}
