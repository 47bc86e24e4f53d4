//! Motion file plus session state behind one emulator.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::Result;
use crate::parsers::{MotionParser, NextFrame};
use crate::protocol::{Packet, PacketType, encode_frame};
use crate::types::{DataFrame, SessionState, StreamStatus};

/// Text of the no-data reply.
pub const NO_DATA: &str = "No data, EOF or no measurement";

/// Shortest pacing interval, for files that declare a zero frame time.
const MIN_INTERVAL: Duration = Duration::from_micros(1);

pub(crate) struct FileSource {
    parser: Box<dyn MotionParser>,
    pub(crate) session: SessionState,
}

pub(crate) fn frame_packet(frame: &DataFrame) -> Result<Packet> {
    Ok(Packet::new(PacketType::DataFrame, encode_frame(frame)?))
}

impl FileSource {
    pub(crate) fn new(parser: Box<dyn MotionParser>, looping: bool) -> Self {
        Self { parser, session: SessionState::new(looping) }
    }

    /// Swap in a new file. Streaming stops and `Eof` is cleared.
    pub(crate) fn replace(&mut self, parser: Box<dyn MotionParser>) {
        self.parser = parser;
        self.session.reset();
    }

    pub(crate) fn parser(&self) -> &dyn MotionParser {
        self.parser.as_ref()
    }

    pub(crate) fn frame_interval(&self) -> Duration {
        let micros = self.parser.frame_interval_micros();
        if micros.is_finite() && micros > 0.0 {
            Duration::from_secs_f64(micros / 1_000_000.0).max(MIN_INTERVAL)
        } else {
            MIN_INTERVAL
        }
    }

    pub(crate) fn parameters_xml(&self) -> Result<String> {
        self.parser.parameters().to_xml()
    }

    /// Reply to a frame request: the next frame, or no-data at end of file.
    ///
    /// With looping on, the end of the file rewinds and the first frame is sent again.
    /// Without it the session goes to `Eof` and stays there until [`replace`](Self::replace).
    pub(crate) fn next_packet(&mut self) -> Result<Packet> {
        if self.session.status == StreamStatus::Eof {
            return Ok(Packet::no_data(NO_DATA));
        }
        let next = match self.parser.next_frame()? {
            NextFrame::NoMoreData if self.session.looping => {
                debug!(frames = self.parser.frame_count(), "end of file, looping");
                self.parser.rewind();
                self.parser.next_frame()?
            }
            next => next,
        };
        self.session.frame_index = self.parser.frames_read();
        match next {
            NextFrame::Frame(frame) => frame_packet(&frame),
            NextFrame::NoMoreData => {
                info!(frames = self.parser.frame_count(), "end of file");
                self.session.mark_eof();
                Ok(Packet::no_data(NO_DATA))
            }
        }
    }

    /// Drop up to `frames` frames without sending them. Stops early at end of file.
    pub(crate) fn skip(&mut self, frames: usize) -> Result<usize> {
        let mut skipped = 0;
        while skipped < frames && self.parser.skip_frame()? {
            skipped += 1;
        }
        self.session.frame_index = self.parser.frames_read();
        Ok(skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::{ParserOptions, TsvParser};
    use crate::protocol::{Message, decode};
    use crate::test_utils::{wave_tsv_header, wave_tsv_row};
    use nalgebra::Vector3;

    fn source(rows: usize, looping: bool) -> anyhow::Result<FileSource> {
        let mut text = wave_tsv_header(1);
        for i in 0..rows {
            text.push_str(&wave_tsv_row(1.0 + i as f64 * 0.01, i, &[Vector3::new(i as f32, 0.0, 0.0)]));
        }
        let parser = TsvParser::from_text(&text, &ParserOptions::default())?;
        Ok(FileSource::new(Box::new(parser), looping))
    }

    fn timestamp(packet: &Packet) -> Option<u64> {
        match decode(&packet.to_bytes()) {
            Ok(Message::Frame(frame)) => frame.timestamp_micros(),
            _ => None,
        }
    }

    #[test]
    fn looping_restarts_with_first_frame() -> anyhow::Result<()> {
        let mut source = source(3, true)?;
        let stamps: Vec<Option<u64>> =
            (0..4).map(|_| source.next_packet().map(|p| timestamp(&p))).collect::<Result<_>>()?;
        assert_eq!(stamps, [Some(0), Some(10_000), Some(20_000), Some(0)]);
        assert_eq!(source.session.status, StreamStatus::Ready);
        Ok(())
    }

    #[test]
    fn without_looping_eof_sticks_until_replaced() -> anyhow::Result<()> {
        let mut source = source(3, false)?;
        for _ in 0..3 {
            assert_eq!(source.next_packet()?.kind, PacketType::DataFrame);
        }
        for _ in 0..3 {
            let packet = source.next_packet()?;
            assert_eq!(packet.kind, PacketType::NoData);
            assert_eq!(packet.body_text(), NO_DATA);
        }
        assert_eq!(source.session.status, StreamStatus::Eof);

        let replacement = self::source(2, false)?;
        source.replace(replacement.parser);
        assert_eq!(source.session.status, StreamStatus::Ready);
        assert_eq!(timestamp(&source.next_packet()?), Some(0));
        Ok(())
    }

    #[test]
    fn skipping_stops_at_end_of_file() -> anyhow::Result<()> {
        let mut source = source(5, false)?;
        assert_eq!(source.skip(2)?, 2);
        assert_eq!(timestamp(&source.next_packet()?), Some(20_000));
        assert_eq!(source.skip(10)?, 2);
        assert_eq!(source.session.frame_index, 5);
        assert_eq!(source.next_packet()?.kind, PacketType::NoData);
        Ok(())
    }

    #[test]
    fn skipping_past_the_end_while_looping_restarts() -> anyhow::Result<()> {
        let mut source = source(4, true)?;
        source.next_packet()?;
        assert_eq!(source.skip(9)?, 3);
        assert_eq!(timestamp(&source.next_packet()?), Some(0));
        assert_eq!(source.session.status, StreamStatus::Ready);
        Ok(())
    }

    #[test]
    fn interval_and_parameters_come_from_the_file() -> anyhow::Result<()> {
        let mut source = source(3, true)?;
        assert_eq!(source.frame_interval(), Duration::from_millis(10));
        source.next_packet()?;
        let xml = source.parameters_xml()?;
        assert!(xml.contains("<FramesSent>1</FramesSent>"), "{xml}");
        assert!(xml.contains("<Frequency>100</Frequency>"), "{xml}");
        Ok(())
    }
}
