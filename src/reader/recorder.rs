//! Tab-separated recording of received frames.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::types::DataFrame;

/// Writes one line per frame:
///
/// ```text
/// timestampMicros  frameNumber  audioSample  (name  status  q0 qx qy qz  x y z)*
/// ```
///
/// Timestamps are relative to the first recorded frame. A header line is written before the
/// first frame, so recordings load back through the `.tsv` parser with
/// [`TsvLayout::Recording`](crate::parsers::TsvLayout::Recording).
pub struct FrameRecorder {
    path: PathBuf,
    out: BufWriter<File>,
    names: Vec<String>,
    first_timestamp: Option<u64>,
    lines: u64,
}

impl FrameRecorder {
    /// Create (or truncate) `path`, creating missing parent directories.
    ///
    /// `names` label coils in order; coils beyond the list are called `Coil<n>`.
    pub fn create(path: impl Into<PathBuf>, names: Vec<String>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RelayError::file_error(parent, e))?;
        }
        let file = File::create(&path).map_err(|e| RelayError::file_error(&path, e))?;
        info!(path = %path.display(), "recording frames");
        Ok(Self { path, out: BufWriter::new(file), names, first_timestamp: None, lines: 0 })
    }

    /// `<directory>/<prefix><unix seconds>.tsv`
    pub fn timestamped_path(directory: &Path, prefix: &str) -> PathBuf {
        let seconds = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        directory.join(format!("{prefix}{seconds}.tsv"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frames written so far.
    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    fn name(&self, index: usize) -> String {
        self.names.get(index).cloned().unwrap_or_else(|| format!("Coil{index}"))
    }

    fn header(&self, coils: usize) -> String {
        let mut line = String::from("Time\tFrame\tAudioSample");
        for index in 0..coils {
            let _ = write!(line, "\t{} ID\tStatus\tQ0\tQx\tQy\tQz\tX\tY\tZ", self.name(index));
        }
        line
    }

    /// Append `frame`, tagged with the most recent audio sample index.
    pub fn record(&mut self, frame: &DataFrame, audio_sample: u64) -> Result<()> {
        let timestamp = frame.timestamp_micros().unwrap_or(0);
        let first = match self.first_timestamp {
            Some(first) => first,
            None => {
                let header = self.header(frame.coil_count());
                writeln!(self.out, "{header}").map_err(|e| RelayError::file_error(&self.path, e))?;
                self.first_timestamp = Some(timestamp);
                timestamp
            }
        };

        let mut line = format!(
            "{}\t{}\t{audio_sample}",
            timestamp.saturating_sub(first),
            frame.frame_number().unwrap_or(0)
        );
        for (index, coil) in frame.coils().enumerate() {
            let q = coil.rotation.unwrap_or_else(nalgebra::Quaternion::identity);
            let p = coil.location;
            let status = if coil.is_finite() { "OK" } else { "MISSING" };
            let _ = write!(
                line,
                "\t{}\t{status}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                self.name(index),
                q.w,
                q.i,
                q.j,
                q.k,
                p.x,
                p.y,
                p.z
            );
        }
        writeln!(self.out, "{line}").map_err(|e| RelayError::file_error(&self.path, e))?;
        self.lines += 1;
        Ok(())
    }

    /// Flush and close, returning where the recording went.
    pub fn finish(mut self) -> Result<PathBuf> {
        self.out.flush().map_err(|e| RelayError::file_error(&self.path, e))?;
        debug!(path = %self.path.display(), lines = self.lines, "recording closed");
        Ok(self.path)
    }
}
