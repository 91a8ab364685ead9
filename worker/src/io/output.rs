//! Timestamped progress stream for a work order.
//!
//! One [`OutputSink`] is shared by every stage of a work order. Each
//! [`OutputSink::report`] call formats the whole line into one buffer and
//! writes it with a single `write_all` under the sink's lock, so concurrent
//! producers never split each other's messages.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Local, TimeZone};

use crate::error::PipelineError;

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.9f %Z";

/// Format a progress line: `<timestamp>: <message>\n`.
pub fn format_line<Tz>(at: &DateTime<Tz>, message: &str) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    format!("{}: {}\n", at.format(TIMESTAMP_FORMAT), message)
}

/// Append-only, timestamped line writer shared by a work order.
pub struct OutputSink {
    destinations: Mutex<Vec<Box<dyn Write + Send>>>,
}

impl OutputSink {
    pub fn new(destination: impl Write + Send + 'static) -> Self {
        Self {
            destinations: Mutex::new(vec![Box::new(destination)]),
        }
    }

    /// Sink writing to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    /// Also write every line to `destination`.
    pub fn tee(self, destination: impl Write + Send + 'static) -> Self {
        let mut destinations = self
            .destinations
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        destinations.push(Box::new(destination));
        Self {
            destinations: Mutex::new(destinations),
        }
    }

    /// Open (append) a log file, creating its parent directory if needed.
    pub fn open_log(path: &Path) -> io::Result<File> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)
    }

    /// Write `message` as one timestamped line.
    pub fn report(&self, message: &str) -> io::Result<()> {
        let line = format_line(&Local::now(), message);
        self.send(line.as_bytes())
    }

    /// Report progress about `path`, mapping a write failure to a pipeline error.
    pub fn progress(&self, package: &str, path: &Path, message: &str) -> Result<(), PipelineError> {
        self.report(message)
            .map_err(|err| PipelineError::report(package, path, err))
    }

    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut destinations = self
            .destinations
            .lock()
            .map_err(|_| io::Error::other("output sink lock poisoned"))?;
        for destination in &mut *destinations {
            destination.write_all(bytes)?;
            destination.flush()?;
        }
        Ok(())
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink").finish_non_exhaustive()
    }
}
