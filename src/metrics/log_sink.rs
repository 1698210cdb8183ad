use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::MonitorError;

/// Append-only sample log with in-place rotation.
///
/// A single mutex guards the stream, so lines land in call order and a
/// rotation never interleaves with a write: every line issued before
/// `rotate` returns is in the old file, every line after it in the new.
pub struct LogSink {
    path: PathBuf,
    stream: Mutex<Option<LineWriter<File>>>,
}

impl LogSink {
    /// Open (or create) `path` for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MonitorError> {
        let path = path.into();
        let file = open_append(&path)?;
        debug!(path = %path.display(), "log stream opened");
        Ok(Self {
            path,
            stream: Mutex::new(Some(LineWriter::new(file))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the current handle and reopen the same path. Used after an
    /// external tool has moved the file away.
    pub fn rotate(&self) -> Result<(), MonitorError> {
        let mut stream = self.stream.lock();
        if let Some(mut old) = stream.take() {
            old.flush().map_err(|source| self.error(source))?;
        }
        *stream = Some(LineWriter::new(open_append(&self.path)?));
        debug!(path = %self.path.display(), "log stream rotated");
        Ok(())
    }

    /// Append one line (a newline is added).
    pub fn write(&self, line: &str) -> Result<(), MonitorError> {
        let mut stream = self.stream.lock();
        let Some(writer) = stream.as_mut() else {
            return Err(self.error(io::Error::new(
                io::ErrorKind::NotConnected,
                "log stream is closed",
            )));
        };
        writeln!(writer, "{line}").map_err(|source| self.error(source))
    }

    pub fn flush(&self) -> Result<(), MonitorError> {
        match self.stream.lock().as_mut() {
            Some(writer) => writer.flush().map_err(|source| self.error(source)),
            None => Ok(()),
        }
    }

    fn error(&self, source: io::Error) -> MonitorError {
        MonitorError::Log {
            path: self.path.clone(),
            source,
        }
    }
}

fn open_append(path: &Path) -> Result<File, MonitorError> {
    let mut options = OpenOptions::new();
    options.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o660);
    }
    options.open(path).map_err(|source| MonitorError::Log {
        path: path.to_path_buf(),
        source,
    })
}
