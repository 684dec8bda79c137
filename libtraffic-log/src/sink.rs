//! Append-only log sinks.
//!
//! [`FileSink`] opens the log file, appends one line and closes it again, for every
//! entry. [`LogWriter`] runs a `FileSink` (or any other sink) on a dedicated
//! thread; producers on other threads send entries through cloneable
//! [`SinkHandle`]s, so the file has exactly one writer and lines never mix.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, error, trace};

use crate::error::Error;
use crate::event::LogEntry;

/// Destination of log entries
pub trait LogSink {
    fn append(&self, entry: LogEntry) -> Result<(), Error>;
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn append(&self, entry: LogEntry) -> Result<(), Error> {
        (**self).append(entry)
    }
}

/// Fresh open/append/close cycle for every entry
#[derive(Clone, Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        FileSink {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileSink {
    fn append(&self, entry: LogEntry) -> Result<(), Error> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        // one write per line: O_APPEND keeps concurrent appends whole
        file.write_all(&entry.to_line())?;
        Ok(())
    }
}

/// Producer side of a [`LogWriter`]
#[derive(Clone, Debug)]
pub struct SinkHandle {
    sender: Sender<LogEntry>,
}

impl LogSink for SinkHandle {
    fn append(&self, entry: LogEntry) -> Result<(), Error> {
        self.sender.send(entry).map_err(|_| Error::SinkClosed)
    }
}

/// Logging thread owning the sink
pub struct LogWriter {
    sender: Sender<LogEntry>,
    handler: thread::JoinHandle<usize>,
}

impl LogWriter {
    /// Start the logging thread. Failed appends are reported and the entry is dropped.
    pub fn spawn<S: LogSink + Send + 'static>(sink: S) -> Result<Self, Error> {
        let (sender, receiver) = unbounded::<LogEntry>();
        let handler = thread::Builder::new()
            .name("log writer".to_owned())
            .spawn(move || {
                debug!("log writer thread starting");
                let mut written = 0;
                for entry in receiver.iter() {
                    trace!("log writer: appending entry from {}", entry.source);
                    match sink.append(entry) {
                        Ok(()) => written += 1,
                        Err(e) => error!("Couldn't write to the log file: {e}"),
                    }
                }
                debug!("log writer thread exiting ({written} entries written)");
                written
            })?;
        Ok(LogWriter { sender, handler })
    }

    pub fn handle(&self) -> SinkHandle {
        SinkHandle {
            sender: self.sender.clone(),
        }
    }

    /// Wait until every handle is dropped and all pending entries are written.
    /// Returns the number of entries written.
    pub fn join(self) -> usize {
        let LogWriter { sender, handler } = self;
        drop(sender);
        match handler.join() {
            Ok(written) => written,
            Err(_) => {
                error!("log writer thread panicked");
                0
            }
        }
    }
}
