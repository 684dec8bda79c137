use std::thread;

use libtraffic_log::{
    get_log_file, Config, ConnectionServer, Error, FileSink, LogWriter, ShutdownHandle,
    ShutdownToken, SinkHandle,
};
use tracing::{debug, error, info};

use crate::capture::{CaptureStats, CaptureWorker};

/// Outcome of a complete run
#[derive(Clone, Copy, Debug, Default)]
pub struct RunSummary {
    /// Entries written to the log file, from both sources
    pub entries_written: usize,
    /// Capture counters, `None` if capture was disabled or failed
    pub capture: Option<CaptureStats>,
    /// Capture was requested but could not be opened, or stopped on an error
    pub capture_failed: bool,
}

/// Runs the capture worker on a background thread and the accept loop on the
/// calling thread. Both write through one log writer.
pub struct Supervisor {
    server: ConnectionServer<SinkHandle>,
    worker: Option<CaptureWorker<SinkHandle>>,
    writer: LogWriter,
}

impl Supervisor {
    /// Set up the log writer, bind the server and prepare capture.
    ///
    /// Setup failures are returned before any traffic is served.
    pub fn new(port: u16, config: &Config, with_capture: bool) -> Result<Self, Error> {
        let log_file = get_log_file(config);
        debug!("logging to {log_file}");
        let writer = LogWriter::spawn(FileSink::new(log_file))?;
        let shutdown = ShutdownToken::new();
        let server = ConnectionServer::bind(port, config, writer.handle(), shutdown.clone())?;
        let worker = if with_capture {
            Some(CaptureWorker::new(config, writer.handle(), shutdown)?)
        } else {
            None
        };
        Ok(Supervisor {
            server,
            worker,
            writer,
        })
    }

    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// Handle for the interrupt handler. Triggering it more than once is harmless.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.server.shutdown_handle()
    }

    /// Serve until shutdown, then stop capture, close the listener and flush the log.
    pub fn run(self) -> Result<RunSummary, Error> {
        let Supervisor {
            server,
            worker,
            writer,
        } = self;
        let shutdown = server.shutdown_handle();

        let capture = match worker {
            Some(mut worker) => {
                let control = worker.control();
                let handler = thread::Builder::new()
                    .name("capture".to_owned())
                    .spawn(move || match worker.run() {
                        Ok(stats) => Some(stats),
                        Err(e) => {
                            // fatal to capture only, the server keeps running
                            error!("{e}");
                            None
                        }
                    })?;
                Some((control, handler))
            }
            None => None,
        };

        let res = server.run();

        // no-op after a normal shutdown
        shutdown.trigger();
        let (capture, capture_failed) = match capture {
            Some((control, handler)) => {
                control.request_stop();
                match handler.join() {
                    Ok(stats) => (stats, stats.is_none()),
                    Err(_) => {
                        error!("capture thread panicked");
                        (None, true)
                    }
                }
            }
            None => (None, false),
        };
        drop(server);
        let entries_written = writer.join();
        info!("shutdown complete, {entries_written} entries written");
        res?;

        Ok(RunSummary {
            entries_written,
            capture,
            capture_failed,
        })
    }
}
