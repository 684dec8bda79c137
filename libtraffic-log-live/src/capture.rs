use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local};
use libtraffic_log::{
    decode, get_buffer_size, write_notice, CapturedFrame, Config, DecodeOutcome, Error, LogEntry,
    LogSink, ShutdownToken,
};
use pcap::{Active, Capture, PacketHeader};
use tracing::{debug, error, info, trace, warn};

use crate::error::CaptureError;

/// DLT_EN10MB, the only link type the decoder understands
const LINKTYPE_ETHERNET: i32 = 1;

pub const DEFAULT_INTERFACE: &str = "lo";
pub const DEFAULT_FILTER: &str = "tcp";
/// Read timeout of the capture handle, also the bound on shutdown latency
pub const DEFAULT_TIMEOUT_MS: usize = 1000;
pub const DEFAULT_SNAPLEN: usize = 65535;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Idle,
    Capturing,
    Stopping,
    Stopped,
}

impl CaptureState {
    fn from_u8(v: u8) -> CaptureState {
        match v {
            0 => CaptureState::Idle,
            1 => CaptureState::Capturing,
            2 => CaptureState::Stopping,
            _ => CaptureState::Stopped,
        }
    }
}

/// Counters reported when the capture loop ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames delivered by the capture handle
    pub frames: u64,
    /// Entries handed to the sink
    pub logged: u64,
    /// Frames that were not TCP, or could not be decoded
    pub skipped: u64,
}

/// Stop switch and state of a [`CaptureWorker`], usable from other threads
/// while the worker runs.
#[derive(Clone, Debug)]
pub struct CaptureControl {
    shutdown: ShutdownToken,
    state: Arc<AtomicU8>,
}

impl CaptureControl {
    fn new(shutdown: ShutdownToken) -> Self {
        CaptureControl {
            shutdown,
            state: Arc::new(AtomicU8::new(CaptureState::Idle as u8)),
        }
    }

    /// Ask the capture loop to stop. It exits within one read timeout.
    pub fn request_stop(&self) {
        if self.shutdown.request() {
            debug!("capture stop requested");
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shutdown.is_requested()
    }

    pub fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: CaptureState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// Frames read by the capture loop
pub trait PacketSource {
    /// Next frame, or `None` if the read timeout expired first
    fn next_frame(&mut self) -> Result<Option<CapturedFrame<'_>>, pcap::Error>;

    /// Called once the loop has stopped, before the source is released
    fn finish(&mut self) {}
}

impl PacketSource for Capture<Active> {
    fn next_frame(&mut self) -> Result<Option<CapturedFrame<'_>>, pcap::Error> {
        match self.next_packet() {
            Ok(packet) => Ok(Some(CapturedFrame {
                data: packet.data,
                timestamp: header_timestamp(packet.header),
            })),
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn finish(&mut self) {
        match self.stats() {
            Ok(stat) => debug!(
                "pcap: {} received, {} dropped, {} dropped by interface",
                stat.received, stat.dropped, stat.if_dropped
            ),
            Err(e) => debug!("pcap: statistics unavailable: {e}"),
        }
    }
}

fn config_i32(config: &Config, key: &str, default: usize) -> Result<i32, Error> {
    let value = config.get_usize(key).unwrap_or(default);
    i32::try_from(value).map_err(|_| Error::Config(format!("{key} out of range ({value})")))
}

fn header_timestamp(header: &PacketHeader) -> DateTime<Local> {
    let secs = header.ts.tv_sec as i64;
    let nanos = (header.ts.tv_usec as u32).saturating_mul(1000);
    DateTime::from_timestamp(secs, nanos)
        .map(|ts| ts.with_timezone(&Local))
        .unwrap_or_else(Local::now)
}

/// Captures TCP traffic on one interface and logs every segment carrying data.
pub struct CaptureWorker<S: LogSink> {
    interface: String,
    filter: String,
    promisc: bool,
    immediate: bool,
    timeout_ms: i32,
    snaplen: i32,
    buffer_size: usize,

    sink: S,
    control: CaptureControl,
    stats: CaptureStats,
}

impl<S: LogSink> CaptureWorker<S> {
    pub fn new(config: &Config, sink: S, shutdown: ShutdownToken) -> Result<Self, Error> {
        let interface = config
            .get("live.interface")
            .unwrap_or(DEFAULT_INTERFACE)
            .to_owned();
        let filter = config.get("live.filter").unwrap_or(DEFAULT_FILTER).to_owned();
        let promisc = config.get_bool("live.promisc").unwrap_or(true);
        let immediate = config.get_bool("live.immediate").unwrap_or(true);
        let timeout_ms = config_i32(config, "live.timeout", DEFAULT_TIMEOUT_MS)?;
        let snaplen = config_i32(config, "live.snaplen", DEFAULT_SNAPLEN)?;
        let buffer_size = get_buffer_size(config)?;

        Ok(CaptureWorker {
            interface,
            filter,
            promisc,
            immediate,
            timeout_ms,
            snaplen,
            buffer_size,
            sink,
            control: CaptureControl::new(shutdown),
            stats: CaptureStats::default(),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn state(&self) -> CaptureState {
        self.control.state()
    }

    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    /// Handle to stop the worker and follow its state from another thread
    pub fn control(&self) -> CaptureControl {
        self.control.clone()
    }

    pub fn request_stop(&self) {
        self.control.request_stop();
    }

    fn open(&self) -> Result<Capture<Active>, CaptureError> {
        let open_error = |source| CaptureError::Open {
            device: self.interface.clone(),
            source,
        };
        let cap = Capture::from_device(self.interface.as_str())
            .map_err(open_error)?
            .promisc(self.promisc)
            .immediate_mode(self.immediate)
            .snaplen(self.snaplen)
            .timeout(self.timeout_ms);
        let mut cap = cap.open().map_err(open_error)?;

        cap.filter(&self.filter, true)
            .map_err(|source| CaptureError::Filter {
                filter: self.filter.clone(),
                source,
            })?;

        let link_type = cap.get_datalink();
        if link_type.0 != LINKTYPE_ETHERNET {
            warn!(
                "{}: link type {} is not Ethernet, frames will not decode",
                self.interface, link_type.0
            );
        }
        Ok(cap)
    }

    /// Open the capture handle and loop until shutdown is requested.
    ///
    /// Errors are local to the worker: the caller reports them, the server keeps running.
    pub fn run(&mut self) -> Result<CaptureStats, CaptureError> {
        let mut cap = match self.open() {
            Ok(cap) => cap,
            Err(e) => {
                self.control.set_state(CaptureState::Stopped);
                return Err(e);
            }
        };
        debug!(
            "Live mode: waiting for packets on {} (filter \"{}\")",
            self.interface, self.filter
        );
        self.run_with(&mut cap)
    }

    /// Capture loop over an already opened source. The stop request is checked
    /// between reads, so the loop ends at the latest one read timeout after it.
    pub fn run_with<P: PacketSource>(
        &mut self,
        source: &mut P,
    ) -> Result<CaptureStats, CaptureError> {
        self.control.set_state(CaptureState::Capturing);
        while !self.control.is_stop_requested() {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.process_frame(frame);
                }
                Ok(None) => continue,
                Err(e) => {
                    debug!("Live mode: getting next packet failed: {e:?}");
                    self.control.set_state(CaptureState::Stopped);
                    return Err(e.into());
                }
            }
        }

        self.control.set_state(CaptureState::Stopping);
        source.finish();
        self.control.set_state(CaptureState::Stopped);
        info!(
            "capture stopped: {} frames, {} logged, {} skipped",
            self.stats.frames, self.stats.logged, self.stats.skipped
        );
        Ok(self.stats)
    }

    /// Decode one frame and log it if it carries TCP payload.
    ///
    /// Returns `true` if an entry was handed to the sink.
    pub fn process_frame(&mut self, frame: CapturedFrame) -> bool {
        self.process_frame_with(frame, &mut io::stdout())
    }

    /// Same as [`process_frame`](Self::process_frame), printing the notice to `console`.
    pub fn process_frame_with<W: Write>(&mut self, frame: CapturedFrame, console: &mut W) -> bool {
        self.stats.frames += 1;
        let event = match decode(frame.data) {
            DecodeOutcome::Event(event) => event,
            DecodeOutcome::NotApplicable => {
                self.stats.skipped += 1;
                return false;
            }
            DecodeOutcome::Malformed(reason) => {
                trace!("skipping frame ({} bytes): {reason}", frame.data.len());
                self.stats.skipped += 1;
                return false;
            }
        };
        if event.payload.is_empty() {
            return false;
        }

        let entry = LogEntry::captured(frame.timestamp, &event, self.buffer_size);
        let notice = entry.to_string();
        let logged = match self.sink.append(entry) {
            Ok(()) => {
                self.stats.logged += 1;
                true
            }
            Err(e) => {
                error!("Couldn't log captured segment: {e}");
                false
            }
        };
        write_notice(console, "Captured:", notice);
        logged
    }
}
