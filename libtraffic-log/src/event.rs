use std::borrow::Cow;
use std::fmt;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use chrono::{DateTime, Local};
use tracing::debug;

/// Format of the timestamp at the start of each log line
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A link-layer frame as delivered by the capture subsystem. Only valid for
/// the duration of one capture callback.
#[derive(Clone, Copy, Debug)]
pub struct CapturedFrame<'a> {
    pub data: &'a [u8],
    /// Receipt time, as reported by the capture subsystem
    pub timestamp: DateTime<Local>,
}

/// Header fields and payload of a decoded TCP segment. The payload borrows the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParsedTcpEvent<'a> {
    pub source_ip: Ipv4Addr,
    pub source_port: u16,
    pub dest_ip: Ipv4Addr,
    pub dest_port: u16,
    pub payload: &'a [u8],
}

impl ParsedTcpEvent<'_> {
    pub fn source(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.source_ip, self.source_port)
    }

    pub fn destination(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.dest_ip, self.dest_port)
    }
}

/// Copy `src` into `dst` as C text: copying stops at the first NUL byte of
/// `src`, and the last byte of `dst` is always left for the terminator.
///
/// Returns the number of bytes copied. Over-long input is truncated, never an error.
pub fn bounded_copy(dst: &mut [u8], src: &[u8]) -> usize {
    let limit = dst.len().saturating_sub(1);
    let src = &src[..src.len().min(limit)];
    let len = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    dst[..len].copy_from_slice(&src[..len]);
    if let Some(terminator) = dst.get_mut(len) {
        *terminator = 0;
    }
    len
}

/// Bounded text of `data` for a buffer of `buffer_size` bytes
pub fn bounded_text(data: &[u8], buffer_size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; buffer_size];
    let len = bounded_copy(&mut buf, data);
    buf.truncate(len);
    buf
}

/// Print a console notice. A console that cannot be written to only loses the notice.
pub fn write_notice<W: Write, D: fmt::Display>(console: &mut W, label: &str, what: D) {
    if let Err(e) = writeln!(console, "{label} {what}") {
        debug!("console notice dropped: {e}");
    }
}

/// One persisted line describing a network event.
///
/// Captured segments carry both endpoints, server connections only the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub source: SocketAddr,
    pub dest: Option<SocketAddr>,
    /// Raw text bytes, inserted as-is in the line
    pub text: Vec<u8>,
}

impl LogEntry {
    /// Entry for a captured TCP segment
    pub fn captured(
        timestamp: DateTime<Local>,
        event: &ParsedTcpEvent,
        buffer_size: usize,
    ) -> LogEntry {
        LogEntry {
            timestamp,
            source: SocketAddr::V4(event.source()),
            dest: Some(SocketAddr::V4(event.destination())),
            text: bounded_text(event.payload, buffer_size),
        }
    }

    /// Entry for data received by the logging server
    pub fn received(timestamp: DateTime<Local>, peer: SocketAddr, text: Vec<u8>) -> LogEntry {
        LogEntry {
            timestamp,
            source: peer,
            dest: None,
            text,
        }
    }

    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }

    /// Render the complete line, including the trailing newline, so that it
    /// can be written with a single append.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(self.text.len() + 80);
        // writing to a Vec cannot fail
        let _ = write!(
            line,
            "[{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.endpoints()
        );
        line.extend_from_slice(b" - ");
        line.extend_from_slice(&self.text);
        line.push(b'\n');
        line
    }

    fn endpoints(&self) -> Endpoints<'_> {
        Endpoints(self)
    }
}

struct Endpoints<'a>(&'a LogEntry);

impl fmt::Display for Endpoints<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.dest {
            Some(dest) => write!(f, "{} -> {}", self.0.source, dest),
            None => write!(f, "{}", self.0.source),
        }
    }
}

/// Console form of the entry, without timestamp
impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}", self.endpoints(), self.text_lossy())
    }
}
