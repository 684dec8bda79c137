//! Local traffic logger: decoding of captured Ethernet/IPv4/TCP frames, the
//! shared append-only log sink, and the one-shot logging server.

mod config;
pub mod decoder;
mod error;
mod event;
pub mod server;
mod shutdown;
pub mod sink;

pub use config::*;
pub use decoder::{decode, DecodeOutcome};
pub use error::*;
pub use event::*;
pub use server::ConnectionServer;
pub use shutdown::*;
pub use sink::{FileSink, LogSink, LogWriter, SinkHandle};
