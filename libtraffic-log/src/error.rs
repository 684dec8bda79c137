use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Failed to create socket: {0}")]
    Socket(#[source] nix::Error),
    #[error("Bind failed on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: nix::Error,
    },
    #[error("Failed to listen: {0}")]
    Listen(#[source] nix::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Log sink is closed")]
    SinkClosed,
}
