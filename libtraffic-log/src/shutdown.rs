use std::net::{Ipv4Addr, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

/// Shared stop request, handed to every activity at construction.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    requested: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Returns `true` only for the call that flipped the flag.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::SeqCst)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Triggers shutdown and unblocks a listener waiting in `accept()`.
///
/// Cloneable and safe to call from a signal handler thread, any number of times.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    token: ShutdownToken,
    wake_addr: Option<SocketAddr>,
}

impl ShutdownHandle {
    pub fn new(token: ShutdownToken, wake_addr: Option<SocketAddr>) -> Self {
        ShutdownHandle { token, wake_addr }
    }

    pub fn token(&self) -> &ShutdownToken {
        &self.token
    }

    /// Flip the shared flag, then poke the listener with an empty connection.
    pub fn trigger(&self) {
        if !self.token.request() {
            trace!("shutdown already requested");
            return;
        }
        debug!("shutdown requested");
        if let Some(addr) = self.wake_addr {
            let addr = match addr {
                SocketAddr::V4(a) if a.ip().is_unspecified() => {
                    SocketAddr::from((Ipv4Addr::LOCALHOST, a.port()))
                }
                a => a,
            };
            // the accept loop sees a zero-byte read, then the flag
            if let Err(e) = TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
                debug!("could not wake listener on {addr}: {e}");
            }
        }
    }
}
