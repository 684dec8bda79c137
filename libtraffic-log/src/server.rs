//! One-shot logging server: every accepted connection is read once, logged and closed.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use chrono::Local;
use nix::sys::socket::{
    bind, listen, setsockopt, socket, sockopt, AddressFamily, SockFlag, SockType, SockaddrIn,
};
use tracing::{debug, error, info, trace};

use crate::config::{get_buffer_size, Config, DEFAULT_BACKLOG};
use crate::error::Error;
use crate::event::{bounded_copy, write_notice, LogEntry};
use crate::shutdown::{ShutdownHandle, ShutdownToken};
use crate::sink::LogSink;

/// Listen on the IPv4 wildcard address with SO_REUSEADDR and an explicit backlog
fn bind_listener(port: u16, backlog: usize) -> Result<TcpListener, Error> {
    let fd = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .map_err(Error::Socket)?;
    // SAFETY: fd was just returned by socket(2) and has no other owner
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };
    setsockopt(fd.as_raw_fd(), sockopt::ReuseAddr, &true).map_err(Error::Socket)?;
    let addr = SockaddrIn::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    bind(fd.as_raw_fd(), &addr).map_err(|source| Error::Bind { port, source })?;
    listen(fd.as_raw_fd(), backlog).map_err(Error::Listen)?;
    Ok(TcpListener::from(fd))
}

pub struct ConnectionServer<S: LogSink> {
    listener: TcpListener,
    local_addr: SocketAddr,
    buffer_size: usize,
    sink: S,
    shutdown: ShutdownToken,
}

impl<S: LogSink> ConnectionServer<S> {
    /// Bind the listening socket. Port 0 picks an ephemeral port.
    pub fn bind(
        port: u16,
        config: &Config,
        sink: S,
        shutdown: ShutdownToken,
    ) -> Result<Self, Error> {
        let buffer_size = get_buffer_size(config)?;
        let backlog = config
            .get_usize("server.backlog")
            .unwrap_or(DEFAULT_BACKLOG);
        let listener = bind_listener(port, backlog)?;
        let local_addr = listener.local_addr()?;
        debug!("listening on {local_addr} (backlog {backlog})");
        Ok(ConnectionServer {
            listener,
            local_addr,
            buffer_size,
            sink,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Handle that stops this server's accept loop
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.shutdown.clone(), Some(self.local_addr))
    }

    /// Accept loop. Connections are served one at a time, until shutdown is requested.
    pub fn run(&self) -> Result<(), Error> {
        info!("accepting connections on {}", self.local_addr);
        while !self.shutdown.is_requested() {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    trace!("accepted connection from {peer}");
                    self.serve_connection(&mut stream, peer);
                    // stream dropped: connection closed after a single read
                }
                Err(e) => {
                    if self.shutdown.is_requested() {
                        break;
                    }
                    error!("Accept failed: {e}");
                }
            }
        }
        debug!("accept loop terminated");
        Ok(())
    }

    /// Read once from the connection and log what was received.
    ///
    /// Returns `true` if an entry was handed to the sink.
    pub fn serve_connection<R: Read>(&self, stream: &mut R, peer: SocketAddr) -> bool {
        self.serve_connection_with(stream, peer, &mut io::stdout())
    }

    /// Same as [`serve_connection`](Self::serve_connection), printing the notice to `console`.
    pub fn serve_connection_with<R: Read, W: Write>(
        &self,
        stream: &mut R,
        peer: SocketAddr,
        console: &mut W,
    ) -> bool {
        let mut buffer = vec![0u8; self.buffer_size];
        let bytes_read = match read_once(stream, &mut buffer[..self.buffer_size - 1]) {
            Ok(0) => {
                trace!("{peer}: no data");
                return false;
            }
            Ok(n) => n,
            Err(e) => {
                debug!("{peer}: read failed: {e}");
                return false;
            }
        };
        let mut text = vec![0u8; self.buffer_size];
        let len = bounded_copy(&mut text, &buffer[..bytes_read]);
        text.truncate(len);

        let entry = LogEntry::received(Local::now(), peer, text);
        let notice = entry.to_string();
        if let Err(e) = self.sink.append(entry) {
            error!("Couldn't log entry from {peer}: {e}");
        }
        write_notice(console, "Received from", notice);
        true
    }
}

fn read_once<R: Read>(stream: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match stream.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            res => return res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::net::TcpStream;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[derive(Default)]
    struct MemorySink {
        entries: Mutex<Vec<LogEntry>>,
    }

    impl LogSink for MemorySink {
        fn append(&self, entry: LogEntry) -> Result<(), Error> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    impl MemorySink {
        fn lines(&self) -> Vec<String> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.to_string())
                .collect()
        }
    }

    fn server(config: &Config) -> (ConnectionServer<Arc<MemorySink>>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let server =
            ConnectionServer::bind(0, config, Arc::clone(&sink), ShutdownToken::new()).unwrap();
        (server, sink)
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn serve_single_read() {
        let (server, sink) = server(&Config::default());
        let mut stream = Cursor::new(b"ping".to_vec()).chain(Cursor::new(b"pong".to_vec()));
        assert!(server.serve_connection(&mut stream, peer()));
        assert_eq!(sink.lines(), vec!["127.0.0.1:40000 - ping".to_owned()]);
    }

    struct FullConsole;

    impl Write for FullConsole {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("No space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn serve_prints_notice() {
        let (server, sink) = server(&Config::default());
        let mut console = Vec::new();
        let mut stream = Cursor::new(b"ping".to_vec());
        assert!(server.serve_connection_with(&mut stream, peer(), &mut console));
        assert_eq!(console, b"Received from 127.0.0.1:40000 - ping\n");
        assert_eq!(sink.lines().len(), 1);
    }

    #[test]
    fn serve_with_unwritable_console() {
        let (server, sink) = server(&Config::default());
        for _ in 0..2 {
            let mut stream = Cursor::new(b"ping".to_vec());
            assert!(server.serve_connection_with(&mut stream, peer(), &mut FullConsole));
        }
        assert_eq!(sink.lines(), vec!["127.0.0.1:40000 - ping".to_owned(); 2]);
    }

    #[test]
    fn serve_empty_read() {
        let (server, sink) = server(&Config::default());
        let mut stream = Cursor::new(Vec::new());
        assert!(!server.serve_connection(&mut stream, peer()));
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn serve_truncates_to_buffer() {
        let mut config = Config::default();
        config.set("buffer_size", 8i64);
        let (server, sink) = server(&config);
        let mut stream = Cursor::new(b"0123456789".to_vec());
        assert!(server.serve_connection(&mut stream, peer()));
        assert_eq!(sink.lines(), vec!["127.0.0.1:40000 - 0123456".to_owned()]);
    }

    #[test]
    fn bind_conflict() {
        let (first, _sink) = server(&Config::default());
        let sink = Arc::new(MemorySink::default());
        let res = ConnectionServer::bind(first.port(), &Config::default(), sink, ShutdownToken::new());
        assert!(matches!(res, Err(Error::Bind { .. })));
    }

    #[test]
    fn accept_loop_logs_and_stops() {
        let (server, sink) = server(&Config::default());
        let port = server.port();
        let handle = server.shutdown_handle();
        let server = thread::spawn(move || {
            server.run().unwrap();
        });

        let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let client_port = client.local_addr().unwrap().port();
        client.write_all(b"ping").unwrap();
        drop(client);
        // zero-byte connection
        drop(TcpStream::connect(("127.0.0.1", port)).unwrap());

        // connections are served in order; the wake-up connection comes last
        let mut waited = 0;
        while sink.lines().is_empty() && waited < 500 {
            thread::sleep(std::time::Duration::from_millis(10));
            waited += 1;
        }
        handle.trigger();
        handle.trigger();
        server.join().unwrap();

        assert_eq!(
            sink.lines(),
            vec![format!("127.0.0.1:{client_port} - ping")]
        );
    }
}
