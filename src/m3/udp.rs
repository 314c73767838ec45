//! UDP datagram transport with a dedicated I/O thread.
//!
//! The transport comes in two kinds: a write-only [`Client`] that connects
//! to a collector and a read-only [`Server`] that binds and receives (used
//! by test collectors). Public calls stage bytes in a main buffer under the
//! transport lock; a single I/O thread owns the socket and services sends
//! and receives through a help buffer, handing completions back over a
//! condition variable.
//!
//! [`Client`]: UdpTransportKind::Client
//! [`Server`]: UdpTransportKind::Server

use std::{
    io::{self, Read, Write},
    net::{ToSocketAddrs, UdpSocket},
    sync::Arc,
    thread,
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::error;

use crate::error::{Error, ErrorKind, Result};

/// The theoretical maximum UDP payload size in bytes.
pub const MAX_UDP_PACKET_SIZE: usize = 65507;

/// How often the server I/O thread re-checks for shutdown while idle.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Which half of the duplex a transport implements.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UdpTransportKind {
    /// Connects and writes; reads are rejected.
    Client,
    /// Binds and reads; writes are rejected.
    Server,
}

struct TransportState {
    open: bool,
    in_progress: bool,
    // Set by flush when a packet is ready, cleared by the I/O thread when it
    // takes the buffer; keeps a completed send from re-triggering the loop
    // before the flusher has woken.
    submitted: bool,
    sends_completed: u64,
    main_buffer: Vec<u8>,
    help_buffer: Vec<u8>,
}

/// An async-behind-a-thread UDP transport.
///
/// One datagram is sent per [`flush`](UdpTransport::flush); reads consume a
/// FIFO byte stream assembled from received datagrams.
///
/// The I/O thread keeps its own reference to the transport, so an owner
/// must call [`close`](UdpTransport::close) to stop it; the M3 reporter
/// does this when it shuts down.
pub struct UdpTransport {
    kind: UdpTransportKind,
    max_packet_size: usize,
    socket: Arc<UdpSocket>,
    state: Mutex<TransportState>,
    submit_cv: Condvar,
    receive_cv: Condvar,
    io_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl UdpTransport {
    /// Opens a transport to (client) or on (server) `host:port` and starts
    /// its I/O thread.
    pub fn open(
        host: &str,
        port: u16,
        kind: UdpTransportKind,
        max_packet_size: u16,
    ) -> Result<Arc<Self>> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| Error::invalid("failed to resolve transport address").set_source(e))?
            .next()
            .ok_or_else(|| Error::invalid("transport address resolved to nothing"))?;

        let socket = match kind {
            UdpTransportKind::Client => {
                let socket = UdpSocket::bind(("0.0.0.0", 0))?;
                socket.connect(addr)?;
                socket
            }
            UdpTransportKind::Server => {
                let socket = UdpSocket::bind(addr)?;
                socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
                socket
            }
        };

        let max_packet_size = max_packet_size as usize;
        let transport = Arc::new(Self {
            kind,
            max_packet_size,
            socket: Arc::new(socket),
            state: Mutex::new(TransportState {
                open: true,
                in_progress: false,
                submitted: false,
                sends_completed: 0,
                // Room for a handful of packets before either buffer regrows.
                main_buffer: Vec::with_capacity(max_packet_size * 5),
                help_buffer: Vec::with_capacity(max_packet_size * 5),
            }),
            submit_cv: Condvar::new(),
            receive_cv: Condvar::new(),
            io_thread: Mutex::new(None),
        });

        let io_transport = transport.clone();
        let handle = thread::Builder::new()
            .name("udp-io".to_owned())
            .spawn(move || match kind {
                UdpTransportKind::Client => io_transport.write_loop(),
                UdpTransportKind::Server => io_transport.read_loop(),
            })
            .map_err(|e| Error::unexpected("failed to spawn UDP I/O thread").set_source(e))?;
        *transport.io_thread.lock() = Some(handle);

        Ok(transport)
    }

    /// Returns the local port the transport's socket is bound to.
    pub fn local_port(&self) -> Result<u16> {
        let state = self.state.lock();
        if !state.open {
            return Err(Error::not_open("transport is not open"));
        }
        Ok(self.socket.local_addr()?.port())
    }

    /// Appends `buf` to the outgoing buffer. Client transports only.
    pub fn write(&self, buf: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::not_open("transport is not open"));
        }
        if self.kind != UdpTransportKind::Client {
            return Err(Error::unsupported(
                "UDP transport only supports write operations when initialized as a client",
            ));
        }
        state.main_buffer.extend_from_slice(buf);
        Ok(())
    }

    /// Hands the buffered bytes to the I/O thread as one datagram and waits
    /// for the send to complete. Client transports only; one flush may be
    /// in flight at a time.
    ///
    /// A buffer larger than [`MAX_UDP_PACKET_SIZE`] is discarded and the
    /// flush fails.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::not_open("transport is not open"));
        }
        if self.kind != UdpTransportKind::Client {
            return Err(Error::unsupported(
                "UDP transport only supports write operations when initialized as a client",
            ));
        }
        if state.in_progress {
            return Err(Error::busy("UDP transport does not support concurrent send operations"));
        }

        let size = state.main_buffer.len();
        if size == 0 {
            return Ok(());
        }
        if size > MAX_UDP_PACKET_SIZE {
            state.main_buffer.clear();
            return Err(Error::new(
                ErrorKind::PacketTooLarge,
                format!("UDP transport buffer size {size} exceeds maximum UDP packet size"),
            ));
        }

        state.in_progress = true;
        state.submitted = true;
        let target = state.sends_completed + 1;
        self.submit_cv.notify_one();
        while state.sends_completed < target && state.open {
            self.receive_cv.wait(&mut state);
        }
        state.in_progress = false;
        if !state.open {
            return Err(Error::not_open("transport closed during flush"));
        }
        Ok(())
    }

    /// Blocks until received bytes are available, then consumes up to
    /// `buf.len()` of them FIFO. Server transports only; one read may be in
    /// flight at a time.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        if !state.open {
            return Err(Error::not_open("transport is not open"));
        }
        if self.kind != UdpTransportKind::Server {
            return Err(Error::unsupported(
                "UDP transport only supports read operations when initialized as a server",
            ));
        }
        if state.in_progress {
            return Err(Error::busy("UDP transport does not support concurrent read operations"));
        }

        state.in_progress = true;
        while state.open && state.main_buffer.is_empty() {
            self.receive_cv.wait(&mut state);
        }
        if !state.open {
            state.in_progress = false;
            return Err(Error::not_open("transport closed during read"));
        }

        let n = buf.len().min(state.main_buffer.len());
        buf[..n].copy_from_slice(&state.main_buffer[..n]);
        state.main_buffer.drain(..n);
        state.in_progress = false;
        Ok(n)
    }

    /// Wakes every waiter, stops the I/O thread, and closes the socket.
    /// Every public method fails with a not-open error afterwards.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if !state.open {
                return;
            }
            state.open = false;
        }
        self.receive_cv.notify_all();
        self.submit_cv.notify_all();
        if let Some(handle) = self.io_thread.lock().take() {
            let _ = handle.join();
        }
    }

    fn write_loop(self: Arc<Self>) {
        loop {
            let mut state = self.state.lock();
            while state.open && !state.submitted {
                self.submit_cv.wait(&mut state);
            }
            if !state.open {
                return;
            }
            state.submitted = false;

            // Hand off main -> help so producers can keep buffering while the
            // datagram is in flight. The help buffer may still hold bytes
            // from a previously failed send.
            let mut packet = std::mem::take(&mut state.help_buffer);
            packet.append(&mut state.main_buffer);
            drop(state);

            let mut keep = Vec::new();
            match self.socket.send(&packet) {
                Ok(sent) => {
                    if sent < packet.len() {
                        packet.drain(..sent);
                        keep = packet;
                    }
                }
                Err(e) => {
                    error!("Encountered error sending Thrift UDP packet: {e}");
                    keep = packet;
                }
            }

            let mut state = self.state.lock();
            state.help_buffer = keep;
            state.sends_completed += 1;
            drop(state);
            self.receive_cv.notify_all();
        }
    }

    fn read_loop(self: Arc<Self>) {
        let mut help = vec![0u8; self.max_packet_size.max(1)];
        loop {
            if !self.state.lock().open {
                return;
            }
            match self.socket.recv(&mut help) {
                Ok(n) if n > 0 => {
                    let mut state = self.state.lock();
                    state.main_buffer.extend_from_slice(&help[..n]);
                    drop(state);
                    self.receive_cv.notify_one();
                }
                Ok(_) => {}
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
                Err(e) => {
                    if self.state.lock().open {
                        error!("Encountered error receiving Thrift UDP packet: {e}");
                    }
                }
            }
        }
    }
}

/// An [`io::Write`] view of a client transport, so it can back a Thrift
/// output protocol. Protocol-level flushes send one datagram.
pub struct UdpWriter {
    transport: Arc<UdpTransport>,
}

impl UdpWriter {
    /// Wraps a client transport.
    pub fn new(transport: Arc<UdpTransport>) -> Self {
        Self { transport }
    }
}

impl Write for UdpWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.transport.write(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()?;
        Ok(())
    }
}

/// An [`io::Read`] view of a server transport, so it can back a Thrift
/// input protocol.
pub struct UdpReader {
    transport: Arc<UdpTransport>,
}

impl UdpReader {
    /// Wraps a server transport.
    pub fn new(transport: Arc<UdpTransport>) -> Self {
        Self { transport }
    }
}

impl Read for UdpReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.transport.read(buf)?;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Arc<UdpTransport>, Arc<UdpTransport>) {
        let server = UdpTransport::open("127.0.0.1", 0, UdpTransportKind::Server, 1440).unwrap();
        let port = server.local_port().unwrap();
        let client = UdpTransport::open("127.0.0.1", port, UdpTransportKind::Client, 1440).unwrap();
        (client, server)
    }

    #[test]
    fn test_round_trip_datagram() {
        let (client, server) = pair();

        client.write(b"hello udp").unwrap();
        client.flush().unwrap();

        let mut buf = [0u8; 64];
        let n = server.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello udp");

        client.close();
        server.close();
    }

    #[test]
    fn test_reads_are_fifo_across_datagrams() {
        let (client, server) = pair();

        client.write(b"one").unwrap();
        client.flush().unwrap();
        client.write(b"two").unwrap();
        client.flush().unwrap();

        let mut collected = Vec::new();
        while collected.len() < 6 {
            let mut buf = [0u8; 2];
            let n = server.read(&mut buf).unwrap();
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"onetwo");

        client.close();
        server.close();
    }

    #[test]
    fn test_kind_misuse_is_rejected() {
        let (client, server) = pair();

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(server.write(b"nope").unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(server.flush().unwrap_err().kind(), ErrorKind::Unsupported);

        client.close();
        server.close();
    }

    #[test]
    fn test_flush_empty_buffer_is_noop() {
        let (client, server) = pair();
        client.flush().unwrap();
        client.close();
        server.close();
    }

    #[test]
    fn test_over_mtu_flush_clears_and_fails() {
        let (client, server) = pair();

        client.write(&vec![0u8; MAX_UDP_PACKET_SIZE + 1]).unwrap();
        let err = client.flush().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PacketTooLarge);

        // The buffer was dropped, so the next flush has nothing to send.
        client.flush().unwrap();

        client.close();
        server.close();
    }

    #[test]
    fn test_operations_after_close_fail() {
        let (client, server) = pair();
        client.close();
        server.close();

        assert_eq!(client.write(b"x").unwrap_err().kind(), ErrorKind::NotOpen);
        assert_eq!(client.flush().unwrap_err().kind(), ErrorKind::NotOpen);
        assert_eq!(client.local_port().unwrap_err().kind(), ErrorKind::NotOpen);
        let mut buf = [0u8; 8];
        assert_eq!(server.read(&mut buf).unwrap_err().kind(), ErrorKind::NotOpen);

        // Close is idempotent.
        client.close();
    }

    #[test]
    fn test_close_wakes_blocked_reader() {
        let (client, server) = pair();

        let reader = server.clone();
        let handle = std::thread::spawn(move || {
            let mut buf = [0u8; 8];
            reader.read(&mut buf)
        });

        std::thread::sleep(Duration::from_millis(50));
        server.close();

        let err = handle.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotOpen);
        client.close();
    }
}
