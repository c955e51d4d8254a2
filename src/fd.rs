//! Descriptor-backed connectors: tap character devices and UDP sockets carrying
//! link-layer frames, and TCP streams carrying application bytes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, trace};

use crate::bpf::BpfProgram;
use crate::connector::{Connector, Frame, PollOutcome};
use crate::error::Error;
use crate::link::LinkType;
use crate::registry::ProtocolRegistry;

/// Largest frame read in one call.
pub const MAX_FRAME: usize = 65535;

/// Wait for `fd` to become readable. `None` waits forever.
pub fn poll_readable(fd: RawFd, timeout: Option<Duration>) -> Result<PollOutcome, Error> {
    let millis = match timeout {
        Some(t) => t.as_millis().min(i32::MAX as u128) as libc::c_int,
        None => -1,
    };
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        // SAFETY: `pfd` is a valid pollfd for the duration of the call and the count is 1.
        let n = unsafe { libc::poll(&mut pfd, 1, millis) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if n == 0 {
            return Ok(PollOutcome::Timeout);
        }
        if pfd.revents & libc::POLLIN != 0 {
            return Ok(PollOutcome::Ready);
        }
        if pfd.revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
            return Ok(PollOutcome::Eof);
        }
        return Ok(PollOutcome::Timeout);
    }
}

/// Set or clear `O_NONBLOCK` on `fd`, returning whether it was set before.
pub fn set_fd_nonblocking(fd: RawFd, nonblocking: bool) -> Result<bool, Error> {
    // SAFETY: F_GETFL only reads the descriptor's status flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error().into());
    }
    let was = flags & libc::O_NONBLOCK != 0;
    let wanted = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if wanted != flags {
        // SAFETY: F_SETFL with flags derived from F_GETFL on the same descriptor.
        if unsafe { libc::fcntl(fd, libc::F_SETFL, wanted) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
    }
    Ok(was)
}

fn now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// `Ok(None)` for reads that would block.
fn would_block<T>(r: io::Result<T>) -> Result<Option<T>, Error> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// A character device delivering one frame per read, such as `/dev/net/tun` in tap
/// mode or a BSD `/dev/tapN`.
pub struct TapConnector {
    file: File,
    registry: Arc<ProtocolRegistry>,
    link: LinkType,
    filter: Option<BpfProgram>,
    buf: Vec<u8>,
}

impl TapConnector {
    pub fn open(path: impl AsRef<Path>, link: LinkType, registry: Arc<ProtocolRegistry>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        debug!(path = %path.display(), ?link, "tap opened");
        Ok(Self::from_file(file, link, registry))
    }

    /// Wrap an already configured descriptor.
    pub fn from_file(file: File, link: LinkType, registry: Arc<ProtocolRegistry>) -> Self {
        TapConnector {
            file,
            registry,
            link,
            filter: None,
            buf: vec![0; MAX_FRAME],
        }
    }
}

impl AsRawFd for TapConnector {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Connector for TapConnector {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    fn read(&mut self) -> Result<Option<Frame>, Error> {
        loop {
            let Some(n) = would_block(self.file.read(&mut self.buf))? else {
                return Ok(None);
            };
            if n == 0 {
                return Ok(None);
            }
            let data = &self.buf[..n];
            if self.filter.as_ref().map_or(true, |f| f.accepts(data)) {
                return Ok(Some(Frame::new(data.to_vec(), now())));
            }
            trace!(len = n, "frame rejected by filter");
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        Ok(self.file.write(bytes)?)
    }

    fn poll_read(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, Error> {
        poll_readable(self.file.as_raw_fd(), timeout)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<bool, Error> {
        set_fd_nonblocking(self.file.as_raw_fd(), nonblocking)
    }

    fn set_filter(&mut self, filter: BpfProgram) -> Result<(), Error> {
        self.filter = Some(filter);
        Ok(())
    }
}

/// Link-layer frames carried one per datagram over UDP. With
/// [`decode_as`](UdpConnector::decode_as) the datagrams are plain payload instead.
pub struct UdpConnector {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
    registry: Arc<ProtocolRegistry>,
    link: LinkType,
    protocol: Option<String>,
    filter: Option<BpfProgram>,
    buf: Vec<u8>,
}

impl UdpConnector {
    pub fn bind(addr: impl ToSocketAddrs, link: LinkType, registry: Arc<ProtocolRegistry>) -> Result<Self, Error> {
        let socket = UdpSocket::bind(addr)?;
        debug!(local = ?socket.local_addr().ok(), ?link, "udp connector bound");
        Ok(UdpConnector {
            socket,
            peer: None,
            registry,
            link,
            protocol: None,
            filter: None,
            buf: vec![0; MAX_FRAME],
        })
    }

    /// Destination for writes.
    pub fn connect(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Decode datagrams as `protocol` rather than the link type's protocol.
    pub fn decode_as(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }
}

impl Connector for UdpConnector {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn first_protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or(self.link.protocol())
    }

    fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    fn read(&mut self) -> Result<Option<Frame>, Error> {
        loop {
            let Some((n, from)) = would_block(self.socket.recv_from(&mut self.buf))? else {
                return Ok(None);
            };
            let data = &self.buf[..n];
            if self.filter.as_ref().map_or(true, |f| f.accepts(data)) {
                trace!(len = n, %from, "datagram");
                return Ok(Some(Frame::new(data.to_vec(), now())));
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        let peer = self
            .peer
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no peer address"))?;
        Ok(self.socket.send_to(bytes, peer)?)
    }

    fn poll_read(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, Error> {
        poll_readable(self.socket.as_raw_fd(), timeout)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<bool, Error> {
        set_fd_nonblocking(self.socket.as_raw_fd(), nonblocking)
    }

    fn set_filter(&mut self, filter: BpfProgram) -> Result<(), Error> {
        self.filter = Some(filter);
        Ok(())
    }
}

/// Application bytes over a connected TCP stream. A read delivers whatever the
/// socket has buffered as one frame, decoded as `payload` unless
/// [`decode_as`](TcpConnector::decode_as) says otherwise. There is no link header.
pub struct TcpConnector {
    stream: TcpStream,
    registry: Arc<ProtocolRegistry>,
    protocol: String,
    filter: Option<BpfProgram>,
    buf: Vec<u8>,
    eof: bool,
}

impl TcpConnector {
    pub fn connect(addr: impl ToSocketAddrs, registry: Arc<ProtocolRegistry>) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr)?;
        debug!(peer = ?stream.peer_addr().ok(), "tcp connector connected");
        Ok(Self::from_stream(stream, registry))
    }

    /// Wrap an accepted or otherwise established stream.
    pub fn from_stream(stream: TcpStream, registry: Arc<ProtocolRegistry>) -> Self {
        TcpConnector {
            stream,
            registry,
            protocol: "payload".to_string(),
            filter: None,
            buf: vec![0; MAX_FRAME],
            eof: false,
        }
    }

    pub fn decode_as(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.stream.local_addr()?)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.stream.peer_addr()?)
    }
}

impl AsRawFd for TcpConnector {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Connector for TcpConnector {
    fn link_type(&self) -> LinkType {
        LinkType::Raw
    }

    fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    fn first_protocol(&self) -> &str {
        &self.protocol
    }

    fn read(&mut self) -> Result<Option<Frame>, Error> {
        while !self.eof {
            let Some(n) = would_block(self.stream.read(&mut self.buf))? else {
                return Ok(None);
            };
            if n == 0 {
                debug!(peer = ?self.stream.peer_addr().ok(), "tcp stream closed by peer");
                self.eof = true;
                break;
            }
            let data = &self.buf[..n];
            if self.filter.as_ref().map_or(true, |f| f.accepts(data)) {
                trace!(len = n, "stream read");
                return Ok(Some(Frame::new(data.to_vec(), now())));
            }
            trace!(len = n, "stream bytes rejected by filter");
        }
        Ok(None)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, Error> {
        self.stream.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn poll_read(&mut self, timeout: Option<Duration>) -> Result<PollOutcome, Error> {
        if self.eof {
            return Ok(PollOutcome::Eof);
        }
        poll_readable(self.stream.as_raw_fd(), timeout)
    }

    fn close(&mut self) -> Result<(), Error> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<bool, Error> {
        set_fd_nonblocking(self.stream.as_raw_fd(), nonblocking)
    }

    fn set_filter(&mut self, filter: BpfProgram) -> Result<(), Error> {
        self.filter = Some(filter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    use crate::chain::Chain;
    use crate::expect::{expect, ExpectConfig};

    fn pair() -> (UdpConnector, UdpConnector) {
        let registry = Arc::new(ProtocolRegistry::builtin());
        let a = UdpConnector::bind("127.0.0.1:0", LinkType::Raw, Arc::clone(&registry)).unwrap();
        let b = UdpConnector::bind("127.0.0.1:0", LinkType::Raw, registry).unwrap();
        let (a_addr, b_addr) = (a.local_addr().unwrap(), b.local_addr().unwrap());
        (a.connect(b_addr), b.connect(a_addr))
    }

    #[test]
    fn nonblocking_mode_is_reported_and_restored() {
        let (mut a, _) = pair();
        assert!(!a.set_nonblocking(true).unwrap());
        assert!(a.set_nonblocking(false).unwrap());
    }

    #[test]
    fn idle_socket_times_out() {
        let (mut a, _) = pair();
        let outcome = a.poll_read(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(outcome, PollOutcome::Timeout);
        a.set_nonblocking(true).unwrap();
        assert!(a.read().unwrap().is_none());
    }

    #[test]
    fn chains_cross_the_socket() {
        let (mut a, mut b) = pair();
        let registry = ProtocolRegistry::builtin();
        let mut chain = Chain::from(registry.packet("ipv4").unwrap());
        chain.get_mut(0).unwrap().set("ttl", 7u8).unwrap();
        chain.fixup().unwrap();
        a.write_chain(&mut chain).unwrap();

        assert_eq!(b.poll_read(Some(Duration::from_secs(2))).unwrap(), PollOutcome::Ready);
        let got = b.read_chain().unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].get_int("ttl").unwrap(), 7);
        assert!(chain.matches(&got));
    }

    #[test]
    fn plain_datagrams_decode_as_payload() {
        let (mut a, b) = pair();
        let mut b = b.decode_as("payload");
        a.write(b"ping").unwrap();
        assert_eq!(b.poll_read(Some(Duration::from_secs(2))).unwrap(), PollOutcome::Ready);
        let got = b.read_chain().unwrap().unwrap();
        assert_eq!(got[0].name(), "payload");
        assert_eq!(got[0].get_bytes("payload").unwrap(), b"ping");
    }

    fn tcp_pair() -> (TcpConnector, TcpConnector) {
        let registry = Arc::new(ProtocolRegistry::builtin());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpConnector::connect(listener.local_addr().unwrap(), Arc::clone(&registry)).unwrap();
        let (stream, _) = listener.accept().unwrap();
        (client, TcpConnector::from_stream(stream, registry))
    }

    #[test]
    fn stream_bytes_arrive_as_payload_until_the_peer_closes() {
        let (mut client, mut server) = tcp_pair();
        assert_eq!(client.peer_addr().unwrap(), server.local_addr().unwrap());
        let registry = ProtocolRegistry::builtin();
        let mut payload = registry.packet("payload").unwrap();
        payload.set("payload", &b"hello"[..]).unwrap();
        assert_eq!(client.write_chain(&mut Chain::from(payload)).unwrap(), 5);

        assert_eq!(server.poll_read(Some(Duration::from_secs(2))).unwrap(), PollOutcome::Ready);
        let got = server.read_chain().unwrap().unwrap();
        assert_eq!(got[0].name(), "payload");
        assert_eq!(got[0].get_bytes("payload").unwrap(), b"hello");

        client.close().unwrap();
        assert_eq!(server.poll_read(Some(Duration::from_secs(2))).unwrap(), PollOutcome::Ready);
        assert!(server.read().unwrap().is_none());
        assert_eq!(server.poll_read(Some(Duration::ZERO)).unwrap(), PollOutcome::Eof);
        assert!(matches!(
            expect(&mut server, &[], &ExpectConfig::new()),
            Err(Error::Eof)
        ));
    }

    #[test]
    fn stream_decoded_as_ipv4() {
        let (mut client, server) = tcp_pair();
        let mut server = server.decode_as("ipv4");
        let registry = ProtocolRegistry::builtin();
        let mut chain = registry.packet("ipv4").unwrap() / registry.packet("udp").unwrap();
        chain.fixup().unwrap();
        client.write_chain(&mut chain).unwrap();

        assert_eq!(server.poll_read(Some(Duration::from_secs(2))).unwrap(), PollOutcome::Ready);
        let got = server.read_chain().unwrap().unwrap();
        assert_eq!(got[0].name(), "ipv4");
        assert_eq!(got[1].name(), "udp");
        assert!(chain.matches(&got));
    }
}
