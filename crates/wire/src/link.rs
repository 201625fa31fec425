//! Client side of a server connection.
//!
//! [`ServerLink::connect`] runs the bounded, blocking handshake and always
//! returns a link; its [`LinkState`] says whether the server can be used.
//! After that every operation is a poll driven by the caller's main loop.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::capture::CaptureWriter;
use crate::codes::{MsgCode, NO_PLAYER};
use crate::config::LinkConfig;
use crate::error::{JoinError, LinkError};
use crate::join::{EnterInfo, Rejection};
use crate::message::{HEADER_LEN, MAX_PACKET_LEN, NetMessage, split_frame};
use crate::pack::Unpacker;

pub const DEFAULT_PORT: u16 = 5154;

/// Sent by the client right after the TCP connect.
pub const CONNECT_HEADER: &[u8] = b"BZFLAG\r\n\r\n";
pub const PROTOCOL_VERSION: &[u8; 8] = b"BZFS0221";
/// Version reply of a server that banned this client.
pub const BAN_REFUSAL: &[u8; 8] = b"REFUSED:";
pub const MAX_REJECTION_LEN: usize = 511;

const POLL_INTERVAL: Duration = Duration::from_millis(1);
const MAX_DATAGRAM: usize = 2 * (HEADER_LEN + MAX_PACKET_LEN);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Okay,
    SocketError,
    Rejected,
    BadVersion,
    Hungup,
    CrippledVersion,
    Refused,
}

impl LinkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Okay => "connected",
            LinkState::SocketError => "could not connect",
            LinkState::Rejected => "server is full",
            LinkState::BadVersion => "incompatible server version",
            LinkState::Hungup => "server hung up",
            LinkState::CrippledVersion => "crippled server version",
            LinkState::Refused => "refused by server",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub udp_messages_sent: u64,
    pub udp_messages_received: u64,
}

pub struct ServerLink {
    state: LinkState,
    config: LinkConfig,
    tcp: Option<TcpStream>,
    udp: Option<UdpSocket>,
    udp_inbound: bool,
    udp_outbound: bool,
    udp_pending: VecDeque<NetMessage>,
    player_id: u8,
    server_version: [u8; 8],
    rejection_message: String,
    capture: Option<CaptureWriter<BufWriter<File>>>,
    stats: LinkStats,
}

impl ServerLink {
    pub fn connect<A: ToSocketAddrs>(addr: A, config: LinkConfig) -> Self {
        let mut link = Self {
            state: LinkState::SocketError,
            config,
            tcp: None,
            udp: None,
            udp_inbound: false,
            udp_outbound: false,
            udp_pending: VecDeque::new(),
            player_id: NO_PLAYER,
            server_version: [0; 8],
            rejection_message: String::new(),
            capture: None,
            stats: LinkStats::default(),
        };

        let addrs: Vec<SocketAddr> = match addr.to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                warn!("cannot resolve server address: {e}");
                return link;
            }
        };

        let timeout = link.config.connection_timeout;
        let Some(mut stream) = addrs
            .iter()
            .find_map(|addr| match TcpStream::connect_timeout(addr, timeout) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    debug!("connect to {addr} failed: {e}");
                    None
                }
            })
        else {
            return link;
        };

        link.state = match link.handshake(&mut stream) {
            Ok(state) => state,
            Err(e) => {
                debug!("handshake failed: {e}");
                LinkState::SocketError
            }
        };

        if link.state == LinkState::Okay {
            if let Err(e) = stream.set_read_timeout(Some(timeout)) {
                warn!("cannot configure server socket: {e}");
                link.state = LinkState::SocketError;
                return link;
            }
            info!(
                "connected to {} as player {}",
                stream
                    .peer_addr()
                    .map_or_else(|_| "server".to_string(), |a| a.to_string()),
                link.player_id
            );
            link.tcp = Some(stream);
            link.open_capture();
        }
        link
    }

    fn handshake(&mut self, stream: &mut TcpStream) -> io::Result<LinkState> {
        let deadline = Instant::now() + self.config.connection_timeout;
        stream.set_nodelay(true)?;
        stream.write_all(CONNECT_HEADER)?;

        let mut version = [0u8; 8];
        read_before(stream, &mut version, deadline)?;
        self.server_version = version;
        debug!("server version {}", String::from_utf8_lossy(&version));

        if &version != PROTOCOL_VERSION {
            if &version == BAN_REFUSAL {
                self.rejection_message = read_rejection(stream, deadline);
                return Ok(LinkState::Refused);
            }
            return Ok(LinkState::BadVersion);
        }

        let mut id = [0u8; 1];
        read_before(stream, &mut id, deadline)?;
        if id[0] == NO_PLAYER {
            return Ok(LinkState::Rejected);
        }
        self.player_id = id[0];
        Ok(LinkState::Okay)
    }

    fn open_capture(&mut self) {
        let Some(path) = self.config.capture_path.clone() else {
            return;
        };
        match CaptureWriter::create(&path) {
            Ok(writer) => {
                info!("recording session to {}", path.display());
                self.capture = Some(writer);
            }
            Err(e) => warn!("cannot record session to {}: {e}", path.display()),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn player_id(&self) -> u8 {
        self.player_id
    }

    pub fn server_version(&self) -> &[u8; 8] {
        &self.server_version
    }

    /// The server's explanation after a ban refusal. Empty otherwise.
    pub fn rejection_message(&self) -> &str {
        &self.rejection_message
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.tcp.as_ref().and_then(|tcp| tcp.peer_addr().ok())
    }

    pub fn local_udp_addr(&self) -> Option<SocketAddr> {
        self.udp.as_ref().and_then(|udp| udp.local_addr().ok())
    }

    pub fn is_udp_inbound(&self) -> bool {
        self.udp_inbound
    }

    pub fn is_udp_outbound(&self) -> bool {
        self.udp_outbound
    }

    fn ensure_okay(&self) -> Result<(), LinkError> {
        match self.state {
            LinkState::Okay => Ok(()),
            other => Err(LinkError::NotConnected(other)),
        }
    }

    fn hang_up(&mut self, err: &LinkError) {
        warn!("lost server connection: {err}");
        self.state = LinkState::Hungup;
        self.tcp = None;
        self.udp = None;
        self.udp_inbound = false;
        self.udp_outbound = false;
        self.udp_pending.clear();
    }

    /// Sends one message. Codes on the fast-path allow-list go over UDP once
    /// outbound UDP is confirmed; everything else uses TCP.
    pub fn send(&mut self, code: MsgCode, payload: &[u8]) -> Result<(), LinkError> {
        let via_udp = self.udp.is_some()
            && (code == MsgCode::UdpLinkRequest || (self.udp_outbound && code.is_udp_eligible()));
        self.transmit(code, payload, via_udp)
    }

    pub fn send_message(&mut self, code: MsgCode, message: &NetMessage) -> Result<(), LinkError> {
        self.send(code, message.payload())
    }

    fn transmit(&mut self, code: MsgCode, payload: &[u8], via_udp: bool) -> Result<(), LinkError> {
        self.ensure_okay()?;
        if payload.len() > MAX_PACKET_LEN {
            return Err(LinkError::TooLarge(payload.len()));
        }
        let message = NetMessage::from_parts(payload.len() as u16, code.as_u16(), payload)
            .map_err(|_| LinkError::TooLarge(payload.len()))?;
        let frame = message.frame();

        let result = match (via_udp, self.udp.as_ref(), self.tcp.as_mut()) {
            (true, Some(udp), _) => match udp.send(frame) {
                Ok(_) => {
                    self.stats.udp_messages_sent += 1;
                    Ok(())
                }
                Err(e) if is_transient_udp(&e) => {
                    debug!("dropped {code} datagram: {e}");
                    Ok(())
                }
                Err(e) => Err(LinkError::Io(e)),
            },
            (_, _, Some(tcp)) => tcp.write_all(frame).map_err(LinkError::Io),
            (_, _, None) => Err(LinkError::Hungup),
        };

        match result {
            Ok(()) => {
                self.stats.messages_sent += 1;
                self.stats.bytes_sent += frame.len() as u64;
                Ok(())
            }
            Err(e) => {
                self.hang_up(&e);
                Err(e)
            }
        }
    }

    /// Reads the next message. `None` waits indefinitely and a zero timeout
    /// polls once. Buffered UDP traffic is served before TCP.
    pub fn read(&mut self, timeout: Option<Duration>) -> Result<Option<NetMessage>, LinkError> {
        self.ensure_okay()?;
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            match self.poll() {
                Ok(Some(message)) => {
                    self.received(&message);
                    return Ok(Some(message));
                }
                Ok(None) => {}
                Err(e) => {
                    self.hang_up(&e);
                    return Err(e);
                }
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(None);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn poll(&mut self) -> Result<Option<NetMessage>, LinkError> {
        if let Some(message) = self.poll_udp()? {
            self.stats.udp_messages_received += 1;
            return Ok(Some(message));
        }
        self.poll_tcp()
    }

    fn poll_udp(&mut self) -> Result<Option<NetMessage>, LinkError> {
        if let Some(message) = self.udp_pending.pop_front() {
            return Ok(Some(message));
        }
        let Some(udp) = self.udp.as_ref() else {
            return Ok(None);
        };

        let mut datagram = [0u8; MAX_DATAGRAM];
        let size = match udp.recv(&mut datagram) {
            Ok(size) => size,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || is_transient_udp(&e) => {
                return Ok(None);
            }
            Err(e) => return Err(LinkError::Io(e)),
        };

        let mut rest = &datagram[..size];
        while !rest.is_empty() {
            match split_frame(rest) {
                Ok(Some((message, used))) => {
                    self.udp_pending.push_back(message);
                    rest = &rest[used..];
                }
                Ok(None) => {
                    warn!("discarding {} trailing bytes of datagram", rest.len());
                    break;
                }
                Err(e) => {
                    warn!("discarding malformed datagram: {e}");
                    break;
                }
            }
        }
        Ok(self.udp_pending.pop_front())
    }

    fn poll_tcp(&mut self) -> Result<Option<NetMessage>, LinkError> {
        let Some(tcp) = self.tcp.as_mut() else {
            return Err(LinkError::Hungup);
        };

        let mut header = [0u8; HEADER_LEN];
        tcp.set_nonblocking(true)?;
        let peeked = tcp.peek(&mut header);
        tcp.set_nonblocking(false)?;
        match peeked {
            Ok(0) => return Err(LinkError::Hungup),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(LinkError::Io(e)),
        }

        let received = read_full(tcp, &mut header)?;
        if received < HEADER_LEN {
            return Err(LinkError::BadLength {
                declared: HEADER_LEN,
                received,
            });
        }
        let mut reader = Unpacker::new(&header);
        let len = reader.unpack_u16() as usize;
        let code = reader.unpack_u16();
        if len > MAX_PACKET_LEN {
            return Err(LinkError::TooLarge(len));
        }

        let mut payload = vec![0u8; len];
        let received = read_full(tcp, &mut payload)?;
        if received < len {
            return Err(LinkError::BadLength {
                declared: len,
                received,
            });
        }

        NetMessage::from_parts(len as u16, code, &payload)
            .map(Some)
            .map_err(|_| LinkError::TooLarge(len))
    }

    fn received(&mut self, message: &NetMessage) {
        self.stats.messages_received += 1;
        self.stats.bytes_received += message.frame().len() as u64;

        if let Some(capture) = self.capture.as_mut() {
            if let Err(e) = capture.record(message.raw_code(), message.payload()) {
                warn!("stopped recording session: {e}");
                self.capture = None;
            }
        }
    }

    pub fn send_enter(&mut self, info: &EnterInfo) -> Result<(), LinkError> {
        let mut message = NetMessage::new();
        info.pack(&mut message);
        self.send_message(MsgCode::Enter, &message)
    }

    /// Waits for the server's answer to `MsgEnter`. Anything other than
    /// accept, reject or super-kill is ignored.
    pub fn read_enter(&mut self) -> Result<(), JoinError> {
        let deadline = Instant::now() + self.config.connection_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(JoinError::TimedOut);
            }
            let Some(mut message) = self.read(Some(remaining))? else {
                continue;
            };

            match message.code() {
                MsgCode::Accept => return Ok(()),
                MsgCode::SuperKill => return Err(JoinError::SuperKilled),
                MsgCode::Reject => {
                    let rejection = message.unpack_with(Rejection::unpack);
                    return Err(JoinError::Rejected {
                        code: rejection.code,
                        reason: rejection.reason,
                    });
                }
                other => debug!("ignoring {other} while waiting to join"),
            }
        }
    }

    /// Opens the UDP socket if needed and asks the server to link it.
    pub fn send_udp_link_request(&mut self) -> Result<(), LinkError> {
        self.ensure_okay()?;
        if self.udp.is_none() {
            let Some(peer) = self.peer_addr() else {
                return Err(LinkError::Hungup);
            };
            let local: SocketAddr = match peer {
                SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
                SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
            };
            let udp = UdpSocket::bind(local)?;
            udp.connect(peer)?;
            udp.set_nonblocking(true)?;
            debug!("udp socket {} linked to {peer}", udp.local_addr()?);
            self.udp = Some(udp);
        }

        let mut message = NetMessage::new();
        message.pack_u8(self.player_id);
        self.send_message(MsgCode::UdpLinkRequest, &message)
    }

    /// The server's datagrams reach us.
    pub fn enable_inbound_udp(&mut self) {
        if !self.udp_inbound {
            debug!("inbound udp enabled");
        }
        self.udp_inbound = true;
    }

    /// The server confirmed our datagrams reach it.
    pub fn enable_outbound_udp(&mut self) {
        if !self.udp_outbound {
            debug!("outbound udp enabled");
        }
        self.udp_outbound = true;
    }

    /// Tells the server over TCP that its datagrams arrive.
    pub fn confirm_incoming_udp(&mut self) -> Result<(), LinkError> {
        self.transmit(MsgCode::UdpLinkEstablished, &[], false)
    }
}

fn read_before(stream: &mut TcpStream, buf: &mut [u8], deadline: Instant) -> io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"));
        }
        stream.set_read_timeout(Some(remaining))?;
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed during handshake",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Whatever the server sends after a ban refusal, up to the first NUL.
fn read_rejection(stream: &mut TcpStream, deadline: Instant) -> String {
    let mut buf = [0u8; MAX_REJECTION_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || stream.set_read_timeout(Some(remaining)).is_err() {
            break;
        }
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if buf[..filled].contains(&0) {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
    let text = &buf[..filled];
    let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
    String::from_utf8_lossy(&text[..end]).into_owned()
}

/// Reads until `buf` is full or the peer closes. A read timeout mid-frame
/// is an error.
fn read_full(stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn is_transient_udp(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}
