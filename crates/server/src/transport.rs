//! Write side of the player connections.
//!
//! The relay reads from its own clone of every TCP stream; this module owns
//! the other clone plus the shared UDP socket and decides, frame by frame,
//! which one a message leaves on.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};

use log::{debug, warn};

use bzwire::{DelayQueue, HEADER_LEN, LatencySimulation, MsgCode, Transfer};

pub type PlayerId = u8;

/// Bytes a slow reader may fall behind before new frames are refused.
pub const MAX_BACKLOG: usize = 64 * 1024;

#[derive(Debug)]
struct Route {
    stream: TcpStream,
    backlog: Vec<u8>,
    udp_addr: Option<SocketAddr>,
    udp_outbound: bool,
    joined: bool,
    admin: bool,
}

impl Route {
    /// Tries the backlog first so frames keep their order, then appends
    /// whatever of `frame` the socket would not take. A frame is either
    /// accepted whole or refused before any of it is written.
    fn write_tcp(&mut self, frame: &[u8]) -> io::Result<()> {
        self.flush_backlog()?;
        if self.backlog.is_empty() {
            let written = write_some(&mut self.stream, frame)?;
            self.backlog.extend_from_slice(&frame[written..]);
            return Ok(());
        }
        if self.backlog.len() + frame.len() > MAX_BACKLOG {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "outbound backlog full",
            ));
        }
        self.backlog.extend_from_slice(frame);
        Ok(())
    }

    fn flush_backlog(&mut self) -> io::Result<usize> {
        if self.backlog.is_empty() {
            return Ok(0);
        }
        let written = write_some(&mut self.stream, &self.backlog)?;
        self.backlog.drain(..written);
        Ok(written)
    }
}

/// Writes until done or the socket would block.
fn write_some(stream: &mut TcpStream, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

#[derive(Debug)]
pub struct Sockets {
    routes: BTreeMap<PlayerId, Route>,
    udp: Option<UdpSocket>,
    latency: Option<LatencySimulation>,
    delayed: HashMap<PlayerId, DelayQueue>,
}

impl Sockets {
    pub fn new(udp: Option<UdpSocket>, latency: Option<LatencySimulation>) -> Self {
        Self {
            routes: BTreeMap::new(),
            udp,
            latency: latency.filter(|sim| sim.enabled),
            delayed: HashMap::new(),
        }
    }

    pub fn attach(&mut self, id: PlayerId, stream: TcpStream) {
        self.routes.insert(
            id,
            Route {
                stream,
                backlog: Vec::new(),
                udp_addr: None,
                udp_outbound: false,
                joined: false,
                admin: false,
            },
        );
    }

    pub fn detach(&mut self, id: PlayerId) {
        self.routes.remove(&id);
        self.delayed.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Joined players receive broadcasts.
    pub fn set_joined(&mut self, id: PlayerId) {
        if let Some(route) = self.routes.get_mut(&id) {
            route.joined = true;
        }
    }

    /// Admin connections also receive broadcasts flagged for admins,
    /// joined or not.
    pub fn set_admin(&mut self, id: PlayerId) {
        if let Some(route) = self.routes.get_mut(&id) {
            route.admin = true;
        }
    }

    pub fn set_udp_addr(&mut self, id: PlayerId, addr: SocketAddr) {
        if let Some(route) = self.routes.get_mut(&id) {
            route.udp_addr = Some(addr);
        }
    }

    /// The player confirmed our datagrams reach it.
    pub fn enable_outbound_udp(&mut self, id: PlayerId) -> bool {
        match self.routes.get_mut(&id) {
            Some(route) if route.udp_addr.is_some() => {
                route.udp_outbound = true;
                true
            }
            _ => false,
        }
    }

    pub fn find_by_udp(&self, addr: &SocketAddr) -> Option<PlayerId> {
        self.routes
            .iter()
            .find(|(_, route)| route.udp_addr.as_ref() == Some(addr))
            .map(|(&id, _)| id)
    }

    pub fn udp_links(&self) -> usize {
        self.routes
            .values()
            .filter(|route| route.udp_outbound)
            .count()
    }

    pub fn delayed_len(&self) -> usize {
        self.delayed.values().map(DelayQueue::len).sum()
    }

    pub fn backlog_len(&self) -> usize {
        self.routes.values().map(|route| route.backlog.len()).sum()
    }

    /// Pushes backlogged bytes out to every player whose socket has room.
    pub fn flush_backlogs(&mut self) -> usize {
        let mut flushed = 0;
        for (id, route) in &mut self.routes {
            match route.flush_backlog() {
                Ok(written) => flushed += written,
                Err(e) => debug!("flushing backlog for player {id} failed: {e}"),
            }
        }
        flushed
    }

    /// Writes every held-back frame that is due.
    pub fn release_delayed(&mut self) -> usize {
        let mut due = Vec::new();
        for (&id, queue) in &mut self.delayed {
            while let Some(frame) = queue.get_packet() {
                due.push((id, frame));
            }
        }

        let released = due.len();
        for (id, frame) in due {
            if let Err(e) = self.write_frame(id, &frame) {
                warn!("dropping delayed frame for player {id}: {e}");
            }
        }
        released
    }

    fn write_frame(&mut self, id: PlayerId, frame: &[u8]) -> io::Result<()> {
        let code = match frame.get(2..HEADER_LEN) {
            Some(&[hi, lo]) => MsgCode::from_u16(u16::from_be_bytes([hi, lo])),
            _ => return Err(io::Error::new(io::ErrorKind::InvalidData, "short frame")),
        };
        let Some(route) = self.routes.get_mut(&id) else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no such player"));
        };

        // the link confirmation itself always travels over TCP
        let via_udp = route.udp_outbound
            && code.is_udp_eligible()
            && code != MsgCode::UdpLinkEstablished;
        if let (true, Some(udp), Some(addr)) = (via_udp, self.udp.as_ref(), route.udp_addr) {
            match udp.send_to(frame, addr) {
                Ok(_) => return Ok(()),
                Err(e) => debug!("udp send to player {id} failed, using tcp: {e}"),
            }
        }
        route.write_tcp(frame)
    }
}

impl Transfer for Sockets {
    type Handle = PlayerId;

    fn send(&mut self, to: &PlayerId, frame: &[u8]) -> io::Result<()> {
        if !self.routes.contains_key(to) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no such player"));
        }
        if let Some(sim) = &self.latency {
            let queue = self.delayed.entry(*to).or_default();
            if !sim.submit(queue, frame) {
                debug!("simulated loss of frame for player {to}");
            }
            return Ok(());
        }
        self.write_frame(*to, frame)
    }

    fn broadcast(&mut self, frame: &[u8], to_admins: bool) -> io::Result<()> {
        let targets: Vec<PlayerId> = self
            .routes
            .iter()
            .filter(|(_, route)| route.joined || (to_admins && route.admin))
            .map(|(&id, _)| id)
            .collect();

        for id in targets {
            if let Err(e) = self.send(&id, frame) {
                warn!("broadcast to player {id} failed: {e}");
            }
        }
        Ok(())
    }
}
