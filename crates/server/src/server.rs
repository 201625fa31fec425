use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use bzwire::game_time::pack_game_time;
use bzwire::join::{CALLSIGN_LEN, MOTTO_LEN};
use bzwire::link::{BAN_REFUSAL, CONNECT_HEADER, PROTOCOL_VERSION};
use bzwire::message::split_frame;
use bzwire::team::{NUM_TEAMS, pack_team_update};
use bzwire::{
    EnterInfo, FiringInfo, FlagRegistry, MAX_PACKET_LEN, MessageManager, MsgCode, NO_PLAYER,
    NetMessage, PlayerType, PlayerUpdate, Recipient, RejectCode, Rejection, ShotEnd, Team,
    TeamColor,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::transport::{PlayerId, Sockets};

const READ_CHUNK: usize = 4096;

#[derive(Debug)]
struct Handshake {
    stream: TcpStream,
    addr: SocketAddr,
    received: Vec<u8>,
    started: Instant,
}

#[derive(Debug)]
struct Player {
    addr: SocketAddr,
    stream: TcpStream,
    inbound: Vec<u8>,
    joined: bool,
    player_type: PlayerType,
    callsign: String,
    motto: String,
    team: TeamColor,
    last_update: Option<PlayerUpdate>,
}

impl Player {
    fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            addr,
            stream,
            inbound: Vec::new(),
            joined: false,
            player_type: PlayerType::Tank,
            callsign: String::new(),
            motto: String::new(),
            team: TeamColor::NoTeam,
            last_update: None,
        }
    }

    /// Drains whatever the socket has and returns the complete frames.
    fn receive(&mut self) -> io::Result<Vec<NetMessage>> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed",
                    ));
                }
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }

        let mut frames = Vec::new();
        let mut used = 0;
        while let Some((message, len)) = split_frame(&self.inbound[used..])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        {
            frames.push(message);
            used += len;
        }
        self.inbound.drain(..used);
        Ok(frames)
    }
}

/// Relays player traffic between connected clients.
///
/// Each tick accepts new sockets, finishes pending handshakes, decodes
/// whatever the players sent over TCP and UDP, and flushes the outgoing
/// queue through the per-recipient cap.
pub struct RelayServer {
    listener: TcpListener,
    udp: UdpSocket,
    config: ServerConfig,
    handshakes: Vec<Handshake>,
    players: BTreeMap<PlayerId, Player>,
    messages: MessageManager<Sockets>,
    flags: FlagRegistry,
    running: Arc<AtomicBool>,
    start_time: Instant,
    pending_events: VecDeque<ServerEvent>,
    messages_received: u64,
    messages_relayed: u64,
}

impl RelayServer {
    pub fn new(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let udp = UdpSocket::bind(listener.local_addr()?)?;
        udp.set_nonblocking(true)?;

        let sockets = Sockets::new(Some(udp.try_clone()?), config.latency.clone());
        let messages =
            MessageManager::new(Some(sockets)).with_cap_per_recipient(config.cap_per_recipient);

        Ok(Self {
            listener,
            udp,
            config,
            handshakes: Vec::new(),
            players: BTreeMap::new(),
            messages,
            flags: FlagRegistry::with_defaults(),
            running: Arc::new(AtomicBool::new(true)),
            start_time: Instant::now(),
            pending_events: VecDeque::new(),
            messages_received: 0,
            messages_relayed: 0,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            for event in self.pending_events.drain(..) {
                if event.is_error() {
                    error!("{event}");
                } else {
                    info!("{event}");
                }
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.shutdown();
    }

    pub fn tick_once(&mut self) {
        self.accept_connections();
        self.process_handshakes();
        self.process_players();
        if let Err(e) = self.process_udp() {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("udp receive failed: {e}"),
            });
        }

        self.messages.send_pending_messages();
        if let Some(sockets) = self.messages.transfer_mut() {
            sockets.release_delayed();
            sockets.flush_backlogs();
        }
    }

    /// Sends everything still queued, then drops every player.
    pub fn shutdown(&mut self) {
        let ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for id in &ids {
            self.messages.flush_messages(id);
        }
        if let Some(sockets) = self.messages.transfer_mut() {
            sockets.release_delayed();
            sockets.flush_backlogs();
        }
        for id in ids {
            self.disconnect(id, DisconnectReason::Shutdown);
        }
        self.handshakes.clear();
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream
                        .set_nonblocking(true)
                        .and_then(|()| stream.set_nodelay(true))
                    {
                        warn!("cannot configure socket from {addr}: {e}");
                        continue;
                    }
                    self.pending_events
                        .push_back(ServerEvent::ClientConnecting { addr });
                    self.handshakes.push(Handshake {
                        stream,
                        addr,
                        received: Vec::new(),
                        started: Instant::now(),
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.pending_events.push_back(ServerEvent::Error {
                        message: format!("accept failed: {e}"),
                    });
                    break;
                }
            }
        }
    }

    fn process_handshakes(&mut self) {
        for mut handshake in std::mem::take(&mut self.handshakes) {
            match read_header(&mut handshake) {
                Ok(true) => {
                    if let Err(e) = self.answer_handshake(handshake) {
                        debug!("handshake reply failed: {e}");
                    }
                }
                Ok(false) if handshake.started.elapsed() > self.config.handshake_timeout => {
                    self.pending_events.push_back(ServerEvent::ConnectionDenied {
                        addr: handshake.addr,
                        reason: "handshake timed out".to_string(),
                    });
                }
                Ok(false) => self.handshakes.push(handshake),
                Err(e) => debug!("dropping handshake from {}: {e}", handshake.addr),
            }
        }
    }

    fn answer_handshake(&mut self, mut handshake: Handshake) -> io::Result<()> {
        let addr = handshake.addr;
        if handshake.received != CONNECT_HEADER {
            self.deny(addr, "bad connect header");
            return Ok(());
        }

        if self.config.is_banned(addr.ip()) {
            let mut reply = BAN_REFUSAL.to_vec();
            reply.extend_from_slice(self.config.ban_reason.as_bytes());
            reply.push(0);
            self.deny(addr, "banned");
            return handshake.stream.write_all(&reply);
        }

        handshake.stream.write_all(PROTOCOL_VERSION)?;
        let Some(id) = self.allocate_id() else {
            self.deny(addr, "server full");
            return handshake.stream.write_all(&[NO_PLAYER]);
        };
        handshake.stream.write_all(&[id])?;

        let writer = handshake.stream.try_clone()?;
        let admin = self.config.is_admin(addr.ip());
        if let Some(sockets) = self.messages.transfer_mut() {
            sockets.attach(id, writer);
            if admin {
                sockets.set_admin(id);
            }
        }
        self.players.insert(id, Player::new(handshake.stream, addr));
        self.pending_events
            .push_back(ServerEvent::PlayerConnected { id, addr });
        Ok(())
    }

    fn deny(&mut self, addr: SocketAddr, reason: &str) {
        self.pending_events.push_back(ServerEvent::ConnectionDenied {
            addr,
            reason: reason.to_string(),
        });
    }

    fn allocate_id(&self) -> Option<PlayerId> {
        (0..self.config.max_players).find(|id| !self.players.contains_key(id))
    }

    fn process_players(&mut self) {
        let ids: Vec<PlayerId> = self.players.keys().copied().collect();
        for id in ids {
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            match player.receive() {
                Ok(frames) => {
                    for message in frames {
                        if !self.players.contains_key(&id) {
                            break;
                        }
                        self.handle_message(id, message);
                    }
                }
                Err(e) => {
                    debug!("player {id} read failed: {e}");
                    self.disconnect(id, DisconnectReason::Hungup);
                }
            }
        }
    }

    fn process_udp(&mut self) -> io::Result<()> {
        let mut datagram = [0u8; 2 * (MAX_PACKET_LEN + 4)];
        loop {
            let (size, from) = match self.udp.recv_from(&mut datagram) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut rest = &datagram[..size];
            while let Ok(Some((message, used))) = split_frame(rest) {
                rest = &rest[used..];
                if message.code() == MsgCode::UdpLinkRequest {
                    self.handle_udp_link_request(from, message);
                    continue;
                }
                let sender = self
                    .messages
                    .transfer()
                    .and_then(|sockets| sockets.find_by_udp(&from));
                match sender {
                    Some(id) => self.handle_message(id, message),
                    None => debug!("ignoring {} from unlinked {from}", message.code()),
                }
            }
        }
    }

    fn handle_udp_link_request(&mut self, from: SocketAddr, mut message: NetMessage) {
        let id = message.unpack_u8();
        let known = self
            .players
            .get(&id)
            .is_some_and(|player| player.addr.ip() == from.ip());
        if !known || message.finish_reading().is_err() {
            warn!("bogus udp link request for player {id} from {from}");
            return;
        }

        if let Some(sockets) = self.messages.transfer_mut() {
            sockets.set_udp_addr(id, from);
        }
        if let Err(e) = self.udp.send_to(message.frame(), from) {
            warn!("cannot answer udp link request from {from}: {e}");
            return;
        }
        self.pending_events
            .push_back(ServerEvent::UdpLinked { id, addr: from });
    }

    fn handle_message(&mut self, id: PlayerId, mut message: NetMessage) {
        self.messages_received += 1;
        let code = message.code();
        let joined = self.players.get(&id).is_some_and(|player| player.joined);

        match code {
            MsgCode::Enter => self.handle_enter(id, &mut message),
            MsgCode::UdpLinkEstablished => {
                let linked = self
                    .messages
                    .transfer_mut()
                    .is_some_and(|sockets| sockets.enable_outbound_udp(id));
                if linked {
                    self.messages
                        .send_to(id, MsgCode::UdpLinkEstablished, NetMessage::new());
                }
            }
            MsgCode::Exit => self.disconnect(id, DisconnectReason::Graceful),
            MsgCode::GameTime => {
                let mut reply = NetMessage::new();
                let now_us = self.start_time.elapsed().as_micros() as i64;
                pack_game_time(&mut reply, now_us, 0.0);
                self.messages.send_to(id, MsgCode::GameTime, reply);
            }
            _ if !joined => debug!("ignoring {code} from player {id} before join"),
            MsgCode::PlayerUpdate | MsgCode::PlayerUpdateSmall => {
                self.handle_player_update(id, &mut message)
            }
            MsgCode::ShotBegin => {
                let info = message.unpack_with(|reader| FiringInfo::unpack(reader, &self.flags));
                if message.finish_reading().is_ok() && info.shot.player == id {
                    debug!("player {id} fired {:?} shot {}", info.shot_type, info.shot.id);
                    self.relay(id, code, message.payload());
                } else {
                    warn!("dropping malformed shot from player {id}");
                }
            }
            MsgCode::ShotEnd => {
                let end = message.unpack_with(ShotEnd::unpack);
                if message.finish_reading().is_ok() && end.player == id {
                    self.relay(id, code, message.payload());
                }
            }
            MsgCode::Message => {
                self.messages.broadcast(code, message);
                self.messages_relayed += 1;
            }
            MsgCode::Alive => {}
            other => debug!("ignoring {other} from player {id}"),
        }
    }

    fn handle_enter(&mut self, id: PlayerId, message: &mut NetMessage) {
        let info = message.unpack_with(EnterInfo::unpack);
        let verdict = if message.finish_reading().is_err() {
            Err((RejectCode::BadRequest, "malformed enter message"))
        } else {
            self.admit(id, &info)
        };

        match verdict {
            Ok(team) => self.accept(id, info, team),
            Err((code, reason)) => {
                let mut reply = NetMessage::new();
                Rejection::new(code, reason).pack(&mut reply);
                self.messages.send_to(id, MsgCode::Reject, reply);
                self.messages.flush_messages(&id);
                self.pending_events.push_back(ServerEvent::PlayerRejected {
                    id,
                    code,
                    reason: reason.to_string(),
                });
                self.disconnect(id, DisconnectReason::Rejected);
            }
        }
    }

    fn admit(&self, id: PlayerId, info: &EnterInfo) -> Result<TeamColor, (RejectCode, &'static str)> {
        if self.players.get(&id).is_some_and(|player| player.joined) {
            return Err((RejectCode::BadRequest, "already joined"));
        }
        let callsign = info.callsign.trim();
        if callsign.is_empty() || !callsign.chars().all(|c| c.is_ascii_graphic() || c == ' ') {
            return Err((RejectCode::BadCallsign, "invalid callsign"));
        }
        if self
            .players
            .values()
            .any(|player| player.joined && player.callsign.eq_ignore_ascii_case(callsign))
        {
            return Err((RejectCode::RepeatCallsign, "callsign already in use"));
        }
        if !matches!(info.player_type, PlayerType::Tank | PlayerType::Computer) {
            return Err((RejectCode::BadType, "unsupported player type"));
        }

        let sizes = self.team_sizes();
        let team = match info.team {
            TeamColor::Automatic => TeamColor::PLAYABLE[1..]
                .iter()
                .copied()
                .min_by_key(|team| team.index().map_or(0, |index| sizes[index]))
                .unwrap_or(TeamColor::Rogue),
            team if TeamColor::PLAYABLE.contains(&team) => team,
            _ => return Err((RejectCode::BadTeam, "no such team")),
        };
        if team.index().is_some_and(|index| sizes[index] >= self.config.max_per_team) {
            return Err((RejectCode::TeamFull, "team is full"));
        }
        Ok(team)
    }

    fn accept(&mut self, id: PlayerId, info: EnterInfo, team: TeamColor) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        player.joined = true;
        player.player_type = info.player_type;
        player.callsign = info.callsign.trim().to_string();
        player.motto = info.motto;
        player.team = team;
        let callsign = player.callsign.clone();

        if let Some(sockets) = self.messages.transfer_mut() {
            sockets.set_joined(id);
        }
        self.messages.send_to(id, MsgCode::Accept, NetMessage::new());

        for (&other, existing) in &self.players {
            if other != id && existing.joined {
                let mut roster = NetMessage::new();
                pack_add_player(&mut roster, other, existing);
                self.messages.send_to(id, MsgCode::AddPlayer, roster);
            }
        }
        if let Some(player) = self.players.get(&id) {
            let mut added = NetMessage::new();
            pack_add_player(&mut added, id, player);
            self.announce(MsgCode::AddPlayer, added);
        }
        self.broadcast_teams();

        self.pending_events.push_back(ServerEvent::PlayerJoined {
            id,
            callsign,
            team,
        });
    }

    fn handle_player_update(&mut self, id: PlayerId, message: &mut NetMessage) {
        let code = message.code();
        let update = message.unpack_with(|reader| PlayerUpdate::unpack(reader, code));
        if message.finish_reading().is_err() || update.player != id {
            warn!("dropping bad {code} from player {id}");
            return;
        }

        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let newer = player
            .last_update
            .is_none_or(|last| update.state.is_newer_than(&last.state));
        if !newer {
            debug!("dropping stale update from player {id}");
            return;
        }
        player.last_update = Some(update);
        self.relay(id, code, message.payload());
    }

    /// Queues a copy of `payload` for every other joined player.
    fn relay(&mut self, from: PlayerId, code: MsgCode, payload: &[u8]) {
        let targets: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|(id, player)| **id != from && player.joined)
            .map(|(&id, _)| id)
            .collect();

        for id in targets {
            match NetMessage::from_parts(payload.len() as u16, code.as_u16(), payload) {
                Ok(copy) => {
                    self.messages.send_to(id, code, copy);
                    self.messages_relayed += 1;
                }
                Err(e) => {
                    warn!("cannot relay {code} from player {from}: {e}");
                    return;
                }
            }
        }
    }

    /// Roster changes go to every joined player and to admin connections.
    fn announce(&mut self, code: MsgCode, message: NetMessage) {
        self.messages
            .queue(code, Recipient::Broadcast { to_admins: true }, message);
    }

    fn team_sizes(&self) -> [usize; NUM_TEAMS] {
        let mut sizes = [0; NUM_TEAMS];
        for player in self.players.values().filter(|player| player.joined) {
            if let Some(index) = player.team.index() {
                sizes[index] += 1;
            }
        }
        sizes
    }

    fn broadcast_teams(&mut self) {
        let sizes = self.team_sizes();
        let teams: Vec<(TeamColor, Team)> = TeamColor::PLAYABLE
            .iter()
            .filter_map(|&color| {
                let size = sizes[color.index()?];
                Some((
                    color,
                    Team {
                        size: size as u16,
                        ..Default::default()
                    },
                ))
            })
            .collect();

        let mut message = NetMessage::new();
        pack_team_update(&mut message, &teams);
        self.messages.broadcast(MsgCode::TeamUpdate, message);
    }

    fn disconnect(&mut self, id: PlayerId, reason: DisconnectReason) {
        let Some(player) = self.players.remove(&id) else {
            return;
        };
        let purged = self.messages.purge_messages(&id);
        if purged > 0 {
            debug!("discarded {purged} messages for player {id}");
        }
        if let Some(sockets) = self.messages.transfer_mut() {
            sockets.detach(id);
        }

        if player.joined {
            let mut removed = NetMessage::new();
            removed.pack_u8(id);
            self.announce(MsgCode::RemovePlayer, removed);
            self.broadcast_teams();
        }
        self.pending_events
            .push_back(ServerEvent::PlayerDisconnected { id, reason });
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            uptime: self.start_time.elapsed(),
            connected: self.players.len(),
            joined: self.players.values().filter(|player| player.joined).count(),
            handshaking: self.handshakes.len(),
            udp_links: self
                .messages
                .transfer()
                .map_or(0, |sockets| sockets.udp_links()),
            queued: self.messages.queued_len(),
            messages_received: self.messages_received,
            messages_relayed: self.messages_relayed,
        }
    }
}

/// Reads what is available of the connect header. `Ok(true)` once it is
/// complete.
fn read_header(handshake: &mut Handshake) -> io::Result<bool> {
    let missing = CONNECT_HEADER.len() - handshake.received.len();
    let mut buf = vec![0u8; missing];
    match handshake.stream.read(&mut buf) {
        Ok(0) => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "closed during handshake",
        )),
        Ok(n) => {
            handshake.received.extend_from_slice(&buf[..n]);
            Ok(handshake.received.len() == CONNECT_HEADER.len())
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// `MsgAddPlayer`: id, type, team, wins, losses, team kills, then the
/// padded callsign and motto.
fn pack_add_player(message: &mut NetMessage, id: PlayerId, player: &Player) {
    message.pack_u8(id);
    message.pack_u16(player.player_type.as_u16());
    message.pack_u16(player.team.as_i16() as u16);
    message.pack_u16(0);
    message.pack_u16(0);
    message.pack_u16(0);
    message.pack_padded(&player.callsign, CALLSIGN_LEN);
    message.pack_padded(&player.motto, MOTTO_LEN);
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub uptime: Duration,
    pub connected: usize,
    pub joined: usize,
    pub handshaking: usize,
    pub udp_links: usize,
    pub queued: usize,
    pub messages_received: u64,
    pub messages_relayed: u64,
}
