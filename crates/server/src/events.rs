use std::fmt;
use std::net::SocketAddr;

use bzwire::{RejectCode, TeamColor};

use crate::transport::PlayerId;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnecting {
        addr: SocketAddr,
    },
    PlayerConnected {
        id: PlayerId,
        addr: SocketAddr,
    },
    PlayerJoined {
        id: PlayerId,
        callsign: String,
        team: TeamColor,
    },
    PlayerRejected {
        id: PlayerId,
        code: RejectCode,
        reason: String,
    },
    UdpLinked {
        id: PlayerId,
        addr: SocketAddr,
    },
    PlayerDisconnected {
        id: PlayerId,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, ServerEvent::Error { .. })
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::ClientConnecting { addr } => write!(f, "connection request from {addr}"),
            ServerEvent::PlayerConnected { id, addr } => {
                write!(f, "player {id} connected from {addr}")
            }
            ServerEvent::PlayerJoined { id, callsign, team } => {
                write!(f, "player {id} joined as {callsign:?} on {}", team.name())
            }
            ServerEvent::PlayerRejected { id, code, reason } => {
                write!(f, "player {id} rejected ({code:?}): {reason}")
            }
            ServerEvent::UdpLinked { id, addr } => write!(f, "player {id} linked udp {addr}"),
            ServerEvent::PlayerDisconnected { id, reason } => {
                write!(f, "player {id} {}", reason.as_str())
            }
            ServerEvent::ConnectionDenied { addr, reason } => {
                write!(f, "connection denied to {addr}: {reason}")
            }
            ServerEvent::Error { message } => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Graceful,
    Hungup,
    Rejected,
    Shutdown,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Hungup => "hung up",
            DisconnectReason::Rejected => "was turned away",
            DisconnectReason::Shutdown => "dropped at shutdown",
        }
    }
}
