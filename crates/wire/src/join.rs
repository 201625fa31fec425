//! Payloads of the join sub-protocol: `MsgEnter` from the client and the
//! `MsgReject` a server answers with when it refuses the player.

use crate::message::NetMessage;
use crate::pack::Unpacker;
use crate::team::TeamColor;

pub const CALLSIGN_LEN: usize = 32;
pub const MOTTO_LEN: usize = 128;
pub const TOKEN_LEN: usize = 22;
pub const VERSION_LEN: usize = 60;
pub const REJECT_REASON_LEN: usize = 128;

pub const ENTER_LEN: usize = 2 + 2 + CALLSIGN_LEN + MOTTO_LEN + TOKEN_LEN + VERSION_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerType {
    Tank,
    Computer,
    Chat,
    Other(u16),
}

impl PlayerType {
    pub const fn as_u16(self) -> u16 {
        match self {
            PlayerType::Tank => 0,
            PlayerType::Computer => 1,
            PlayerType::Chat => 2,
            PlayerType::Other(raw) => raw,
        }
    }

    pub const fn from_u16(raw: u16) -> Self {
        match raw {
            0 => PlayerType::Tank,
            1 => PlayerType::Computer,
            2 => PlayerType::Chat,
            other => PlayerType::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterInfo {
    pub player_type: PlayerType,
    pub team: TeamColor,
    pub callsign: String,
    pub motto: String,
    pub token: String,
    pub version: String,
}

impl EnterInfo {
    pub fn new(callsign: impl Into<String>, team: TeamColor) -> Self {
        Self {
            player_type: PlayerType::Tank,
            team,
            callsign: callsign.into(),
            motto: String::new(),
            token: String::new(),
            version: String::new(),
        }
    }

    /// Fixed layout: every text field is zero padded to its full width.
    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_u16(self.player_type.as_u16());
        message.pack_u16(self.team.as_i16() as u16);
        message.pack_padded(&self.callsign, CALLSIGN_LEN);
        message.pack_padded(&self.motto, MOTTO_LEN);
        message.pack_padded(&self.token, TOKEN_LEN);
        message.pack_padded(&self.version, VERSION_LEN);
    }

    /// An unknown team number decodes as [`TeamColor::NoTeam`].
    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        let player_type = PlayerType::from_u16(reader.unpack_u16());
        let team = TeamColor::from_i16(reader.unpack_u16() as i16).unwrap_or(TeamColor::NoTeam);
        Self {
            player_type,
            team,
            callsign: reader.unpack_padded(CALLSIGN_LEN),
            motto: reader.unpack_padded(MOTTO_LEN),
            token: reader.unpack_padded(TOKEN_LEN),
            version: reader.unpack_padded(VERSION_LEN),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    BadRequest,
    BadTeam,
    BadType,
    TeamFull,
    ServerFull,
    BadCallsign,
    RepeatCallsign,
    RejoinWaitTime,
    IpBanned,
    HostBanned,
    IdBanned,
    Other(u16),
}

impl RejectCode {
    pub const fn as_u16(self) -> u16 {
        match self {
            RejectCode::BadRequest => 0x0000,
            RejectCode::BadTeam => 0x0001,
            RejectCode::BadType => 0x0002,
            RejectCode::TeamFull => 0x0004,
            RejectCode::ServerFull => 0x0005,
            RejectCode::BadCallsign => 0x0006,
            RejectCode::RepeatCallsign => 0x0007,
            RejectCode::RejoinWaitTime => 0x0008,
            RejectCode::IpBanned => 0x0009,
            RejectCode::HostBanned => 0x000A,
            RejectCode::IdBanned => 0x000B,
            RejectCode::Other(raw) => raw,
        }
    }

    pub const fn from_u16(raw: u16) -> Self {
        match raw {
            0x0000 => RejectCode::BadRequest,
            0x0001 => RejectCode::BadTeam,
            0x0002 => RejectCode::BadType,
            0x0004 => RejectCode::TeamFull,
            0x0005 => RejectCode::ServerFull,
            0x0006 => RejectCode::BadCallsign,
            0x0007 => RejectCode::RepeatCallsign,
            0x0008 => RejectCode::RejoinWaitTime,
            0x0009 => RejectCode::IpBanned,
            0x000A => RejectCode::HostBanned,
            0x000B => RejectCode::IdBanned,
            other => RejectCode::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: RejectCode,
    pub reason: String,
}

impl Rejection {
    pub fn new(code: RejectCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_u16(self.code.as_u16());
        message.pack_padded(&self.reason, REJECT_REASON_LEN);
    }

    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        let code = RejectCode::from_u16(reader.unpack_u16());
        let width = reader.remaining().min(REJECT_REASON_LEN);
        Self {
            code,
            reason: reader.unpack_padded(width),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_layout() {
        let mut info = EnterInfo::new("tanker", TeamColor::Blue);
        info.motto = "hello".into();
        info.version = "2.4.22".into();

        let mut message = NetMessage::new();
        info.pack(&mut message);
        assert_eq!(message.len(), ENTER_LEN);

        let payload = message.payload();
        assert_eq!(&payload[..4], &[0, 0, 0, 3]);
        assert_eq!(&payload[4..10], b"tanker");
        assert!(payload[10..4 + CALLSIGN_LEN].iter().all(|&b| b == 0));

        let decoded = message.unpack_with(EnterInfo::unpack);
        assert_eq!(decoded, info);
        assert!(message.finish_reading().is_ok());
    }

    #[test]
    fn test_enter_automatic_team() {
        let mut message = NetMessage::new();
        EnterInfo::new("a", TeamColor::Automatic).pack(&mut message);
        assert_eq!(&message.payload()[2..4], &[0xFF, 0xFE]);
        assert_eq!(
            message.unpack_with(EnterInfo::unpack).team,
            TeamColor::Automatic
        );
    }

    #[test]
    fn test_long_callsign_is_truncated() {
        let long = "x".repeat(40);
        let mut message = NetMessage::new();
        EnterInfo::new(long, TeamColor::Red).pack(&mut message);
        let decoded = message.unpack_with(EnterInfo::unpack);
        assert_eq!(decoded.callsign.len(), CALLSIGN_LEN - 1);
    }

    #[test]
    fn test_rejection() {
        let rejection = Rejection::new(RejectCode::RepeatCallsign, "callsign already in use");
        let mut message = NetMessage::new();
        rejection.pack(&mut message);
        assert_eq!(message.len(), 2 + REJECT_REASON_LEN);
        assert_eq!(message.unpack_with(Rejection::unpack), rejection);
    }

    #[test]
    fn test_short_rejection_payload() {
        let mut payload = vec![0, 5];
        payload.extend_from_slice(b"full\0");
        let mut message = NetMessage::from_parts(payload.len() as u16, 0, &payload).unwrap();
        let rejection = message.unpack_with(Rejection::unpack);
        assert_eq!(rejection.code, RejectCode::ServerFull);
        assert_eq!(rejection.reason, "full");
        assert!(message.finish_reading().is_ok());
    }

    #[test]
    fn test_unknown_codes_survive() {
        assert_eq!(RejectCode::from_u16(0x0042), RejectCode::Other(0x0042));
        assert_eq!(RejectCode::Other(0x0042).as_u16(), 0x0042);
        assert_eq!(PlayerType::from_u16(9), PlayerType::Other(9));
    }
}
