use crate::message::NetMessage;
use crate::pack::Unpacker;

pub const NUM_TEAMS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeamColor {
    Automatic,
    NoTeam,
    Rogue,
    Red,
    Green,
    Blue,
    Purple,
    Observer,
    Rabbit,
    Hunter,
}

impl TeamColor {
    pub const PLAYABLE: [TeamColor; 5] = [
        TeamColor::Rogue,
        TeamColor::Red,
        TeamColor::Green,
        TeamColor::Blue,
        TeamColor::Purple,
    ];

    pub const fn as_i16(self) -> i16 {
        match self {
            TeamColor::Automatic => -2,
            TeamColor::NoTeam => -1,
            TeamColor::Rogue => 0,
            TeamColor::Red => 1,
            TeamColor::Green => 2,
            TeamColor::Blue => 3,
            TeamColor::Purple => 4,
            TeamColor::Observer => 5,
            TeamColor::Rabbit => 6,
            TeamColor::Hunter => 7,
        }
    }

    pub const fn from_i16(raw: i16) -> Option<Self> {
        Some(match raw {
            -2 => TeamColor::Automatic,
            -1 => TeamColor::NoTeam,
            0 => TeamColor::Rogue,
            1 => TeamColor::Red,
            2 => TeamColor::Green,
            3 => TeamColor::Blue,
            4 => TeamColor::Purple,
            5 => TeamColor::Observer,
            6 => TeamColor::Rabbit,
            7 => TeamColor::Hunter,
            _ => return None,
        })
    }

    /// Slot in a per-team table, `None` for the pseudo teams.
    pub const fn index(self) -> Option<usize> {
        let raw = self.as_i16();
        if raw < 0 { None } else { Some(raw as usize) }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TeamColor::Automatic => "Automatic",
            TeamColor::NoTeam => "No Team",
            TeamColor::Rogue => "Rogue",
            TeamColor::Red => "Red Team",
            TeamColor::Green => "Green Team",
            TeamColor::Blue => "Blue Team",
            TeamColor::Purple => "Purple Team",
            TeamColor::Observer => "Observer",
            TeamColor::Rabbit => "Rabbit",
            TeamColor::Hunter => "Hunter",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Team {
    pub size: u16,
    pub won: u16,
    pub lost: u16,
}

impl Team {
    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_u16(self.size);
        message.pack_u16(self.won);
        message.pack_u16(self.lost);
    }

    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        Self {
            size: reader.unpack_u16(),
            won: reader.unpack_u16(),
            lost: reader.unpack_u16(),
        }
    }

    pub fn score(&self) -> i32 {
        self.won as i32 - self.lost as i32
    }
}

/// `MsgTeamUpdate` payload: a `u8` count, then `u16` team index and team
/// record per entry.
pub fn pack_team_update(message: &mut NetMessage, teams: &[(TeamColor, Team)]) {
    let teams = &teams[..teams.len().min(u8::MAX as usize)];
    message.pack_u8(teams.len() as u8);
    for (color, team) in teams {
        message.pack_u16(color.as_i16() as u16);
        team.pack(message);
    }
}

/// Entries with an unknown team index are skipped.
pub fn unpack_team_update(reader: &mut Unpacker<'_>) -> Vec<(TeamColor, Team)> {
    let count = reader.unpack_u8();
    let mut teams = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = reader.unpack_u16() as i16;
        let team = Team::unpack(reader);
        if reader.has_error() {
            break;
        }
        if let Some(color) = TeamColor::from_i16(raw) {
            teams.push((color, team));
        }
    }
    teams
}
