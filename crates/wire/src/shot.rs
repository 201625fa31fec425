use std::sync::Arc;

use glam::Vec3;

use crate::flag::{FlagRegistry, FlagType};
use crate::message::NetMessage;
use crate::pack::Unpacker;
use crate::team::TeamColor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ShotType {
    #[default]
    Normal,
    GuidedMissile,
    Laser,
    Thief,
    Super,
    Phantom,
    ShockWave,
    Ricochet,
    MachineGun,
    Invisible,
    Cloaked,
    RapidFire,
}

impl ShotType {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Unknown values fall back to a normal shot.
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ShotType::GuidedMissile,
            2 => ShotType::Laser,
            3 => ShotType::Thief,
            4 => ShotType::Super,
            5 => ShotType::Phantom,
            6 => ShotType::ShockWave,
            7 => ShotType::Ricochet,
            8 => ShotType::MachineGun,
            9 => ShotType::Invisible,
            10 => ShotType::Cloaked,
            11 => ShotType::RapidFire,
            _ => ShotType::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotUpdate {
    pub player: u8,
    pub id: u16,
    pub pos: Vec3,
    pub velocity: Vec3,
    pub dt: f32,
    pub team: TeamColor,
}

impl Default for ShotUpdate {
    fn default() -> Self {
        Self {
            player: 0,
            id: 0,
            pos: Vec3::ZERO,
            velocity: Vec3::ZERO,
            dt: 0.0,
            team: TeamColor::Rogue,
        }
    }
}

impl ShotUpdate {
    pub const PACKED_LEN: usize = 1 + 2 + 12 + 12 + 4 + 2;

    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_u8(self.player);
        message.pack_u16(self.id);
        message.pack_fvec3(self.pos);
        message.pack_fvec3(self.velocity);
        message.pack_f32(self.dt);
        message.pack_i16(self.team.as_i16());
    }

    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        Self {
            player: reader.unpack_u8(),
            id: reader.unpack_u16(),
            pos: reader.unpack_fvec3(),
            velocity: reader.unpack_fvec3(),
            dt: reader.unpack_f32(),
            team: TeamColor::from_i16(reader.unpack_i16()).unwrap_or(TeamColor::NoTeam),
        }
    }
}

/// Payload of `MsgShotBegin`.
#[derive(Debug, Clone, PartialEq)]
pub struct FiringInfo {
    pub time_sent: f32,
    pub shot: ShotUpdate,
    pub flag_type: Arc<FlagType>,
    pub lifetime: f32,
    pub shot_type: ShotType,
}

impl FiringInfo {
    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_f32(self.time_sent);
        self.shot.pack(message);
        self.flag_type.pack(message);
        message.pack_f32(self.lifetime);
        message.pack_u8(self.shot_type.as_u8());
    }

    pub fn unpack(reader: &mut Unpacker<'_>, registry: &FlagRegistry) -> Self {
        Self {
            time_sent: reader.unpack_f32(),
            shot: ShotUpdate::unpack(reader),
            flag_type: registry.unpack(reader),
            lifetime: reader.unpack_f32(),
            shot_type: ShotType::from_u8(reader.unpack_u8()),
        }
    }
}

/// Payload of `MsgShotEnd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShotEnd {
    pub player: u8,
    pub id: u16,
    pub reason: u16,
}

impl ShotEnd {
    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_u8(self.player);
        message.pack_u16(self.id);
        message.pack_u16(self.reason);
    }

    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        Self {
            player: reader.unpack_u8(),
            id: reader.unpack_u16(),
            reason: reader.unpack_u16(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shot() -> ShotUpdate {
        ShotUpdate {
            player: 4,
            id: 513,
            pos: Vec3::new(1.0, 2.0, 3.0),
            velocity: Vec3::new(-100.0, 0.5, 0.0),
            dt: 0.25,
            team: TeamColor::Green,
        }
    }

    #[test]
    fn test_shot_update_layout() {
        let mut message = NetMessage::new();
        shot().pack(&mut message);
        assert_eq!(message.len(), ShotUpdate::PACKED_LEN);
        assert_eq!(&message.payload()[..3], &[4, 2, 1]);
        assert_eq!(&message.payload()[ShotUpdate::PACKED_LEN - 2..], &[0, 2]);
        assert_eq!(message.unpack_with(ShotUpdate::unpack), shot());
    }

    #[test]
    fn test_firing_info() {
        let registry = FlagRegistry::with_defaults();
        let info = FiringInfo {
            time_sent: 12.5,
            shot: shot(),
            flag_type: registry.get("GM"),
            lifetime: 3.5,
            shot_type: ShotType::GuidedMissile,
        };

        let mut message = NetMessage::new();
        info.pack(&mut message);
        assert_eq!(message.len(), 4 + ShotUpdate::PACKED_LEN + 2 + 4 + 1);

        let decoded = message.unpack_with(|r| FiringInfo::unpack(r, &registry));
        assert!(message.finish_reading().is_ok());
        assert_eq!(decoded, info);
        assert_eq!(decoded.flag_type.name, "Guided Missile");
    }

    #[test]
    fn test_firing_info_unknown_flag() {
        let registry = FlagRegistry::with_defaults();
        let mut message = NetMessage::new();
        FiringInfo {
            time_sent: 0.0,
            shot: shot(),
            flag_type: Arc::new(FlagType::custom("ZZ", "Mystery", "", Default::default())),
            lifetime: 1.0,
            shot_type: ShotType::Normal,
        }
        .pack(&mut message);

        let decoded = message.unpack_with(|r| FiringInfo::unpack(r, &registry));
        assert!(decoded.flag_type.is_null());
    }

    #[test]
    fn test_shot_end() {
        let end = ShotEnd {
            player: 1,
            id: 7,
            reason: 0,
        };
        let mut message = NetMessage::new();
        end.pack(&mut message);
        assert_eq!(message.payload(), &[1, 0, 7, 0, 0]);
        assert_eq!(message.unpack_with(ShotEnd::unpack), end);
    }

    #[test]
    fn test_shot_type_fallback() {
        assert_eq!(ShotType::from_u8(7), ShotType::Ricochet);
        assert_eq!(ShotType::from_u8(200), ShotType::Normal);
        assert_eq!(ShotType::RapidFire.as_u8(), 11);
    }
}
