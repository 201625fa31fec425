//! Flag types and flags.
//!
//! On the wire a flag type is only its two byte abbreviation, resolved on
//! the receiving side through a [`FlagRegistry`]. Server-defined custom types
//! travel in full once with [`FlagType::pack_custom`] and are registered by
//! the receiver.

use std::collections::BTreeMap;
use std::sync::Arc;

use glam::Vec3;

use crate::message::NetMessage;
use crate::pack::Unpacker;
use crate::shot::ShotType;
use crate::team::TeamColor;

pub const ABBREV_LEN: usize = 2;
/// Abbreviation sent in place of a type the receiver must not identify.
pub const FAKE_ABBREV: &[u8; ABBREV_LEN] = b"PZ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FlagQuality {
    #[default]
    Good,
    Bad,
}

impl FlagQuality {
    pub const fn as_u8(self) -> u8 {
        match self {
            FlagQuality::Good => 0,
            FlagQuality::Bad => 1,
        }
    }

    pub const fn from_u8(raw: u8) -> Self {
        if raw == 1 {
            FlagQuality::Bad
        } else {
            FlagQuality::Good
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FlagEndurance {
    #[default]
    Normal,
    Unstable,
    Sticky,
}

impl FlagEndurance {
    pub const fn as_u16(self) -> u16 {
        match self {
            FlagEndurance::Normal => 0,
            FlagEndurance::Unstable => 1,
            FlagEndurance::Sticky => 2,
        }
    }

    pub const fn from_u16(raw: u16) -> Self {
        match raw {
            1 => FlagEndurance::Unstable,
            2 => FlagEndurance::Sticky,
            _ => FlagEndurance::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagType {
    pub name: String,
    pub abbrev: String,
    pub help: String,
    pub endurance: FlagEndurance,
    pub quality: FlagQuality,
    pub shot_type: ShotType,
    pub team: TeamColor,
    pub custom: bool,
}

impl FlagType {
    pub fn null() -> Self {
        Self::builtin("", "", "", FlagEndurance::Normal, FlagQuality::Good)
    }

    fn builtin(
        abbrev: &str,
        name: &str,
        help: &str,
        endurance: FlagEndurance,
        quality: FlagQuality,
    ) -> Self {
        Self {
            name: name.to_string(),
            abbrev: abbrev.to_string(),
            help: help.to_string(),
            endurance,
            quality,
            shot_type: ShotType::Normal,
            team: TeamColor::NoTeam,
            custom: false,
        }
    }

    /// Bad custom flags stick to their carrier; good ones are unstable.
    pub fn custom(abbrev: &str, name: &str, help: &str, quality: FlagQuality) -> Self {
        let endurance = match quality {
            FlagQuality::Bad => FlagEndurance::Sticky,
            FlagQuality::Good => FlagEndurance::Unstable,
        };
        Self {
            custom: true,
            ..Self::builtin(abbrev, name, help, endurance, quality)
        }
    }

    pub fn with_shot(mut self, shot_type: ShotType) -> Self {
        self.shot_type = shot_type;
        self
    }

    fn team_flag(abbrev: &str, name: &str, team: TeamColor) -> Self {
        Self {
            team,
            ..Self::builtin(abbrev, name, "", FlagEndurance::Normal, FlagQuality::Good)
        }
    }

    pub fn is_null(&self) -> bool {
        self.abbrev.is_empty()
    }

    /// Abbreviation as its fixed two byte field.
    pub fn abbrev_bytes(&self) -> [u8; ABBREV_LEN] {
        let mut bytes = [0u8; ABBREV_LEN];
        let raw = self.abbrev.as_bytes();
        let used = raw.len().min(ABBREV_LEN);
        bytes[..used].copy_from_slice(&raw[..used]);
        bytes
    }

    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_string(&self.abbrev_bytes());
    }

    pub fn fake_pack(&self, message: &mut NetMessage) {
        message.pack_string(FAKE_ABBREV);
    }

    /// Abbreviation followed by everything a receiver needs to rebuild the
    /// type.
    pub fn pack_custom(&self, message: &mut NetMessage) {
        self.pack(message);
        message.pack_u8(self.quality.as_u8());
        message.pack_u8(self.shot_type.as_u8());
        message.pack_std_string(&self.name);
        message.pack_std_string(&self.help);
    }

    pub fn unpack_custom(reader: &mut Unpacker<'_>) -> Self {
        let abbrev = unpack_abbrev(reader);
        let quality = FlagQuality::from_u8(reader.unpack_u8());
        let shot_type = ShotType::from_u8(reader.unpack_u8());
        let name = reader.unpack_std_string();
        let help = reader.unpack_std_string();
        Self::custom(&abbrev, &name, &help, quality).with_shot(shot_type)
    }
}

fn unpack_abbrev(reader: &mut Unpacker<'_>) -> String {
    reader.unpack_padded(ABBREV_LEN)
}

/// Flag types known to one side of a connection, keyed by abbreviation.
#[derive(Debug, Clone)]
pub struct FlagRegistry {
    null: Arc<FlagType>,
    types: BTreeMap<String, Arc<FlagType>>,
}

impl Default for FlagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FlagRegistry {
    pub fn new() -> Self {
        Self {
            null: Arc::new(FlagType::null()),
            types: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        use FlagEndurance::{Normal, Unstable};
        use FlagQuality::{Bad, Good};

        let mut registry = Self::new();
        for (abbrev, name, team) in [
            ("R*", "Red Team", TeamColor::Red),
            ("G*", "Green Team", TeamColor::Green),
            ("B*", "Blue Team", TeamColor::Blue),
            ("P*", "Purple Team", TeamColor::Purple),
        ] {
            registry.register(FlagType::team_flag(abbrev, name, team));
        }

        let shots = [
            ("GM", ShotType::GuidedMissile),
            ("L", ShotType::Laser),
            ("TH", ShotType::Thief),
            ("SB", ShotType::Super),
            ("PZ", ShotType::Phantom),
            ("SW", ShotType::ShockWave),
            ("R", ShotType::Ricochet),
            ("MG", ShotType::MachineGun),
            ("IB", ShotType::Invisible),
            ("CS", ShotType::Cloaked),
            ("F", ShotType::RapidFire),
        ];
        for (abbrev, name, help, quality) in [
            ("V", "High Speed", "Tank moves faster.", Good),
            ("QT", "Quick Turn", "Tank turns faster.", Good),
            ("A", "Agility", "Tank accelerates and decelerates faster.", Good),
            ("OO", "Oscillation Overthruster", "Tank can drive through buildings.", Good),
            ("F", "Rapid Fire", "Shoots more often.", Good),
            ("MG", "Machine Gun", "Very fast reload and very short range.", Good),
            ("GM", "Guided Missile", "Shots track a target.", Good),
            ("L", "Laser", "Shoots a laser.", Good),
            ("R", "Ricochet", "Shots bounce off walls.", Good),
            ("SB", "Super Bullet", "Shoots through buildings.", Good),
            ("IB", "Invisible Bullet", "Your shots don't appear on other radars.", Good),
            ("ST", "Stealth", "Tank is invisible on radar.", Good),
            ("CL", "Cloaking", "Tank is invisible out the window.", Good),
            ("T", "Tiny", "Tank is small and can get through small openings.", Good),
            ("N", "Narrow", "Tank is super thin.", Good),
            ("SH", "Shield", "Getting hit only drops the flag.", Good),
            ("SR", "Steamroller", "Destroys tanks you touch.", Good),
            ("SW", "Shock Wave", "Firing destroys all tanks nearby.", Good),
            ("PZ", "Phantom Zone", "Teleporting toggles the zoned state.", Good),
            ("G", "Genocide", "Killing one tank kills that tank's whole team.", Good),
            ("JP", "Jumping", "Tank can jump.", Good),
            ("ID", "Identify", "Identifies the type of the nearest flag.", Good),
            ("MQ", "Masquerade", "Tank looks like a teammate.", Good),
            ("SE", "Seer", "See stealthed, cloaked and masquerading tanks.", Good),
            ("TH", "Thief", "Steal flags.", Good),
            ("US", "Useless", "You have found the useless flag.", Good),
            ("WG", "Wings", "Tank can drive in air.", Good),
            ("CS", "Cloaked Shot", "Your shots are invisible.", Good),
            ("CB", "Colorblindness", "Can't tell team colors.", Bad),
            ("O", "Obesity", "Tank becomes very large.", Bad),
            ("LT", "Left Turn Only", "Can't turn right.", Bad),
            ("RT", "Right Turn Only", "Can't turn left.", Bad),
            ("FO", "Forward Only", "Can't drive in reverse.", Bad),
            ("RO", "Reverse Only", "Can't drive forward.", Bad),
            ("M", "Momentum", "Tank has inertia.", Bad),
            ("B", "Blindness", "Can't see out window.", Bad),
            ("JM", "Jamming", "Radar doesn't work.", Bad),
            ("WA", "Wide Angle", "Fish-eye lens distorts view.", Bad),
            ("NJ", "No Jumping", "Tank can't jump.", Bad),
            ("TR", "Trigger Happy", "Tank can't stop firing.", Bad),
            ("RC", "Reverse Controls", "Tank driving controls are reversed.", Bad),
        ] {
            let endurance = if quality == Bad { Unstable } else { Normal };
            let shot_type = shots
                .iter()
                .find(|(shot_abbrev, _)| *shot_abbrev == abbrev)
                .map_or(ShotType::Normal, |(_, shot)| *shot);
            registry
                .register(FlagType::builtin(abbrev, name, help, endurance, quality).with_shot(shot_type));
        }
        registry
    }

    /// Adds or replaces the type under its abbreviation.
    pub fn register(&mut self, flag_type: FlagType) -> Arc<FlagType> {
        let flag_type = Arc::new(flag_type);
        self.types
            .insert(flag_type.abbrev.clone(), Arc::clone(&flag_type));
        flag_type
    }

    pub fn null(&self) -> Arc<FlagType> {
        Arc::clone(&self.null)
    }

    pub fn lookup(&self, abbrev: &str) -> Option<Arc<FlagType>> {
        self.types.get(abbrev).cloned()
    }

    /// Unknown abbreviations resolve to the null flag.
    pub fn get(&self, abbrev: &str) -> Arc<FlagType> {
        self.lookup(abbrev).unwrap_or_else(|| self.null())
    }

    pub fn unpack(&self, reader: &mut Unpacker<'_>) -> Arc<FlagType> {
        self.get(&unpack_abbrev(reader))
    }

    /// Decodes a custom type and registers it unless a type with the same
    /// abbreviation is already known.
    pub fn unpack_custom(&mut self, reader: &mut Unpacker<'_>) -> Arc<FlagType> {
        let flag_type = FlagType::unpack_custom(reader);
        if reader.has_error() {
            return self.null();
        }
        match self.lookup(&flag_type.abbrev) {
            Some(existing) => existing,
            None => self.register(flag_type),
        }
    }

    /// Drops every custom type.
    pub fn purge_custom(&mut self) -> usize {
        let before = self.types.len();
        self.types.retain(|_, flag_type| !flag_type.custom);
        before - self.types.len()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<FlagType>> {
        self.types.values()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FlagStatus {
    #[default]
    NoExist,
    OnGround,
    OnTank,
    InAir,
    Coming,
    Going,
}

impl FlagStatus {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub const fn from_u16(raw: u16) -> Self {
        match raw {
            1 => FlagStatus::OnGround,
            2 => FlagStatus::OnTank,
            3 => FlagStatus::InAir,
            4 => FlagStatus::Coming,
            5 => FlagStatus::Going,
            _ => FlagStatus::NoExist,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
    pub flag_type: Arc<FlagType>,
    pub status: FlagStatus,
    pub endurance: FlagEndurance,
    pub owner: u8,
    pub position: Vec3,
    pub launch_position: Vec3,
    pub landing_position: Vec3,
    pub flight_time: f32,
    pub flight_end: f32,
    pub initial_velocity: f32,
}

impl Flag {
    pub fn new(flag_type: Arc<FlagType>) -> Self {
        let endurance = flag_type.endurance;
        Self {
            flag_type,
            status: FlagStatus::NoExist,
            endurance,
            owner: crate::codes::NO_PLAYER,
            position: Vec3::ZERO,
            launch_position: Vec3::ZERO,
            landing_position: Vec3::ZERO,
            flight_time: 0.0,
            flight_end: 0.0,
            initial_velocity: 0.0,
        }
    }

    pub fn pack(&self, message: &mut NetMessage) {
        self.flag_type.pack(message);
        self.pack_state(message);
    }

    /// Same layout as [`Flag::pack`] but the type is disguised.
    pub fn fake_pack(&self, message: &mut NetMessage) {
        self.flag_type.fake_pack(message);
        self.pack_state(message);
    }

    fn pack_state(&self, message: &mut NetMessage) {
        message.pack_u16(self.status.as_u16());
        message.pack_u16(self.endurance.as_u16());
        message.pack_u8(self.owner);
        message.pack_fvec3(self.position);
        message.pack_fvec3(self.launch_position);
        message.pack_fvec3(self.landing_position);
        message.pack_f32(self.flight_time);
        message.pack_f32(self.flight_end);
        message.pack_f32(self.initial_velocity);
    }

    pub fn unpack(reader: &mut Unpacker<'_>, registry: &FlagRegistry) -> Self {
        Self {
            flag_type: registry.unpack(reader),
            status: FlagStatus::from_u16(reader.unpack_u16()),
            endurance: FlagEndurance::from_u16(reader.unpack_u16()),
            owner: reader.unpack_u8(),
            position: reader.unpack_fvec3(),
            launch_position: reader.unpack_fvec3(),
            landing_position: reader.unpack_fvec3(),
            flight_time: reader.unpack_f32(),
            flight_end: reader.unpack_f32(),
            initial_velocity: reader.unpack_f32(),
        }
    }
}

/// `MsgFlagUpdate` payload: a `u16` count, then a `u16` flag index and the
/// flag per entry.
pub fn pack_flag_update(message: &mut NetMessage, flags: &[(u16, Flag)]) {
    let flags = &flags[..flags.len().min(u16::MAX as usize)];
    message.pack_u16(flags.len() as u16);
    for (index, flag) in flags {
        message.pack_u16(*index);
        flag.pack(message);
    }
}

pub fn unpack_flag_update(reader: &mut Unpacker<'_>, registry: &FlagRegistry) -> Vec<(u16, Flag)> {
    let count = reader.unpack_u16();
    let mut flags = Vec::with_capacity(count.min(64) as usize);
    for _ in 0..count {
        let index = reader.unpack_u16();
        let flag = Flag::unpack(reader, registry);
        if reader.has_error() {
            break;
        }
        flags.push((index, flag));
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_abbreviation() {
        let registry = FlagRegistry::with_defaults();
        let mut message = NetMessage::new();
        registry.get("V").pack(&mut message);
        registry.get("GM").pack(&mut message);
        registry.null().pack(&mut message);
        assert_eq!(message.payload(), b"V\0GM\0\0");

        assert_eq!(message.unpack_with(|r| registry.unpack(r)).name, "High Speed");
        assert_eq!(message.unpack_with(|r| registry.unpack(r)).abbrev, "GM");
        assert!(message.unpack_with(|r| registry.unpack(r)).is_null());
    }

    #[test]
    fn test_fake_pack() {
        let registry = FlagRegistry::with_defaults();
        let mut message = NetMessage::new();
        registry.get("G").fake_pack(&mut message);
        assert_eq!(message.payload(), b"PZ");
        assert_eq!(message.unpack_with(|r| registry.unpack(r)).name, "Phantom Zone");
    }

    #[test]
    fn test_unknown_abbreviation_is_null() {
        let registry = FlagRegistry::with_defaults();
        let mut message = NetMessage::from_parts(2, 0, b"QQ").unwrap();
        assert!(message.unpack_with(|r| registry.unpack(r)).is_null());
    }

    #[test]
    fn test_custom_round_trip() {
        let custom = FlagType::custom("XB", "Extra Bounce", "Shots bounce twice.", FlagQuality::Good)
            .with_shot(ShotType::Ricochet);
        let mut message = NetMessage::new();
        custom.pack_custom(&mut message);

        let mut registry = FlagRegistry::with_defaults();
        let before = registry.len();
        let decoded = message.unpack_with(|r| registry.unpack_custom(r));
        assert!(message.finish_reading().is_ok());
        assert_eq!(*decoded, custom);
        assert_eq!(decoded.endurance, FlagEndurance::Unstable);
        assert_eq!(registry.len(), before + 1);
        assert_eq!(registry.get("XB").shot_type, ShotType::Ricochet);
    }

    #[test]
    fn test_bad_custom_is_sticky() {
        let custom = FlagType::custom("XX", "Anchor", "", FlagQuality::Bad);
        let mut message = NetMessage::new();
        custom.pack_custom(&mut message);
        let decoded = message.unpack_with(FlagType::unpack_custom);
        assert_eq!(decoded.endurance, FlagEndurance::Sticky);
        assert!(decoded.custom);
    }

    #[test]
    fn test_purge_custom() {
        let mut registry = FlagRegistry::with_defaults();
        let builtin = registry.len();
        registry.register(FlagType::custom("C1", "One", "", FlagQuality::Good));
        registry.register(FlagType::custom("C2", "Two", "", FlagQuality::Bad));
        assert_eq!(registry.purge_custom(), 2);
        assert_eq!(registry.len(), builtin);
        assert!(registry.lookup("C1").is_none());
        assert!(registry.lookup("V").is_some());
    }

    #[test]
    fn test_flag_update() {
        let registry = FlagRegistry::with_defaults();
        let mut flag = Flag::new(registry.get("R*"));
        flag.status = FlagStatus::InAir;
        flag.owner = 3;
        flag.position = Vec3::new(1.0, 2.0, 3.0);
        flag.landing_position = Vec3::new(4.0, 5.0, 0.0);
        flag.flight_time = 0.5;
        flag.flight_end = 2.0;
        flag.initial_velocity = 10.0;

        let flags = vec![(0, flag.clone()), (7, Flag::new(registry.get("SW")))];
        let mut message = NetMessage::new();
        pack_flag_update(&mut message, &flags);
        assert_eq!(message.len(), 2 + 2 * (2 + 55));

        let decoded = message.unpack_with(|r| unpack_flag_update(r, &registry));
        assert!(message.finish_reading().is_ok());
        assert_eq!(decoded, flags);
        assert_eq!(decoded[0].1.flag_type.team, TeamColor::Red);
    }

    #[test]
    fn test_fake_flag_keeps_layout() {
        let registry = FlagRegistry::with_defaults();
        let flag = Flag::new(registry.get("G"));
        let mut real = NetMessage::new();
        let mut fake = NetMessage::new();
        flag.pack(&mut real);
        flag.fake_pack(&mut fake);
        assert_eq!(real.len(), fake.len());
        assert_eq!(&real.payload()[2..], &fake.payload()[2..]);
    }
}
