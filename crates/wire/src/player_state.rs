//! Tank state carried by `MsgPlayerUpdate` and `MsgPlayerUpdateSmall`.
//!
//! Both encodings start with the `u32` order counter and `u16` status bits.
//! The full encoding then carries floats; the small one scales every value
//! into an `i16`, which holds positions to 2 cm, velocities to 1 cm/s and
//! angular velocity to 0.001 rad/s. The message code tells the decoder which
//! one follows. Status bits then gate optional trailing fields, always in
//! the same order: jump jets, physics driver, user inputs, sounds.

use std::f32::consts::PI;

use glam::Vec3;

use crate::codes::MsgCode;
use crate::message::NetMessage;
use crate::pack::Unpacker;

pub const SMALL_SCALE: f32 = 32766.0;
pub const SMALL_MAX_DIST: f32 = 0.02 * SMALL_SCALE;
pub const SMALL_MAX_VEL: f32 = 0.01 * SMALL_SCALE;
pub const SMALL_MAX_ANG_VEL: f32 = 0.001 * SMALL_SCALE;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PlayerStatus: u16 {
        const ALIVE = 1 << 0;
        const PAUSED = 1 << 1;
        const EXPLODING = 1 << 2;
        const TELEPORTING = 1 << 3;
        const FLAG_ACTIVE = 1 << 4;
        const CROSSING_WALL = 1 << 5;
        const FALLING = 1 << 6;
        const ON_DRIVER = 1 << 7;
        const USER_INPUTS = 1 << 8;
        const JUMP_JETS = 1 << 9;
        const PLAY_SOUND = 1 << 10;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PlayerSounds: u8 {
        const JUMP = 1 << 0;
        const WINGS = 1 << 1;
        const BOUNCE = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerState {
    pub order: u32,
    pub status: PlayerStatus,
    pub pos: Vec3,
    pub velocity: Vec3,
    pub azimuth: f32,
    pub angular_velocity: f32,
    pub jump_jets_scale: f32,
    pub phydrv: i32,
    pub user_speed: f32,
    pub user_ang_vel: f32,
    pub sounds: PlayerSounds,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            order: 0,
            status: PlayerStatus::empty(),
            pos: Vec3::ZERO,
            velocity: Vec3::ZERO,
            azimuth: 0.0,
            angular_velocity: 0.0,
            jump_jets_scale: 0.0,
            phydrv: -1,
            user_speed: 0.0,
            user_ang_vel: 0.0,
            sounds: PlayerSounds::empty(),
        }
    }
}

impl PlayerState {
    /// True when every field is inside the small encoding's range.
    pub fn fits_small(&self) -> bool {
        self.pos.abs().max_element() < SMALL_MAX_DIST
            && self.velocity.abs().max_element() < SMALL_MAX_VEL
            && self.angular_velocity.abs() < SMALL_MAX_ANG_VEL
    }

    /// Packs the state and returns the message code that names the
    /// encoding used.
    pub fn pack(&self, message: &mut NetMessage, no_small_packets: bool) -> MsgCode {
        message.pack_u32(self.order);
        message.pack_u16(self.status.bits());

        let code = if no_small_packets || !self.fits_small() {
            message.pack_fvec3(self.pos);
            message.pack_fvec3(self.velocity);
            message.pack_f32(self.azimuth);
            message.pack_f32(self.angular_velocity);
            MsgCode::PlayerUpdate
        } else {
            for value in self.pos.to_array() {
                message.pack_i16(to_small(value, SMALL_MAX_DIST));
            }
            for value in self.velocity.to_array() {
                message.pack_i16(to_small(value, SMALL_MAX_VEL));
            }
            message.pack_i16(to_small(wrap_angle(self.azimuth), PI));
            message.pack_i16(to_small(self.angular_velocity, SMALL_MAX_ANG_VEL));
            MsgCode::PlayerUpdateSmall
        };

        if self.status.contains(PlayerStatus::JUMP_JETS) {
            message.pack_i16(to_small(self.jump_jets_scale, 1.0));
        }
        if self.status.contains(PlayerStatus::ON_DRIVER) {
            message.pack_i32(self.phydrv);
        }
        if self.status.contains(PlayerStatus::USER_INPUTS) {
            message.pack_i16(to_small(self.user_speed, SMALL_MAX_VEL));
            message.pack_i16(to_small(self.user_ang_vel, SMALL_MAX_ANG_VEL));
        }
        if self.status.contains(PlayerStatus::PLAY_SOUND) {
            message.pack_u8(self.sounds.bits());
        }
        code
    }

    /// `code` selects the encoding: anything but `MsgPlayerUpdateSmall`
    /// is read as full precision.
    pub fn unpack(reader: &mut Unpacker<'_>, code: MsgCode) -> Self {
        let mut state = PlayerState {
            order: reader.unpack_u32(),
            status: PlayerStatus::from_bits_retain(reader.unpack_u16()),
            ..Default::default()
        };

        if code == MsgCode::PlayerUpdateSmall {
            let mut small = [0i16; 8];
            for value in &mut small {
                *value = reader.unpack_i16();
            }
            state.pos = Vec3::new(
                from_small(small[0], SMALL_MAX_DIST),
                from_small(small[1], SMALL_MAX_DIST),
                from_small(small[2], SMALL_MAX_DIST),
            );
            state.velocity = Vec3::new(
                from_small(small[3], SMALL_MAX_VEL),
                from_small(small[4], SMALL_MAX_VEL),
                from_small(small[5], SMALL_MAX_VEL),
            );
            state.azimuth = from_small(small[6], PI);
            state.angular_velocity = from_small(small[7], SMALL_MAX_ANG_VEL);
        } else {
            state.pos = reader.unpack_fvec3();
            state.velocity = reader.unpack_fvec3();
            state.azimuth = reader.unpack_f32();
            state.angular_velocity = reader.unpack_f32();
        }

        if state.status.contains(PlayerStatus::JUMP_JETS) {
            state.jump_jets_scale = from_small(reader.unpack_i16(), 1.0);
        }
        if state.status.contains(PlayerStatus::ON_DRIVER) {
            state.phydrv = reader.unpack_i32();
        }
        if state.status.contains(PlayerStatus::USER_INPUTS) {
            state.user_speed = from_small(reader.unpack_i16(), SMALL_MAX_VEL);
            state.user_ang_vel = from_small(reader.unpack_i16(), SMALL_MAX_ANG_VEL);
        }
        if state.status.contains(PlayerStatus::PLAY_SOUND) {
            state.sounds = PlayerSounds::from_bits_retain(reader.unpack_u8());
        }
        state
    }

    /// Compares `order` counters, tolerating wrap-around.
    pub fn is_newer_than(&self, other: &PlayerState) -> bool {
        (self.order.wrapping_sub(other.order) as i32) > 0
    }
}

fn to_small(value: f32, max: f32) -> i16 {
    (value * SMALL_SCALE / max)
        .round()
        .clamp(-SMALL_SCALE, SMALL_SCALE) as i16
}

fn from_small(raw: i16, max: f32) -> f32 {
    raw as f32 * max / SMALL_SCALE
}

fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped.is_finite() { wrapped } else { 0.0 }
}

/// Payload of a player update: sender timestamp and player id, then the
/// state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerUpdate {
    pub timestamp: f32,
    pub player: u8,
    pub state: PlayerState,
}

impl PlayerUpdate {
    pub fn pack(&self, message: &mut NetMessage, no_small_packets: bool) -> MsgCode {
        message.pack_f32(self.timestamp);
        message.pack_u8(self.player);
        self.state.pack(message, no_small_packets)
    }

    pub fn unpack(reader: &mut Unpacker<'_>, code: MsgCode) -> Self {
        Self {
            timestamp: reader.unpack_f32(),
            player: reader.unpack_u8(),
            state: PlayerState::unpack(reader, code),
        }
    }
}
