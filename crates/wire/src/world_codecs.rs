//! World database objects that the server ships inside the world blob.
//!
//! Each object starts with its name as a std string. Variable-length parts
//! carry a `u32` count; decoders stop at the first read error so a hostile
//! count cannot make them spin or over-allocate.

use glam::{Vec2, Vec3, Vec4};

use crate::message::NetMessage;
use crate::pack::Unpacker;

fn capacity_for(count: u32, reader: &Unpacker<'_>, entry_len: usize) -> usize {
    (count as usize).min(reader.remaining() / entry_len.max(1))
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sinusoid {
    pub period: f32,
    pub offset: f32,
    pub weight: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Clamp {
    pub period: f32,
    pub offset: f32,
    pub width: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelParams {
    pub min_value: f32,
    pub max_value: f32,
    pub sinusoids: Vec<Sinusoid>,
    pub clamp_ups: Vec<Clamp>,
    pub clamp_downs: Vec<Clamp>,
}

impl ChannelParams {
    fn pack(&self, message: &mut NetMessage) {
        message.pack_f32(self.min_value);
        message.pack_f32(self.max_value);
        message.pack_u32(self.sinusoids.len() as u32);
        for s in &self.sinusoids {
            message.pack_f32(s.period);
            message.pack_f32(s.offset);
            message.pack_f32(s.weight);
        }
        for clamps in [&self.clamp_ups, &self.clamp_downs] {
            message.pack_u32(clamps.len() as u32);
            for c in clamps {
                message.pack_f32(c.period);
                message.pack_f32(c.offset);
                message.pack_f32(c.width);
            }
        }
    }

    fn unpack(reader: &mut Unpacker<'_>) -> Self {
        let min_value = reader.unpack_f32();
        let max_value = reader.unpack_f32();

        let count = reader.unpack_u32();
        let mut sinusoids = Vec::with_capacity(capacity_for(count, reader, 12));
        for _ in 0..count {
            if reader.has_error() {
                break;
            }
            sinusoids.push(Sinusoid {
                period: reader.unpack_f32(),
                offset: reader.unpack_f32(),
                weight: reader.unpack_f32(),
            });
        }

        Self {
            min_value,
            max_value,
            sinusoids,
            clamp_ups: unpack_clamps(reader),
            clamp_downs: unpack_clamps(reader),
        }
    }
}

fn unpack_clamps(reader: &mut Unpacker<'_>) -> Vec<Clamp> {
    let count = reader.unpack_u32();
    let mut clamps = Vec::with_capacity(capacity_for(count, reader, 12));
    for _ in 0..count {
        if reader.has_error() {
            break;
        }
        clamps.push(Clamp {
            period: reader.unpack_f32(),
            offset: reader.unpack_f32(),
            width: reader.unpack_f32(),
        });
    }
    clamps
}

/// Color whose red, green, blue and alpha channels vary over time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicColor {
    pub name: String,
    pub channels: [ChannelParams; 4],
}

impl DynamicColor {
    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_std_string(&self.name);
        for channel in &self.channels {
            channel.pack(message);
        }
    }

    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        let name = reader.unpack_std_string();
        let channels = std::array::from_fn(|_| ChannelParams::unpack(reader));
        Self { name, channels }
    }
}

const STATIC_BIT: u8 = 1 << 0;
const DYNAMIC_BIT: u8 = 1 << 1;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StaticTexture {
    pub rotation: f32,
    pub shift: Vec2,
    pub scale: Vec2,
    pub center: Vec2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DynamicTexture {
    pub spin: f32,
    pub shift: Vec2,
    pub scale_freq: Vec2,
    pub scale: Vec2,
    pub center: Vec2,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextureMatrix {
    pub name: String,
    pub static_part: Option<StaticTexture>,
    pub dynamic_part: Option<DynamicTexture>,
}

impl TextureMatrix {
    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_std_string(&self.name);

        let mut state = 0;
        if self.static_part.is_some() {
            state |= STATIC_BIT;
        }
        if self.dynamic_part.is_some() {
            state |= DYNAMIC_BIT;
        }
        message.pack_u8(state);

        if let Some(s) = &self.static_part {
            message.pack_f32(s.rotation);
            message.pack_fvec2(s.shift);
            message.pack_fvec2(s.scale);
            message.pack_fvec2(s.center);
        }
        if let Some(d) = &self.dynamic_part {
            message.pack_f32(d.spin);
            message.pack_fvec2(d.shift);
            message.pack_fvec2(d.scale_freq);
            message.pack_fvec2(d.scale);
            message.pack_fvec2(d.center);
        }
    }

    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        let name = reader.unpack_std_string();
        let state = reader.unpack_u8();

        let static_part = (state & STATIC_BIT != 0).then(|| StaticTexture {
            rotation: reader.unpack_f32(),
            shift: reader.unpack_fvec2(),
            scale: reader.unpack_fvec2(),
            center: reader.unpack_fvec2(),
        });
        let dynamic_part = (state & DYNAMIC_BIT != 0).then(|| DynamicTexture {
            spin: reader.unpack_f32(),
            shift: reader.unpack_fvec2(),
            scale_freq: reader.unpack_fvec2(),
            scale: reader.unpack_fvec2(),
            center: reader.unpack_fvec2(),
        });

        Self {
            name,
            static_part,
            dynamic_part,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransformOp {
    Shift(Vec3),
    Scale(Vec3),
    Shear(Vec3),
    /// Angle in degrees followed by the rotation axis.
    Spin(Vec4),
    /// Reference to another transform by index.
    Index(i32),
}

impl TransformOp {
    const fn kind(&self) -> u8 {
        match self {
            TransformOp::Shift(_) => 0,
            TransformOp::Scale(_) => 1,
            TransformOp::Shear(_) => 2,
            TransformOp::Spin(_) => 3,
            TransformOp::Index(_) => 4,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshTransform {
    pub name: String,
    pub ops: Vec<TransformOp>,
}

impl MeshTransform {
    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_std_string(&self.name);
        message.pack_u32(self.ops.len() as u32);
        for op in &self.ops {
            message.pack_u8(op.kind());
            match op {
                TransformOp::Shift(v) | TransformOp::Scale(v) | TransformOp::Shear(v) => {
                    message.pack_fvec3(*v)
                }
                TransformOp::Spin(v) => message.pack_fvec4(*v),
                TransformOp::Index(index) => message.pack_i32(*index),
            }
        }
    }

    /// An unknown operation type ends the list; the reader is left marked
    /// as failed.
    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        let name = reader.unpack_std_string();
        let count = reader.unpack_u32();
        let mut ops = Vec::with_capacity(capacity_for(count, reader, 5));
        for _ in 0..count {
            if reader.has_error() {
                break;
            }
            let op = match reader.unpack_u8() {
                0 => TransformOp::Shift(reader.unpack_fvec3()),
                1 => TransformOp::Scale(reader.unpack_fvec3()),
                2 => TransformOp::Shear(reader.unpack_fvec3()),
                3 => TransformOp::Spin(reader.unpack_fvec4()),
                4 => TransformOp::Index(reader.unpack_i32()),
                other => {
                    log::warn!("unknown transform type {other} in {name:?}");
                    // Forces the overrun flag: the rest of the list cannot be framed.
                    let rest = reader.remaining();
                    reader.unpack_string(rest + 1);
                    break;
                }
            };
            if !reader.has_error() {
                ops.push(op);
            }
        }
        Self { name, ops }
    }
}

/// Named bag of opaque files shipped with a world.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BzDocket {
    pub name: String,
    pub entries: Vec<(String, Vec<u8>)>,
}

impl BzDocket {
    pub fn add(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.entries.push((name.into(), data.into()));
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn pack(&self, message: &mut NetMessage) {
        message.pack_std_string(&self.name);
        message.pack_u32(self.entries.len() as u32);
        for (name, data) in &self.entries {
            message.pack_std_string(name);
            message.pack_std_bytes(data);
        }
    }

    pub fn unpack(reader: &mut Unpacker<'_>) -> Self {
        let name = reader.unpack_std_string();
        let count = reader.unpack_u32();
        let mut entries = Vec::with_capacity(capacity_for(count, reader, 8));
        for _ in 0..count {
            if reader.has_error() {
                break;
            }
            let entry = reader.unpack_std_string();
            let data = reader.unpack_std_bytes();
            if !reader.has_error() {
                entries.push((entry, data));
            }
        }
        Self { name, entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_color() {
        let mut color = DynamicColor {
            name: "pulse".into(),
            ..Default::default()
        };
        color.channels[0] = ChannelParams {
            min_value: 0.2,
            max_value: 1.0,
            sinusoids: vec![Sinusoid {
                period: 2.0,
                offset: 0.0,
                weight: 1.0,
            }],
            clamp_ups: vec![Clamp {
                period: 4.0,
                offset: 1.0,
                width: 0.5,
            }],
            clamp_downs: Vec::new(),
        };
        color.channels[3].max_value = 1.0;

        let mut message = NetMessage::new();
        color.pack(&mut message);
        assert_eq!(message.len(), 4 + 5 + 4 * 20 + 12 + 12);

        let decoded = message.unpack_with(DynamicColor::unpack);
        assert!(message.finish_reading().is_ok());
        assert_eq!(decoded, color);
    }

    #[test]
    fn test_texture_matrix_parts() {
        let matrix = TextureMatrix {
            name: "scroll".into(),
            static_part: None,
            dynamic_part: Some(DynamicTexture {
                spin: 0.5,
                shift: Vec2::new(0.1, 0.0),
                ..Default::default()
            }),
        };
        let mut message = NetMessage::new();
        matrix.pack(&mut message);
        assert_eq!(message.payload()[4 + 6], DYNAMIC_BIT);
        assert_eq!(message.len(), 4 + 6 + 1 + 4 + 4 * 8);
        assert_eq!(message.unpack_with(TextureMatrix::unpack), matrix);

        let both = TextureMatrix {
            static_part: Some(StaticTexture {
                rotation: 90.0,
                scale: Vec2::ONE,
                ..Default::default()
            }),
            ..matrix
        };
        let mut message = NetMessage::new();
        both.pack(&mut message);
        assert_eq!(message.unpack_with(TextureMatrix::unpack), both);
    }

    #[test]
    fn test_mesh_transform() {
        let transform = MeshTransform {
            name: "tilt".into(),
            ops: vec![
                TransformOp::Shift(Vec3::new(1.0, 2.0, 3.0)),
                TransformOp::Spin(Vec4::new(45.0, 0.0, 0.0, 1.0)),
                TransformOp::Index(2),
                TransformOp::Scale(Vec3::splat(2.0)),
            ],
        };
        let mut message = NetMessage::new();
        transform.pack(&mut message);
        assert_eq!(message.len(), 4 + 4 + 4 + (1 + 12) + (1 + 16) + (1 + 4) + (1 + 12));
        let decoded = message.unpack_with(MeshTransform::unpack);
        assert!(message.finish_reading().is_ok());
        assert_eq!(decoded, transform);
    }

    #[test]
    fn test_mesh_transform_unknown_type() {
        let mut message = NetMessage::new();
        message.pack_std_string("bad");
        message.pack_u32(2);
        message.pack_u8(9);
        message.pack_fvec3(Vec3::ZERO);
        let decoded = message.unpack_with(MeshTransform::unpack);
        assert!(decoded.ops.is_empty());
        assert!(message.finish_reading().is_err());
    }

    #[test]
    fn test_docket() {
        let mut docket = BzDocket {
            name: "maps".into(),
            ..Default::default()
        };
        docket.add("readme.txt", b"hello".to_vec());
        docket.add("blob", vec![0u8, 1, 0, 2]);

        let mut message = NetMessage::new();
        docket.pack(&mut message);
        let decoded = message.unpack_with(BzDocket::unpack);
        assert_eq!(decoded, docket);
        assert_eq!(decoded.get("blob"), Some(&[0u8, 1, 0, 2][..]));
        assert_eq!(decoded.get("missing"), None);
    }

    #[test]
    fn test_hostile_count_does_not_allocate() {
        let mut message = NetMessage::new();
        message.pack_std_string("x");
        message.pack_u32(u32::MAX);
        let decoded = message.unpack_with(BzDocket::unpack);
        assert!(decoded.entries.is_empty());
        assert!(message.finish_reading().is_err());
    }
}
