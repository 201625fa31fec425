//! Network byte order primitives.
//!
//! Packers append to a growable buffer and never fail. Unpacking goes through
//! an [`Unpacker`] cursor that owns its remaining-length counter and a sticky
//! error flag: a read that would overrun yields zero, records the error and
//! leaves the cursor where it was. Callers decoding a whole message check the
//! flag once at the end with [`Unpacker::finish`] or [`Unpacker::take_error`].

use glam::{Vec2, Vec3, Vec4};

use crate::error::PackError;

pub fn pack_u8(buf: &mut Vec<u8>, value: u8) {
    buf.push(value);
}

pub fn pack_i8(buf: &mut Vec<u8>, value: i8) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn pack_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn pack_i16(buf: &mut Vec<u8>, value: i16) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn pack_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn pack_i32(buf: &mut Vec<u8>, value: i32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn pack_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

pub fn pack_i64(buf: &mut Vec<u8>, value: i64) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// Packs the IEEE-754 bit pattern as a big-endian `u32`.
pub fn pack_f32(buf: &mut Vec<u8>, value: f32) {
    pack_u32(buf, value.to_bits());
}

pub fn pack_f64(buf: &mut Vec<u8>, value: f64) {
    pack_u64(buf, value.to_bits());
}

pub fn pack_fvec2(buf: &mut Vec<u8>, value: Vec2) {
    pack_f32(buf, value.x);
    pack_f32(buf, value.y);
}

pub fn pack_fvec3(buf: &mut Vec<u8>, value: Vec3) {
    pack_f32(buf, value.x);
    pack_f32(buf, value.y);
    pack_f32(buf, value.z);
}

pub fn pack_fvec4(buf: &mut Vec<u8>, value: Vec4) {
    pack_f32(buf, value.x);
    pack_f32(buf, value.y);
    pack_f32(buf, value.z);
    pack_f32(buf, value.w);
}

/// Raw byte copy: no length prefix, no terminator.
pub fn pack_string(buf: &mut Vec<u8>, data: &[u8]) {
    buf.extend_from_slice(data);
}

/// Copies at most `width` bytes of `text` and zero-fills the rest of the
/// field. The last byte is always a terminator, so at most `width - 1`
/// bytes of text survive.
pub fn pack_padded(buf: &mut Vec<u8>, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let used = bytes.len().min(width.saturating_sub(1));
    buf.extend_from_slice(&bytes[..used]);
    buf.resize(buf.len() + (width - used), 0);
}

/// `u32` length prefix followed by the raw bytes.
pub fn pack_std_string(buf: &mut Vec<u8>, text: &str) {
    pack_std_bytes(buf, text.as_bytes());
}

pub fn pack_std_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    pack_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

pub const fn std_string_size(len: usize) -> usize {
    4 + len
}

#[derive(Debug, Clone)]
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: usize,
    error: Option<PackError>,
}

impl<'a> Unpacker<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_limit(data, data.len())
    }

    /// Cursor over `data` that refuses to consume more than `limit` bytes in
    /// total. The limit may be larger than `data`; reads are still bounded by
    /// the slice.
    pub fn with_limit(data: &'a [u8], limit: usize) -> Self {
        Self {
            data,
            pos: 0,
            remaining: limit,
            error: None,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.remaining.min(self.data.len() - self.pos)
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<PackError> {
        self.error
    }

    /// Returns the first recorded error and clears the flag.
    pub fn take_error(&mut self) -> Option<PackError> {
        self.error.take()
    }

    pub fn finish(self) -> Result<(), PackError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Unconsumed bytes, bounded by the declared limit.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..self.pos + self.remaining()]
    }

    fn fail(&mut self, err: PackError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let available = self.remaining();
        if len > available {
            self.fail(PackError::Overrun {
                needed: len,
                remaining: available,
            });
            return None;
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        self.remaining -= len;
        Some(bytes)
    }

    fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        if let Some(bytes) = self.take(N) {
            out.copy_from_slice(bytes);
        }
        out
    }

    pub fn unpack_u8(&mut self) -> u8 {
        self.array::<1>()[0]
    }

    pub fn unpack_i8(&mut self) -> i8 {
        i8::from_be_bytes(self.array())
    }

    pub fn unpack_u16(&mut self) -> u16 {
        u16::from_be_bytes(self.array())
    }

    pub fn unpack_i16(&mut self) -> i16 {
        i16::from_be_bytes(self.array())
    }

    pub fn unpack_u32(&mut self) -> u32 {
        u32::from_be_bytes(self.array())
    }

    pub fn unpack_i32(&mut self) -> i32 {
        i32::from_be_bytes(self.array())
    }

    pub fn unpack_u64(&mut self) -> u64 {
        u64::from_be_bytes(self.array())
    }

    pub fn unpack_i64(&mut self) -> i64 {
        i64::from_be_bytes(self.array())
    }

    /// A NaN on the wire decodes as zero and sets the error flag.
    pub fn unpack_f32(&mut self) -> f32 {
        let value = f32::from_bits(self.unpack_u32());
        if value.is_nan() {
            self.fail(PackError::NotANumber);
            return 0.0;
        }
        value
    }

    pub fn unpack_f64(&mut self) -> f64 {
        let value = f64::from_bits(self.unpack_u64());
        if value.is_nan() {
            self.fail(PackError::NotANumber);
            return 0.0;
        }
        value
    }

    pub fn unpack_fvec2(&mut self) -> Vec2 {
        Vec2::new(self.unpack_f32(), self.unpack_f32())
    }

    pub fn unpack_fvec3(&mut self) -> Vec3 {
        Vec3::new(self.unpack_f32(), self.unpack_f32(), self.unpack_f32())
    }

    pub fn unpack_fvec4(&mut self) -> Vec4 {
        Vec4::new(
            self.unpack_f32(),
            self.unpack_f32(),
            self.unpack_f32(),
            self.unpack_f32(),
        )
    }

    /// Exactly `len` raw bytes, or an empty slice on overrun.
    pub fn unpack_string(&mut self, len: usize) -> &'a [u8] {
        self.take(len).unwrap_or_default()
    }

    /// Reads a fixed-width field and cuts it at the first NUL.
    pub fn unpack_padded(&mut self, width: usize) -> String {
        let raw = self.unpack_string(width);
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }

    pub fn unpack_std_bytes(&mut self) -> Vec<u8> {
        let len = self.unpack_u32() as usize;
        self.take(len).map(<[u8]>::to_vec).unwrap_or_default()
    }

    pub fn unpack_std_string(&mut self) -> String {
        match String::from_utf8(self.unpack_std_bytes()) {
            Ok(text) => text,
            Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers_are_big_endian() {
        let mut buf = Vec::new();
        pack_u16(&mut buf, 0x7075);
        pack_u32(&mut buf, 0x0102_0304);
        pack_i16(&mut buf, -2);
        assert_eq!(buf, [0x70, 0x75, 1, 2, 3, 4, 0xFF, 0xFE]);
    }

    #[test]
    fn test_integer_boundaries_round_trip() {
        let mut buf = Vec::new();
        pack_i8(&mut buf, i8::MIN);
        pack_i16(&mut buf, i16::MAX);
        pack_i32(&mut buf, i32::MIN);
        pack_i64(&mut buf, -1);
        pack_u64(&mut buf, u64::MAX);
        pack_u8(&mut buf, 0);

        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_i8(), i8::MIN);
        assert_eq!(reader.unpack_i16(), i16::MAX);
        assert_eq!(reader.unpack_i32(), i32::MIN);
        assert_eq!(reader.unpack_i64(), -1);
        assert_eq!(reader.unpack_u64(), u64::MAX);
        assert_eq!(reader.unpack_u8(), 0);
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_float_infinity_survives() {
        let mut buf = Vec::new();
        pack_f32(&mut buf, f32::INFINITY);
        pack_f64(&mut buf, f64::NEG_INFINITY);

        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_f32(), f32::INFINITY);
        assert_eq!(reader.unpack_f64(), f64::NEG_INFINITY);
        assert!(!reader.has_error());
    }

    #[test]
    fn test_nan_decodes_as_zero_with_error() {
        let mut buf = Vec::new();
        pack_f32(&mut buf, f32::NAN);
        pack_f64(&mut buf, f64::NAN);

        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_f32(), 0.0);
        assert_eq!(reader.error(), Some(PackError::NotANumber));
        assert_eq!(reader.take_error(), Some(PackError::NotANumber));
        assert_eq!(reader.unpack_f64(), 0.0);
        assert!(reader.has_error());
    }

    #[test]
    fn test_std_string_layout() {
        let mut buf = Vec::new();
        pack_std_string(&mut buf, "a\0b");
        assert_eq!(buf, [0, 0, 0, 3, b'a', 0, b'b']);
        assert_eq!(buf.len(), std_string_size(3));

        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_std_string(), "a\0b");
        assert!(reader.finish().is_ok());
    }

    #[test]
    fn test_empty_std_string() {
        let mut buf = Vec::new();
        pack_std_string(&mut buf, "");
        assert_eq!(buf.len(), 4);
        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_std_string(), "");
        assert!(!reader.has_error());
    }

    #[test]
    fn test_std_string_length_beyond_data() {
        let mut buf = Vec::new();
        pack_u32(&mut buf, 1000);
        buf.extend_from_slice(b"short");

        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_std_string(), "");
        assert!(matches!(
            reader.error(),
            Some(PackError::Overrun { needed: 1000, .. })
        ));
    }

    #[test]
    fn test_padded_fields() {
        let mut buf = Vec::new();
        pack_padded(&mut buf, "tank", 8);
        pack_padded(&mut buf, "overlong", 4);
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[..8], b"tank\0\0\0\0");
        assert_eq!(&buf[8..], b"ove\0");

        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_padded(8), "tank");
        assert_eq!(reader.unpack_padded(4), "ove");
    }

    #[test]
    fn test_overrun_sets_sticky_error_once_limit_exceeded() {
        let buf = [0u8; 16];
        let mut reader = Unpacker::with_limit(&buf, 6);

        reader.unpack_u32();
        assert!(!reader.has_error());
        reader.unpack_u16();
        assert!(!reader.has_error());
        assert_eq!(reader.remaining(), 0);

        assert_eq!(reader.unpack_u8(), 0);
        assert_eq!(
            reader.error(),
            Some(PackError::Overrun {
                needed: 1,
                remaining: 0
            })
        );
        assert_eq!(reader.position(), 6);
    }

    #[test]
    fn test_limit_larger_than_data_is_bounded_by_slice() {
        let buf = [1u8, 2, 3];
        let mut reader = Unpacker::with_limit(&buf, 1 << 20);
        assert_eq!(reader.unpack_u32(), 0);
        assert!(reader.has_error());
        assert_eq!(reader.position(), 0);
    }

    #[test]
    fn test_failed_read_keeps_error_but_smaller_reads_continue() {
        let buf = [0xAB, 0xCD];
        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_u32(), 0);
        assert_eq!(reader.unpack_u16(), 0xABCD);
        assert!(reader.finish().is_err());
    }

    #[test]
    fn test_vectors() {
        let mut buf = Vec::new();
        pack_fvec2(&mut buf, Vec2::new(1.0, -2.0));
        pack_fvec3(&mut buf, Vec3::new(0.5, 0.25, -0.125));
        pack_fvec4(&mut buf, Vec4::new(1.0, 2.0, 3.0, 4.0));
        assert_eq!(buf.len(), 8 + 12 + 16);

        let mut reader = Unpacker::new(&buf);
        assert_eq!(reader.unpack_fvec2(), Vec2::new(1.0, -2.0));
        assert_eq!(reader.unpack_fvec3(), Vec3::new(0.5, 0.25, -0.125));
        assert_eq!(reader.unpack_fvec4(), Vec4::new(1.0, 2.0, 3.0, 4.0));
        assert!(reader.rest().is_empty());
    }
}
