//! Property tests for the byte codec and framing.
//!
//! Decoders must survive arbitrary input without panicking or reading past
//! their limit, and well-formed values must come back unchanged.

use bzwire::join::{CALLSIGN_LEN, ENTER_LEN};
use bzwire::message::split_frame;
use bzwire::pack::{self, Unpacker};
use bzwire::{EnterInfo, MsgCode, NetMessage, PackError, PlayerState, ShotUpdate, TeamColor};
use glam::Vec3;
use proptest::prelude::*;

proptest! {
    #[test]
    fn arbitrary_bytes_never_overrun_the_limit(
        bytes in prop::collection::vec(any::<u8>(), 0..256),
        limit in 0usize..300,
    ) {
        let mut reader = Unpacker::with_limit(&bytes, limit);
        let bound = limit.min(bytes.len());
        reader.unpack_u32();
        reader.unpack_std_string();
        reader.unpack_fvec3();
        reader.unpack_padded(16);
        reader.unpack_u64();
        prop_assert!(reader.position() <= bound);
        prop_assert_eq!(reader.remaining(), bound - reader.position());
    }

    #[test]
    fn overrun_returns_zero_and_keeps_cursor(
        bytes in prop::collection::vec(any::<u8>(), 0..4),
    ) {
        let mut reader = Unpacker::new(&bytes);
        prop_assert_eq!(reader.unpack_u32(), 0);
        prop_assert_eq!(reader.position(), 0);
        let overrun = matches!(reader.error(), Some(PackError::Overrun { needed: 4, .. }));
        prop_assert!(overrun);
    }

    #[test]
    fn integers_roundtrip(a in any::<u16>(), b in any::<i32>(), c in any::<u64>(), d in any::<i8>()) {
        let mut buf = Vec::new();
        pack::pack_u16(&mut buf, a);
        pack::pack_i32(&mut buf, b);
        pack::pack_u64(&mut buf, c);
        pack::pack_i8(&mut buf, d);
        prop_assert_eq!(buf.len(), 2 + 4 + 8 + 1);

        let mut reader = Unpacker::new(&buf);
        prop_assert_eq!(reader.unpack_u16(), a);
        prop_assert_eq!(reader.unpack_i32(), b);
        prop_assert_eq!(reader.unpack_u64(), c);
        prop_assert_eq!(reader.unpack_i8(), d);
        prop_assert!(reader.finish().is_ok());
    }

    #[test]
    fn std_string_uses_four_plus_len(text in ".{0,64}") {
        let mut buf = Vec::new();
        pack::pack_std_string(&mut buf, &text);
        prop_assert_eq!(buf.len(), pack::std_string_size(text.len()));

        let mut reader = Unpacker::new(&buf);
        prop_assert_eq!(reader.unpack_std_string(), text);
        prop_assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn padded_field_keeps_width(text in "[a-zA-Z0-9 ]{0,40}") {
        let mut buf = Vec::new();
        pack::pack_padded(&mut buf, &text, CALLSIGN_LEN);
        prop_assert_eq!(buf.len(), CALLSIGN_LEN);
        prop_assert_eq!(buf[CALLSIGN_LEN - 1], 0);

        let kept = text.len().min(CALLSIGN_LEN - 1);
        let mut reader = Unpacker::new(&buf);
        prop_assert_eq!(reader.unpack_padded(CALLSIGN_LEN), &text[..kept]);
    }

    #[test]
    fn floats_roundtrip_unless_nan(bits in any::<u32>()) {
        let mut buf = Vec::new();
        pack::pack_u32(&mut buf, bits);
        let mut reader = Unpacker::new(&buf);
        let value = reader.unpack_f32();
        if f32::from_bits(bits).is_nan() {
            prop_assert_eq!(value, 0.0);
            prop_assert_eq!(reader.error(), Some(PackError::NotANumber));
        } else {
            prop_assert_eq!(value.to_bits(), bits);
            prop_assert!(!reader.has_error());
        }
    }

    #[test]
    fn arbitrary_bytes_dont_crash_split_frame(
        bytes in prop::collection::vec(any::<u8>(), 0..2048),
    ) {
        if let Ok(Some((message, used))) = split_frame(&bytes) {
            prop_assert_eq!(used, 4 + message.len());
            prop_assert!(used <= bytes.len());
        }
    }

    #[test]
    fn arbitrary_payload_dont_crash_decoders(
        bytes in prop::collection::vec(any::<u8>(), 0..300),
        code in prop::sample::select(vec![MsgCode::PlayerUpdate, MsgCode::PlayerUpdateSmall]),
    ) {
        let mut reader = Unpacker::new(&bytes);
        let _state = PlayerState::unpack(&mut reader, code);
        let mut reader = Unpacker::new(&bytes);
        let _shot = ShotUpdate::unpack(&mut reader);
        let mut reader = Unpacker::new(&bytes);
        let _info = EnterInfo::unpack(&mut reader);
        prop_assert_eq!(reader.has_error(), bytes.len() < ENTER_LEN);
    }

    #[test]
    fn frames_roundtrip_through_stream(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8),
    ) {
        let mut stream = Vec::new();
        for payload in &payloads {
            let mut message = NetMessage::new();
            message.pack_string(payload);
            stream.extend_from_slice(message.finalize(MsgCode::Message).unwrap());
        }

        let mut rest = &stream[..];
        for payload in &payloads {
            let (message, used) = split_frame(rest).unwrap().unwrap();
            prop_assert_eq!(message.code(), MsgCode::Message);
            prop_assert_eq!(message.payload(), &payload[..]);
            rest = &rest[used..];
        }
        prop_assert!(rest.is_empty());
    }

    #[test]
    fn shot_update_roundtrip(
        player in any::<u8>(),
        id in any::<u16>(),
        x in -400.0f32..400.0,
        y in -400.0f32..400.0,
        z in 0.0f32..100.0,
        dt in 0.0f32..10.0,
    ) {
        let shot = ShotUpdate {
            player,
            id,
            pos: Vec3::new(x, y, z),
            velocity: Vec3::new(y, x, 0.5),
            dt,
            team: TeamColor::Purple,
        };
        let mut message = NetMessage::new();
        shot.pack(&mut message);
        prop_assert_eq!(message.len(), ShotUpdate::PACKED_LEN);
        let decoded = message.unpack_with(ShotUpdate::unpack);
        prop_assert_eq!(decoded, shot);
    }
}
