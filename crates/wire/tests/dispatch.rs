use std::collections::HashMap;
use std::io;

use bzwire::message::split_frame;
use bzwire::{MessageManager, MessagePool, MsgCode, NetMessage, Recipient, Transfer};

/// Per-player byte streams, the way a server's sockets would see them.
#[derive(Default)]
struct Wires {
    streams: HashMap<u8, Vec<u8>>,
    players: Vec<u8>,
    admins: Vec<u8>,
    closed: Vec<u8>,
}

impl Wires {
    fn with_players(players: &[u8]) -> Self {
        Self {
            players: players.to_vec(),
            ..Default::default()
        }
    }

    fn decode(&self, player: u8) -> Vec<(MsgCode, Vec<u8>)> {
        let mut out = Vec::new();
        let mut rest = self.streams.get(&player).map_or(&[][..], Vec::as_slice);
        while let Some((message, used)) = split_frame(rest).unwrap() {
            out.push((message.code(), message.payload().to_vec()));
            rest = &rest[used..];
        }
        assert!(rest.is_empty(), "partial frame left for player {player}");
        out
    }
}

impl Transfer for Wires {
    type Handle = u8;

    fn send(&mut self, to: &u8, frame: &[u8]) -> io::Result<()> {
        if self.closed.contains(to) {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "closed"));
        }
        self.streams.entry(*to).or_default().extend_from_slice(frame);
        Ok(())
    }

    fn broadcast(&mut self, frame: &[u8], to_admins: bool) -> io::Result<()> {
        let mut targets = self.players.clone();
        if to_admins {
            targets.extend(self.admins.iter().filter(|admin| !self.players.contains(*admin)));
        }
        for player in targets {
            if !self.closed.contains(&player) {
                self.streams.entry(player).or_default().extend_from_slice(frame);
            }
        }
        Ok(())
    }
}

fn chat(text: &str) -> NetMessage {
    let mut message = NetMessage::new();
    message.pack_std_string(text);
    message
}

fn texts(frames: &[(MsgCode, Vec<u8>)]) -> Vec<String> {
    frames
        .iter()
        .map(|(_, payload)| {
            let mut message = NetMessage::from_parts(payload.len() as u16, 0, payload).unwrap();
            message.unpack_std_string()
        })
        .collect()
}

#[test]
fn test_busy_player_does_not_starve_others() {
    let mut manager = MessageManager::new(Some(Wires::with_players(&[1, 2])));
    for n in 0..10 {
        manager.send_to(1, MsgCode::Message, chat(&format!("one-{n}")));
    }
    manager.send_to(2, MsgCode::Message, chat("two"));

    assert_eq!(manager.send_pending_messages(), 4);
    let wires = manager.transfer().unwrap();
    assert_eq!(wires.decode(1).len(), 3);
    assert_eq!(texts(&wires.decode(2)), vec!["two"]);

    let mut cycles = 1;
    while manager.queued_len() > 0 {
        manager.send_pending_messages();
        cycles += 1;
    }
    assert_eq!(cycles, 4);

    let expected: Vec<String> = (0..10).map(|n| format!("one-{n}")).collect();
    assert_eq!(texts(&manager.transfer().unwrap().decode(1)), expected);
}

#[test]
fn test_broadcast_reaches_everyone_once() {
    let mut wires = Wires::with_players(&[1, 2]);
    wires.admins = vec![2, 3];
    let mut manager = MessageManager::new(Some(wires));

    manager.broadcast(MsgCode::Message, chat("all"));
    manager.queue(
        MsgCode::Message,
        Recipient::Broadcast { to_admins: true },
        chat("admins"),
    );
    manager.send_pending_messages();

    let wires = manager.transfer().unwrap();
    assert_eq!(texts(&wires.decode(1)), vec!["all", "admins"]);
    assert_eq!(texts(&wires.decode(2)), vec!["all", "admins"]);
    assert_eq!(texts(&wires.decode(3)), vec!["admins"]);
}

#[test]
fn test_disconnect_purges_and_shutdown_flushes() {
    let mut manager = MessageManager::new(Some(Wires::with_players(&[1, 2])));
    for n in 0..5 {
        manager.send_to(1, MsgCode::Message, chat(&format!("a{n}")));
        manager.send_to(2, MsgCode::Message, chat(&format!("b{n}")));
    }
    let draft = manager.begin(MsgCode::Killed, Recipient::Player(2));
    manager.pending_mut(draft).unwrap().pack_u8(1);

    assert_eq!(manager.purge_messages(&2), 6);
    assert!(!manager.queue_message(draft));
    assert_eq!(manager.flush_messages(&1), 5);
    assert_eq!(manager.queued_len(), 0);

    let wires = manager.transfer().unwrap();
    assert_eq!(wires.decode(1).len(), 5);
    assert!(wires.decode(2).is_empty());
}

#[test]
fn test_closed_socket_drops_message() {
    let mut wires = Wires::with_players(&[1, 2]);
    wires.closed.push(2);
    let mut manager = MessageManager::new(Some(wires));

    manager.send_to(2, MsgCode::Message, chat("lost"));
    manager.send_to(1, MsgCode::Message, chat("kept"));
    assert_eq!(manager.send_pending_messages(), 1);
    assert_eq!(manager.queued_len(), 0);
    assert_eq!(texts(&manager.transfer().unwrap().decode(1)), vec!["kept"]);
}

#[test]
fn test_pooled_buffers_compose_messages() {
    let pool = MessagePool::new(4);
    let mut manager = MessageManager::new(Some(Wires::with_players(&[5])));

    for n in 0..3u8 {
        let mut message = pool.checkout();
        message.pack_u8(n);
        message.pack_padded("x", 4);
        manager.send_to(5, MsgCode::Alive, message.detach());
    }
    {
        let mut scratch = pool.checkout();
        scratch.pack_u32(7);
    }
    assert_eq!(pool.available(), 1);
    assert!(pool.checkout().is_empty());

    manager.send_pending_messages();
    let frames = manager.transfer().unwrap().decode(5);
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|(code, payload)| *code == MsgCode::Alive && payload.len() == 5));
}
