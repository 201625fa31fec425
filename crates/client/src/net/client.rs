use std::collections::BTreeMap;
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use glam::Vec3;
use log::{debug, info, trace, warn};

use bzwire::flag::unpack_flag_update;
use bzwire::game_time::unpack_game_time;
use bzwire::join::CALLSIGN_LEN;
use bzwire::team::unpack_team_update;
use bzwire::{
    EnterInfo, FiringInfo, FlagRegistry, GameClock, JoinError, LinkError, LinkState, MsgCode,
    NetMessage, PlayerState, PlayerStatus, PlayerUpdate, ServerLink, Unpacker,
};

use super::config::ClientConfig;

const ORBIT_RADIUS: f32 = 20.0;
const ORBIT_SPEED: f32 = 0.5;
const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// A headless player: joins, drives in a circle and logs what it hears.
pub struct NetworkClient {
    link: ServerLink,
    config: ClientConfig,
    clock: GameClock,
    flags: FlagRegistry,
    roster: BTreeMap<u8, String>,
    state: PlayerState,
    started: Instant,
    last_update: Instant,
}

impl NetworkClient {
    pub fn connect<A: ToSocketAddrs>(addr: A, config: ClientConfig) -> Result<Self> {
        let link = ServerLink::connect(addr, config.link.clone());
        match link.state() {
            LinkState::Okay => {}
            LinkState::Refused => bail!("{}: {}", LinkState::Refused.as_str(), link.rejection_message()),
            other => bail!("{}", other.as_str()),
        }

        let now = Instant::now();
        Ok(Self {
            link,
            config,
            clock: GameClock::new(),
            flags: FlagRegistry::with_defaults(),
            roster: BTreeMap::new(),
            state: PlayerState::default(),
            started: now,
            last_update: now,
        })
    }

    pub fn player_id(&self) -> u8 {
        self.link.player_id()
    }

    pub fn join(&mut self) -> Result<(), JoinError> {
        let mut info = EnterInfo::new(self.config.callsign.clone(), self.config.team);
        info.motto = self.config.motto.clone();
        info.version = concat!("bzwire-client ", env!("CARGO_PKG_VERSION")).to_string();
        self.link.send_enter(&info)?;
        self.link.read_enter()?;
        info!("joined as {} (player {})", self.config.callsign, self.player_id());

        self.state.status = PlayerStatus::ALIVE;
        self.link.send(MsgCode::GameTime, &[])?;
        if self.config.use_udp {
            self.link.send_udp_link_request()?;
        }
        Ok(())
    }

    pub fn run(&mut self) -> Result<()> {
        let interval = self.config.update_interval();
        while !self
            .config
            .run_for
            .is_some_and(|limit| self.started.elapsed() >= limit)
        {
            while let Some(message) = self.link.read(Some(Duration::ZERO))? {
                self.handle_message(message)?;
            }

            if self.last_update.elapsed() >= interval {
                self.send_update()?;
                self.last_update = Instant::now();
            }
            std::thread::sleep(IDLE_SLEEP);
        }

        if self.link.state() == LinkState::Okay {
            self.link.send(MsgCode::Exit, &[])?;
        }
        let stats = self.link.stats();
        info!(
            "sent {} messages ({} over udp), received {}",
            stats.messages_sent, stats.udp_messages_sent, stats.messages_received
        );
        Ok(())
    }

    fn handle_message(&mut self, mut message: NetMessage) -> Result<()> {
        let code = message.code();
        match code {
            MsgCode::UdpLinkRequest => {
                self.link.enable_inbound_udp();
                self.link.confirm_incoming_udp()?;
            }
            MsgCode::UdpLinkEstablished => self.link.enable_outbound_udp(),
            MsgCode::AddPlayer => {
                if let Some((id, callsign)) = decode(&mut message, unpack_add_player) {
                    info!("player {id} is {callsign}");
                    self.roster.insert(id, callsign);
                }
            }
            MsgCode::RemovePlayer => {
                if let Some(id) = decode(&mut message, |reader| reader.unpack_u8()) {
                    if let Some(callsign) = self.roster.remove(&id) {
                        info!("{callsign} left");
                    }
                }
            }
            MsgCode::TeamUpdate => {
                let teams = decode(&mut message, unpack_team_update).unwrap_or_default();
                for (team, record) in teams {
                    debug!("{}: {} players", team.name(), record.size);
                }
            }
            MsgCode::PlayerUpdate | MsgCode::PlayerUpdateSmall => {
                if let Some(update) =
                    decode(&mut message, |reader| PlayerUpdate::unpack(reader, code))
                {
                    trace!("player {} at {:.1?}", update.player, update.state.pos);
                }
            }
            MsgCode::GameTime => {
                if let Some(net_us) = decode(&mut message, unpack_game_time) {
                    let local_us = self.started.elapsed().as_micros() as i64;
                    self.clock.update(net_us, local_us);
                    debug!("game time {net_us}us, rate {:.3}", self.clock.rate());
                }
            }
            MsgCode::ShotBegin => {
                let registry = &self.flags;
                if let Some(shot) =
                    decode(&mut message, |reader| FiringInfo::unpack(reader, registry))
                {
                    debug!(
                        "player {} fired {} ({:?})",
                        shot.shot.player, shot.shot.id, shot.shot_type
                    );
                }
            }
            MsgCode::FlagUpdate => {
                let registry = &self.flags;
                if let Some(flags) =
                    decode(&mut message, |reader| unpack_flag_update(reader, registry))
                {
                    debug!("{} flag updates", flags.len());
                }
            }
            MsgCode::Message => debug!("chat ({} bytes)", message.len()),
            MsgCode::SuperKill => bail!("server removed us"),
            other => debug!("ignoring {other}"),
        }
        Ok(())
    }

    fn send_update(&mut self) -> Result<(), LinkError> {
        let t = self.started.elapsed().as_secs_f32();
        let angle = t * ORBIT_SPEED;
        self.state.order = self.state.order.wrapping_add(1);
        self.state.pos = Vec3::new(angle.cos(), angle.sin(), 0.0) * ORBIT_RADIUS;
        self.state.velocity = Vec3::new(-angle.sin(), angle.cos(), 0.0) * ORBIT_RADIUS * ORBIT_SPEED;
        self.state.azimuth = angle + std::f32::consts::FRAC_PI_2;
        self.state.angular_velocity = ORBIT_SPEED;

        let update = PlayerUpdate {
            timestamp: t,
            player: self.player_id(),
            state: self.state,
        };
        let mut message = NetMessage::new();
        let code = update.pack(&mut message, self.config.link.no_small_packets);
        self.link.send_message(code, &message)
    }
}

/// Decodes a whole payload, or nothing: a message with any field cut short
/// is logged and discarded.
fn decode<R>(message: &mut NetMessage, f: impl FnOnce(&mut Unpacker<'_>) -> R) -> Option<R> {
    let value = message.unpack_with(f);
    match message.finish_reading() {
        Ok(()) => Some(value),
        Err(e) => {
            warn!("discarding malformed {}: {e}", message.code());
            None
        }
    }
}

fn unpack_add_player(reader: &mut Unpacker<'_>) -> (u8, String) {
    let id = reader.unpack_u8();
    for _ in 0..5 {
        reader.unpack_u16();
    }
    (id, reader.unpack_padded(CALLSIGN_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzwire::game_time::pack_game_time;

    fn add_player(id: u8, callsign: &str) -> NetMessage {
        let mut message = NetMessage::new();
        message.pack_u8(id);
        for _ in 0..5 {
            message.pack_u16(0);
        }
        message.pack_padded(callsign, CALLSIGN_LEN);
        message
    }

    fn cut(message: &NetMessage, len: usize) -> NetMessage {
        let payload = &message.payload()[..len];
        NetMessage::from_parts(len as u16, message.raw_code(), payload).unwrap()
    }

    #[test]
    fn test_complete_add_player_decodes() {
        let mut message = add_player(4, "alpha");
        assert_eq!(
            decode(&mut message, unpack_add_player),
            Some((4, "alpha".to_string()))
        );
    }

    #[test]
    fn test_truncated_add_player_is_discarded() {
        let full = add_player(4, "alpha");
        let mut message = cut(&full, full.len() - 1);
        assert_eq!(decode(&mut message, unpack_add_player), None);
    }

    #[test]
    fn test_truncated_game_time_is_discarded() {
        let mut full = NetMessage::new();
        pack_game_time(&mut full, 5_000_000, 0.0);
        let mut message = cut(&full, 6);
        assert_eq!(decode(&mut message, unpack_game_time), None);

        let mut message = cut(&full, 8);
        assert_eq!(decode(&mut message, unpack_game_time), Some(5_000_000));
    }
}
