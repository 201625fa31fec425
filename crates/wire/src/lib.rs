pub mod capture;
pub mod codes;
pub mod config;
pub mod delay;
pub mod dispatch;
pub mod error;
pub mod flag;
pub mod game_time;
pub mod join;
pub mod link;
pub mod message;
pub mod pack;
pub mod player_state;
pub mod shot;
pub mod team;
pub mod world_codecs;

pub use capture::{CaptureReader, CaptureRecord, CaptureWriter};
pub use codes::{ADMIN_PLAYERS, ALL_PLAYERS, FIRST_TEAM, MsgCode, NO_PLAYER, SERVER_PLAYER};
pub use config::{LinkConfig, Settings};
pub use delay::{DelayQueue, LatencySimulation};
pub use dispatch::{MessageId, MessageManager, Recipient, Transfer};
pub use error::{JoinError, LinkError, MessageError, PackError};
pub use flag::{Flag, FlagEndurance, FlagQuality, FlagRegistry, FlagStatus, FlagType};
pub use game_time::GameClock;
pub use join::{EnterInfo, PlayerType, RejectCode, Rejection};
pub use link::{DEFAULT_PORT, LinkState, LinkStats, ServerLink};
pub use message::{HEADER_LEN, MAX_PACKET_LEN, MessagePool, NetMessage, PooledMessage};
pub use pack::Unpacker;
pub use player_state::{PlayerSounds, PlayerState, PlayerStatus, PlayerUpdate};
pub use shot::{FiringInfo, ShotEnd, ShotType, ShotUpdate};
pub use team::{Team, TeamColor};
pub use world_codecs::{BzDocket, DynamicColor, MeshTransform, TextureMatrix};
