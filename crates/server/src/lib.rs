pub mod config;
pub mod events;
pub mod server;
pub mod transport;

pub use config::ServerConfig;
pub use events::{DisconnectReason, ServerEvent};
pub use server::{RelayServer, ServerStats};
pub use transport::{PlayerId, Sockets};
