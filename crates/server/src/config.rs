use std::net::IpAddr;
use std::time::Duration;

use bzwire::dispatch::DEFAULT_CAP_PER_RECIPIENT;
use bzwire::{LatencySimulation, Settings};

/// Player ids stay clear of the reserved broadcast and team ids.
pub const MAX_PLAYERS: u8 = 200;

pub const MAX_PLAYERS_KEY: &str = "maxPlayers";
pub const MAX_PER_TEAM_KEY: &str = "maxPerTeam";
pub const HANDSHAKE_TIMEOUT_KEY: &str = "handshakeTimeout";
pub const CAP_PER_RECIPIENT_KEY: &str = "capPerRecipient";
pub const BANNED_KEY: &str = "banned";
pub const BAN_REASON_KEY: &str = "banReason";
pub const ADMINS_KEY: &str = "admins";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub max_players: u8,
    pub max_per_team: usize,
    pub handshake_timeout: Duration,
    pub cap_per_recipient: usize,
    pub banned: Vec<IpAddr>,
    pub ban_reason: String,
    pub admins: Vec<IpAddr>,
    pub latency: Option<LatencySimulation>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_players: 32,
            max_per_team: 16,
            handshake_timeout: Duration::from_secs(10),
            cap_per_recipient: DEFAULT_CAP_PER_RECIPIENT,
            banned: Vec::new(),
            ban_reason: "banned from this server".to_string(),
            admins: Vec::new(),
            latency: None,
        }
    }
}

impl ServerConfig {
    /// Missing or unparsable keys keep their defaults.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut config = Self::default();

        if let Some(max) = parse::<u8>(settings, MAX_PLAYERS_KEY) {
            config.max_players = max.clamp(1, MAX_PLAYERS);
        }
        if let Some(max) = parse::<usize>(settings, MAX_PER_TEAM_KEY) {
            config.max_per_team = max.max(1);
        }
        if let Some(secs) = settings.get_f32(HANDSHAKE_TIMEOUT_KEY) {
            match Duration::try_from_secs_f32(secs) {
                Ok(timeout) if !timeout.is_zero() => config.handshake_timeout = timeout,
                _ => log::warn!("ignoring {HANDSHAKE_TIMEOUT_KEY}={secs}"),
            }
        }
        if let Some(cap) = parse::<usize>(settings, CAP_PER_RECIPIENT_KEY) {
            config.cap_per_recipient = cap.max(1);
        }
        if let Some(list) = settings.get(BANNED_KEY) {
            config.banned = parse_addresses(list, BANNED_KEY);
        }
        if let Some(reason) = settings.get(BAN_REASON_KEY) {
            config.ban_reason = reason.trim().to_string();
        }
        if let Some(list) = settings.get(ADMINS_KEY) {
            config.admins = parse_addresses(list, ADMINS_KEY);
        }
        config
    }

    pub fn is_banned(&self, ip: IpAddr) -> bool {
        self.banned.contains(&ip)
    }

    /// Connections from these addresses hear roster announcements even
    /// before they join.
    pub fn is_admin(&self, ip: IpAddr) -> bool {
        self.admins.contains(&ip)
    }
}

fn parse<T: std::str::FromStr>(settings: &Settings, key: &str) -> Option<T> {
    settings.get(key)?.trim().parse().ok()
}

fn parse_addresses(list: &str, key: &str) -> Vec<IpAddr> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(ip) => Some(ip),
            Err(_) => {
                log::warn!("ignoring {key} entry {entry:?}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_settings() {
        let config = ServerConfig::from_settings(&Settings::new());
        assert_eq!(config.max_players, 32);
        assert_eq!(config.cap_per_recipient, DEFAULT_CAP_PER_RECIPIENT);
        assert!(config.banned.is_empty());
        assert!(config.latency.is_none());
    }

    #[test]
    fn test_settings_override() {
        let settings = Settings::parse(
            "maxPlayers = 250\n\
             handshakeTimeout = 2.5\n\
             banned = 10.0.0.1, nonsense, ::1\n\
             banReason = go away\n\
             admins = 127.0.0.1\n",
        );
        let config = ServerConfig::from_settings(&settings);
        assert_eq!(config.max_players, MAX_PLAYERS);
        assert_eq!(config.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(config.banned.len(), 2);
        assert!(config.is_banned("::1".parse().unwrap()));
        assert_eq!(config.ban_reason, "go away");
        assert!(config.is_admin("127.0.0.1".parse().unwrap()));
        assert!(!config.is_admin("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_bad_timeout_is_ignored() {
        let settings = Settings::parse("handshakeTimeout=-1\n");
        let config = ServerConfig::from_settings(&settings);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }
}
