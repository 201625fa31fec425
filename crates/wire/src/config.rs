use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

pub const CONNECTION_TIMEOUT_KEY: &str = "connectionTimeout";
pub const NO_SMALL_PACKETS_KEY: &str = "noSmallPackets";
pub const CAPTURE_ENV_VAR: &str = "BZFLAGSAVE";

pub const DEFAULT_CONNECTION_TIMEOUT_SECS: f32 = 30.0;

/// Runtime key-value configuration. Values are stored as text and parsed
/// by the typed getters.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn unset(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// `None` when the key is missing or does not parse as a number.
    pub fn get_f32(&self, key: &str) -> Option<f32> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn is_true(&self, key: &str) -> bool {
        match self.get(key) {
            Some(value) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            None => false,
        }
    }

    /// Parses `key=value` pairs, one per line. Blank lines and lines
    /// starting with `#` are skipped.
    pub fn parse(text: &str) -> Self {
        let mut settings = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                settings.set(key.trim(), value.trim());
            }
        }
        settings
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub connection_timeout: Duration,
    pub no_small_packets: bool,
    pub capture_path: Option<PathBuf>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs_f32(DEFAULT_CONNECTION_TIMEOUT_SECS),
            no_small_packets: false,
            capture_path: None,
        }
    }
}

impl LinkConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let timeout = settings
            .get_f32(CONNECTION_TIMEOUT_KEY)
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .unwrap_or(DEFAULT_CONNECTION_TIMEOUT_SECS);

        Self {
            connection_timeout: Duration::from_secs_f32(timeout),
            no_small_packets: settings.is_true(NO_SMALL_PACKETS_KEY),
            capture_path: None,
        }
    }

    pub fn with_capture_from_env(self) -> Self {
        self.capture_from(std::env::var_os(CAPTURE_ENV_VAR))
    }

    /// An empty value disables capture.
    pub fn capture_from(mut self, value: Option<OsString>) -> Self {
        self.capture_path = value.filter(|v| !v.is_empty()).map(PathBuf::from);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::from_settings(&Settings::new());
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
        assert!(!config.no_small_packets);
        assert_eq!(config, LinkConfig::default());
    }

    #[test]
    fn test_typed_getters() {
        let mut settings = Settings::new();
        settings.set(CONNECTION_TIMEOUT_KEY, "2.5");
        settings.set(NO_SMALL_PACKETS_KEY, "yes");
        settings.set("bogus", "abc");

        assert_eq!(settings.get_f32(CONNECTION_TIMEOUT_KEY), Some(2.5));
        assert_eq!(settings.get_f32("bogus"), None);
        assert!(settings.is_true(NO_SMALL_PACKETS_KEY));
        assert!(!settings.is_true("bogus"));

        let config = LinkConfig::from_settings(&settings);
        assert_eq!(config.connection_timeout, Duration::from_millis(2500));
        assert!(config.no_small_packets);

        assert_eq!(settings.unset(NO_SMALL_PACKETS_KEY).as_deref(), Some("yes"));
        assert!(!settings.is_set(NO_SMALL_PACKETS_KEY));
    }

    #[test]
    fn test_invalid_timeout_falls_back() {
        let mut settings = Settings::new();
        settings.set(CONNECTION_TIMEOUT_KEY, "-4");
        let config = LinkConfig::from_settings(&settings);
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_parse() {
        let settings = Settings::parse("# comment\n\nconnectionTimeout = 5\nnoSmallPackets=1\n");
        assert_eq!(settings.get_f32(CONNECTION_TIMEOUT_KEY), Some(5.0));
        assert!(settings.is_true(NO_SMALL_PACKETS_KEY));
    }

    #[test]
    fn test_capture_from() {
        let config = LinkConfig::default().capture_from(Some(OsString::from("/tmp/session.bzs")));
        assert_eq!(config.capture_path, Some(PathBuf::from("/tmp/session.bzs")));

        let config = LinkConfig::default().capture_from(Some(OsString::new()));
        assert_eq!(config.capture_path, None);

        let config = LinkConfig::default().capture_from(None);
        assert_eq!(config.capture_path, None);
    }
}
