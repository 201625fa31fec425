use std::time::Duration;

use bzwire::{LinkConfig, TeamColor};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub callsign: String,
    pub motto: String,
    pub team: TeamColor,
    pub use_udp: bool,
    pub update_rate: f32,
    pub run_for: Option<Duration>,
    pub link: LinkConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            callsign: "bzwire".to_string(),
            motto: String::new(),
            team: TeamColor::Automatic,
            use_udp: true,
            update_rate: 10.0,
            run_for: None,
            link: LinkConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Interval between state updates, at least one millisecond.
    pub fn update_interval(&self) -> Duration {
        let rate = if self.update_rate.is_finite() && self.update_rate > 0.0 {
            self.update_rate.min(1000.0)
        } else {
            1.0
        };
        Duration::from_secs_f32(1.0 / rate)
    }
}
