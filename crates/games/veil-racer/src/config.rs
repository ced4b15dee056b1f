use serde::{Deserialize, Serialize};

/// Data-driven configuration for the racer. Speeds are units/second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RacerConfig {
    pub track_length: f32,
    pub max_speed: f32,
    pub boost_speed: f32,
    pub acceleration: f32,
    pub brake_force: f32,
    pub friction: f32,
    pub boost_duration_secs: f32,
    pub boost_charges: u8,
    pub lane_change_cooldown_secs: f32,
    pub lane_count: u8,
    pub countdown_secs: f32,
    /// Simulation rate (Hz). Broadcast is downsampled by the scheduler.
    pub tick_rate_hz: f32,
}

impl Default for RacerConfig {
    fn default() -> Self {
        Self {
            track_length: 500.0,
            max_speed: 5.0,
            boost_speed: 8.0,
            acceleration: 3.0,
            brake_force: 5.0,
            friction: 1.0,
            boost_duration_secs: 2.0,
            boost_charges: 3,
            lane_change_cooldown_secs: 0.3,
            lane_count: 4,
            countdown_secs: 3.0,
            tick_rate_hz: 60.0,
        }
    }
}

impl RacerConfig {
    /// Load config from the environment or a TOML file, falling back to
    /// defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("VEIL_RACER_CONFIG")
            && let Ok(contents) = std::fs::read_to_string(&path)
            && let Ok(config) = toml::from_str::<Self>(&contents)
        {
            return config;
        }
        if let Ok(contents) = std::fs::read_to_string("config/racer.toml")
            && let Ok(config) = toml::from_str::<Self>(&contents)
        {
            return config;
        }
        Self::default()
    }
}
