use serde::{Deserialize, Serialize};

/// Data-driven configuration for the RPS game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpsConfig {
    /// Seconds players have to submit a choice each round.
    pub choice_window_secs: f32,
    /// Battle royale rounds before ranking on points.
    pub max_rounds: u32,
    /// Starting lives in battle royale.
    pub lives: u8,
    /// Inventory cap per power-up type.
    pub powerup_cap: u8,
    /// Player count at which the lizard/spock extension turns on.
    pub extended_at: usize,
    /// Consecutive round wins required for a power-up grant.
    pub streak_for_powerup: u32,
}

impl Default for RpsConfig {
    fn default() -> Self {
        Self {
            choice_window_secs: 30.0,
            max_rounds: 5,
            lives: 3,
            powerup_cap: 3,
            extended_at: 5,
            streak_for_powerup: 3,
        }
    }
}

impl RpsConfig {
    /// Load config from the environment or a TOML file, falling back to
    /// defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("VEIL_RPS_CONFIG")
            && let Ok(contents) = std::fs::read_to_string(&path)
            && let Ok(config) = toml::from_str::<Self>(&contents)
        {
            return config;
        }
        if let Ok(contents) = std::fs::read_to_string("config/rps.toml")
            && let Ok(config) = toml::from_str::<Self>(&contents)
        {
            return config;
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_overrides_defaults() {
        let cfg: RpsConfig = toml::from_str("max_rounds = 7\nlives = 2\n").unwrap();
        assert_eq!(cfg.max_rounds, 7);
        assert_eq!(cfg.lives, 2);
        assert_eq!(cfg.powerup_cap, 3);
        assert_eq!(cfg.extended_at, 5);
    }
}
