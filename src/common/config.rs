use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for every `*_ms` setting: one day.
const MAX_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub detector: DetectorConfig,
    pub election: ElectionConfig,
    pub news: NewsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub initial_delay_ms: u64,
    pub delay_increment_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Consecutive qualifying samples before the neighborhood counts as stable.
    pub stability_rounds: u32,
    /// Minimum overlap ratio between consecutive samples.
    pub disparity_threshold: f64,
    pub leader_pull_period_ms: u64,
    /// Delay before pulling leader info again after the leader was suspected.
    pub leader_pull_cooldown_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsConfig {
    pub safety_set_size: usize,
    pub pull_period_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            initial_delay_ms: 3000,
            delay_increment_ms: 800,
        }
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        ElectionConfig {
            stability_rounds: 5,
            disparity_threshold: 0.8,
            leader_pull_period_ms: 5000,
            leader_pull_cooldown_ms: 10000,
        }
    }
}

impl Default for NewsConfig {
    fn default() -> Self {
        NewsConfig {
            safety_set_size: 3,
            pull_period_ms: 5000,
        }
    }
}

impl DetectorConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn delay_increment(&self) -> Duration {
        Duration::from_millis(self.delay_increment_ms)
    }
}

impl ElectionConfig {
    pub fn leader_pull_period(&self) -> Duration {
        Duration::from_millis(self.leader_pull_period_ms)
    }

    pub fn leader_pull_cooldown(&self) -> Duration {
        Duration::from_millis(self.leader_pull_cooldown_ms)
    }
}

impl NewsConfig {
    pub fn pull_period(&self) -> Duration {
        Duration::from_millis(self.pull_period_ms)
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detector.initial_delay_ms == 0 {
            return Err(ConfigError::Invalid("detector.initial_delay_ms must be positive".into()));
        }
        if self.election.stability_rounds == 0 {
            return Err(ConfigError::Invalid("election.stability_rounds must be positive".into()));
        }
        let threshold = self.election.disparity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "election.disparity_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.election.leader_pull_period_ms == 0 || self.news.pull_period_ms == 0 {
            return Err(ConfigError::Invalid("pull periods must be positive".into()));
        }
        let durations = [
            ("detector.initial_delay_ms", self.detector.initial_delay_ms),
            ("detector.delay_increment_ms", self.detector.delay_increment_ms),
            ("election.leader_pull_period_ms", self.election.leader_pull_period_ms),
            ("election.leader_pull_cooldown_ms", self.election.leader_pull_cooldown_ms),
            ("news.pull_period_ms", self.news.pull_period_ms),
        ];
        if let Some((name, value)) = durations.iter().find(|(_, value)| *value > MAX_MS) {
            return Err(ConfigError::Invalid(format!("{} must be at most {}, got {}", name, MAX_MS, value)));
        }
        Ok(())
    }
}
