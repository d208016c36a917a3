//! Controller configuration

use crate::error::{Error, Result};
use crate::quality::QualityLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for sampling, hysteresis and timers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Buffer polling cadence while playing (milliseconds)
    pub poll_interval_ms: u64,
    /// Buffer-ahead below this is a Low sample (seconds)
    pub low_buffer_secs: f64,
    /// Buffer-ahead below this is Medium, otherwise High (seconds)
    pub high_buffer_secs: f64,
    /// Ring buffer capacity for bandwidth samples
    pub history_capacity: usize,
    /// Number of recent samples the decision rules look at
    pub decision_window: usize,
    /// Below this many samples the engine abstains
    pub min_samples: usize,
    /// Low samples in the window that trigger a step down
    pub low_samples_to_step_down: usize,
    /// High samples in the window that trigger a step up
    pub high_samples_to_step_up: usize,
    /// Suppression period after a low-buffer step down (milliseconds)
    pub step_down_cooldown_ms: u64,
    /// Quality forced while the page is hidden
    pub hidden_quality: QualityLevel,
    /// Delay before re-evaluating the connection once visible (milliseconds)
    pub visible_settle_ms: u64,
    /// Delay after "can play through" before the eager step up (milliseconds)
    pub recovery_settle_ms: u64,
    /// Buffer-ahead required for the eager step up (seconds)
    pub recovery_buffer_secs: f64,
    /// Allowed drift when restoring the playback position (seconds)
    pub position_epsilon_secs: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            low_buffer_secs: 2.0,
            high_buffer_secs: 5.0,
            history_capacity: 10,
            decision_window: 5,
            min_samples: 3,
            low_samples_to_step_down: 3,
            high_samples_to_step_up: 4,
            step_down_cooldown_ms: 2000,
            hidden_quality: QualityLevel::Q480,
            visible_settle_ms: 1000,
            recovery_settle_ms: 3000,
            recovery_buffer_secs: 5.0,
            position_epsilon_secs: 0.5,
        }
    }
}

impl ControllerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn step_down_cooldown(&self) -> Duration {
        Duration::from_millis(self.step_down_cooldown_ms)
    }

    pub fn visible_settle(&self) -> Duration {
        Duration::from_millis(self.visible_settle_ms)
    }

    pub fn recovery_settle(&self) -> Duration {
        Duration::from_millis(self.recovery_settle_ms)
    }

    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reject configurations the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("poll_interval_ms must be positive".into()));
        }
        if !(self.low_buffer_secs >= 0.0 && self.low_buffer_secs < self.high_buffer_secs) {
            return Err(Error::InvalidConfig(format!(
                "low_buffer_secs ({}) must be below high_buffer_secs ({})",
                self.low_buffer_secs, self.high_buffer_secs
            )));
        }
        if self.decision_window == 0 || self.decision_window > self.history_capacity {
            return Err(Error::InvalidConfig(format!(
                "decision_window ({}) must be within 1..={}",
                self.decision_window, self.history_capacity
            )));
        }
        if self.min_samples == 0 || self.min_samples > self.decision_window {
            return Err(Error::InvalidConfig(format!(
                "min_samples ({}) must be within 1..={}",
                self.min_samples, self.decision_window
            )));
        }
        for (name, count) in [
            ("low_samples_to_step_down", self.low_samples_to_step_down),
            ("high_samples_to_step_up", self.high_samples_to_step_up),
        ] {
            if count == 0 || count > self.decision_window {
                return Err(Error::InvalidConfig(format!(
                    "{} ({}) must be within 1..={}",
                    name, count, self.decision_window
                )));
            }
        }
        if self.position_epsilon_secs < 0.0 {
            return Err(Error::InvalidConfig("position_epsilon_secs must not be negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.step_down_cooldown(), Duration::from_secs(2));
        assert_eq!(config.hidden_quality, QualityLevel::Q480);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = ControllerConfig::from_json_str(
            r#"{"poll_interval_ms": 1000, "hidden_quality": "720p"}"#,
        )
        .unwrap();
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.hidden_quality, QualityLevel::Q720);
        assert_eq!(config.decision_window, 5);
    }

    #[test]
    fn test_validation() {
        let config = ControllerConfig {
            low_buffer_secs: 6.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let config = ControllerConfig {
            decision_window: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ControllerConfig {
            high_samples_to_step_up: 6,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        assert!(ControllerConfig::from_json_str(r#"{"poll_interval_ms": 0}"#).is_err());
    }
}
