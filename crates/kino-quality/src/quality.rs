//! The quality ladder and selection mode

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A rung on the quality ladder.
///
/// Variants are declared lowest first, so the derived `Ord` is the ladder
/// order used for stepping and capping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualityLevel {
    #[serde(rename = "360p")]
    Q360,
    #[serde(rename = "480p")]
    Q480,
    #[serde(rename = "720p")]
    Q720,
    #[serde(rename = "1080p")]
    Q1080,
    #[serde(rename = "4k")]
    Q4K,
}

impl QualityLevel {
    /// Every level, lowest first
    pub const ALL: [QualityLevel; 5] = [
        QualityLevel::Q360,
        QualityLevel::Q480,
        QualityLevel::Q720,
        QualityLevel::Q1080,
        QualityLevel::Q4K,
    ];

    /// Lowest level on the ladder
    pub const LOWEST: QualityLevel = QualityLevel::Q360;

    /// Lowest level offered in the public quality menu.
    ///
    /// `360p` exists only for very slow connections and is never listed.
    pub const LOWEST_PUBLIC: QualityLevel = QualityLevel::Q480;

    /// Position on the ladder (0 = lowest)
    pub fn rank(self) -> usize {
        self as usize
    }

    /// Nominal frame height in pixels
    pub fn height(self) -> u32 {
        match self {
            QualityLevel::Q360 => 360,
            QualityLevel::Q480 => 480,
            QualityLevel::Q720 => 720,
            QualityLevel::Q1080 => 1080,
            QualityLevel::Q4K => 2160,
        }
    }

    /// Tier a frame of the given height belongs to
    pub fn from_height(height: u32) -> Self {
        match height {
            2160.. => QualityLevel::Q4K,
            1080.. => QualityLevel::Q1080,
            720.. => QualityLevel::Q720,
            480.. => QualityLevel::Q480,
            _ => QualityLevel::Q360,
        }
    }

    /// External label (`"720p"`, `"4k"`, ...)
    pub fn label(self) -> &'static str {
        match self {
            QualityLevel::Q360 => "360p",
            QualityLevel::Q480 => "480p",
            QualityLevel::Q720 => "720p",
            QualityLevel::Q1080 => "1080p",
            QualityLevel::Q4K => "4k",
        }
    }

    /// Whether this level appears in the user-facing menu
    pub fn is_public(self) -> bool {
        self >= Self::LOWEST_PUBLIC
    }

    /// Next level up, or `None` at the top of the ladder
    pub fn step_up(self) -> Option<Self> {
        Self::ALL.get(self.rank() + 1).copied()
    }

    /// Next level down, or `None` at the bottom of the ladder
    pub fn step_down(self) -> Option<Self> {
        self.rank().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Clamp to `cap` using the ladder order
    pub fn clamp_to(self, cap: QualityLevel) -> Self {
        self.min(cap)
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned when a quality label cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown quality label: {0}")]
pub struct ParseQualityError(pub String);

impl FromStr for QualityLevel {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "360p" | "360" => Ok(QualityLevel::Q360),
            "480p" | "480" => Ok(QualityLevel::Q480),
            "720p" | "720" => Ok(QualityLevel::Q720),
            "1080p" | "1080" => Ok(QualityLevel::Q1080),
            "4k" | "2160p" | "2160" => Ok(QualityLevel::Q4K),
            _ => Err(ParseQualityError(s.to_string())),
        }
    }
}

/// Who chooses the active quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "mode", content = "quality", rename_all = "snake_case")]
pub enum QualityMode {
    /// The decision engine adapts quality to conditions
    Auto,
    /// The user pinned a quality; adaptation is disabled
    Manual(QualityLevel),
}

impl QualityMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, QualityMode::Auto)
    }
}

impl Default for QualityMode {
    fn default() -> Self {
        QualityMode::Auto
    }
}

impl fmt::Display for QualityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityMode::Auto => f.write_str("auto"),
            QualityMode::Manual(q) => write!(f, "{}", q),
        }
    }
}

impl FromStr for QualityMode {
    type Err = ParseQualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(QualityMode::Auto)
        } else {
            s.parse().map(QualityMode::Manual)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_order() {
        assert!(QualityLevel::Q360 < QualityLevel::Q480);
        assert!(QualityLevel::Q1080 < QualityLevel::Q4K);
        assert_eq!(QualityLevel::ALL.iter().max(), Some(&QualityLevel::Q4K));
    }

    #[test]
    fn test_stepping_at_edges() {
        assert_eq!(QualityLevel::Q360.step_down(), None);
        assert_eq!(QualityLevel::Q4K.step_up(), None);
        assert_eq!(QualityLevel::Q720.step_up(), Some(QualityLevel::Q1080));
        assert_eq!(QualityLevel::Q720.step_down(), Some(QualityLevel::Q480));
    }

    #[test]
    fn test_labels() {
        assert_eq!("4K".parse::<QualityLevel>().unwrap(), QualityLevel::Q4K);
        assert_eq!("2160p".parse::<QualityLevel>().unwrap(), QualityLevel::Q4K);
        assert_eq!(" 720p ".parse::<QualityLevel>().unwrap(), QualityLevel::Q720);
        assert!("8k".parse::<QualityLevel>().is_err());
        assert_eq!(QualityLevel::Q1080.to_string(), "1080p");

        let json = serde_json::to_string(&QualityLevel::Q4K).unwrap();
        assert_eq!(json, "\"4k\"");
    }

    #[test]
    fn test_from_height() {
        assert_eq!(QualityLevel::from_height(2160), QualityLevel::Q4K);
        assert_eq!(QualityLevel::from_height(1440), QualityLevel::Q1080);
        assert_eq!(QualityLevel::from_height(720), QualityLevel::Q720);
        assert_eq!(QualityLevel::from_height(540), QualityLevel::Q480);
        assert_eq!(QualityLevel::from_height(240), QualityLevel::Q360);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("auto".parse::<QualityMode>().unwrap(), QualityMode::Auto);
        assert_eq!(
            "480p".parse::<QualityMode>().unwrap(),
            QualityMode::Manual(QualityLevel::Q480)
        );
        assert!(!QualityMode::Manual(QualityLevel::Q720).is_auto());
    }
}
