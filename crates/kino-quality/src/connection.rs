//! Network-condition hints and the quality they recommend

use crate::device::DeviceCapability;
use crate::quality::QualityLevel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared connection class, as reported by the host's network information API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String")]
pub enum EffectiveType {
    #[serde(rename = "slow-2g")]
    Slow2g,
    #[serde(rename = "2g")]
    TwoG,
    #[serde(rename = "3g")]
    ThreeG,
    #[serde(rename = "4g")]
    FourG,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl EffectiveType {
    /// Parse a host label; anything unrecognised is `Unknown`
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "slow-2g" | "slow2g" => EffectiveType::Slow2g,
            "2g" => EffectiveType::TwoG,
            "3g" => EffectiveType::ThreeG,
            "4g" => EffectiveType::FourG,
            _ => EffectiveType::Unknown,
        }
    }
}

impl FromStr for EffectiveType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_label(s))
    }
}

impl From<String> for EffectiveType {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl fmt::Display for EffectiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectiveType::Slow2g => write!(f, "slow-2g"),
            EffectiveType::TwoG => write!(f, "2g"),
            EffectiveType::ThreeG => write!(f, "3g"),
            EffectiveType::FourG => write!(f, "4g"),
            EffectiveType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Most recent network-condition snapshot. Replaced wholesale on every change.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionHint {
    #[serde(default)]
    pub effective_type: EffectiveType,
    /// Downlink estimate in megabits per second
    #[serde(default)]
    pub downlink_mbps: f32,
    /// User asked the browser/OS to save data
    #[serde(default)]
    pub data_saver: bool,
}

impl ConnectionHint {
    pub fn new(effective_type: EffectiveType, downlink_mbps: f32, data_saver: bool) -> Self {
        Self {
            effective_type,
            downlink_mbps,
            data_saver,
        }
    }
}

/// Maps a [`ConnectionHint`] to a quality
pub struct ConnectionSignal;

impl ConnectionSignal {
    /// Recommend a quality for the given connection, capped to the device.
    ///
    /// First matching row wins: data saver, 2G, 3G, 4G, then the default.
    pub fn recommend(hint: &ConnectionHint, cap: &DeviceCapability) -> QualityLevel {
        let downlink = hint.downlink_mbps;

        let quality = if hint.data_saver {
            QualityLevel::Q480
        } else {
            match hint.effective_type {
                EffectiveType::Slow2g | EffectiveType::TwoG => QualityLevel::Q360,
                EffectiveType::ThreeG if downlink > 1.5 => QualityLevel::Q720,
                EffectiveType::ThreeG => QualityLevel::Q480,
                EffectiveType::FourG if downlink > 10.0 && cap.max_quality == QualityLevel::Q4K => {
                    QualityLevel::Q4K
                }
                EffectiveType::FourG if downlink > 5.0 => QualityLevel::Q1080,
                EffectiveType::FourG => QualityLevel::Q720,
                EffectiveType::Unknown => QualityLevel::Q720,
            }
        };

        cap.clamp(quality)
    }
}
