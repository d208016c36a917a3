//! Device profiling
//!
//! Derives the highest quality worth streaming to this device from whatever
//! hardware hints the host can provide. Computed once per controller.

use crate::quality::{QualityLevel, QualityMode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Logical cores assumed when the host does not report them
const DEFAULT_CONCURRENCY: u32 = 4;
/// Device memory (GB) assumed when the host does not report it
const DEFAULT_MEMORY_GB: f32 = 4.0;

const HIGH_END_CONCURRENCY: u32 = 8;
const HIGH_END_MEMORY_GB: f32 = 8.0;

const MOBILE_UA_MARKERS: &[&str] = &[
    "android",
    "iphone",
    "ipad",
    "ipod",
    "mobile",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Raw hints reported by the host environment. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSignals {
    /// Screen width in CSS pixels
    pub screen_width: Option<u32>,
    /// Screen height in CSS pixels
    pub screen_height: Option<u32>,
    /// Physical pixels per CSS pixel
    pub pixel_ratio: Option<f32>,
    /// Explicit platform classification, preferred over the user agent
    pub is_mobile: Option<bool>,
    /// User agent string, sniffed when `is_mobile` is absent
    pub user_agent: Option<String>,
    /// Logical CPU cores
    pub hardware_concurrency: Option<u32>,
    /// Approximate device memory in GB
    pub device_memory_gb: Option<f32>,
}

/// What the device can sensibly play. Immutable once computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapability {
    pub max_quality: QualityLevel,
    pub is_mobile: bool,
    pub is_high_end: bool,
    /// Larger screen dimension in physical pixels (0 when unknown)
    pub screen_max_dimension: u32,
}

impl DeviceCapability {
    /// Clamp a quality so it never exceeds this device's cap
    pub fn clamp(&self, quality: QualityLevel) -> QualityLevel {
        quality.clamp_to(self.max_quality)
    }

    /// Entries for a quality selection menu: `Auto`, then every public
    /// level up to the cap, lowest first
    pub fn available_qualities(&self) -> Vec<QualityMode> {
        std::iter::once(QualityMode::Auto)
            .chain(
                QualityLevel::ALL
                    .into_iter()
                    .filter(|q| q.is_public() && *q <= self.max_quality)
                    .map(QualityMode::Manual),
            )
            .collect()
    }
}

/// Computes [`DeviceCapability`] from [`DeviceSignals`]
pub struct DeviceProfile;

impl DeviceProfile {
    /// Derive the device capability. Never fails; missing signals degrade to
    /// a 1080p cap and mid-tier hardware.
    pub fn compute(signals: &DeviceSignals) -> DeviceCapability {
        let is_mobile = signals
            .is_mobile
            .unwrap_or_else(|| signals.user_agent.as_deref().is_some_and(is_mobile_user_agent));

        let cores = signals.hardware_concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        let memory = signals.device_memory_gb.unwrap_or(DEFAULT_MEMORY_GB);
        let is_high_end = cores >= HIGH_END_CONCURRENCY && memory >= HIGH_END_MEMORY_GB;

        let screen_max_dimension = physical_max_dimension(signals);
        let screen_cap = if screen_max_dimension == 0 {
            QualityLevel::Q1080
        } else {
            screen_cap(screen_max_dimension)
        };

        // Mobile devices stop one rung below 4K regardless of the panel.
        let max_quality = if is_mobile && screen_cap == QualityLevel::Q4K {
            QualityLevel::Q1080
        } else {
            screen_cap
        };

        let capability = DeviceCapability {
            max_quality,
            is_mobile,
            is_high_end,
            screen_max_dimension,
        };

        debug!(
            max_quality = %capability.max_quality,
            is_mobile,
            is_high_end,
            screen = screen_max_dimension,
            "Device profile computed"
        );

        capability
    }
}

/// Case-insensitive user agent sniff for phones and tablets
pub fn is_mobile_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    MOBILE_UA_MARKERS.iter().any(|marker| ua.contains(marker))
}

fn physical_max_dimension(signals: &DeviceSignals) -> u32 {
    let css = signals
        .screen_width
        .unwrap_or(0)
        .max(signals.screen_height.unwrap_or(0));
    let ratio = signals
        .pixel_ratio
        .filter(|r| r.is_finite() && *r > 0.0)
        .unwrap_or(1.0);
    (css as f32 * ratio).round() as u32
}

fn screen_cap(max_dimension: u32) -> QualityLevel {
    match max_dimension {
        2160.. => QualityLevel::Q4K,
        1080.. => QualityLevel::Q1080,
        720.. => QualityLevel::Q720,
        _ => QualityLevel::Q480,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen(width: u32, height: u32) -> DeviceSignals {
        DeviceSignals {
            screen_width: Some(width),
            screen_height: Some(height),
            is_mobile: Some(false),
            ..Default::default()
        }
    }

    #[test]
    fn test_screen_thresholds() {
        assert_eq!(DeviceProfile::compute(&screen(3840, 2160)).max_quality, QualityLevel::Q4K);
        assert_eq!(DeviceProfile::compute(&screen(1920, 1080)).max_quality, QualityLevel::Q1080);
        assert_eq!(DeviceProfile::compute(&screen(1280, 720)).max_quality, QualityLevel::Q720);
        assert_eq!(DeviceProfile::compute(&screen(800, 600)).max_quality, QualityLevel::Q480);
    }

    #[test]
    fn test_portrait_uses_larger_dimension() {
        let cap = DeviceProfile::compute(&screen(1080, 1920));
        assert_eq!(cap.max_quality, QualityLevel::Q1080);
        assert_eq!(cap.screen_max_dimension, 1920);
    }

    #[test]
    fn test_mobile_never_gets_4k() {
        let signals = DeviceSignals {
            screen_width: Some(3840),
            screen_height: Some(2160),
            is_mobile: Some(true),
            ..Default::default()
        };
        let cap = DeviceProfile::compute(&signals);
        assert!(cap.is_mobile);
        assert_eq!(cap.max_quality, QualityLevel::Q1080);
    }

    #[test]
    fn test_pixel_ratio_scales_screen() {
        let signals = DeviceSignals {
            screen_width: Some(1280),
            screen_height: Some(800),
            pixel_ratio: Some(2.0),
            is_mobile: Some(false),
            ..Default::default()
        };
        assert_eq!(DeviceProfile::compute(&signals).max_quality, QualityLevel::Q4K);
    }

    #[test]
    fn test_missing_signals_fall_back_to_1080p() {
        let cap = DeviceProfile::compute(&DeviceSignals::default());
        assert_eq!(cap.max_quality, QualityLevel::Q1080);
        assert!(!cap.is_mobile);
        assert!(!cap.is_high_end);
    }

    #[test]
    fn test_user_agent_sniff() {
        let signals = DeviceSignals {
            screen_width: Some(2560),
            screen_height: Some(1440),
            pixel_ratio: Some(3.0),
            user_agent: Some("Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari".into()),
            ..Default::default()
        };
        let cap = DeviceProfile::compute(&signals);
        assert!(cap.is_mobile);
        assert_eq!(cap.max_quality, QualityLevel::Q1080);
        assert!(!is_mobile_user_agent("Mozilla/5.0 (X11; Linux x86_64) Firefox/131.0"));
    }

    #[test]
    fn test_high_end_detection() {
        let signals = DeviceSignals {
            hardware_concurrency: Some(12),
            device_memory_gb: Some(16.0),
            ..Default::default()
        };
        assert!(DeviceProfile::compute(&signals).is_high_end);

        let signals = DeviceSignals {
            hardware_concurrency: Some(12),
            ..Default::default()
        };
        assert!(!DeviceProfile::compute(&signals).is_high_end);
    }

    #[test]
    fn test_menu_skips_internal_levels_and_respects_cap() {
        let cap = DeviceProfile::compute(&screen(1280, 720));
        assert_eq!(
            cap.available_qualities(),
            vec![
                QualityMode::Auto,
                QualityMode::Manual(QualityLevel::Q480),
                QualityMode::Manual(QualityLevel::Q720),
            ]
        );
    }
}
