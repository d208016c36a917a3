//! Error types for Kino Quality

use crate::quality::QualityLevel;
use thiserror::Error;

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a quality switch did not complete
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SwitchError {
    #[error("No stream available for {stream_id} at {quality}: {reason}")]
    Resolution {
        quality: QualityLevel,
        stream_id: String,
        reason: String,
    },

    #[error("Playback surface failed to load {quality}: {reason}")]
    Load { quality: QualityLevel, reason: String },

    #[error("Invalid switch to {requested} while {pending:?} is pending")]
    InvalidTransition {
        pending: Option<QualityLevel>,
        requested: QualityLevel,
    },
}

impl SwitchError {
    /// Quality the failed switch was aiming for
    pub fn attempted(&self) -> QualityLevel {
        match self {
            SwitchError::Resolution { quality, .. } | SwitchError::Load { quality, .. } => *quality,
            SwitchError::InvalidTransition { requested, .. } => *requested,
        }
    }

    /// Resolution and load failures leave playback on the previous quality
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SwitchError::Resolution { .. } | SwitchError::Load { .. })
    }

    /// Returns the error code for analytics
    pub fn error_code(&self) -> &'static str {
        match self {
            SwitchError::Resolution { .. } => "RESOLUTION",
            SwitchError::Load { .. } => "LOAD",
            SwitchError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

/// Stream locator failures
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("No stream {stream_id} at {quality}")]
    NotFound {
        stream_id: String,
        quality: QualityLevel,
    },

    #[error("Invalid stream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[cfg(feature = "hls")]
    #[error("Failed to fetch playlist: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Failed to parse playlist: {0}")]
    Playlist(String),
}

/// A playback surface refused a new source outright
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Playback surface rejected source: {0}")]
pub struct SurfaceError(pub String);

/// Controller error types
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Switch(#[from] SwitchError),

    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Controller has been destroyed")]
    ControllerClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Switch(e) => e.is_recoverable(),
            Error::Locator(LocatorError::NotFound { .. }) => true,
            #[cfg(feature = "hls")]
            Error::Locator(LocatorError::Fetch(_)) => true,
            _ => false,
        }
    }

    /// Returns the error code for analytics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Switch(e) => e.error_code(),
            Error::Locator(LocatorError::NotFound { .. }) => "NOT_FOUND",
            Error::Locator(LocatorError::InvalidUrl(_)) => "INVALID_URL",
            #[cfg(feature = "hls")]
            Error::Locator(LocatorError::Fetch(_)) => "FETCH",
            Error::Locator(LocatorError::Playlist(_)) => "PLAYLIST",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::ControllerClosed => "CLOSED",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_error_classification() {
        let load = SwitchError::Load {
            quality: QualityLevel::Q1080,
            reason: "decode".into(),
        };
        assert!(load.is_recoverable());
        assert_eq!(load.attempted(), QualityLevel::Q1080);
        assert_eq!(load.error_code(), "LOAD");

        let invalid = SwitchError::InvalidTransition {
            pending: Some(QualityLevel::Q720),
            requested: QualityLevel::Q480,
        };
        assert!(!invalid.is_recoverable());
        assert!(!Error::from(invalid).is_recoverable());
    }

    #[test]
    fn test_error_codes() {
        let err = Error::from(LocatorError::NotFound {
            stream_id: "abc".into(),
            quality: QualityLevel::Q4K,
        });
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(err.is_recoverable());
        assert_eq!(Error::ControllerClosed.error_code(), "CLOSED");
    }
}
