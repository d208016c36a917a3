//! Playback surface boundary
//!
//! The controller never decodes or fetches media. It talks to whatever is
//! actually playing video (an HTML video element behind a bridge, a native
//! player, the simulator) through [`PlaybackSurface`], and receives the
//! surface's events as [`PlayerEvent`]s.

use crate::error::SurfaceError;
use serde::{Deserialize, Serialize};
use url::Url;

/// How much media the surface has available, mirroring `HTMLMediaElement.readyState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

impl ReadyState {
    /// True once dimensions and duration are known
    pub fn has_metadata(self) -> bool {
        self >= ReadyState::HaveMetadata
    }
}

/// Events emitted by the playback surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    Progress,
    Stalled,
    Waiting,
    CanPlay,
    CanPlayThrough,
    Error {
        #[serde(default)]
        message: String,
    },
    MetadataReady,
}

impl PlayerEvent {
    /// Failure-class events drive the immediate step down
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PlayerEvent::Stalled => Some(FailureKind::Stalled),
            PlayerEvent::Waiting => Some(FailureKind::Waiting),
            PlayerEvent::Error { .. } => Some(FailureKind::Error),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Progress => "progress",
            PlayerEvent::Stalled => "stalled",
            PlayerEvent::Waiting => "waiting",
            PlayerEvent::CanPlay => "canplay",
            PlayerEvent::CanPlayThrough => "canplaythrough",
            PlayerEvent::Error { .. } => "error",
            PlayerEvent::MetadataReady => "loadedmetadata",
        }
    }
}

/// Playback failures that warrant an immediate step down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Stalled,
    Waiting,
    Error,
}

/// Whatever renders the video.
///
/// Methods take `&self`; implementations that hold mutable state use
/// interior mutability so one surface can be shared with the host.
pub trait PlaybackSurface: Send + Sync {
    /// Current playback position in seconds
    fn current_position(&self) -> f64;

    /// Whether playback is running (not paused, not ended)
    fn is_playing(&self) -> bool;

    /// Seconds buffered beyond the current position
    fn buffered_ahead(&self) -> f64;

    /// Current ready state
    fn ready_state(&self) -> ReadyState;

    /// Intrinsic video size in pixels, if known
    fn video_dimensions(&self) -> Option<(u32, u32)>;

    /// Start loading a new source.
    ///
    /// Completion is reported asynchronously through
    /// [`PlayerEvent::MetadataReady`] or [`PlayerEvent::Error`]; an `Err`
    /// here means the surface refused the source outright.
    fn load(&self, url: &Url) -> std::result::Result<(), SurfaceError>;

    /// Jump to a position in seconds
    fn seek(&self, position: f64);

    /// Resume playback
    fn play(&self);
}
