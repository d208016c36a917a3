//! Kino Quality - Adaptive quality controller for Kino
//!
//! This crate decides which quality variant should be playing and asks the
//! playback surface to load it:
//! - Device profiling (screen, platform and hardware hints)
//! - Connection-hint recommendations
//! - Buffer health sampling with a bounded history
//! - Hysteresis decisions with cooldowns and settle delays
//! - Position-preserving quality switches
//! - Quality notifications for UI and analytics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Kino Quality                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │    Device    │  │  Connection  │  │    Buffer    │           │
//! │  │   Profile    │  │    Signal    │  │   Sampler    │           │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘           │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Decision   │                              │
//! │                    │   Engine    │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐            │
//! │  │    Stream    │──│   Switch    │──│   Playback   │            │
//! │  │   Locator    │  │  Executor   │  │   Surface    │            │
//! │  └──────────────┘  └──────┬──────┘  └──────────────┘            │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │ Notifier    │                              │
//! │                    └─────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs inside one task per [`QualityController`]; see
//! [`controller`] for the threading model.

pub mod error;
pub mod quality;
pub mod config;
pub mod device;
pub mod connection;
pub mod surface;
pub mod sampler;
pub mod engine;
pub mod locator;
pub mod events;
pub mod state;
pub mod executor;
pub mod controller;
pub mod sim;

pub use error::{Error, LocatorError, Result, SurfaceError, SwitchError};
pub use quality::{QualityLevel, QualityMode};
pub use config::ControllerConfig;
pub use device::{DeviceCapability, DeviceProfile, DeviceSignals};
pub use connection::{ConnectionHint, ConnectionSignal, EffectiveType};
pub use surface::{FailureKind, PlaybackSurface, PlayerEvent, ReadyState};
pub use sampler::{BandwidthBucket, BandwidthSample, BufferHealthSampler, SampleCounts};
pub use engine::{Decision, DecisionEngine, EvalContext, Trigger};
pub use locator::{StaticLocator, StreamLocator, TemplateLocator};
#[cfg(feature = "hls")]
pub use locator::{HlsVariantLocator, LadderEntry};
pub use events::{
    ControllerId, FailureDebouncer, NotificationRecord, QualityChanged, QualityEvent, SwitchFailed,
    SwitchReason,
};
pub use state::ControllerState;
pub use executor::SwitchExecutor;
pub use controller::{ControllerSnapshot, QualityController};
pub use sim::SimulatedSurface;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the quality library
pub fn init() {
    tracing::info!(version = VERSION, "Kino Quality initialized");
}
