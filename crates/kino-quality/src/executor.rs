//! Switch executor
//!
//! Swaps the playback surface to another quality while keeping the viewer's
//! place: resolve the new locator, remember position and play state, load,
//! and on metadata restore both before announcing the change. Never retries
//! on its own; the next evaluation may pick a lower quality instead.

use crate::error::SwitchError;
use crate::events::{Notifier, QualityChanged, QualityEvent, SwitchFailed, SwitchReason};
use crate::locator::StreamLocator;
use crate::quality::QualityLevel;
use crate::state::ControllerState;
use crate::surface::PlaybackSurface;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Where to put the viewer back once the new source is ready
#[derive(Debug, Clone)]
struct InFlight {
    from: QualityLevel,
    target: QualityLevel,
    reason: SwitchReason,
    url: Url,
    resume_at: f64,
    was_playing: bool,
}

/// Performs quality switches on one playback surface
pub struct SwitchExecutor {
    stream_id: String,
    locator: Arc<dyn StreamLocator>,
    surface: Arc<dyn PlaybackSurface>,
    notifier: Notifier,
    position_epsilon: f64,
    in_flight: Option<InFlight>,
}

impl SwitchExecutor {
    pub fn new(
        stream_id: impl Into<String>,
        locator: Arc<dyn StreamLocator>,
        surface: Arc<dyn PlaybackSurface>,
        notifier: Notifier,
        position_epsilon: f64,
    ) -> Self {
        Self {
            stream_id: stream_id.into(),
            locator,
            surface,
            notifier,
            position_epsilon,
            in_flight: None,
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// URL currently being loaded, if a switch is in flight
    pub fn in_flight_url(&self) -> Option<&Url> {
        self.in_flight.as_ref().map(|f| &f.url)
    }

    /// Start switching to `target`.
    ///
    /// On `Ok` the surface is loading the new source and `pending_switch` is
    /// set; the switch completes in [`Self::on_metadata_ready`] or fails in
    /// [`Self::on_load_error`].
    #[instrument(skip(self, state), fields(stream_id = %self.stream_id))]
    pub async fn switch_to(
        &mut self,
        state: &mut ControllerState,
        target: QualityLevel,
        reason: SwitchReason,
    ) -> Result<(), SwitchError> {
        if state.pending_switch.is_some() || target == state.active_quality {
            let err = SwitchError::InvalidTransition {
                pending: state.pending_switch,
                requested: target,
            };
            error!(active = %state.active_quality, error = %err, "Rejected quality switch");
            return Err(err);
        }

        let url = match self.locator.resolve(&self.stream_id, target).await {
            Ok(url) => url,
            Err(e) => {
                let err = SwitchError::Resolution {
                    quality: target,
                    stream_id: self.stream_id.clone(),
                    reason: e.to_string(),
                };
                return Err(self.fail(reason, err));
            }
        };

        let resume_at = self.surface.current_position();
        let was_playing = self.surface.is_playing();
        state.pending_switch = Some(target);

        info!(
            from = %state.active_quality,
            to = %target,
            %reason,
            %url,
            position = resume_at,
            was_playing,
            "Switching quality"
        );

        if let Err(e) = self.surface.load(&url) {
            state.pending_switch = None;
            let err = SwitchError::Load {
                quality: target,
                reason: e.to_string(),
            };
            return Err(self.fail(reason, err));
        }

        self.in_flight = Some(InFlight {
            from: state.active_quality,
            target,
            reason,
            url,
            resume_at,
            was_playing,
        });
        Ok(())
    }

    /// The new source has metadata: restore position and play state, then
    /// commit the switch.
    pub fn on_metadata_ready(&mut self, state: &mut ControllerState, now: Instant) -> Option<QualityChanged> {
        let Some(flight) = self.in_flight.take() else {
            debug!("Metadata ready with no switch in flight");
            return None;
        };

        self.surface.seek(flight.resume_at);
        let restored = self.surface.current_position();
        if (restored - flight.resume_at).abs() > self.position_epsilon {
            warn!(
                expected = flight.resume_at,
                actual = restored,
                "Playback position drifted across switch"
            );
        }
        if flight.was_playing {
            self.surface.play();
        }
        if let Some((width, height)) = self.surface.video_dimensions() {
            debug!(width, height, quality = %flight.target, "New source dimensions");
        }

        state.pending_switch = None;
        state.active_quality = flight.target;
        state.last_switch_at = Some(now);

        let changed = QualityChanged {
            from: flight.from,
            to: flight.target,
            reason: flight.reason,
        };
        info!(from = %changed.from, to = %changed.to, reason = %changed.reason, "Quality changed");
        self.notifier.emit(QualityEvent::QualityChanged(changed));
        Some(changed)
    }

    /// The surface failed to load the new source. Playback stays on the
    /// previous quality.
    pub fn on_load_error(&mut self, state: &mut ControllerState, message: &str) -> Option<SwitchError> {
        let flight = self.in_flight.take()?;
        state.pending_switch = None;

        let err = SwitchError::Load {
            quality: flight.target,
            reason: message.to_string(),
        };
        Some(self.fail(flight.reason, err))
    }

    fn fail(&mut self, reason: SwitchReason, err: SwitchError) -> SwitchError {
        warn!(attempted = %err.attempted(), code = err.error_code(), error = %err, "Quality switch failed");
        self.notifier
            .emit(QualityEvent::SwitchFailed(SwitchFailed::new(reason, &err)));
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ControllerId, NotificationRecord};
    use crate::locator::StaticLocator;
    use crate::sim::SimulatedSurface;
    use tokio::sync::broadcast;

    fn url(quality: QualityLevel) -> Url {
        Url::parse(&format!("https://cdn.example.com/movie/{}.m3u8", quality)).unwrap()
    }

    fn setup() -> (SwitchExecutor, Arc<SimulatedSurface>, broadcast::Receiver<NotificationRecord>) {
        let locator = StaticLocator::new()
            .with("movie", QualityLevel::Q480, url(QualityLevel::Q480))
            .with("movie", QualityLevel::Q720, url(QualityLevel::Q720))
            .with("movie", QualityLevel::Q1080, url(QualityLevel::Q1080));
        let surface = Arc::new(SimulatedSurface::playing(42.0, 8.0));
        let notifier = Notifier::new(ControllerId::new());
        let rx = notifier.subscribe();
        let executor = SwitchExecutor::new("movie", Arc::new(locator), surface.clone(), notifier, 0.5);
        (executor, surface, rx)
    }

    #[tokio::test]
    async fn test_successful_switch_preserves_position() {
        let (mut executor, surface, mut rx) = setup();
        let mut state = ControllerState::new(QualityLevel::Q720);

        executor
            .switch_to(&mut state, QualityLevel::Q1080, SwitchReason::BufferHigh)
            .await
            .unwrap();
        assert_eq!(state.pending_switch, Some(QualityLevel::Q1080));
        assert_eq!(surface.loaded().last(), Some(&url(QualityLevel::Q1080)));
        // the reload resets the surface
        assert!(!surface.is_playing());

        let changed = executor.on_metadata_ready(&mut state, Instant::now()).unwrap();
        assert_eq!(changed.to, QualityLevel::Q1080);
        assert_eq!(state.active_quality, QualityLevel::Q1080);
        assert_eq!(state.pending_switch, None);
        assert!(state.last_switch_at.is_some());
        assert!((surface.current_position() - 42.0).abs() <= 0.5);
        assert!(surface.is_playing());

        let record = rx.recv().await.unwrap();
        assert_eq!(
            record.event,
            QualityEvent::QualityChanged(QualityChanged {
                from: QualityLevel::Q720,
                to: QualityLevel::Q1080,
                reason: SwitchReason::BufferHigh,
            })
        );
    }

    #[tokio::test]
    async fn test_paused_stays_paused() {
        let (mut executor, surface, _rx) = setup();
        surface.pause();
        let mut state = ControllerState::new(QualityLevel::Q720);

        executor
            .switch_to(&mut state, QualityLevel::Q480, SwitchReason::UserManual)
            .await
            .unwrap();
        executor.on_metadata_ready(&mut state, Instant::now());
        assert!(!surface.is_playing());
        assert_eq!(state.active_quality, QualityLevel::Q480);
    }

    #[tokio::test]
    async fn test_second_switch_while_pending_is_rejected() {
        let (mut executor, _surface, _rx) = setup();
        let mut state = ControllerState::new(QualityLevel::Q720);

        executor
            .switch_to(&mut state, QualityLevel::Q1080, SwitchReason::BufferHigh)
            .await
            .unwrap();
        let before = state.clone();

        let err = executor
            .switch_to(&mut state, QualityLevel::Q480, SwitchReason::Error)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SwitchError::InvalidTransition {
                pending: Some(QualityLevel::Q1080),
                requested: QualityLevel::Q480,
            }
        );
        assert_eq!(state, before);
        assert_eq!(executor.in_flight_url(), Some(&url(QualityLevel::Q1080)));
    }

    #[tokio::test]
    async fn test_resolution_failure_keeps_quality() {
        let (mut executor, surface, mut rx) = setup();
        let mut state = ControllerState::new(QualityLevel::Q1080);

        let err = executor
            .switch_to(&mut state, QualityLevel::Q4K, SwitchReason::BufferHigh)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::Resolution { quality: QualityLevel::Q4K, .. }));
        assert_eq!(state.active_quality, QualityLevel::Q1080);
        assert_eq!(state.pending_switch, None);
        assert!(surface.loaded().is_empty());

        match rx.recv().await.unwrap().event {
            QualityEvent::SwitchFailed(failed) => {
                assert_eq!(failed.attempted, QualityLevel::Q4K);
                assert_eq!(failed.code, "RESOLUTION");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_error_clears_pending() {
        let (mut executor, _surface, mut rx) = setup();
        let mut state = ControllerState::new(QualityLevel::Q720);

        executor
            .switch_to(&mut state, QualityLevel::Q1080, SwitchReason::BufferHigh)
            .await
            .unwrap();
        let err = executor.on_load_error(&mut state, "MEDIA_ERR_NETWORK").unwrap();
        assert_eq!(err.error_code(), "LOAD");
        assert_eq!(state.active_quality, QualityLevel::Q720);
        assert_eq!(state.pending_switch, None);
        assert!(matches!(rx.recv().await.unwrap().event, QualityEvent::SwitchFailed(_)));

        // nothing left to fail
        assert!(executor.on_load_error(&mut state, "again").is_none());
    }

    #[tokio::test]
    async fn test_surface_rejection() {
        let (mut executor, surface, _rx) = setup();
        surface.reject_loads(true);
        let mut state = ControllerState::new(QualityLevel::Q720);

        let err = executor
            .switch_to(&mut state, QualityLevel::Q480, SwitchReason::BufferLow)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchError::Load { .. }));
        assert_eq!(state.pending_switch, None);
    }

    #[tokio::test]
    async fn test_same_quality_is_invalid() {
        let (mut executor, _surface, _rx) = setup();
        let mut state = ControllerState::new(QualityLevel::Q720);
        let err = executor
            .switch_to(&mut state, QualityLevel::Q720, SwitchReason::UserManual)
            .await
            .unwrap_err();
        assert!(!err.is_recoverable());
    }
}
