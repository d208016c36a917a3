//! Quality controller
//!
//! The public face of the crate. A [`QualityController`] is a cheap handle
//! onto one controller task that owns all mutable state:
//!
//! - host calls (`set_mode`, `on_player_event`, ...) are queued and handled
//!   strictly in arrival order
//! - the buffer poll, visibility settle and recovery settle are deadlines
//!   multiplexed with the queue
//! - the active quality is readable synchronously at any time
//!
//! The controller task must be spawned from inside a tokio runtime.

use crate::config::ControllerConfig;
use crate::connection::{ConnectionHint, ConnectionSignal};
use crate::device::DeviceCapability;
use crate::engine::{DecisionEngine, EvalContext, Trigger};
use crate::error::{Error, Result};
use crate::events::{ControllerId, NotificationRecord, Notifier, SwitchReason};
use crate::executor::SwitchExecutor;
use crate::locator::StreamLocator;
use crate::quality::{QualityLevel, QualityMode};
use crate::sampler::{BufferHealthSampler, SampleCounts};
use crate::state::ControllerState;
use crate::surface::{FailureKind, PlaybackSurface, PlayerEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

/// Requests from the handle to the controller task
#[derive(Debug)]
enum Command {
    SetMode(QualityMode),
    PlayerEvent(PlayerEvent),
    ConnectionChange(ConnectionHint),
    VisibilityChange(bool),
    Barrier(oneshot::Sender<()>),
    Snapshot(oneshot::Sender<ControllerSnapshot>),
    Destroy,
}

/// Point-in-time view of the controller task
#[derive(Debug, Clone)]
pub struct ControllerSnapshot {
    pub state: ControllerState,
    /// Samples currently held in the history
    pub samples: usize,
    /// Counts the decision rules currently see
    pub counts: SampleCounts,
    pub hidden: bool,
    pub cooldown_active: bool,
    /// Whether the eager post-recovery step up can still be taken
    pub recovery_available: bool,
    pub connection: Option<ConnectionHint>,
    pub poll_scheduled: bool,
    pub settle_scheduled: bool,
    pub recovery_scheduled: bool,
}

/// Handle to a running quality controller
pub struct QualityController {
    /// Controller ID
    id: ControllerId,
    /// Device capability, fixed at construction
    capability: DeviceCapability,
    /// Command queue into the controller task
    commands: mpsc::UnboundedSender<Command>,
    /// Active quality as last published by the task
    quality_rx: watch::Receiver<QualityLevel>,
    /// Notification fan-out
    notifications: broadcast::Sender<NotificationRecord>,
}

impl QualityController {
    /// Start a controller for `stream_id` playing on `surface`.
    ///
    /// `initial_quality` is what the surface is currently playing; it is
    /// clamped to the device cap.
    pub fn spawn(
        config: ControllerConfig,
        capability: DeviceCapability,
        stream_id: impl Into<String>,
        initial_quality: QualityLevel,
        surface: Arc<dyn PlaybackSurface>,
        locator: Arc<dyn StreamLocator>,
    ) -> Result<Self> {
        config.validate()?;

        let id = ControllerId::new();
        let initial = capability.clamp(initial_quality);
        let stream_id = stream_id.into();

        let notifier = Notifier::new(id);
        let notifications = notifier.sender();
        let (quality_tx, quality_rx) = watch::channel(initial);
        let (commands, commands_rx) = mpsc::unbounded_channel();

        info!(
            controller_id = %id,
            stream_id = %stream_id,
            quality = %initial,
            max_quality = %capability.max_quality,
            "Quality controller started"
        );

        let task = ControllerTask {
            executor: SwitchExecutor::new(
                stream_id,
                locator,
                surface.clone(),
                notifier,
                config.position_epsilon_secs,
            ),
            sampler: BufferHealthSampler::new(&config),
            engine: DecisionEngine::new(&config),
            state: ControllerState::new(initial),
            timers: Timers {
                poll: Some(Instant::now() + config.poll_interval()),
                ..Default::default()
            },
            deferred: Deferred::default(),
            connection: None,
            hidden: false,
            capability,
            surface,
            quality_tx,
            config,
        };
        tokio::spawn(task.run(commands_rx));

        Ok(Self {
            id,
            capability,
            commands,
            quality_rx,
            notifications,
        })
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn capability(&self) -> &DeviceCapability {
        &self.capability
    }

    /// Switch between adaptive and pinned quality. Pinned qualities above the
    /// device cap are clamped.
    pub fn set_mode(&self, mode: QualityMode) {
        self.send(Command::SetMode(mode));
    }

    /// Quality currently playing
    pub fn current_quality(&self) -> QualityLevel {
        *self.quality_rx.borrow()
    }

    /// Receiver that observes every change of the active quality
    pub fn watch_quality(&self) -> watch::Receiver<QualityLevel> {
        self.quality_rx.clone()
    }

    pub fn on_player_event(&self, event: PlayerEvent) {
        self.send(Command::PlayerEvent(event));
    }

    pub fn on_connection_change(&self, hint: ConnectionHint) {
        self.send(Command::ConnectionChange(hint));
    }

    pub fn on_visibility_change(&self, visible: bool) {
        self.send(Command::VisibilityChange(visible));
    }

    /// Stop the controller and cancel every timer. Safe to call repeatedly.
    pub fn destroy(&self) {
        self.send(Command::Destroy);
    }

    /// `Auto` plus every public quality the device can play
    pub fn available_qualities(&self) -> Vec<QualityMode> {
        self.capability.available_qualities()
    }

    /// Subscribe to quality notifications
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationRecord> {
        self.notifications.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Resolves once every call made before it has been handled
    pub async fn barrier(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Barrier(tx))
            .map_err(|_| Error::ControllerClosed)?;
        rx.await.map_err(|_| Error::ControllerClosed)
    }

    /// Current state of the controller task
    pub async fn snapshot(&self) -> Result<ControllerSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(tx))
            .map_err(|_| Error::ControllerClosed)?;
        rx.await.map_err(|_| Error::ControllerClosed)
    }

    fn send(&self, command: Command) {
        if let Err(e) = self.commands.send(command) {
            debug!(controller_id = %self.id, command = ?e.0, "Controller closed, command dropped");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Poll,
    VisibleSettle,
    RecoverySettle,
}

#[derive(Debug, Default)]
struct Timers {
    poll: Option<Instant>,
    visible_settle: Option<Instant>,
    recovery: Option<Instant>,
}

impl Timers {
    fn next_deadline(&self) -> Option<Instant> {
        [self.poll, self.visible_settle, self.recovery]
            .into_iter()
            .flatten()
            .min()
    }

    /// Take the earliest timer that is due at `now`
    fn take_due(&mut self, now: Instant) -> Option<TimerKind> {
        let due = [
            (self.poll, TimerKind::Poll),
            (self.visible_settle, TimerKind::VisibleSettle),
            (self.recovery, TimerKind::RecoverySettle),
        ]
        .into_iter()
        .filter_map(|(deadline, kind)| deadline.filter(|d| *d <= now).map(|d| (d, kind)))
        .min_by_key(|(deadline, _)| *deadline)
        .map(|(_, kind)| kind)?;

        match due {
            TimerKind::Poll => self.poll = None,
            TimerKind::VisibleSettle => self.visible_settle = None,
            TimerKind::RecoverySettle => self.recovery = None,
        }
        Some(due)
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Work held back while a switch is in flight
#[derive(Debug, Default)]
struct Deferred {
    /// Pinned quality requested by the user
    manual: Option<QualityLevel>,
    /// First failure seen; later ones coalesce into it
    failure: Option<FailureKind>,
    hidden: bool,
    visible: bool,
}

impl Deferred {
    fn clear(&mut self) {
        *self = Self::default();
    }
}

/// State owned by the controller task
struct ControllerTask {
    config: ControllerConfig,
    capability: DeviceCapability,
    state: ControllerState,
    sampler: BufferHealthSampler,
    engine: DecisionEngine,
    executor: SwitchExecutor,
    surface: Arc<dyn PlaybackSurface>,
    quality_tx: watch::Sender<QualityLevel>,
    /// Most recent connection hint
    connection: Option<ConnectionHint>,
    hidden: bool,
    timers: Timers,
    deferred: Deferred,
}

impl ControllerTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    None | Some(Command::Destroy) => break,
                    Some(command) => {
                        self.run_due_timers().await;
                        self.handle(command).await;
                    }
                },
                _ = sleep_until(deadline) => self.run_due_timers().await,
            }
        }
        self.shutdown();
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::SetMode(mode) => self.set_mode(mode).await,
            Command::PlayerEvent(event) => self.on_player_event(event).await,
            Command::ConnectionChange(hint) => {
                debug!(
                    effective_type = %hint.effective_type,
                    downlink_mbps = hint.downlink_mbps,
                    data_saver = hint.data_saver,
                    "Connection hint updated"
                );
                self.connection = Some(hint);
            }
            Command::VisibilityChange(visible) => self.on_visibility_change(visible).await,
            Command::Barrier(reply) => {
                let _ = reply.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            // Handled by the run loop
            Command::Destroy => {}
        }
    }

    fn shutdown(&mut self) {
        self.timers.clear();
        self.deferred.clear();
        self.sampler.clear();
        self.engine.cancel_cooldown();
        info!(
            stream_id = self.executor.stream_id(),
            quality = %self.state.active_quality,
            "Quality controller destroyed"
        );
    }

    fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            state: self.state.clone(),
            samples: self.sampler.len(),
            counts: self.sampler.recent_counts(self.config.decision_window),
            hidden: self.hidden,
            cooldown_active: self.engine.cooldown_active(Instant::now()),
            recovery_available: self.engine.recovery_available(),
            connection: self.connection,
            poll_scheduled: self.timers.poll.is_some(),
            settle_scheduled: self.timers.visible_settle.is_some(),
            recovery_scheduled: self.timers.recovery.is_some(),
        }
    }

    async fn run_due_timers(&mut self) {
        while let Some(kind) = self.timers.take_due(Instant::now()) {
            match kind {
                TimerKind::Poll => self.on_poll().await,
                TimerKind::VisibleSettle => self.on_visible_settled().await,
                TimerKind::RecoverySettle => {
                    let buffered_ahead = self.surface.buffered_ahead();
                    self.evaluate(Trigger::RecoveryCheck { buffered_ahead }).await;
                }
            }
        }
    }

    async fn on_poll(&mut self) {
        let now = Instant::now();
        self.timers.poll = Some(now + self.config.poll_interval());

        if !self.surface.is_playing() {
            return;
        }
        let sampled = self.sampler.sample(
            self.surface.ready_state(),
            self.surface.buffered_ahead(),
            self.state.active_quality,
            now,
        );
        if sampled.is_some() {
            self.evaluate(Trigger::Sampled).await;
        }
    }

    async fn on_visible_settled(&mut self) {
        if self.state.is_switching() {
            self.deferred.visible = true;
            return;
        }
        let hint = self.connection.unwrap_or_default();
        let recommended = ConnectionSignal::recommend(&hint, &self.capability);
        debug!(%recommended, effective_type = %hint.effective_type, "Re-evaluating connection after visibility");
        self.evaluate(Trigger::VisibleSettled { recommended }).await;
    }

    async fn on_player_event(&mut self, event: PlayerEvent) {
        let now = Instant::now();
        match event {
            PlayerEvent::MetadataReady if self.state.is_switching() => {
                if self.executor.on_metadata_ready(&mut self.state, now).is_some() {
                    self.quality_tx.send_replace(self.state.active_quality);
                }
                self.reconcile().await;
            }
            PlayerEvent::Error { message } if self.state.is_switching() => {
                self.executor.on_load_error(&mut self.state, &message);
                self.reconcile().await;
            }
            PlayerEvent::CanPlayThrough => {
                if !self.engine.recovery_available() {
                    debug!("Recovery step up already taken, not arming");
                } else if self.state.mode.is_auto() && !self.state.is_switching() && !self.hidden {
                    self.timers.recovery = Some(now + self.config.recovery_settle());
                    debug!("Recovery check armed");
                }
            }
            other => match other.failure_kind() {
                Some(kind) if self.state.is_switching() => {
                    let kept = *self.deferred.failure.get_or_insert(kind);
                    debug!(event = other.name(), ?kept, "Failure deferred until switch resolves");
                }
                Some(kind) => self.evaluate(Trigger::Failure(kind)).await,
                None => debug!(event = other.name(), "Player event"),
            },
        }
    }

    async fn on_visibility_change(&mut self, visible: bool) {
        if visible == !self.hidden {
            return;
        }
        self.hidden = !visible;

        if self.hidden {
            self.timers.visible_settle = None;
            self.timers.recovery = None;
            self.deferred.visible = false;
            info!("Page hidden");
            if self.state.is_switching() {
                self.deferred.hidden = true;
            } else {
                let playing = self.surface.is_playing();
                self.evaluate(Trigger::Hidden { playing }).await;
            }
        } else {
            self.deferred.hidden = false;
            self.timers.visible_settle = Some(Instant::now() + self.config.visible_settle());
            info!(settle_ms = self.config.visible_settle_ms, "Page visible");
        }
    }

    #[instrument(skip(self))]
    async fn set_mode(&mut self, mode: QualityMode) {
        match mode {
            QualityMode::Auto => {
                self.deferred.manual = None;
                if !self.state.mode.is_auto() {
                    info!(quality = %self.state.active_quality, "Adaptive quality enabled");
                }
                self.state.mode = QualityMode::Auto;
            }
            QualityMode::Manual(requested) => {
                let target = self.capability.clamp(requested);
                if target != requested {
                    info!(%requested, clamped = %target, "Manual quality clamped to device cap");
                }
                if self.state.is_switching() {
                    debug!(%target, "Manual quality deferred until switch resolves");
                    self.deferred.manual = Some(target);
                    return;
                }
                self.pin(target).await;
            }
        }
    }

    /// Enter manual mode at `target`; the adaptive rules stay off until Auto
    async fn pin(&mut self, target: QualityLevel) {
        self.state.mode = QualityMode::Manual(target);
        self.engine.cancel_cooldown();
        self.timers.visible_settle = None;
        self.timers.recovery = None;
        self.deferred.clear();

        if target != self.state.active_quality {
            self.switch(target, SwitchReason::UserManual).await;
        } else {
            debug!(%target, "Pinned quality already active");
        }
    }

    /// Apply what was held back while the last switch was in flight
    async fn reconcile(&mut self) {
        if let Some(target) = self.deferred.manual.take() {
            self.pin(target).await;
            return;
        }
        if let Some(kind) = self.deferred.failure.take() {
            self.evaluate(Trigger::Failure(kind)).await;
        }
        if self.state.is_switching() {
            return;
        }
        if std::mem::take(&mut self.deferred.hidden) && self.hidden {
            let playing = self.surface.is_playing();
            self.evaluate(Trigger::Hidden { playing }).await;
        }
        if self.state.is_switching() {
            return;
        }
        if std::mem::take(&mut self.deferred.visible) {
            self.on_visible_settled().await;
        }
    }

    async fn evaluate(&mut self, trigger: Trigger) {
        let ctx = EvalContext {
            mode: self.state.mode,
            active: self.state.active_quality,
            switch_pending: self.state.is_switching(),
            hidden: self.hidden,
            capability: &self.capability,
            counts: self.sampler.recent_counts(self.config.decision_window),
        };
        if let Some(decision) = self.engine.evaluate(&ctx, trigger, Instant::now()) {
            self.switch(decision.target, decision.reason).await;
        }
    }

    async fn switch(&mut self, target: QualityLevel, reason: SwitchReason) {
        // Failures are already logged and published by the executor
        if let Err(e) = self.executor.switch_to(&mut self.state, target, reason).await {
            debug!(code = e.error_code(), "Switch not started");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::QualityEvent;
    use crate::locator::TemplateLocator;
    use crate::sim::SimulatedSurface;
    use std::time::Duration;

    fn capability(max_quality: QualityLevel) -> DeviceCapability {
        DeviceCapability {
            max_quality,
            is_mobile: false,
            is_high_end: true,
            screen_max_dimension: max_quality.height(),
        }
    }

    fn spawn(max: QualityLevel, initial: QualityLevel) -> (QualityController, Arc<SimulatedSurface>) {
        let surface = Arc::new(SimulatedSurface::playing(30.0, 3.0));
        let locator = TemplateLocator::new("https://cdn.example.com/{stream}/{quality}.m3u8");
        let controller = QualityController::spawn(
            ControllerConfig::default(),
            capability(max),
            "movie",
            initial,
            surface.clone(),
            Arc::new(locator),
        )
        .unwrap();
        (controller, surface)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_quality_is_clamped() {
        let (controller, _surface) = spawn(QualityLevel::Q720, QualityLevel::Q4K);
        assert_eq!(controller.current_quality(), QualityLevel::Q720);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_invalid_config() {
        let config = ControllerConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        let result = QualityController::spawn(
            config,
            capability(QualityLevel::Q1080),
            "movie",
            QualityLevel::Q720,
            Arc::new(SimulatedSurface::new()),
            Arc::new(TemplateLocator::new("https://cdn.example.com/{stream}/{quality}.m3u8")),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_switch_completes_on_metadata() {
        let (controller, surface) = spawn(QualityLevel::Q1080, QualityLevel::Q720);
        let mut rx = controller.subscribe();

        controller.set_mode(QualityMode::Manual(QualityLevel::Q1080));
        controller.barrier().await.unwrap();
        assert_eq!(controller.snapshot().await.unwrap().state.pending_switch, Some(QualityLevel::Q1080));
        assert_eq!(controller.current_quality(), QualityLevel::Q720);

        surface.complete_load(6.0);
        controller.on_player_event(PlayerEvent::MetadataReady);
        controller.barrier().await.unwrap();

        assert_eq!(controller.current_quality(), QualityLevel::Q1080);
        assert!((surface.current_position() - 30.0).abs() <= 0.5);
        match rx.recv().await.unwrap().event {
            QualityEvent::QualityChanged(changed) => {
                assert_eq!(changed.reason, SwitchReason::UserManual);
                assert_eq!(changed.to, QualityLevel::Q1080);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_during_switch_are_coalesced() {
        let (controller, surface) = spawn(QualityLevel::Q1080, QualityLevel::Q1080);

        controller.on_player_event(PlayerEvent::Stalled);
        controller.barrier().await.unwrap();
        assert_eq!(controller.snapshot().await.unwrap().state.pending_switch, Some(QualityLevel::Q720));

        // Three failures while loading collapse into one step
        controller.on_player_event(PlayerEvent::Waiting);
        controller.on_player_event(PlayerEvent::Stalled);
        controller.on_player_event(PlayerEvent::Waiting);
        surface.complete_load(1.0);
        controller.on_player_event(PlayerEvent::MetadataReady);
        controller.barrier().await.unwrap();

        let snapshot = controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state.active_quality, QualityLevel::Q720);
        assert_eq!(snapshot.state.pending_switch, Some(QualityLevel::Q480));
        assert_eq!(surface.loaded().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_request_waits_for_in_flight_switch() {
        let (controller, surface) = spawn(QualityLevel::Q1080, QualityLevel::Q1080);

        controller.on_player_event(PlayerEvent::Stalled);
        controller.set_mode(QualityMode::Manual(QualityLevel::Q480));
        controller.barrier().await.unwrap();
        let snapshot = controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state.pending_switch, Some(QualityLevel::Q720));
        assert!(snapshot.state.mode.is_auto());

        surface.complete_load(4.0);
        controller.on_player_event(PlayerEvent::MetadataReady);
        controller.barrier().await.unwrap();

        let snapshot = controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state.mode, QualityMode::Manual(QualityLevel::Q480));
        assert_eq!(snapshot.state.pending_switch, Some(QualityLevel::Q480));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_steps_up_once() {
        let (controller, surface) = spawn(QualityLevel::Q4K, QualityLevel::Q720);
        surface.set_buffered_ahead(8.0);

        controller.on_player_event(PlayerEvent::CanPlayThrough);
        controller.barrier().await.unwrap();
        assert!(controller.snapshot().await.unwrap().recovery_scheduled);

        tokio::time::advance(Duration::from_millis(3000)).await;
        controller.barrier().await.unwrap();
        let snapshot = controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state.pending_switch, Some(QualityLevel::Q1080));
        assert!(!snapshot.recovery_scheduled);
        assert!(!snapshot.recovery_available);

        // The new source reporting "can play through" does not re-arm it
        surface.complete_load(8.0);
        controller.on_player_event(PlayerEvent::MetadataReady);
        controller.on_player_event(PlayerEvent::CanPlayThrough);
        controller.barrier().await.unwrap();
        let snapshot = controller.snapshot().await.unwrap();
        assert_eq!(snapshot.state.active_quality, QualityLevel::Q1080);
        assert!(!snapshot.recovery_scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_is_idempotent() {
        let (controller, _surface) = spawn(QualityLevel::Q1080, QualityLevel::Q720);
        controller.destroy();
        controller.destroy();
        assert!(matches!(controller.barrier().await, Err(Error::ControllerClosed)));
        controller.destroy();
        assert!(controller.is_closed());
        assert_eq!(controller.current_quality(), QualityLevel::Q720);
    }

    #[test]
    fn test_timers_fire_earliest_first() {
        let now = Instant::now();
        let mut timers = Timers {
            poll: Some(now + Duration::from_secs(5)),
            visible_settle: Some(now + Duration::from_secs(1)),
            recovery: Some(now + Duration::from_secs(3)),
        };
        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
        assert_eq!(timers.take_due(now), None);

        let later = now + Duration::from_secs(4);
        assert_eq!(timers.take_due(later), Some(TimerKind::VisibleSettle));
        assert_eq!(timers.take_due(later), Some(TimerKind::RecoverySettle));
        assert_eq!(timers.take_due(later), None);
        assert!(timers.poll.is_some());
    }
}
