//! Scripted playback scenarios
//!
//! A scenario drives a real [`QualityController`] against a
//! [`SimulatedSurface`] on a paused clock. Loads started by the controller
//! are completed automatically after `load_latency_ms`.

use anyhow::Context;
use kino_quality::{
    ConnectionHint, ControllerConfig, DeviceProfile, DeviceSignals, FailureDebouncer,
    NotificationRecord, PlaybackSurface, PlayerEvent, QualityController, QualityEvent,
    QualityLevel, QualityMode, SimulatedSurface, TemplateLocator,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

/// Simulation granularity
const STEP_MS: u64 = 100;

/// A scripted session
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device: DeviceSignals,
    #[serde(default = "default_stream_id")]
    pub stream_id: String,
    #[serde(default = "default_template")]
    pub template: String,
    /// Qualities the origin publishes (all when absent)
    #[serde(default)]
    pub published: Option<Vec<QualityLevel>>,
    pub initial_quality: QualityLevel,
    #[serde(default)]
    pub position: f64,
    #[serde(default = "default_buffered_ahead")]
    pub buffered_ahead: f64,
    #[serde(default = "default_load_latency_ms")]
    pub load_latency_ms: u64,
    /// Qualities whose loads fail on the surface
    #[serde(default)]
    pub fail_loads: Vec<QualityLevel>,
    /// Report "can play through" after every completed load
    #[serde(default = "default_true")]
    pub can_play_through: bool,
    pub steps: Vec<Step>,
}

fn default_stream_id() -> String {
    "scenario".to_string()
}

fn default_template() -> String {
    "https://cdn.example.com/{stream}/{quality}/index.m3u8".to_string()
}

fn default_buffered_ahead() -> f64 {
    3.0
}

fn default_load_latency_ms() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// One scripted action
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Set the buffered-ahead level the network sustains
    Buffer { seconds: f64 },
    /// Deliver a player event
    Event { event: PlayerEvent },
    /// Deliver a connection change
    Connection { hint: ConnectionHint },
    /// Change page visibility
    Visibility { visible: bool },
    /// Change mode: `auto` or a quality label
    Mode { mode: String },
    /// Pause playback
    Pause,
    /// Resume playback
    Play,
    /// Let time pass
    Wait { ms: u64 },
}

impl Scenario {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let scenario: Self = serde_json::from_str(json)?;
        if scenario.steps.is_empty() {
            anyhow::bail!("scenario has no steps");
        }
        Ok(scenario)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        Self::from_json_str(&content).with_context(|| format!("parsing scenario {}", path.display()))
    }
}

/// A notification with the simulated time it was observed at
#[derive(Debug, Clone, Serialize)]
pub struct TimedNotification {
    pub at_ms: u64,
    #[serde(flatten)]
    pub record: NotificationRecord,
}

/// Outcome of a scenario run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub name: Option<String>,
    pub max_quality: QualityLevel,
    pub final_quality: QualityLevel,
    pub final_mode: QualityMode,
    pub duration_ms: u64,
    pub switches: usize,
    pub failures: usize,
    /// Messages a UI would show after debouncing
    pub user_notices: usize,
    pub notifications: Vec<TimedNotification>,
}

/// In-flight load the runner will complete
struct PendingLoad {
    quality: QualityLevel,
    due: Instant,
}

struct Runner {
    controller: QualityController,
    surface: Arc<SimulatedSurface>,
    rx: broadcast::Receiver<NotificationRecord>,
    start: Instant,
    buffer_level: f64,
    load_latency: Duration,
    fail_loads: Vec<QualityLevel>,
    can_play_through: bool,
    pending: Option<PendingLoad>,
    notifications: Vec<TimedNotification>,
}

/// Replay a scenario. Must run on a current-thread runtime; the clock is
/// paused for the duration of the run.
pub async fn run(scenario: Scenario, config: ControllerConfig) -> anyhow::Result<SimulationReport> {
    tokio::time::pause();

    let capability = DeviceProfile::compute(&scenario.device);
    let mut locator = TemplateLocator::new(scenario.template.clone());
    if let Some(published) = &scenario.published {
        locator = locator.with_qualities(published.iter().copied());
    }

    let surface = Arc::new(SimulatedSurface::playing(scenario.position, scenario.buffered_ahead));
    let controller = QualityController::spawn(
        config,
        capability,
        scenario.stream_id.clone(),
        scenario.initial_quality,
        surface.clone(),
        Arc::new(locator),
    )?;
    let rx = controller.subscribe();

    info!(
        name = scenario.name.as_deref().unwrap_or("unnamed"),
        steps = scenario.steps.len(),
        max_quality = %capability.max_quality,
        "Running scenario"
    );

    let mut runner = Runner {
        controller,
        surface,
        rx,
        start: Instant::now(),
        buffer_level: scenario.buffered_ahead,
        load_latency: Duration::from_millis(scenario.load_latency_ms),
        fail_loads: scenario.fail_loads.clone(),
        can_play_through: scenario.can_play_through,
        pending: None,
        notifications: Vec::new(),
    };

    for step in &scenario.steps {
        runner.apply(step).await?;
    }
    // Let any load still in flight settle
    if runner.pending.is_some() {
        let latency_ms = runner.load_latency.as_millis() as u64;
        runner.wait(latency_ms).await?;
    }

    let snapshot = runner.controller.snapshot().await?;
    runner.controller.destroy();
    runner.collect();

    let mut debouncer = FailureDebouncer::new();
    let user_notices = runner
        .notifications
        .iter()
        .filter_map(|n| debouncer.observe(&n.record.event))
        .count();
    let (switches, failures) = runner.notifications.iter().fold((0, 0), |(s, f), n| match n.record.event {
        QualityEvent::QualityChanged(_) => (s + 1, f),
        QualityEvent::SwitchFailed(_) => (s, f + 1),
    });

    Ok(SimulationReport {
        name: scenario.name,
        max_quality: capability.max_quality,
        final_quality: snapshot.state.active_quality,
        final_mode: snapshot.state.mode,
        duration_ms: runner.elapsed_ms(),
        switches,
        failures,
        user_notices,
        notifications: runner.notifications,
    })
}

impl Runner {
    fn elapsed_ms(&self) -> u64 {
        Instant::now().duration_since(self.start).as_millis() as u64
    }

    async fn apply(&mut self, step: &Step) -> anyhow::Result<()> {
        debug!(?step, at_ms = self.elapsed_ms(), "Scenario step");
        match step {
            Step::Buffer { seconds } => {
                self.buffer_level = seconds.max(0.0);
                self.surface.set_buffered_ahead(self.buffer_level);
            }
            Step::Event { event } => self.controller.on_player_event(event.clone()),
            Step::Connection { hint } => self.controller.on_connection_change(*hint),
            Step::Visibility { visible } => self.controller.on_visibility_change(*visible),
            Step::Mode { mode } => {
                let mode: QualityMode = mode.parse()?;
                self.controller.set_mode(mode);
            }
            Step::Pause => self.surface.pause(),
            Step::Play => self.surface.play(),
            Step::Wait { ms } => return self.wait(*ms).await,
        }
        self.settle().await
    }

    async fn wait(&mut self, ms: u64) -> anyhow::Result<()> {
        let mut remaining = ms;
        while remaining > 0 {
            let chunk = remaining.min(STEP_MS);
            remaining -= chunk;

            self.surface.advance(chunk as f64 / 1000.0);
            self.surface.set_buffered_ahead(self.buffer_level);
            tokio::time::advance(Duration::from_millis(chunk)).await;
            self.settle().await?;
        }
        Ok(())
    }

    /// Wait for the controller, complete due loads and collect notifications
    async fn settle(&mut self) -> anyhow::Result<()> {
        self.controller.barrier().await?;

        let due = self.pending.as_ref().is_some_and(|load| load.due <= Instant::now());
        if due {
            if let Some(load) = self.pending.take() {
                self.finish_load(load.quality);
                self.controller.barrier().await?;
            }
        }

        if self.pending.is_none() {
            let snapshot = self.controller.snapshot().await?;
            if let Some(quality) = snapshot.state.pending_switch {
                self.pending = Some(PendingLoad {
                    quality,
                    due: Instant::now() + self.load_latency,
                });
            }
        }

        self.collect();
        Ok(())
    }

    fn finish_load(&mut self, quality: QualityLevel) {
        if self.fail_loads.contains(&quality) {
            self.controller.on_player_event(PlayerEvent::Error {
                message: format!("simulated load failure at {}", quality),
            });
            return;
        }
        self.surface.complete_load(self.buffer_level);
        self.controller.on_player_event(PlayerEvent::MetadataReady);
        if self.can_play_through {
            self.controller.on_player_event(PlayerEvent::CanPlayThrough);
        }
    }

    fn collect(&mut self) {
        let at_ms = self.elapsed_ms();
        while let Ok(record) = self.rx.try_recv() {
            self.notifications.push(TimedNotification { at_ms, record });
        }
    }
}
