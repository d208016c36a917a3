//! Decision engine
//!
//! Hysteresis core of the controller. Each evaluation looks at the current
//! controller state, the recent buffer samples and the trigger that caused
//! it, and either holds or proposes exactly one quality change.
//!
//! Rules, first applicable wins:
//! 1. Failure events (stalled, waiting, error) step down immediately, no
//!    lower than the lowest public level
//! 2. Sustained low buffer steps down, then cools down
//! 3. Sustained high buffer steps up, capped to the device
//! 4. Hidden tab drops to the hidden quality; visible again re-runs the
//!    connection recommendation
//! 5. After "can play through" settles, a healthy buffer steps up once;
//!    the next failure or low-buffer step down allows one more

use crate::config::ControllerConfig;
use crate::device::DeviceCapability;
use crate::events::SwitchReason;
use crate::quality::{QualityLevel, QualityMode};
use crate::sampler::SampleCounts;
use crate::surface::FailureKind;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// What caused an evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trigger {
    /// A new buffer sample was recorded
    Sampled,
    /// The surface reported a playback failure
    Failure(FailureKind),
    /// The page became hidden
    Hidden { playing: bool },
    /// The page has been visible for the settle delay
    VisibleSettled { recommended: QualityLevel },
    /// The post-recovery settle delay elapsed
    RecoveryCheck { buffered_ahead: f64 },
}

/// Direction of one evaluation. Collapses back to `Holding` every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Holding,
    SteppingDown,
    SteppingUp,
}

/// A proposed quality change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub target: QualityLevel,
    pub reason: SwitchReason,
}

impl Decision {
    pub fn step(&self, active: QualityLevel) -> Step {
        match self.target.cmp(&active) {
            std::cmp::Ordering::Less => Step::SteppingDown,
            std::cmp::Ordering::Greater => Step::SteppingUp,
            std::cmp::Ordering::Equal => Step::Holding,
        }
    }
}

/// Everything an evaluation reads
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub mode: QualityMode,
    pub active: QualityLevel,
    pub switch_pending: bool,
    pub hidden: bool,
    pub capability: &'a DeviceCapability,
    pub counts: SampleCounts,
}

/// Hysteresis decision engine
#[derive(Debug)]
pub struct DecisionEngine {
    low_to_step_down: usize,
    high_to_step_up: usize,
    cooldown: Duration,
    hidden_quality: QualityLevel,
    recovery_buffer_secs: f64,
    /// Low-buffer step downs are suppressed until this instant
    cooldown_until: Option<Instant>,
    /// The eager post-recovery step up has been taken; cleared by the next
    /// failure or low-buffer step down
    recovery_spent: bool,
}

impl DecisionEngine {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            low_to_step_down: config.low_samples_to_step_down,
            high_to_step_up: config.high_samples_to_step_up,
            cooldown: config.step_down_cooldown(),
            hidden_quality: config.hidden_quality,
            recovery_buffer_secs: config.recovery_buffer_secs,
            cooldown_until: None,
            recovery_spent: false,
        }
    }

    /// Decide whether to change quality. At most one change per call.
    pub fn evaluate(&mut self, ctx: &EvalContext<'_>, trigger: Trigger, now: Instant) -> Option<Decision> {
        if !ctx.mode.is_auto() {
            debug!(mode = %ctx.mode, ?trigger, "Manual mode, not adapting");
            return None;
        }
        if ctx.switch_pending {
            debug!(?trigger, "Switch in flight, holding");
            return None;
        }

        let decision = match trigger {
            Trigger::Failure(kind) => self.on_failure(ctx, kind),
            Trigger::Sampled => self.on_samples(ctx, now),
            Trigger::Hidden { playing } => self.on_hidden(ctx, playing),
            Trigger::VisibleSettled { recommended } => self.on_visible(ctx, recommended),
            Trigger::RecoveryCheck { buffered_ahead } => self.on_recovery(ctx, buffered_ahead),
        };

        match decision {
            Some(decision) => {
                info!(
                    from = %ctx.active,
                    to = %decision.target,
                    reason = %decision.reason,
                    step = ?decision.step(ctx.active),
                    "Quality change decided"
                );
            }
            None => debug!(active = %ctx.active, ?trigger, step = ?Step::Holding, "Holding quality"),
        }

        decision
    }

    /// Drop any pending low-buffer cooldown
    pub fn cancel_cooldown(&mut self) {
        self.cooldown_until = None;
    }

    pub fn cooldown_active(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Whether a recovery check could still step up
    pub fn recovery_available(&self) -> bool {
        !self.recovery_spent
    }

    /// Failures never step below the lowest public level
    fn on_failure(&mut self, ctx: &EvalContext<'_>, kind: FailureKind) -> Option<Decision> {
        let target = ctx.active.step_down().filter(|q| q.is_public());
        if target.is_none() {
            debug!(?kind, active = %ctx.active, "Failure at lowest quality, nothing to drop to");
        }
        let target = target?;
        self.recovery_spent = false;
        Some(Decision {
            target,
            reason: SwitchReason::Error,
        })
    }

    fn on_samples(&mut self, ctx: &EvalContext<'_>, now: Instant) -> Option<Decision> {
        if ctx.counts.low >= self.low_to_step_down {
            if self.cooldown_active(now) {
                debug!(low = ctx.counts.low, "Low buffer step down cooling down");
                return None;
            }
            let target = ctx.active.step_down()?;
            self.cooldown_until = Some(now + self.cooldown);
            self.recovery_spent = false;
            return Some(Decision {
                target,
                reason: SwitchReason::BufferLow,
            });
        }

        if ctx.counts.high >= self.high_to_step_up && !ctx.hidden {
            return step_up_within_cap(ctx);
        }

        None
    }

    fn on_hidden(&self, ctx: &EvalContext<'_>, playing: bool) -> Option<Decision> {
        let target = ctx.capability.clamp(self.hidden_quality);
        // Only ever a downgrade
        (playing && target < ctx.active).then_some(Decision {
            target,
            reason: SwitchReason::TabHidden,
        })
    }

    fn on_visible(&self, ctx: &EvalContext<'_>, recommended: QualityLevel) -> Option<Decision> {
        let target = ctx.capability.clamp(recommended);
        (target != ctx.active).then_some(Decision {
            target,
            reason: SwitchReason::TabVisible,
        })
    }

    fn on_recovery(&mut self, ctx: &EvalContext<'_>, buffered_ahead: f64) -> Option<Decision> {
        if self.recovery_spent {
            debug!("Recovery step up already taken");
            return None;
        }
        if ctx.hidden || buffered_ahead <= self.recovery_buffer_secs {
            return None;
        }
        let decision = step_up_within_cap(ctx)?;
        self.recovery_spent = true;
        Some(decision)
    }
}

fn step_up_within_cap(ctx: &EvalContext<'_>) -> Option<Decision> {
    let target = ctx.capability.clamp(ctx.active.step_up()?);
    (target > ctx.active).then_some(Decision {
        target,
        reason: SwitchReason::BufferHigh,
    })
}
