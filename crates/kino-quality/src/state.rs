//! Mutable controller state

use crate::quality::{QualityLevel, QualityMode};
use tokio::time::Instant;

/// The controller's mutable core.
///
/// Only the decision path (choosing a switch) and the switch executor
/// (starting and settling it) write to this. `pending_switch` is `Some` only
/// while a switch is in flight and is always cleared before the next one
/// may start.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub mode: QualityMode,
    pub active_quality: QualityLevel,
    pub pending_switch: Option<QualityLevel>,
    pub last_switch_at: Option<Instant>,
}

impl ControllerState {
    pub fn new(active_quality: QualityLevel) -> Self {
        Self {
            mode: QualityMode::Auto,
            active_quality,
            pending_switch: None,
            last_switch_at: None,
        }
    }

    pub fn is_switching(&self) -> bool {
        self.pending_switch.is_some()
    }
}
