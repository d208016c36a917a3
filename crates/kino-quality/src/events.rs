//! Quality notifications
//!
//! Completed and failed switches are published for UI badges and analytics:
//! - [`QualityChanged`] after every completed switch
//! - [`SwitchFailed`] after every failed switch
//!
//! Each is wrapped in a [`NotificationRecord`] carrying the controller id,
//! a sequence number and a UTC timestamp.

use crate::error::SwitchError;
use crate::quality::QualityLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Broadcast capacity for notification subscribers
const NOTIFICATION_CAPACITY: usize = 64;

/// Unique identifier for a controller instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerId(pub Uuid);

impl ControllerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ControllerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why the active quality changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchReason {
    UserManual,
    BufferLow,
    BufferHigh,
    Error,
    TabHidden,
    TabVisible,
}

impl fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchReason::UserManual => write!(f, "user_manual"),
            SwitchReason::BufferLow => write!(f, "buffer_low"),
            SwitchReason::BufferHigh => write!(f, "buffer_high"),
            SwitchReason::Error => write!(f, "error"),
            SwitchReason::TabHidden => write!(f, "tab_hidden"),
            SwitchReason::TabVisible => write!(f, "tab_visible"),
        }
    }
}

/// A switch completed and playback resumed at the new quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityChanged {
    pub from: QualityLevel,
    pub to: QualityLevel,
    pub reason: SwitchReason,
}

/// A switch failed; playback continues at the previous quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchFailed {
    pub attempted: QualityLevel,
    pub reason: SwitchReason,
    /// Analytics code of the cause (`RESOLUTION`, `LOAD`, ...)
    pub code: String,
    /// Human-readable cause
    pub cause: String,
}

impl SwitchFailed {
    pub fn new(reason: SwitchReason, error: &SwitchError) -> Self {
        Self {
            attempted: error.attempted(),
            reason,
            code: error.error_code().to_string(),
            cause: error.to_string(),
        }
    }
}

/// Notification payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QualityEvent {
    QualityChanged(QualityChanged),
    SwitchFailed(SwitchFailed),
}

/// Notification with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub controller_id: ControllerId,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: QualityEvent,
}

impl NotificationRecord {
    /// Serialize as a single JSON line for analytics sinks
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Publishes notifications to any number of subscribers
#[derive(Debug, Clone)]
pub struct Notifier {
    controller_id: ControllerId,
    sequence: u64,
    tx: broadcast::Sender<NotificationRecord>,
}

impl Notifier {
    pub fn new(controller_id: ControllerId) -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            controller_id,
            sequence: 0,
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationRecord> {
        self.tx.subscribe()
    }

    /// Sender half, for handing out more subscriptions later
    pub fn sender(&self) -> broadcast::Sender<NotificationRecord> {
        self.tx.clone()
    }

    pub fn emit(&mut self, event: QualityEvent) {
        self.sequence += 1;
        let record = NotificationRecord {
            controller_id: self.controller_id,
            sequence: self.sequence,
            timestamp: Utc::now(),
            event,
        };
        // No subscribers is fine
        if self.tx.send(record).is_err() {
            debug!(sequence = self.sequence, "Notification dropped, no subscribers");
        }
    }
}

/// Collapses consecutive identical switch failures into one user-visible
/// message. A completed switch resets it.
#[derive(Debug, Default)]
pub struct FailureDebouncer {
    last: Option<(QualityLevel, String)>,
}

impl FailureDebouncer {
    pub const MESSAGE: &'static str = "Playback quality could not be changed";

    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the message to show, or `None` when it repeats the last one
    pub fn observe(&mut self, event: &QualityEvent) -> Option<&'static str> {
        match event {
            QualityEvent::QualityChanged(_) => {
                self.last = None;
                None
            }
            QualityEvent::SwitchFailed(failed) => {
                let key = (failed.attempted, failed.code.clone());
                if self.last.as_ref() == Some(&key) {
                    None
                } else {
                    self.last = Some(key);
                    Some(Self::MESSAGE)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(attempted: QualityLevel) -> QualityEvent {
        let error = SwitchError::Load {
            quality: attempted,
            reason: "network".into(),
        };
        QualityEvent::SwitchFailed(SwitchFailed::new(SwitchReason::BufferHigh, &error))
    }

    #[test]
    fn test_debouncer_collapses_repeats() {
        let mut debouncer = FailureDebouncer::new();
        assert!(debouncer.observe(&failed(QualityLevel::Q1080)).is_some());
        assert!(debouncer.observe(&failed(QualityLevel::Q1080)).is_none());
        assert!(debouncer.observe(&failed(QualityLevel::Q720)).is_some());

        let changed = QualityEvent::QualityChanged(QualityChanged {
            from: QualityLevel::Q720,
            to: QualityLevel::Q480,
            reason: SwitchReason::BufferLow,
        });
        assert!(debouncer.observe(&changed).is_none());
        assert!(debouncer.observe(&failed(QualityLevel::Q720)).is_some());
    }

    #[tokio::test]
    async fn test_notifier_sequences() {
        let mut notifier = Notifier::new(ControllerId::new());
        let mut rx = notifier.subscribe();

        notifier.emit(failed(QualityLevel::Q4K));
        notifier.emit(failed(QualityLevel::Q1080));

        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.sequence, 2);
        assert!(second.to_json().contains("\"event\":\"switch_failed\""));
    }
}
