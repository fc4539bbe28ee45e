// Notifications - Engine status reported toward the UI

use std::time::{SystemTime, UNIX_EPOCH};

use crate::messaging::event::MixerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCategory {
    Midi,
    Audio,
    Mixer,
    Transport,
    Recording,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub category: NotificationCategory,
    pub message: String,
    /// Unix time in milliseconds
    pub timestamp: u64,
}

impl Notification {
    pub fn new(level: NotificationLevel, category: NotificationCategory, message: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        Self {
            level,
            category,
            message: message.into(),
            timestamp,
        }
    }

    pub fn info(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Info, category, message)
    }

    pub fn warning(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Warning, category, message)
    }

    pub fn error(category: NotificationCategory, message: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, category, message)
    }

    /// What the UI is told about a render-side event
    pub fn from_mixer_event(event: MixerEvent) -> Self {
        match event {
            MixerEvent::SignalThresholdReached => {
                Self::info(NotificationCategory::Recording, "Input signal detected, recording")
            }
            MixerEvent::EndOfRecording => {
                Self::info(NotificationCategory::Recording, "Recording reached its maximum length")
            }
        }
    }
}
