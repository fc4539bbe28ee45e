// Messaging - Lock-free queues between the audio, MIDI, UI and dispatcher threads

pub mod channels;
pub mod event;
pub mod notification;

pub use event::{Event, MixerEvent};
pub use notification::{Notification, NotificationCategory, NotificationLevel};
