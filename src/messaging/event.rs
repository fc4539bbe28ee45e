// Events - Intents queued toward the dispatcher
//
// UI and MIDI threads only enqueue `Event`s. The audio thread only posts
// `MixerEvent`s. Everything is applied later on the dispatcher thread.

use std::fmt;

use crate::midi::event::MidiEvent;
use crate::model::channel::ChannelId;

pub enum Event {
    /// Press a channel key (start, retrigger or stop by play mode)
    KeyPress { channel: ChannelId, velocity: u8 },
    KeyRelease { channel: ChannelId },
    /// Stop immediately
    KeyKill { channel: ChannelId },
    SetMute { channel: ChannelId, mute: bool },
    SetSolo { channel: ChannelId, solo: bool },
    SetVolume { channel: ChannelId, volume: f32 },
    ToggleReadActions { channel: ChannelId },
    ToggleArm { channel: ChannelId },
    /// Raw event from a MIDI input
    Midi(MidiEvent),
    SequencerStart,
    SequencerStop,
    SequencerRewind,
    /// Deferred work run on the dispatcher thread
    Function(Box<dyn FnOnce() + Send>),
}

impl Event {
    pub fn is_sequencer(&self) -> bool {
        matches!(
            self,
            Event::SequencerStart | Event::SequencerStop | Event::SequencerRewind
        )
    }

    /// Channel targeted by a channel event
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            Event::KeyPress { channel, .. }
            | Event::KeyRelease { channel }
            | Event::KeyKill { channel }
            | Event::SetMute { channel, .. }
            | Event::SetSolo { channel, .. }
            | Event::SetVolume { channel, .. }
            | Event::ToggleReadActions { channel }
            | Event::ToggleArm { channel } => Some(*channel),
            _ => None,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::KeyPress { channel, velocity } => {
                write!(f, "KeyPress({}, vel={})", channel, velocity)
            }
            Event::KeyRelease { channel } => write!(f, "KeyRelease({})", channel),
            Event::KeyKill { channel } => write!(f, "KeyKill({})", channel),
            Event::SetMute { channel, mute } => write!(f, "SetMute({}, {})", channel, mute),
            Event::SetSolo { channel, solo } => write!(f, "SetSolo({}, {})", channel, solo),
            Event::SetVolume { channel, volume } => {
                write!(f, "SetVolume({}, {:.2})", channel, volume)
            }
            Event::ToggleReadActions { channel } => write!(f, "ToggleReadActions({})", channel),
            Event::ToggleArm { channel } => write!(f, "ToggleArm({})", channel),
            Event::Midi(event) => write!(f, "Midi({:?})", event),
            Event::SequencerStart => write!(f, "SequencerStart"),
            Event::SequencerStop => write!(f, "SequencerStop"),
            Event::SequencerRewind => write!(f, "SequencerRewind"),
            Event::Function(_) => write!(f, "Function"),
        }
    }
}

/// Raised by the audio thread, handled off it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerEvent {
    /// Input crossed the trigger level while armed
    SignalThresholdReached,
    /// Record buffer is full
    EndOfRecording,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_channel() {
        assert_eq!(Event::KeyKill { channel: 7 }.channel(), Some(7));
        assert_eq!(Event::SequencerStart.channel(), None);
        assert!(Event::SequencerRewind.is_sequencer());
        assert!(!Event::Midi(MidiEvent::note_on(0, 60, 1)).is_sequencer());
    }

    #[test]
    fn test_function_debug() {
        let event = Event::Function(Box::new(|| {}));
        assert_eq!(format!("{:?}", event), "Function");
    }
}
