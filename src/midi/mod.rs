// MIDI - Raw events, input ports and sync output

pub mod event;
pub mod input;
pub mod sync;

pub use event::MidiEvent;
pub use input::MidiInput;
pub use sync::{MidiOutWorker, MidiSink, SyncControl, SyncTicker};
