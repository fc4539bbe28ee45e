// Loop engine - Library exports for the binary, tests and benchmarks

pub mod actions;
pub mod audio;
pub mod conf;
pub mod dispatcher;
pub mod engine;
pub mod handlers;
pub mod messaging;
pub mod midi;
pub mod mixer;
pub mod model;
pub mod sequencer;

// Re-export commonly used types for convenience
pub use actions::ActionRecorder;
pub use audio::{AudioBuffer, AudioHost};
pub use conf::{EngineConfig, InputRecMode, RecTriggerMode, SyncMode};
pub use dispatcher::EventDispatcher;
pub use engine::{Engine, EngineParts};
pub use handlers::{HandlerError, MixerHandler, RecManager};
pub use messaging::channels::{create_event_channel, create_notification_channel};
pub use messaging::{Event, MixerEvent, Notification};
pub use midi::{MidiEvent, MidiInput};
pub use mixer::{Mixer, MixerShared, RenderInfo};
pub use model::{Model, SharedModel, SwapType};
pub use sequencer::{Clock, ClockStatus, Quantizer, Sequencer, Transport};
