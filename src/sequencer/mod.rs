// Sequencer - Clock, quantizer and transport

pub mod clock;
pub mod driver;
pub mod metronome;
pub mod quantizer;
#[allow(clippy::module_inception)]
pub mod sequencer;
pub mod transport;

pub use clock::{Clock, ClockModel, ClockState, ClockStatus};
pub use driver::{ExternalTransport, InternalDriver, SlaveDriver, TransportDriver, TransportReceiver};
pub use quantizer::{Quantizer, QuantizerHandle};
pub use sequencer::{Sequencer, SequencerEvent, SequencerEventKind};
pub use transport::Transport;
