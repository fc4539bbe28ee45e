// Transport drivers - Who owns start, stop, locate and tempo
//
// With the internal driver every request is applied locally. A slave driver
// forwards requests to an external transport (e.g. a JACK-like server) and
// the change comes back later through `TransportReceiver`.

use std::sync::{Arc, Mutex};

use log::debug;

use crate::model::Frame;
use crate::sequencer::clock::Clock;
use crate::sequencer::transport::Transport;

/// Decides whether transport requests are handled externally
pub trait TransportDriver: Send + Sync {
    fn name(&self) -> &str;

    fn is_external(&self) -> bool;

    /// `true` when the request was taken over
    fn request_start(&self) -> bool;

    fn request_stop(&self) -> bool;

    fn request_rewind(&self) -> bool;

    fn request_bpm(&self, bpm: f32) -> bool;
}

/// Local transport: nothing is forwarded
#[derive(Debug, Default)]
pub struct InternalDriver;

impl TransportDriver for InternalDriver {
    fn name(&self) -> &str {
        "internal"
    }

    fn is_external(&self) -> bool {
        false
    }

    fn request_start(&self) -> bool {
        false
    }

    fn request_stop(&self) -> bool {
        false
    }

    fn request_rewind(&self) -> bool {
        false
    }

    fn request_bpm(&self, _bpm: f32) -> bool {
        false
    }
}

/// Control surface of an external transport master
pub trait ExternalTransport: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn locate(&self, frame: Frame);
    fn set_bpm(&self, bpm: f32);
}

/// Forwards every request to an external transport
pub struct SlaveDriver {
    external: Arc<dyn ExternalTransport>,
}

impl SlaveDriver {
    pub fn new(external: Arc<dyn ExternalTransport>) -> Self {
        Self { external }
    }
}

impl TransportDriver for SlaveDriver {
    fn name(&self) -> &str {
        "external"
    }

    fn is_external(&self) -> bool {
        true
    }

    fn request_start(&self) -> bool {
        self.external.start();
        true
    }

    fn request_stop(&self) -> bool {
        self.external.stop();
        true
    }

    fn request_rewind(&self) -> bool {
        self.external.locate(0);
        true
    }

    fn request_bpm(&self, bpm: f32) -> bool {
        self.external.set_bpm(bpm);
        true
    }
}

/// Transport state as reported by the external master
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ExternalState {
    pub frame: Frame,
    pub bpm: f32,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportChange {
    Rewind,
    Bpm(f32),
    Start,
    Stop,
}

impl ExternalState {
    /// Changes to apply locally going from `prev` to `self`
    pub fn diff(&self, prev: &ExternalState) -> Vec<TransportChange> {
        let mut changes = Vec::new();
        if self.frame != prev.frame && self.frame == 0 {
            changes.push(TransportChange::Rewind);
        }
        if self.bpm != prev.bpm && self.bpm > 1.0 {
            changes.push(TransportChange::Bpm(self.bpm));
        }
        if self.running != prev.running {
            changes.push(if self.running {
                TransportChange::Start
            } else {
                TransportChange::Stop
            });
        }
        changes
    }
}

/// Applies external transport updates through the raw (local) operations
pub struct TransportReceiver {
    prev: Mutex<ExternalState>,
    transport: Arc<Transport>,
    clock: Arc<Clock>,
}

impl TransportReceiver {
    pub fn new(transport: Arc<Transport>, clock: Arc<Clock>) -> Self {
        Self {
            prev: Mutex::new(ExternalState::default()),
            transport,
            clock,
        }
    }

    /// Poll with the latest external state. Returns the applied changes.
    pub fn recv(&self, state: ExternalState) -> Vec<TransportChange> {
        let changes = {
            let Ok(mut prev) = self.prev.lock() else {
                return Vec::new();
            };
            let changes = state.diff(&prev);
            *prev = state;
            changes
        };

        for change in &changes {
            debug!("[transport] external change {:?}", change);
            match change {
                TransportChange::Rewind => self.transport.raw_rewind(),
                TransportChange::Bpm(bpm) => self.clock.set_bpm_raw(*bpm),
                TransportChange::Start => self.transport.raw_start(),
                TransportChange::Stop => self.transport.raw_stop(),
            }
        }
        changes
    }
}
