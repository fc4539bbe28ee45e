// Audio processors - Per-channel effect chain boundary
//
// Plugin hosting lives outside this crate. Channels only know about this
// trait: an ordered list of processors applied in series to the channel's
// block buffer. Processors are shared between model snapshots (`Arc`), so any
// runtime state must use interior atomics.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::buffer::AudioBuffer;
use crate::audio::parameters::AtomicF32;

/// Block processor
///
/// # Real-time Safety
/// `process` runs on the audio thread: no allocation, no blocking.
pub trait AudioProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Process `buffer` in place
    fn process(&self, buffer: &mut AudioBuffer);

    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);
}

impl fmt::Debug for dyn AudioProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AudioProcessor({})", self.name())
    }
}

/// Run a chain of processors, skipping bypassed ones
pub fn process_chain<P>(chain: &[P], buffer: &mut AudioBuffer)
where
    P: AsRef<dyn AudioProcessor>,
{
    for processor in chain {
        let processor = processor.as_ref();
        if processor.is_enabled() {
            processor.process(buffer);
        }
    }
}

/// Simple gain stage
#[derive(Debug)]
pub struct Gain {
    gain: AtomicF32,
    enabled: AtomicBool,
}

impl Gain {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: AtomicF32::new(gain),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0));
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }
}

impl AudioProcessor for Gain {
    fn name(&self) -> &str {
        "Gain"
    }

    fn process(&self, buffer: &mut AudioBuffer) {
        buffer.apply_gain(self.gain.load());
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}
