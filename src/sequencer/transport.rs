// Transport - Control-thread half of the sequencer
// Start, stop and rewind requests, routed through the transport driver

use std::sync::{Arc, RwLock};

use log::{debug, info};

use crate::messaging::event::Event;
use crate::model::{Model, SharedModel};
use crate::sequencer::clock::{Clock, ClockStatus};
use crate::sequencer::driver::TransportDriver;
use crate::sequencer::quantizer::QuantizerHandle;
use crate::sequencer::sequencer::REWIND_QUANTIZER_ID;

type AboutStartHook = Box<dyn Fn(ClockStatus) + Send + Sync>;
type AboutStopHook = Box<dyn Fn() + Send + Sync>;

pub struct Transport {
    model: Arc<SharedModel<Model>>,
    clock: Arc<Clock>,
    driver: Arc<dyn TransportDriver>,
    quantizer: QuantizerHandle,
    on_about_start: RwLock<Option<AboutStartHook>>,
    on_about_stop: RwLock<Option<AboutStopHook>>,
}

impl Transport {
    pub fn new(
        model: Arc<SharedModel<Model>>,
        clock: Arc<Clock>,
        driver: Arc<dyn TransportDriver>,
        quantizer: QuantizerHandle,
    ) -> Self {
        Self {
            model,
            clock,
            driver,
            quantizer,
            on_about_start: RwLock::new(None),
            on_about_stop: RwLock::new(None),
        }
    }

    /// Called with the status before the clock starts running
    pub fn set_on_about_start<F>(&self, hook: F)
    where
        F: Fn(ClockStatus) + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_about_start.write() {
            *slot = Some(Box::new(hook));
        }
    }

    /// Called before the clock stops
    pub fn set_on_about_stop<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        if let Ok(mut slot) = self.on_about_stop.write() {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn driver(&self) -> &Arc<dyn TransportDriver> {
        &self.driver
    }

    /// Apply the transport intents found in `events`
    pub fn react(&self, events: &[Event]) {
        for event in events {
            match event {
                Event::SequencerStart => self.start(),
                Event::SequencerStop => self.stop(),
                Event::SequencerRewind => self.rewind(),
                _ => {}
            }
        }
    }

    pub fn start(&self) {
        if self.driver.request_start() {
            return;
        }
        self.raw_start();
    }

    pub fn stop(&self) {
        if self.driver.request_stop() {
            return;
        }
        self.raw_stop();
    }

    pub fn rewind(&self) {
        if self.driver.request_rewind() {
            return;
        }
        self.raw_rewind();
    }

    pub fn toggle(&self) {
        if self.clock.is_running() {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Start locally, bypassing the driver
    pub fn raw_start(&self) {
        let status = self.clock.status();
        if let Ok(hook) = self.on_about_start.read() {
            if let Some(hook) = hook.as_ref() {
                hook(status);
            }
        }
        match status {
            ClockStatus::Stopped | ClockStatus::Waiting => {
                self.clock.set_status(ClockStatus::Running);
                info!("[transport] started");
            }
            ClockStatus::Running => {}
        }
    }

    /// Stop locally, bypassing the driver
    pub fn raw_stop(&self) {
        if let Ok(hook) = self.on_about_stop.read() {
            if let Some(hook) = hook.as_ref() {
                hook();
            }
        }
        self.clock.set_status(ClockStatus::Stopped);
        info!("[transport] stopped");
    }

    /// Rewind locally. Deferred to the next step when quantizing, to the
    /// next block when running.
    pub fn raw_rewind(&self) {
        let model = self.model.peek();
        let clock = &model.clock;
        if clock.can_quantize() {
            debug!("[transport] quantized rewind");
            self.quantizer.trigger(REWIND_QUANTIZER_ID);
        } else if clock.is_running() {
            clock.state.request_rewind();
        } else {
            clock.state.rewind();
            clock.state.request_rewind();
        }
    }

    /// Drop any pending quantized rewind and go back to the loop start
    pub fn reset(&self) {
        self.quantizer.cancel(REWIND_QUANTIZER_ID);
        self.model.peek().clock.state.rewind();
    }
}
