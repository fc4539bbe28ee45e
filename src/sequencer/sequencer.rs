// Sequencer - Audio-thread half of the transport
//
// Scans every frame of the block so that no loop wrap, bar or beat is
// missed when a boundary falls mid-block. Events are collected into a
// preallocated buffer and handed to the mixer in temporal order.

use std::sync::Arc;

use crate::audio::buffer::AudioBuffer;
use crate::midi::sync::SyncTicker;
use crate::model::{Frame, Model};
use crate::sequencer::clock::ClockState;
use crate::sequencer::metronome::{Click, Metronome};
use crate::sequencer::quantizer::{Quantizer, QuantizerHandle};

/// Events kept per block; extra ones are dropped
pub const MAX_SEQUENCER_EVENTS: usize = 1024;

/// Quantizer slot of the deferred rewind
pub const REWIND_QUANTIZER_ID: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerEventKind {
    /// Loop wrapped to frame 0
    FirstBeat,
    Bar,
    Rewind,
    /// Recorded actions sit on `global_frame`
    Actions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencerEvent {
    pub kind: SequencerEventKind,
    /// Transport position of the event
    pub global_frame: Frame,
    /// Offset inside the current block
    pub delta: Frame,
}

/// State reachable from quantized callbacks
pub struct SequencerCore {
    events: Vec<SequencerEvent>,
    clock: Arc<ClockState>,
    sync: SyncTicker,
    dropped: usize,
}

impl SequencerCore {
    fn push(&mut self, kind: SequencerEventKind, global_frame: Frame, delta: Frame) {
        if self.events.len() >= MAX_SEQUENCER_EVENTS {
            self.dropped += 1;
            return;
        }
        self.events.push(SequencerEvent {
            kind,
            global_frame,
            delta,
        });
    }

    /// Back to frame 0, `delta` frames into the block
    fn rewind(&mut self, delta: Frame) {
        self.clock.rewind();
        self.sync.rewind();
        self.push(SequencerEventKind::Rewind, 0, delta);
    }
}

pub struct Sequencer {
    core: SequencerCore,
    quantizer: Quantizer<SequencerCore>,
    metronome: Metronome,
}

impl Sequencer {
    pub fn new(clock: Arc<ClockState>, sync: SyncTicker, metronome: Metronome) -> Self {
        let mut quantizer = Quantizer::new();
        quantizer.schedule(REWIND_QUANTIZER_ID, |core: &mut SequencerCore, delta| {
            core.rewind(delta)
        });
        Self {
            core: SequencerCore {
                events: Vec::with_capacity(MAX_SEQUENCER_EVENTS),
                clock,
                sync,
                dropped: 0,
            },
            quantizer,
            metronome,
        }
    }

    pub fn quantizer_handle(&self) -> QuantizerHandle {
        self.quantizer.handle()
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    /// Events of the last block
    pub fn events(&self) -> &[SequencerEvent] {
        &self.core.events
    }

    /// Events lost to a full buffer since creation
    pub fn dropped_events(&self) -> usize {
        self.core.dropped
    }

    /// Scan the next `frames` frames, then move the clock and quantizer.
    /// Only called while the clock is running.
    pub fn advance(&mut self, model: &Model, frames: Frame) -> &[SequencerEvent] {
        self.core.events.clear();

        let clock = &model.clock;
        let frames_in_loop = clock.frames_in_loop;
        if frames_in_loop == 0 {
            return &self.core.events;
        }

        if self.core.clock.take_rewind_request() {
            self.core.rewind(0);
        }

        let start = self.core.clock.frame();
        for local in 0..frames {
            let global = (start + local) % frames_in_loop;
            self.core.sync.tick(clock.status, global, clock.frames_in_beat);

            if global == 0 {
                self.core.push(SequencerEventKind::FirstBeat, global, local);
                self.metronome.trigger(Click::Beat, local);
            } else if clock.frames_in_bar > 0 && global % clock.frames_in_bar == 0 {
                self.core.push(SequencerEventKind::Bar, global, local);
                self.metronome.trigger(Click::Bar, local);
            } else if clock.frames_in_beat > 0 && global % clock.frames_in_beat == 0 {
                self.metronome.trigger(Click::Beat, local);
            }

            if model.actions.on_frame(global).is_some() {
                self.core.push(SequencerEventKind::Actions, global, local);
            }
        }

        self.core.clock.advance(clock, frames);
        self.quantizer.advance(
            start..start + frames,
            clock.quantizer_step,
            clock.frames_in_loop,
            &mut self.core,
        );

        &self.core.events
    }

    /// Mix the metronome into `out`
    pub fn render(&mut self, out: &mut AudioBuffer) {
        if self.metronome.is_enabled() {
            self.metronome.render(out);
        }
    }

    pub fn reset(&mut self) {
        self.core.events.clear();
        self.metronome.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::Action;
    use crate::midi::event::MidiEvent;
    use crate::sequencer::clock::ClockStatus;
    use crate::sequencer::metronome::MetronomeShared;

    fn running_model() -> Model {
        let mut model = Model::with_internal_channels();
        model.clock.status = ClockStatus::Running;
        model.clock.beats = 4;
        model.clock.bars = 2;
        model.clock.recompute(44100);
        model
    }

    fn sequencer(model: &Model) -> Sequencer {
        let metronome = Metronome::new(44100.0, Arc::new(MetronomeShared::new(1.0)));
        Sequencer::new(Arc::clone(&model.clock.state), SyncTicker::disabled(), metronome)
    }

    #[test]
    fn test_first_beat_at_start() {
        let model = running_model();
        let mut seq = sequencer(&model);
        let events = seq.advance(&model, 512).to_vec();
        assert_eq!(
            events,
            vec![SequencerEvent {
                kind: SequencerEventKind::FirstBeat,
                global_frame: 0,
                delta: 0
            }]
        );
        assert_eq!(model.clock.state.frame(), 512);
    }

    #[test]
    fn test_bar_inside_block() {
        let model = running_model();
        let mut seq = sequencer(&model);
        let bar = model.clock.frames_in_bar;

        seq.advance(&model, bar - 100);
        let events = seq.advance(&model, 512).to_vec();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SequencerEventKind::Bar);
        assert_eq!(events[0].global_frame, bar);
        assert_eq!(events[0].delta, 100);
    }

    #[test]
    fn test_wrap_mid_block() {
        let model = running_model();
        let mut seq = sequencer(&model);
        let lp = model.clock.frames_in_loop;

        seq.advance(&model, lp - 10);
        let events = seq.advance(&model, 64).to_vec();
        assert_eq!(events[0].kind, SequencerEventKind::FirstBeat);
        assert_eq!(events[0].delta, 10);
        assert_eq!(model.clock.state.frame(), 54);
    }

    #[test]
    fn test_actions_tagged_with_offsets() {
        let mut model = running_model();
        let mut map = (*model.actions).clone();
        map.insert(Action::new(1, 4, 300, MidiEvent::note_on(0, 60, 100)));
        model.actions = Arc::new(map);

        let mut seq = sequencer(&model);
        let events = seq.advance(&model, 512).to_vec();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            SequencerEvent {
                kind: SequencerEventKind::Actions,
                global_frame: 300,
                delta: 300
            }
        );
    }

    #[test]
    fn test_quantized_rewind() {
        let mut model = running_model();
        model.clock.quantize = 4;
        model.clock.recompute(44100);
        let step = model.clock.quantizer_step;

        let mut seq = sequencer(&model);
        seq.advance(&model, 1000);
        seq.quantizer_handle().trigger(REWIND_QUANTIZER_ID);

        // Block crosses the first step boundary
        let start = model.clock.state.frame();
        let events = seq.advance(&model, step).to_vec();
        let rewind = events
            .iter()
            .find(|e| e.kind == SequencerEventKind::Rewind)
            .copied()
            .unwrap();
        assert_eq!(rewind.delta, step - start);
        assert_eq!(model.clock.state.frame(), 0);
    }

    #[test]
    fn test_event_buffer_overflow_is_counted() {
        let mut model = running_model();
        let mut map = (*model.actions).clone();
        for frame in 0..2048 {
            map.insert(Action::new(frame as u32 + 1, 4, frame, MidiEvent::note_on(0, 60, 100)));
        }
        model.actions = Arc::new(map);

        let mut seq = sequencer(&model);
        let kept = seq.advance(&model, 2048).len();
        assert_eq!(kept, MAX_SEQUENCER_EVENTS);
        // One first beat plus 2048 action frames
        assert_eq!(seq.dropped_events(), 2049 - MAX_SEQUENCER_EVENTS);
    }

    #[test]
    fn test_rewind_request_handled_first() {
        let model = running_model();
        let mut seq = sequencer(&model);
        seq.advance(&model, 5000);

        model.clock.state.request_rewind();
        let events = seq.advance(&model, 256).to_vec();
        assert_eq!(events[0].kind, SequencerEventKind::Rewind);
        assert_eq!(events[1].kind, SequencerEventKind::FirstBeat);
        assert_eq!(model.clock.state.frame(), 256);
    }
}
