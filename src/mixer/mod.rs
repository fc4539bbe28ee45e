// Mixer - Per-block render pipeline
//
// `Mixer` lives on the audio thread. Everything control code needs to reach
// (enable flag, peaks, record buffer, callbacks) sits in `MixerShared`.
// Anything the render has to tell control code is posted as a `MixerEvent`
// and handled by the dispatcher.

mod sample_player;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use ringbuf::traits::Producer;

use crate::audio::buffer::{AudioBuffer, CH_LEFT, CH_RIGHT};
use crate::audio::dsp_utils::linear_to_db;
use crate::audio::parameters::AtomicF32;
use crate::audio::processor::process_chain;
use crate::messaging::channels::MixerEventProducer;
use crate::messaging::event::MixerEvent;
use crate::model::channel::{
    ChannelKind, MASTER_IN_CHANNEL_ID, MASTER_OUT_CHANNEL_ID, PREVIEW_CHANNEL_ID,
};
use crate::model::{Frame, Model, SharedModel};
use crate::sequencer::sequencer::{Sequencer, SequencerEvent};

pub(crate) use sample_player::render_sample_channel;

/// Upper bound on the time `disable` waits for the render to drain
pub const DISABLE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-block parameters, assembled off the audio thread
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderInfo {
    pub has_input: bool,
    pub is_clock_active: bool,
    pub is_clock_running: bool,
    pub can_line_in_rec: bool,
    pub limit_output: bool,
    pub in_to_out: bool,
    pub max_frames_to_rec: Frame,
    pub out_vol: f32,
    pub in_vol: f32,
    /// dBFS
    pub rec_trigger_level: f32,
}

impl Default for RenderInfo {
    fn default() -> Self {
        Self::from_model(&Model::with_internal_channels())
    }
}

impl RenderInfo {
    pub fn from_model(model: &Model) -> Self {
        Self {
            has_input: model.mixer.input_enabled,
            is_clock_active: model.clock.is_active(),
            is_clock_running: model.clock.is_running(),
            can_line_in_rec: model.rec.recording_input && model.has_input_recordable_channels(),
            limit_output: model.mixer.limit_output,
            in_to_out: model.mixer.in_to_out,
            max_frames_to_rec: model.rec.max_frames_to_rec,
            out_vol: model.volume_of(MASTER_OUT_CHANNEL_ID),
            in_vol: model.volume_of(MASTER_IN_CHANNEL_ID),
            rec_trigger_level: model.mixer.rec_trigger_level,
        }
    }
}

/// Latest `RenderInfo`, written on publish and read by the audio host
#[derive(Debug, Default)]
pub struct RenderInfoCell {
    info: Mutex<RenderInfo>,
}

impl RenderInfoCell {
    pub fn new(info: RenderInfo) -> Self {
        Self {
            info: Mutex::new(info),
        }
    }

    pub fn store(&self, info: RenderInfo) {
        match self.info.lock() {
            Ok(mut slot) => *slot = info,
            Err(poisoned) => *poisoned.into_inner() = info,
        }
    }

    /// Non-blocking read: keeps `last` when a writer holds the cell
    pub fn load_into(&self, last: &mut RenderInfo) {
        if let Ok(info) = self.info.try_lock() {
            *last = *info;
        }
    }

    pub fn load(&self) -> RenderInfo {
        match self.info.lock() {
            Ok(info) => *info,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Peak {
    pub left: f32,
    pub right: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    /// Frames recorded so far
    pub position: Frame,
    /// Record buffer length
    pub max_length: Frame,
}

type Callback = Box<dyn FnOnce() + Send>;

/// Mixer state shared with control threads
pub struct MixerShared {
    active: AtomicBool,
    peak_out: [AtomicF32; 2],
    peak_in: [AtomicF32; 2],
    input_tracker: AtomicUsize,
    signal_armed: AtomicBool,
    end_of_rec_armed: AtomicBool,
    end_of_rec_posted: AtomicBool,
    rec_buffer: Mutex<AudioBuffer>,
    signal_cb: Mutex<Option<Callback>>,
    end_of_rec_cb: Mutex<Option<Callback>>,
}

impl Default for MixerShared {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|p| p.into_inner())
}

impl MixerShared {
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            peak_out: [AtomicF32::default(), AtomicF32::default()],
            peak_in: [AtomicF32::default(), AtomicF32::default()],
            input_tracker: AtomicUsize::new(0),
            signal_armed: AtomicBool::new(false),
            end_of_rec_armed: AtomicBool::new(false),
            end_of_rec_posted: AtomicBool::new(false),
            rec_buffer: Mutex::new(AudioBuffer::default()),
            signal_cb: Mutex::new(None),
            end_of_rec_cb: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.active.store(true, Ordering::Release);
        debug!("[mixer] enabled");
    }

    /// Stop rendering and wait (bounded) for an in-flight render to finish.
    /// Control threads only.
    pub fn disable(&self, model: &SharedModel<Model>) {
        self.active.store(false, Ordering::Release);
        if !model.drain_render(DISABLE_DRAIN_TIMEOUT) {
            warn!("[mixer] render still busy after disable");
        }
        debug!("[mixer] disabled");
    }

    /// Start writing input at record buffer frame `from`
    pub fn start_input_rec(&self, from: Frame) {
        self.input_tracker.store(from, Ordering::Release);
    }

    /// Frames recorded since `start_input_rec`
    pub fn stop_input_rec(&self) -> Frame {
        let frames = self.input_tracker.swap(0, Ordering::AcqRel);
        self.clear_end_of_rec_callback();
        frames
    }

    pub fn input_tracker(&self) -> Frame {
        self.input_tracker.load(Ordering::Acquire)
    }

    /// Allocate a silent stereo record buffer. Never on the audio thread.
    pub fn alloc_rec_buffer(&self, frames: Frame) {
        let buffer = AudioBuffer::stereo(frames);
        *lock(&self.rec_buffer) = buffer;
    }

    pub fn clear_rec_buffer(&self) {
        lock(&self.rec_buffer).clear();
    }

    /// Copy of the first `frames` recorded frames
    pub fn rec_buffer_copy(&self, frames: Frame) -> AudioBuffer {
        let rec = lock(&self.rec_buffer);
        let frames = frames.min(rec.count_frames());
        let mut out = AudioBuffer::new(frames, rec.count_channels().max(1));
        out.sum_range(&rec, 0, 0, frames, 1.0);
        out
    }

    pub fn record_info(&self) -> RecordInfo {
        RecordInfo {
            position: self.input_tracker(),
            max_length: lock(&self.rec_buffer).count_frames(),
        }
    }

    /// Run `f` once, on the dispatcher, the first time the input crosses
    /// the trigger level
    pub fn set_signal_callback(&self, f: impl FnOnce() + Send + 'static) {
        *lock(&self.signal_cb) = Some(Box::new(f));
        self.signal_armed.store(true, Ordering::Release);
    }

    pub fn clear_signal_callback(&self) {
        self.signal_armed.store(false, Ordering::Release);
        lock(&self.signal_cb).take();
    }

    /// Run `f` once, on the dispatcher, when the record buffer fills up.
    /// While set, recording stops at the buffer end instead of wrapping.
    pub fn set_end_of_rec_callback(&self, f: impl FnOnce() + Send + 'static) {
        *lock(&self.end_of_rec_cb) = Some(Box::new(f));
        self.end_of_rec_posted.store(false, Ordering::Release);
        self.end_of_rec_armed.store(true, Ordering::Release);
    }

    pub fn clear_end_of_rec_callback(&self) {
        self.end_of_rec_armed.store(false, Ordering::Release);
        lock(&self.end_of_rec_cb).take();
    }

    pub fn is_signal_armed(&self) -> bool {
        self.signal_armed.load(Ordering::Acquire)
    }

    /// A signal callback is registered and has not run yet. Stays true
    /// after the threshold fires until the dispatcher executes it.
    pub fn has_signal_callback(&self) -> bool {
        lock(&self.signal_cb).is_some()
    }

    pub fn exec_signal_cb(&self) {
        let cb = lock(&self.signal_cb).take();
        if let Some(cb) = cb {
            cb();
        }
    }

    pub fn exec_end_of_rec_cb(&self) {
        self.end_of_rec_armed.store(false, Ordering::Release);
        let cb = lock(&self.end_of_rec_cb).take();
        if let Some(cb) = cb {
            cb();
        }
    }

    pub fn peak_out(&self) -> Peak {
        Peak {
            left: self.peak_out[CH_LEFT].load(),
            right: self.peak_out[CH_RIGHT].load(),
        }
    }

    pub fn peak_in(&self) -> Peak {
        Peak {
            left: self.peak_in[CH_LEFT].load(),
            right: self.peak_in[CH_RIGHT].load(),
        }
    }

    fn store_peaks(peaks: &[AtomicF32; 2], buffer: Option<&AudioBuffer>) {
        let (left, right) = match buffer {
            Some(b) if b.count_channels() == 1 => (b.peak(0), b.peak(0)),
            Some(b) => (b.peak(CH_LEFT), b.peak(CH_RIGHT)),
            None => (0.0, 0.0),
        };
        peaks[CH_LEFT].store(left);
        peaks[CH_RIGHT].store(right);
    }
}

/// Audio-thread renderer
pub struct Mixer {
    model: Arc<SharedModel<Model>>,
    shared: Arc<MixerShared>,
    sequencer: Sequencer,
    in_buffer: AudioBuffer,
    channel_buffer: AudioBuffer,
    events_tx: MixerEventProducer,
}

impl Mixer {
    /// `max_block` bounds the block size `render` accepts
    pub fn new(
        model: Arc<SharedModel<Model>>,
        shared: Arc<MixerShared>,
        sequencer: Sequencer,
        events_tx: MixerEventProducer,
        max_block: usize,
    ) -> Self {
        Self {
            model,
            shared,
            sequencer,
            in_buffer: AudioBuffer::stereo(max_block),
            channel_buffer: AudioBuffer::stereo(max_block),
            events_tx,
        }
    }

    pub fn shared(&self) -> &Arc<MixerShared> {
        &self.shared
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    fn post(&mut self, event: MixerEvent) {
        // A full queue means the dispatcher is stalled; the event is lost
        let _ = self.events_tx.try_push(event);
    }

    /// Render one block into `out`. `out` is always fully written.
    pub fn render(&mut self, out: &mut AudioBuffer, input: Option<&AudioBuffer>, info: &RenderInfo) {
        out.clear();
        if !self.shared.is_active() {
            return;
        }
        let frames = out.count_frames();
        if !self.in_buffer.set_frames(frames) || !self.channel_buffer.set_frames(frames) {
            return;
        }

        let model_arc = Arc::clone(&self.model);
        let model = model_arc.acquire_live();

        self.in_buffer.clear();
        MixerShared::store_peaks(&self.shared.peak_in, None);

        if info.has_input {
            if let Some(input) = input {
                self.process_input(input, &model, info);
            }
        }

        let mut sequenced = false;
        if info.is_clock_active {
            if let (true, true, Some(input)) = (info.can_line_in_rec, info.has_input, input) {
                self.line_in_rec(input, info);
            }
            if info.is_clock_running {
                self.sequencer.advance(&model, frames);
                self.sequencer.render(out);
                sequenced = true;
            }
        }
        let events: &[SequencerEvent] = if sequenced { self.sequencer.events() } else { &[] };

        if !model.locked {
            for channel in model.channels.iter().filter(|c| c.kind == ChannelKind::Sample) {
                render_sample_channel(
                    channel,
                    &model.actions,
                    events,
                    info.is_clock_running,
                    &mut self.channel_buffer,
                );
                let gain = if model.is_channel_audible(channel) {
                    channel.volume
                } else {
                    0.0
                };
                out.sum(&self.channel_buffer, gain);
            }
        }

        if let Some(master_out) = model.channel(MASTER_OUT_CHANNEL_ID) {
            process_chain(&master_out.processors, out);
        }
        if !model.locked {
            if let Some(preview) = model.channel(PREVIEW_CHANNEL_ID) {
                render_sample_channel(preview, &model.actions, &[], false, &mut self.channel_buffer);
                out.sum(&self.channel_buffer, preview.volume);
            }
        }

        self.finalize_output(out, info);
    }

    fn process_input(&mut self, input: &AudioBuffer, model: &Model, info: &RenderInfo) {
        MixerShared::store_peaks(&self.shared.peak_in, Some(input));

        if self.shared.signal_armed.load(Ordering::Acquire) {
            let peak = self.shared.peak_in[CH_LEFT]
                .load()
                .max(self.shared.peak_in[CH_RIGHT].load());
            if linear_to_db(peak) > info.rec_trigger_level {
                self.shared.signal_armed.store(false, Ordering::Release);
                self.post(MixerEvent::SignalThresholdReached);
            }
        }

        self.in_buffer.set(input, info.in_vol);
        if let Some(master_in) = model.channel(MASTER_IN_CHANNEL_ID) {
            process_chain(&master_in.processors, &mut self.in_buffer);
        }
    }

    /// Accumulate the raw input, scaled by the input volume, into the record
    /// buffer. The master-in chain only feeds monitoring.
    fn line_in_rec(&mut self, input: &AudioBuffer, info: &RenderInfo) {
        let max = info.max_frames_to_rec;
        if max == 0 {
            return;
        }
        let tracker = self.shared.input_tracker.load(Ordering::Acquire);

        if tracker >= max && self.shared.end_of_rec_armed.load(Ordering::Acquire) {
            if !self.shared.end_of_rec_posted.swap(true, Ordering::AcqRel) {
                self.post(MixerEvent::EndOfRecording);
            }
            return;
        }

        let Ok(mut rec) = self.shared.rec_buffer.try_lock() else {
            return;
        };
        if !rec.is_allocated() {
            return;
        }
        let frames = self.in_buffer.count_frames();
        let written = if self.shared.end_of_rec_armed.load(Ordering::Acquire) {
            // Non-wrapping: stop exactly at the buffer end
            let count = frames.min(max.saturating_sub(tracker));
            rec.sum_range(input, 0, tracker, count, info.in_vol);
            count
        } else {
            rec.sum_wrapping(input, tracker, max, info.in_vol);
            frames
        };
        self.shared
            .input_tracker
            .store(tracker + written, Ordering::Release);
    }

    fn finalize_output(&mut self, out: &mut AudioBuffer, info: &RenderInfo) {
        out.apply_gain(info.out_vol);
        if info.in_to_out {
            out.sum(&self.in_buffer, info.out_vol);
        }
        if info.limit_output {
            out.limit();
        }
        MixerShared::store_peaks(&self.shared.peak_out, Some(out));
    }
}
