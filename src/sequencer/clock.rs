// Clock - Transport position and musical frame geometry
//
// Geometry (bpm, beats, bars, quantize and the frame counts derived from
// them) is part of the published model. The running position is a set of
// atomics (`ClockState`) owned by the model and advanced only by the
// audio thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use log::info;

use crate::actions::ActionRecorder;
use crate::midi::sync::SyncControl;
use crate::model::{Frame, Model, SharedModel, SwapType};
use crate::sequencer::driver::TransportDriver;

pub const MIN_BPM: f32 = 20.0;
pub const MAX_BPM: f32 = 999.0;
pub const MAX_BEATS: u32 = 32;
pub const DEFAULT_BPM: f32 = 120.0;
pub const DEFAULT_BEATS: u32 = 4;
pub const DEFAULT_BARS: u32 = 1;
pub const DEFAULT_QUANTIZE: u32 = 0;
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockStatus {
    #[default]
    Stopped,
    /// Armed, waiting for a trigger (e.g. input signal)
    Waiting,
    Running,
}

/// Running position, written by the audio thread
#[derive(Debug, Default)]
pub struct ClockState {
    current_frame: AtomicUsize,
    current_beat: AtomicU32,
    current_frame_wait: AtomicUsize,
    rewind_requested: AtomicBool,
}

impl ClockState {
    pub fn frame(&self) -> Frame {
        self.current_frame.load(Ordering::Acquire)
    }

    pub fn beat(&self) -> u32 {
        self.current_beat.load(Ordering::Relaxed)
    }

    pub fn frame_wait(&self) -> Frame {
        self.current_frame_wait.load(Ordering::Relaxed)
    }

    /// Move the position by `amount` frames. While waiting only the wait
    /// counter moves; the transport position is left alone.
    pub fn advance(&self, clock: &ClockModel, amount: Frame) {
        if clock.frames_in_loop == 0 {
            return;
        }
        if clock.status == ClockStatus::Waiting {
            let wait = (self.frame_wait() + amount) % clock.frames_in_loop;
            self.current_frame_wait.store(wait, Ordering::Relaxed);
            return;
        }
        // Read-modify-write: a control thread may wrap the position concurrently
        let loop_len = clock.frames_in_loop;
        let previous = self
            .current_frame
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| {
                Some((f + amount) % loop_len)
            })
            .unwrap_or_else(|f| f);
        let frame = (previous + amount) % loop_len;
        if clock.frames_in_beat > 0 {
            self.current_beat
                .store((frame / clock.frames_in_beat) as u32, Ordering::Relaxed);
        }
    }

    pub fn rewind(&self) {
        self.current_frame.store(0, Ordering::Release);
        self.current_beat.store(0, Ordering::Relaxed);
        self.current_frame_wait.store(0, Ordering::Relaxed);
    }

    /// Ask the sequencer to rewind at the start of its next block
    pub fn request_rewind(&self) {
        self.rewind_requested.store(true, Ordering::Release);
    }

    pub fn take_rewind_request(&self) -> bool {
        self.rewind_requested.swap(false, Ordering::AcqRel)
    }

    /// Keep the position inside a loop that just got shorter
    pub fn wrap_into(&self, frames_in_loop: Frame, frames_in_beat: Frame) {
        if frames_in_loop == 0 {
            return;
        }
        let wrapped = self
            .current_frame
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| {
                (f >= frames_in_loop).then_some(f % frames_in_loop)
            });
        if let Ok(previous) = wrapped {
            if frames_in_beat > 0 {
                let frame = previous % frames_in_loop;
                self.current_beat
                    .store((frame / frames_in_beat) as u32, Ordering::Relaxed);
            }
        }
    }
}

/// Tempo, signature and derived frame geometry
#[derive(Debug, Clone)]
pub struct ClockModel {
    pub bpm: f32,
    pub beats: u32,
    pub bars: u32,
    pub quantize: u32,
    pub status: ClockStatus,
    pub frames_in_loop: Frame,
    pub frames_in_bar: Frame,
    pub frames_in_beat: Frame,
    pub frames_in_seq: Frame,
    pub quantizer_step: Frame,
    pub state: Arc<ClockState>,
}

impl Default for ClockModel {
    fn default() -> Self {
        let mut clock = Self {
            bpm: DEFAULT_BPM,
            beats: DEFAULT_BEATS,
            bars: DEFAULT_BARS,
            quantize: DEFAULT_QUANTIZE,
            status: ClockStatus::Stopped,
            frames_in_loop: 0,
            frames_in_bar: 0,
            frames_in_beat: 0,
            frames_in_seq: 0,
            quantizer_step: 0,
            state: Arc::new(ClockState::default()),
        };
        clock.recompute(DEFAULT_SAMPLE_RATE);
        clock
    }
}

impl ClockModel {
    /// Derive every frame count from bpm, beats, bars and quantize
    pub fn recompute(&mut self, sample_rate: u32) {
        let frames_in_loop = (sample_rate as f64 * 60.0 / self.bpm as f64) * self.beats as f64;
        self.frames_in_loop = frames_in_loop.round() as Frame;
        self.frames_in_bar = self.frames_in_loop / self.bars.max(1) as Frame;
        self.frames_in_beat = self.frames_in_loop / self.beats.max(1) as Frame;
        self.frames_in_seq = self.frames_in_beat * MAX_BEATS as Frame;
        self.quantizer_step = if self.quantize > 0 {
            self.frames_in_beat / self.quantize as Frame
        } else {
            0
        };
    }

    /// Restore tempo and signature defaults, keeping the position state
    pub fn reset(&mut self, sample_rate: u32) {
        self.bpm = DEFAULT_BPM;
        self.beats = DEFAULT_BEATS;
        self.bars = DEFAULT_BARS;
        self.quantize = DEFAULT_QUANTIZE;
        self.status = ClockStatus::Stopped;
        self.recompute(sample_rate);
    }

    pub fn is_running(&self) -> bool {
        self.status == ClockStatus::Running
    }

    /// Running or waiting
    pub fn is_active(&self) -> bool {
        matches!(self.status, ClockStatus::Running | ClockStatus::Waiting)
    }

    pub fn can_quantize(&self) -> bool {
        self.quantize > 0 && self.quantizer_step > 0 && self.is_running()
    }

    /// Round `frame` up to the next quantizer step. A boundary at or past
    /// the loop end wraps to the loop start. No-op when quantization is
    /// not possible.
    pub fn quantize(&self, frame: Frame) -> Frame {
        if !self.can_quantize() || self.frames_in_loop == 0 {
            return frame;
        }
        let step = self.quantizer_step;
        let boundary = frame.div_ceil(step) * step;
        if boundary >= self.frames_in_loop { 0 } else { boundary }
    }

    pub fn is_on_bar(&self) -> bool {
        let frame = self.state.frame();
        if self.status == ClockStatus::Waiting || frame == 0 || self.frames_in_bar == 0 {
            return false;
        }
        frame % self.frames_in_bar == 0
    }

    pub fn is_on_beat(&self) -> bool {
        if self.frames_in_beat == 0 {
            return false;
        }
        if self.status == ClockStatus::Waiting {
            return self.state.frame_wait() % self.frames_in_beat == 0;
        }
        self.state.frame() % self.frames_in_beat == 0
    }

    pub fn is_on_first_beat(&self) -> bool {
        self.state.frame() == 0
    }

    pub fn quanto_has_passed(&self) -> bool {
        self.quantize != 0
            && self.quantizer_step != 0
            && self.state.frame() % self.quantizer_step == 0
    }
}

/// Control-side clock façade
///
/// Every setter edits the working model and publishes it. Tempo changes are
/// offered to the transport driver first so an external master can take
/// them over.
pub struct Clock {
    model: Arc<SharedModel<Model>>,
    recorder: Arc<ActionRecorder>,
    driver: Arc<dyn TransportDriver>,
    sync: Arc<SyncControl>,
    sample_rate: AtomicU32,
}

impl Clock {
    pub fn new(
        model: Arc<SharedModel<Model>>,
        recorder: Arc<ActionRecorder>,
        driver: Arc<dyn TransportDriver>,
        sync: Arc<SyncControl>,
        sample_rate: u32,
    ) -> Self {
        let clock = Self {
            model,
            recorder,
            driver,
            sync,
            sample_rate: AtomicU32::new(sample_rate),
        };
        clock.recompute_frames();
        clock
    }

    fn recompute_frames(&self) {
        let sample_rate = self.sample_rate();
        self.model
            .mutate(SwapType::None, |m| m.clock.recompute(sample_rate));
    }

    /// Back to default tempo and signature, position rewound
    pub fn reset(&self) {
        let sample_rate = self.sample_rate();
        let mut working = self.model.working();
        working.clock.reset(sample_rate);
        working.clock.state.rewind();
        working.publish(SwapType::Hard);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Relaxed)
    }

    fn read<R>(&self, f: impl FnOnce(&ClockModel) -> R) -> R {
        f(&self.model.peek().clock)
    }

    pub fn bpm(&self) -> f32 {
        self.read(|c| c.bpm)
    }

    pub fn beats(&self) -> u32 {
        self.read(|c| c.beats)
    }

    pub fn bars(&self) -> u32 {
        self.read(|c| c.bars)
    }

    pub fn quantize_value(&self) -> u32 {
        self.read(|c| c.quantize)
    }

    pub fn status(&self) -> ClockStatus {
        self.read(|c| c.status)
    }

    pub fn current_frame(&self) -> Frame {
        self.read(|c| c.state.frame())
    }

    pub fn current_beat(&self) -> u32 {
        self.read(|c| c.state.beat())
    }

    pub fn current_second(&self) -> f32 {
        self.current_frame() as f32 / self.sample_rate() as f32
    }

    pub fn frames_in_loop(&self) -> Frame {
        self.read(|c| c.frames_in_loop)
    }

    pub fn frames_in_bar(&self) -> Frame {
        self.read(|c| c.frames_in_bar)
    }

    pub fn frames_in_beat(&self) -> Frame {
        self.read(|c| c.frames_in_beat)
    }

    pub fn frames_in_seq(&self) -> Frame {
        self.read(|c| c.frames_in_seq)
    }

    pub fn quantizer_step(&self) -> Frame {
        self.read(|c| c.quantizer_step)
    }

    pub fn is_running(&self) -> bool {
        self.read(|c| c.is_running())
    }

    pub fn is_active(&self) -> bool {
        self.read(|c| c.is_active())
    }

    pub fn is_on_bar(&self) -> bool {
        self.read(|c| c.is_on_bar())
    }

    pub fn is_on_beat(&self) -> bool {
        self.read(|c| c.is_on_beat())
    }

    pub fn is_on_first_beat(&self) -> bool {
        self.read(|c| c.is_on_first_beat())
    }

    pub fn quanto_has_passed(&self) -> bool {
        self.read(|c| c.quanto_has_passed())
    }

    pub fn can_quantize(&self) -> bool {
        self.read(|c| c.can_quantize())
    }

    pub fn quantize(&self, frame: Frame) -> Frame {
        self.read(|c| c.quantize(frame))
    }

    /// Longest loop possible with the current signature (at MIN_BPM).
    /// Record buffers are sized on this.
    pub fn max_frames_in_loop(&self) -> Frame {
        let beats = self.beats() as f64;
        ((self.sample_rate() as f64 * 60.0 / MIN_BPM as f64) * beats).round() as Frame
    }

    /// Tempo that makes a take of `frames` frames last exactly one loop
    pub fn calc_bpm_from_rec(&self, frames: Frame) -> f32 {
        if frames == 0 {
            return self.bpm();
        }
        let seconds = frames as f32 / self.sample_rate() as f32;
        (60.0 * self.beats() as f32) / seconds
    }

    /// Clamp and apply a new tempo, unless an external transport takes it
    pub fn set_bpm(&self, bpm: f32) {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        if self.driver.request_bpm(bpm) {
            return;
        }
        self.set_bpm_raw(bpm);
    }

    /// Apply a tempo directly. Recorded actions are rescaled so they keep
    /// their musical position.
    pub fn set_bpm_raw(&self, bpm: f32) {
        let bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        let sample_rate = self.sample_rate();
        {
            let mut model = self.model.data_lock();
            let ratio = model.clock.bpm / bpm;
            model.clock.bpm = bpm;
            model.clock.recompute(sample_rate);
            self.recorder.update_bpm_locked(&mut model, ratio);
            let (loop_len, beat_len) = (model.clock.frames_in_loop, model.clock.frames_in_beat);
            model.clock.state.wrap_into(loop_len, beat_len);
        }
        info!("[clock] bpm changed to {:.2}", bpm);
    }

    /// Clamp beats to [1, MAX_BEATS] and bars to [1, beats]
    pub fn set_beats(&self, beats: u32, bars: u32) {
        let beats = beats.clamp(1, MAX_BEATS);
        let bars = bars.clamp(1, beats);
        let sample_rate = self.sample_rate();

        let mut working = self.model.working();
        working.clock.beats = beats;
        working.clock.bars = bars;
        working.clock.recompute(sample_rate);
        let (loop_len, beat_len) = (working.clock.frames_in_loop, working.clock.frames_in_beat);
        working.clock.state.wrap_into(loop_len, beat_len);
        working.publish(SwapType::Hard);
        info!("[clock] signature changed to {}/{}", beats, bars);
    }

    /// 0 disables quantization
    pub fn set_quantize(&self, quantize: u32) {
        let sample_rate = self.sample_rate();
        let mut working = self.model.working();
        working.clock.quantize = quantize;
        working.clock.recompute(sample_rate);
        working.publish(SwapType::Hard);
    }

    pub fn set_status(&self, status: ClockStatus) {
        let previous = {
            let mut working = self.model.working();
            let previous = working.clock.status;
            working.clock.status = status;
            working.publish(SwapType::Soft);
            previous
        };
        if previous == status {
            return;
        }
        match status {
            ClockStatus::Running => self.sync.send_start(),
            ClockStatus::Stopped => self.sync.send_stop(),
            ClockStatus::Waiting => {}
        }
    }

    /// Change the system sample rate; geometry and action frames follow
    pub fn set_sample_rate(&self, sample_rate: u32) {
        let old = self.sample_rate.swap(sample_rate, Ordering::Relaxed);
        if old == sample_rate {
            return;
        }
        {
            let mut model = self.model.data_lock();
            model.clock.recompute(sample_rate);
            self.recorder.update_sample_rate_locked(&mut model, sample_rate, old);
            let (loop_len, beat_len) = (model.clock.frames_in_loop, model.clock.frames_in_beat);
            model.clock.state.wrap_into(loop_len, beat_len);
        }
        info!("[clock] sample rate changed {} -> {}", old, sample_rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock_at(bpm: f32, beats: u32, bars: u32, quantize: u32) -> ClockModel {
        let mut clock = ClockModel {
            bpm,
            beats,
            bars,
            quantize,
            ..ClockModel::default()
        };
        clock.recompute(44100);
        clock
    }

    #[test]
    fn test_default_geometry() {
        let clock = ClockModel::default();
        // 44100 * 60 / 120 * 4
        assert_eq!(clock.frames_in_loop, 88200);
        assert_eq!(clock.frames_in_bar, 88200);
        assert_eq!(clock.frames_in_beat, 22050);
        assert_eq!(clock.frames_in_seq, 22050 * 32);
        assert_eq!(clock.quantizer_step, 0);
    }

    #[test]
    fn test_quantizer_step() {
        let clock = clock_at(120.0, 4, 1, 4);
        assert_eq!(clock.quantizer_step, 22050 / 4);
    }

    #[test]
    fn test_advance_wraps_on_loop() {
        let clock = clock_at(120.0, 4, 1, 0);
        let mut running = clock.clone();
        running.status = ClockStatus::Running;

        running.state.advance(&running, 1000);
        assert_eq!(running.state.frame(), 1000);
        running.state.advance(&running, running.frames_in_loop);
        assert_eq!(running.state.frame(), 1000);
        running.state.advance(&running, 22050);
        assert_eq!(running.state.beat(), 1);
    }

    #[test]
    fn test_waiting_advances_wait_counter_only() {
        let mut clock = clock_at(120.0, 4, 1, 0);
        clock.status = ClockStatus::Waiting;
        clock.state.advance(&clock, 512);
        assert_eq!(clock.state.frame(), 0);
        assert_eq!(clock.state.frame_wait(), 512);
    }

    #[test]
    fn test_quantize_rounds_up() {
        let mut clock = clock_at(120.0, 4, 1, 4);
        let step = clock.quantizer_step;
        // Not running: no-op
        assert_eq!(clock.quantize(10), 10);

        clock.status = ClockStatus::Running;
        assert_eq!(clock.quantize(0), 0);
        assert_eq!(clock.quantize(1), step);
        assert_eq!(clock.quantize(step), step);
        assert_eq!(clock.quantize(clock.frames_in_loop - 1), 0);
    }

    #[test]
    fn test_is_on_bar_and_beat() {
        let mut clock = clock_at(120.0, 4, 2, 0);
        clock.status = ClockStatus::Running;
        assert!(!clock.is_on_bar());
        assert!(clock.is_on_first_beat());

        clock.state.advance(&clock, clock.frames_in_bar);
        assert!(clock.is_on_bar());
        assert!(clock.is_on_beat());

        clock.state.advance(&clock, 1);
        assert!(!clock.is_on_beat());
    }

    #[test]
    fn test_wrap_into_shorter_loop() {
        let mut clock = clock_at(120.0, 4, 1, 0);
        clock.status = ClockStatus::Running;
        clock.state.advance(&clock, 50_000);
        clock.state.wrap_into(44100, 11025);
        assert_eq!(clock.state.frame(), 50_000 - 44100);
        assert_eq!(clock.state.beat(), 0);
    }

    #[test]
    fn test_wrap_concurrent_with_advance_loses_no_frames() {
        let mut clock = clock_at(120.0, 4, 1, 0);
        clock.status = ClockStatus::Running;
        clock.frames_in_loop = usize::MAX / 2;
        let state = Arc::clone(&clock.state);
        const STEPS: usize = 20_000;

        let audio = std::thread::spawn(move || {
            for _ in 0..STEPS {
                clock.state.advance(&clock, 1);
            }
        });
        for _ in 0..STEPS {
            state.wrap_into(7, 1);
        }
        audio.join().unwrap();

        // Wrapping keeps the residue, so no advance may go missing
        state.wrap_into(7, 1);
        assert_eq!(state.frame(), STEPS % 7);
    }

    #[test]
    fn test_rewind_request_taken_once() {
        let state = ClockState::default();
        state.request_rewind();
        assert!(state.take_rewind_request());
        assert!(!state.take_rewind_request());
    }
}
