// Metronome - Click track mixed into the master output
// Clicks are triggered by the sequencer at sample offsets inside the block

use std::f32::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::audio::buffer::AudioBuffer;
use crate::audio::parameters::AtomicF32;

/// Metronome click type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Click {
    /// First beat of a bar
    Bar,
    /// Other beats
    Beat,
}

/// Pre-generated click samples
#[derive(Debug, Clone)]
pub struct MetronomeSound {
    bar_samples: Vec<f32>,
    beat_samples: Vec<f32>,
}

impl MetronomeSound {
    const CLICK_DURATION_MS: f32 = 10.0;

    pub fn new(sample_rate: f32) -> Self {
        let click_samples = ((Self::CLICK_DURATION_MS / 1000.0) * sample_rate) as usize;
        Self {
            bar_samples: Self::generate_click(sample_rate, click_samples, 1200.0, 0.6),
            beat_samples: Self::generate_click(sample_rate, click_samples, 800.0, 0.4),
        }
    }

    /// Sine burst with a fast exponential decay
    fn generate_click(sample_rate: f32, num_samples: usize, frequency: f32, amplitude: f32) -> Vec<f32> {
        let phase_increment = 2.0 * PI * frequency / sample_rate;
        (0..num_samples)
            .map(|i| {
                let t = i as f32 / num_samples as f32;
                (i as f32 * phase_increment).sin() * (-t * 8.0).exp() * amplitude
            })
            .collect()
    }

    pub fn get_click(&self, click: Click) -> &[f32] {
        match click {
            Click::Bar => &self.bar_samples,
            Click::Beat => &self.beat_samples,
        }
    }
}

/// Settings shared with control threads
#[derive(Debug)]
pub struct MetronomeShared {
    enabled: AtomicBool,
    volume: AtomicF32,
}

impl MetronomeShared {
    pub fn new(volume: f32) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            volume: AtomicF32::new(volume.clamp(0.0, 1.0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn toggle(&self) {
        self.enabled.fetch_xor(true, Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.clamp(0.0, 1.0));
    }
}

/// Clicks that can start within one block
const MAX_PENDING_CLICKS: usize = 16;

#[derive(Debug, Clone, Copy)]
struct ClickPlayback {
    click: Click,
    position: usize,
}

/// Audio-thread click player
#[derive(Debug)]
pub struct Metronome {
    sound: MetronomeSound,
    shared: Arc<MetronomeShared>,
    current: Option<ClickPlayback>,
    /// Clicks starting inside the next rendered block, in offset order
    pending: [(Click, usize); MAX_PENDING_CLICKS],
    pending_len: usize,
}

impl Metronome {
    pub fn new(sample_rate: f32, shared: Arc<MetronomeShared>) -> Self {
        Self {
            sound: MetronomeSound::new(sample_rate),
            shared,
            current: None,
            pending: [(Click::Beat, 0); MAX_PENDING_CLICKS],
            pending_len: 0,
        }
    }

    pub fn shared(&self) -> &Arc<MetronomeShared> {
        &self.shared
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.is_enabled()
    }

    /// Start a click `offset` frames into the next block
    pub fn trigger(&mut self, click: Click, offset: usize) {
        if !self.is_enabled() || self.pending_len == MAX_PENDING_CLICKS {
            return;
        }
        self.pending[self.pending_len] = (click, offset);
        self.pending_len += 1;
    }

    /// Add clicks to `out`, all channels
    pub fn render(&mut self, out: &mut AudioBuffer) {
        if !self.is_enabled() {
            self.reset();
            return;
        }
        if self.current.is_none() && self.pending_len == 0 {
            return;
        }
        let volume = self.shared.volume();
        let channels = out.count_channels();

        let mut next = 0;
        for frame in 0..out.count_frames() {
            // A new click cuts the one still sounding
            while next < self.pending_len && self.pending[next].1 <= frame {
                let (click, _) = self.pending[next];
                self.current = Some(ClickPlayback { click, position: 0 });
                next += 1;
            }
            let Some(playback) = self.current.as_mut() else {
                continue;
            };
            let samples = self.sound.get_click(playback.click);
            if playback.position >= samples.len() {
                self.current = None;
                continue;
            }
            let value = samples[playback.position] * volume;
            playback.position += 1;
            for ch in 0..channels {
                out.add(frame, ch, value);
            }
        }
        // Offsets past the block end: start at the top of the next one
        let left = self.pending_len - next;
        for i in 0..left {
            self.pending[i] = (self.pending[next + i].0, 0);
        }
        self.pending_len = left;
    }

    pub fn reset(&mut self) {
        self.current = None;
        self.pending_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metronome(enabled: bool) -> Metronome {
        let shared = Arc::new(MetronomeShared::new(1.0));
        shared.set_enabled(enabled);
        Metronome::new(48000.0, shared)
    }

    #[test]
    fn test_metronome_sound_generation() {
        let sound = MetronomeSound::new(48000.0);
        let bar = sound.get_click(Click::Bar);
        let beat = sound.get_click(Click::Beat);

        // 10ms at 48kHz
        assert_eq!(bar.len(), 480);
        assert_eq!(beat.len(), 480);

        let bar_peak = bar.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        let beat_peak = beat.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        assert!(bar_peak > beat_peak);
    }

    #[test]
    fn test_click_starts_at_offset() {
        let mut metronome = metronome(true);
        let mut out = AudioBuffer::stereo(512);

        metronome.trigger(Click::Bar, 100);
        metronome.render(&mut out);

        assert!((0..100).all(|f| out.get(f, 0) == 0.0));
        let audible = (100..512).filter(|&f| out.get(f, 0).abs() > 0.0001).count();
        assert!(audible > 300);
        assert_eq!(out.get(200, 0), out.get(200, 1));
    }

    #[test]
    fn test_two_clicks_in_one_block() {
        let mut metronome = metronome(true);
        let mut out = AudioBuffer::stereo(2048);

        metronome.trigger(Click::Bar, 0);
        metronome.trigger(Click::Beat, 1000);
        metronome.render(&mut out);

        assert!(out.get(10, 0).abs() > 0.0);
        assert!((600..1000).all(|f| out.get(f, 0) == 0.0));
        assert!(out.get(1010, 0).abs() > 0.0);
        assert!((1600..2048).all(|f| out.get(f, 0) == 0.0));
    }

    #[test]
    fn test_click_spans_blocks() {
        let mut metronome = metronome(true);
        let mut first = AudioBuffer::stereo(256);
        let mut second = AudioBuffer::stereo(256);

        metronome.trigger(Click::Beat, 0);
        metronome.render(&mut first);
        metronome.render(&mut second);
        // 480 samples long: continues into the second block then stops
        assert!(second.get(100, 0).abs() > 0.0 || second.get(101, 0).abs() > 0.0);
        assert!((224..256).all(|f| second.get(f, 0) == 0.0));
    }

    #[test]
    fn test_disabled_is_silent() {
        let mut metronome = metronome(false);
        let mut out = AudioBuffer::stereo(512);
        metronome.trigger(Click::Bar, 0);
        metronome.render(&mut out);
        assert_eq!(out.peak(0), 0.0);
    }

    #[test]
    fn test_toggle_from_shared() {
        let metronome = metronome(false);
        metronome.shared().toggle();
        assert!(metronome.is_enabled());
        metronome.shared().set_volume(3.0);
        assert_eq!(metronome.shared().volume(), 1.0);
    }
}
