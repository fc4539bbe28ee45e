// Audio buffers - Interleaved float storage used across the render graph
//
// All buffers are allocated up front (engine start, record arm) and reused on
// the audio thread. None of the methods below allocate except `alloc`.

/// Number of channels handled internally (stereo in, stereo out).
pub const MAX_IO_CHANS: usize = 2;

pub const CH_LEFT: usize = 0;
pub const CH_RIGHT: usize = 1;

/// Interleaved multi-channel audio buffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    data: Vec<f32>,
    frames: usize,
    channels: usize,
}

impl AudioBuffer {
    pub fn new(frames: usize, channels: usize) -> Self {
        Self {
            data: vec![0.0; frames * channels],
            frames,
            channels,
        }
    }

    /// Stereo buffer of `frames` frames
    pub fn stereo(frames: usize) -> Self {
        Self::new(frames, MAX_IO_CHANS)
    }

    /// Build a buffer from interleaved samples. Trailing samples that do not
    /// fill a whole frame are dropped.
    pub fn from_interleaved(samples: Vec<f32>, channels: usize) -> Self {
        let channels = channels.max(1);
        let frames = samples.len() / channels;
        let mut data = samples;
        data.truncate(frames * channels);
        Self {
            data,
            frames,
            channels,
        }
    }

    /// (Re)allocate storage. Never call this on the audio thread.
    pub fn alloc(&mut self, frames: usize, channels: usize) {
        self.data = vec![0.0; frames * channels];
        self.frames = frames;
        self.channels = channels;
    }

    /// Change the frame count without reallocating. Fails (returns false)
    /// when the storage reserved at allocation time is too small.
    pub fn set_frames(&mut self, frames: usize) -> bool {
        let samples = frames * self.channels;
        if samples > self.data.capacity() {
            return false;
        }
        self.data.resize(samples, 0.0);
        self.frames = frames;
        true
    }

    pub fn free(&mut self) {
        self.data = Vec::new();
        self.frames = 0;
    }

    #[inline]
    pub fn count_frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn count_channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn count_samples(&self) -> usize {
        self.data.len()
    }

    pub fn is_allocated(&self) -> bool {
        !self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// One interleaved frame
    #[inline]
    pub fn frame(&self, index: usize) -> &[f32] {
        let start = index * self.channels;
        &self.data[start..start + self.channels]
    }

    #[inline]
    pub fn frame_mut(&mut self, index: usize) -> &mut [f32] {
        let start = index * self.channels;
        &mut self.data[start..start + self.channels]
    }

    /// Sample at (frame, channel), 0.0 when out of range
    #[inline]
    pub fn get(&self, frame: usize, channel: usize) -> f32 {
        if frame >= self.frames || channel >= self.channels {
            return 0.0;
        }
        self.data[frame * self.channels + channel]
    }

    #[inline]
    pub fn add(&mut self, frame: usize, channel: usize, value: f32) {
        if frame < self.frames && channel < self.channels {
            self.data[frame * self.channels + channel] += value;
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
    }

    /// Zero `frames` frames starting at `offset`
    pub fn clear_range(&mut self, offset: usize, frames: usize) {
        let start = (offset * self.channels).min(self.data.len());
        let end = ((offset + frames) * self.channels).min(self.data.len());
        self.data[start..end].fill(0.0);
    }

    /// Overwrite with `src * gain`. A mono source is copied to every channel.
    pub fn set(&mut self, src: &AudioBuffer, gain: f32) {
        self.clear();
        self.sum(src, gain);
    }

    /// Add `src * gain` frame by frame, starting at frame 0 of both buffers.
    pub fn sum(&mut self, src: &AudioBuffer, gain: f32) {
        self.sum_range(src, 0, 0, src.frames, gain);
    }

    /// Add `frames` frames of `src` (from `src_offset`) into this buffer at
    /// `dest_offset`. Copies are clipped to whichever buffer ends first.
    pub fn sum_range(
        &mut self,
        src: &AudioBuffer,
        src_offset: usize,
        dest_offset: usize,
        frames: usize,
        gain: f32,
    ) {
        if src.channels == 0 || self.channels == 0 {
            return;
        }
        let available_src = src.frames.saturating_sub(src_offset);
        let available_dest = self.frames.saturating_sub(dest_offset);
        let count = frames.min(available_src).min(available_dest);

        for i in 0..count {
            let s = (src_offset + i) * src.channels;
            let d = (dest_offset + i) * self.channels;
            for ch in 0..self.channels {
                // Mono sources feed every output channel
                let src_ch = if src.channels == 1 { 0 } else { ch };
                if src_ch < src.channels {
                    self.data[d + ch] += src.data[s + src_ch] * gain;
                }
            }
        }
    }

    /// Add `src * gain` at `dest_offset`, wrapping around at `wrap_at` frames.
    /// Used by the line-in recorder to loop over the record buffer.
    pub fn sum_wrapping(&mut self, src: &AudioBuffer, dest_offset: usize, wrap_at: usize, gain: f32) {
        let wrap_at = wrap_at.min(self.frames);
        if wrap_at == 0 {
            return;
        }
        let dest_offset = dest_offset % wrap_at;
        let first = src.frames.min(wrap_at - dest_offset);
        self.sum_range(src, 0, dest_offset, first, gain);

        let mut copied = first;
        while copied < src.frames {
            let chunk = (src.frames - copied).min(wrap_at);
            self.sum_range(src, copied, 0, chunk, gain);
            copied += chunk;
        }
    }

    pub fn apply_gain(&mut self, gain: f32) {
        if gain == 1.0 {
            return;
        }
        for sample in self.data.iter_mut() {
            *sample *= gain;
        }
    }

    /// Hard-limit every sample to [-1, 1]
    pub fn limit(&mut self) {
        for sample in self.data.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    /// Absolute peak of one channel
    pub fn peak(&self, channel: usize) -> f32 {
        if channel >= self.channels {
            return 0.0;
        }
        self.data
            .iter()
            .skip(channel)
            .step_by(self.channels)
            .fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(frames: usize, value: f32) -> AudioBuffer {
        AudioBuffer::from_interleaved(vec![value; frames * 2], 2)
    }

    #[test]
    fn test_new_buffer_is_silent() {
        let buf = AudioBuffer::stereo(64);
        assert_eq!(buf.count_frames(), 64);
        assert_eq!(buf.count_channels(), 2);
        assert!(buf.as_slice().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_sum_and_gain() {
        let mut out = filled(4, 0.25);
        let src = filled(4, 0.5);
        out.sum(&src, 0.5);
        assert!(out.as_slice().iter().all(|s| (*s - 0.5).abs() < 1e-6));

        out.apply_gain(2.0);
        assert!(out.as_slice().iter().all(|s| (*s - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_set_replaces_content() {
        let mut out = filled(4, 0.9);
        out.set(&filled(4, 0.2), 1.0);
        assert!(out.as_slice().iter().all(|s| (*s - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_mono_source_feeds_both_channels() {
        let mut out = AudioBuffer::stereo(3);
        let mono = AudioBuffer::from_interleaved(vec![0.1, 0.2, 0.3], 1);
        out.sum(&mono, 1.0);
        assert_eq!(out.frame(1), &[0.2, 0.2]);
    }

    #[test]
    fn test_sum_range_clips_to_destination() {
        let mut out = AudioBuffer::stereo(4);
        out.sum_range(&filled(8, 1.0), 0, 2, 8, 1.0);
        assert_eq!(out.get(1, 0), 0.0);
        assert_eq!(out.get(2, 0), 1.0);
        assert_eq!(out.get(3, 1), 1.0);
    }

    #[test]
    fn test_sum_wrapping_loops_over_limit() {
        let mut rec = AudioBuffer::stereo(8);
        let block = filled(4, 1.0);
        // Start at frame 6 of a 6-frame loop inside an 8-frame buffer
        rec.sum_wrapping(&block, 6, 6, 1.0);
        assert_eq!(rec.get(0, 0), 1.0);
        assert_eq!(rec.get(3, 0), 1.0);
        assert_eq!(rec.get(4, 0), 0.0);
        assert_eq!(rec.get(6, 0), 0.0);
    }

    #[test]
    fn test_peak_and_limit() {
        let mut buf = AudioBuffer::from_interleaved(vec![0.5, -1.5, -0.7, 0.2], 2);
        assert!((buf.peak(CH_LEFT) - 0.7).abs() < 1e-6);
        assert!((buf.peak(CH_RIGHT) - 1.5).abs() < 1e-6);

        buf.limit();
        assert_eq!(buf.get(0, 1), -1.0);
        assert_eq!(buf.get(0, 0), 0.5);
    }

    #[test]
    fn test_set_frames_within_capacity() {
        let mut buf = AudioBuffer::stereo(256);
        assert!(buf.set_frames(64));
        assert_eq!(buf.count_frames(), 64);
        assert_eq!(buf.count_samples(), 128);
        assert!(buf.set_frames(256));
        assert!(!buf.set_frames(1024));
        assert_eq!(buf.count_frames(), 256);
    }

    #[test]
    fn test_clear_range() {
        let mut buf = filled(4, 1.0);
        buf.clear_range(1, 2);
        assert_eq!(buf.get(0, 0), 1.0);
        assert_eq!(buf.get(1, 0), 0.0);
        assert_eq!(buf.get(2, 1), 0.0);
        assert_eq!(buf.get(3, 0), 1.0);
    }
}
