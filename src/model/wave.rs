// Wave - Audio data owned by sample channels
//
// Contents are read by the renderer with `try_read` and written by overdub
// under the model data lock, so a render never waits on a writer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::audio::buffer::AudioBuffer;

pub type WaveId = u32;

static NEXT_WAVE_ID: AtomicU32 = AtomicU32::new(1);

#[derive(Debug)]
pub struct Wave {
    id: WaveId,
    name: String,
    sample_rate: u32,
    buffer: RwLock<AudioBuffer>,
    edited: AtomicBool,
}

impl Wave {
    pub fn new(name: impl Into<String>, sample_rate: u32, buffer: AudioBuffer) -> Self {
        Self {
            id: NEXT_WAVE_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            sample_rate,
            buffer: RwLock::new(buffer),
            edited: AtomicBool::new(false),
        }
    }

    /// Blank wave of `frames` stereo frames, used as a recording take
    pub fn empty(name: impl Into<String>, sample_rate: u32, frames: usize) -> Self {
        Self::new(name, sample_rate, AudioBuffer::stereo(frames))
    }

    pub fn id(&self) -> WaveId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_edited(&self) -> bool {
        self.edited.load(Ordering::Relaxed)
    }

    pub fn set_edited(&self, edited: bool) {
        self.edited.store(edited, Ordering::Relaxed);
    }

    pub fn count_frames(&self) -> usize {
        self.read().map(|b| b.count_frames()).unwrap_or(0)
    }

    /// Non-blocking read for the audio thread. `None` while a writer holds
    /// the buffer.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, AudioBuffer>> {
        self.buffer.try_read().ok()
    }

    pub fn read(&self) -> Option<RwLockReadGuard<'_, AudioBuffer>> {
        self.buffer.read().ok()
    }

    /// Blocking write. Only while holding the model data lock.
    pub fn write(&self) -> Option<RwLockWriteGuard<'_, AudioBuffer>> {
        self.buffer.write().ok()
    }

    /// Deep copy with a fresh id
    pub fn duplicate(&self, name: impl Into<String>) -> Self {
        let buffer = self.read().map(|b| b.clone()).unwrap_or_default();
        Self::new(name, self.sample_rate, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = Wave::empty("a", 44100, 16);
        let b = Wave::empty("b", 44100, 16);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.count_frames(), 16);
    }

    #[test]
    fn test_try_read_fails_while_writing() {
        let wave = Wave::empty("take", 44100, 8);
        let guard = wave.write().unwrap();
        assert!(wave.try_read().is_none());
        drop(guard);
        assert!(wave.try_read().is_some());
    }

    #[test]
    fn test_duplicate_copies_content() {
        let wave = Wave::new("w", 48000, AudioBuffer::from_interleaved(vec![0.5; 8], 2));
        let copy = wave.duplicate("w-copy");
        assert_ne!(copy.id(), wave.id());
        assert_eq!(copy.read().unwrap().get(3, 1), 0.5);
        assert_eq!(copy.sample_rate(), 48000);
    }
}
