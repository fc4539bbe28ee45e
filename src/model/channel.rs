// Channels - Per-channel configuration and runtime state
//
// `Channel` is plain data cloned into every model snapshot. What the audio
// thread mutates (play status, read position) lives in `ChannelShared`, an
// `Arc` of atomics shared by all snapshots of the same channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::audio::processor::AudioProcessor;
use crate::model::wave::Wave;

pub type ChannelId = u32;

pub const MASTER_OUT_CHANNEL_ID: ChannelId = 1;
pub const MASTER_IN_CHANNEL_ID: ChannelId = 2;
pub const PREVIEW_CHANNEL_ID: ChannelId = 3;

/// First id handed out to user channels
pub const FIRST_USER_CHANNEL_ID: ChannelId = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    MasterOut,
    MasterIn,
    Preview,
    Sample,
}

/// Sample playback mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplePlayMode {
    /// One-shot, starts on key press
    #[default]
    Single,
    /// Loops forever, kicks in on the first beat
    Loop,
    /// Plays one loop cycle, kicks in on the first beat
    LoopOnce,
}

impl SamplePlayMode {
    pub fn is_loop(&self) -> bool {
        matches!(self, SamplePlayMode::Loop | SamplePlayMode::LoopOnce)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Off = 0,
    Wait = 1,
    Play = 2,
}

impl From<u8> for ChannelStatus {
    fn from(value: u8) -> Self {
        match value {
            1 => ChannelStatus::Wait,
            2 => ChannelStatus::Play,
            _ => ChannelStatus::Off,
        }
    }
}

/// Playback request posted by control threads, consumed by the renderer at
/// the start of the next block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayRequest {
    None = 0,
    /// Start (or restart) from the beginning of the wave
    Start = 1,
    /// Stop at the start of the next block
    Stop = 2,
    /// Stop and forget any pending start
    Kill = 3,
}

impl From<u8> for PlayRequest {
    fn from(value: u8) -> Self {
        match value {
            1 => PlayRequest::Start,
            2 => PlayRequest::Stop,
            3 => PlayRequest::Kill,
            _ => PlayRequest::None,
        }
    }
}

/// Atomic play status shared between the audio and control threads
#[derive(Debug, Default)]
pub struct ChannelShared {
    status: AtomicU8,
    tracker: AtomicUsize,
    request: AtomicU8,
}

impl ChannelShared {
    pub fn status(&self) -> ChannelStatus {
        ChannelStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: ChannelStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub fn tracker(&self) -> usize {
        self.tracker.load(Ordering::Relaxed)
    }

    pub fn set_tracker(&self, frame: usize) {
        self.tracker.store(frame, Ordering::Relaxed);
    }

    pub fn request(&self, request: PlayRequest) {
        self.request.store(request as u8, Ordering::Release);
    }

    /// Take the pending request, leaving `None` behind
    pub fn take_request(&self) -> PlayRequest {
        PlayRequest::from(self.request.swap(PlayRequest::None as u8, Ordering::AcqRel))
    }

    pub fn is_playing(&self) -> bool {
        self.status() == ChannelStatus::Play
    }
}

#[derive(Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub name: String,
    pub volume: f32,
    pub mute: bool,
    pub solo: bool,
    /// Record-armed for input recording
    pub armed: bool,
    /// Play back recorded actions
    pub read_actions: bool,
    pub has_actions: bool,
    pub mode: SamplePlayMode,
    /// MIDI note that triggers this channel
    pub midi_key: Option<u8>,
    pub wave: Option<Arc<Wave>>,
    pub processors: Vec<Arc<dyn AudioProcessor>>,
    pub shared: Arc<ChannelShared>,
}

impl Channel {
    pub fn new(id: ChannelId, kind: ChannelKind, name: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            name: name.into(),
            volume: 1.0,
            mute: false,
            solo: false,
            armed: false,
            read_actions: true,
            has_actions: false,
            mode: SamplePlayMode::default(),
            midi_key: None,
            wave: None,
            processors: Vec::new(),
            shared: Arc::new(ChannelShared::default()),
        }
    }

    pub fn sample(id: ChannelId, name: impl Into<String>) -> Self {
        Self::new(id, ChannelKind::Sample, name)
    }

    /// Master out, master in and preview
    pub fn is_internal(&self) -> bool {
        self.kind != ChannelKind::Sample
    }

    pub fn has_wave(&self) -> bool {
        self.wave.is_some()
    }

    pub fn status(&self) -> ChannelStatus {
        self.shared.status()
    }

    /// Copy for cloning a channel: same settings, fresh runtime state
    pub fn duplicate(&self, id: ChannelId) -> Self {
        let mut copy = self.clone();
        copy.id = id;
        copy.name = format!("{} (copy)", self.name);
        copy.shared = Arc::new(ChannelShared::default());
        copy
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("status", &self.status())
            .field("wave", &self.wave.as_ref().map(|w| w.id()))
            .finish()
    }
}
