// Engine model - Everything the renderer reads, published through SharedModel

pub mod channel;
pub mod shared;
pub mod wave;

use std::sync::Arc;

use crate::actions::ActionMap;
use crate::conf::{InputRecMode, RecTriggerMode};
use crate::sequencer::clock::ClockModel;
use channel::{
    Channel, ChannelId, ChannelKind, FIRST_USER_CHANNEL_ID, MASTER_IN_CHANNEL_ID,
    MASTER_OUT_CHANNEL_ID, PREVIEW_CHANNEL_ID,
};
pub use shared::{DataLock, LiveSnapshot, Lockable, SharedModel, SwapType, Working};

/// Transport position unit: one sample period
pub type Frame = usize;

/// Mixer-wide settings
#[derive(Debug, Clone, PartialEq)]
pub struct MixerModel {
    pub has_solos: bool,
    /// Monitor the input bus on the output
    pub in_to_out: bool,
    pub limit_output: bool,
    pub input_enabled: bool,
    /// dBFS threshold for signal-triggered recording
    pub rec_trigger_level: f32,
}

impl Default for MixerModel {
    fn default() -> Self {
        Self {
            has_solos: false,
            in_to_out: false,
            limit_output: false,
            input_enabled: false,
            rec_trigger_level: -10.0,
        }
    }
}

/// Recording state shared with the renderer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecModel {
    pub recording_actions: bool,
    pub recording_input: bool,
    pub rec_trigger_mode: RecTriggerMode,
    pub input_rec_mode: InputRecMode,
    /// Length of the take when recording input, in frames
    pub max_frames_to_rec: Frame,
}

#[derive(Debug, Clone)]
pub struct Model {
    pub clock: ClockModel,
    pub mixer: MixerModel,
    pub rec: RecModel,
    pub channels: Vec<Channel>,
    pub actions: Arc<ActionMap>,
    /// Set while shared data is being edited; the renderer skips channels
    pub locked: bool,
    next_channel_id: ChannelId,
}

impl Default for Model {
    fn default() -> Self {
        Self {
            clock: ClockModel::default(),
            mixer: MixerModel::default(),
            rec: RecModel::default(),
            channels: Vec::new(),
            actions: Arc::new(ActionMap::new()),
            locked: false,
            next_channel_id: FIRST_USER_CHANNEL_ID,
        }
    }
}

impl Model {
    /// Fresh model with the three internal channels
    pub fn with_internal_channels() -> Self {
        let mut model = Self::default();
        model.reset_channels();
        model
    }

    /// Drop every channel and recreate master out, master in and preview
    pub fn reset_channels(&mut self) {
        self.channels.clear();
        self.channels.push(Channel::new(
            MASTER_OUT_CHANNEL_ID,
            ChannelKind::MasterOut,
            "Master Out",
        ));
        self.channels.push(Channel::new(
            MASTER_IN_CHANNEL_ID,
            ChannelKind::MasterIn,
            "Master In",
        ));
        self.channels
            .push(Channel::new(PREVIEW_CHANNEL_ID, ChannelKind::Preview, "Preview"));
        self.next_channel_id = FIRST_USER_CHANNEL_ID;
        self.mixer.has_solos = false;
    }

    pub fn next_channel_id(&mut self) -> ChannelId {
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        id
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.iter_mut().find(|c| c.id == id)
    }

    /// Non-internal channels
    pub fn user_channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(|c| !c.is_internal())
    }

    pub fn volume_of(&self, id: ChannelId) -> f32 {
        self.channel(id).map(|c| c.volume).unwrap_or(1.0)
    }

    /// Recompute `mixer.has_solos` from the channel list
    pub fn update_solo_count(&mut self) {
        self.mixer.has_solos = self.channels.iter().any(|c| !c.is_internal() && c.solo);
    }

    /// Internal channels always sound; muted never; with solos active only
    /// soloed channels do.
    pub fn is_channel_audible(&self, channel: &Channel) -> bool {
        if channel.is_internal() {
            return true;
        }
        if channel.mute {
            return false;
        }
        !self.mixer.has_solos || channel.solo
    }

    /// Armed sample channels able to receive an input take
    pub fn has_input_recordable_channels(&self) -> bool {
        self.user_channels().any(|c| c.armed)
    }
}

impl Lockable for Model {
    fn is_locked(&self) -> bool {
        self.locked
    }

    fn set_locked(&mut self, locked: bool) {
        self.locked = locked;
    }
}
