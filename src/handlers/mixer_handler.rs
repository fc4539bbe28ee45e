// Mixer handler - Channel management and input take finalization
//
// Structural edits (channel list, wave pointers) are published HARD. Edits
// of wave contents go through the model data lock instead.

use std::sync::Arc;

use log::{debug, info, warn};

use super::HandlerError;
use crate::actions::recorder::ActionRecorder;
use crate::model::channel::{Channel, ChannelId, ChannelKind, ChannelStatus, PlayRequest, SamplePlayMode};
use crate::model::wave::Wave;
use crate::model::{Frame, Model, SharedModel, SwapType};
use crate::mixer::MixerShared;
use crate::sequencer::clock::Clock;

pub struct MixerHandler {
    model: Arc<SharedModel<Model>>,
    mixer: Arc<MixerShared>,
    recorder: Arc<ActionRecorder>,
    clock: Arc<Clock>,
    treat_recs_as_loops: bool,
}

fn sample_channel_mut(model: &mut Model, id: ChannelId) -> Result<&mut Channel, HandlerError> {
    let channel = model
        .channel_mut(id)
        .ok_or(HandlerError::UnknownChannel(id))?;
    if channel.kind != ChannelKind::Sample {
        return Err(HandlerError::NotASampleChannel(id));
    }
    Ok(channel)
}

impl MixerHandler {
    pub fn new(
        model: Arc<SharedModel<Model>>,
        mixer: Arc<MixerShared>,
        recorder: Arc<ActionRecorder>,
        clock: Arc<Clock>,
        treat_recs_as_loops: bool,
    ) -> Self {
        Self {
            model,
            mixer,
            recorder,
            clock,
            treat_recs_as_loops,
        }
    }

    pub fn mixer(&self) -> &Arc<MixerShared> {
        &self.mixer
    }

    /// Remove every user channel and recorded action
    pub fn reset(&self) {
        self.model.mutate(SwapType::Hard, |m| m.reset_channels());
        self.recorder.reset();
        self.mixer.clear_rec_buffer();
        info!("[mixerHandler] reset");
    }

    pub fn start_rendering(&self) {
        self.mixer.enable();
    }

    pub fn stop_rendering(&self) {
        self.mixer.disable(&self.model);
    }

    pub fn add_channel(&self, name: &str) -> ChannelId {
        let id = self.model.mutate(SwapType::Hard, |m| {
            let id = m.next_channel_id();
            m.channels.push(Channel::sample(id, name));
            id
        });
        debug!("[mixerHandler] added channel {} '{}'", id, name);
        id
    }

    /// Replace the channel's wave. The channel stops.
    pub fn load_channel(&self, id: ChannelId, wave: Wave) -> Result<(), HandlerError> {
        let mut working = self.model.working();
        let channel = sample_channel_mut(&mut working, id)?;
        let name = wave.name().to_string();
        channel.wave = Some(Arc::new(wave));
        channel.shared.request(PlayRequest::Kill);
        channel.shared.set_status(ChannelStatus::Off);
        channel.shared.set_tracker(0);
        working.publish(SwapType::Hard);
        info!("[mixerHandler] loaded '{}' into channel {}", name, id);
        Ok(())
    }

    pub fn add_and_load_channel(&self, name: &str, wave: Wave) -> ChannelId {
        let id = self.model.mutate(SwapType::Hard, |m| {
            let id = m.next_channel_id();
            let mut channel = Channel::sample(id, name);
            channel.wave = Some(Arc::new(wave));
            m.channels.push(channel);
            id
        });
        debug!("[mixerHandler] added and loaded channel {}", id);
        id
    }

    /// Copy a channel with its wave (deep copy) and its actions
    pub fn clone_channel(&self, id: ChannelId) -> Result<ChannelId, HandlerError> {
        let new_id = {
            let mut working = self.model.working();
            let source = sample_channel_mut(&mut working, id)?.clone();
            let new_id = working.next_channel_id();
            let mut copy = source.duplicate(new_id);
            copy.wave = source
                .wave
                .as_ref()
                .map(|w| Arc::new(w.duplicate(format!("{}-copy", w.name()))));
            working.channels.push(copy);
            working.publish(SwapType::Hard);
            new_id
        };
        self.recorder.clone_actions(id, new_id);
        info!("[mixerHandler] cloned channel {} into {}", id, new_id);
        Ok(new_id)
    }

    /// Drop the channel's wave, keeping the channel
    pub fn free_channel(&self, id: ChannelId) -> Result<(), HandlerError> {
        let mut working = self.model.working();
        let channel = sample_channel_mut(&mut working, id)?;
        channel.wave = None;
        channel.shared.set_status(ChannelStatus::Off);
        channel.shared.set_tracker(0);
        working.publish(SwapType::Hard);
        Ok(())
    }

    pub fn delete_channel(&self, id: ChannelId) -> Result<(), HandlerError> {
        {
            let mut working = self.model.working();
            sample_channel_mut(&mut working, id)?;
            working.channels.retain(|c| c.id != id);
            working.update_solo_count();
            working.publish(SwapType::Hard);
        }
        let removed = self.recorder.clear_channel(id);
        info!("[mixerHandler] deleted channel {} ({} actions)", id, removed);
        Ok(())
    }

    pub fn rename_channel(&self, id: ChannelId, name: &str) -> Result<(), HandlerError> {
        let mut working = self.model.working();
        sample_channel_mut(&mut working, id)?.name = name.to_string();
        working.publish(SwapType::None);
        Ok(())
    }

    fn edit_channel(
        &self,
        id: ChannelId,
        swap: SwapType,
        f: impl FnOnce(&mut Channel),
    ) -> Result<(), HandlerError> {
        let mut working = self.model.working();
        let channel = working
            .channel_mut(id)
            .ok_or(HandlerError::UnknownChannel(id))?;
        f(channel);
        working.update_solo_count();
        working.publish(swap);
        Ok(())
    }

    pub fn set_mute(&self, id: ChannelId, mute: bool) -> Result<(), HandlerError> {
        self.edit_channel(id, SwapType::Soft, |c| c.mute = mute)
    }

    pub fn set_solo(&self, id: ChannelId, solo: bool) -> Result<(), HandlerError> {
        self.edit_channel(id, SwapType::Soft, |c| c.solo = solo)
    }

    /// Works on master in/out too
    pub fn set_volume(&self, id: ChannelId, volume: f32) -> Result<(), HandlerError> {
        let volume = volume.clamp(0.0, 2.0);
        self.edit_channel(id, SwapType::Soft, |c| c.volume = volume)
    }

    pub fn set_mode(&self, id: ChannelId, mode: SamplePlayMode) -> Result<(), HandlerError> {
        self.edit_channel(id, SwapType::Soft, |c| c.mode = mode)
    }

    pub fn set_midi_key(&self, id: ChannelId, key: Option<u8>) -> Result<(), HandlerError> {
        self.edit_channel(id, SwapType::None, |c| c.midi_key = key)
    }

    pub fn toggle_read_actions(&self, id: ChannelId) -> Result<(), HandlerError> {
        self.edit_channel(id, SwapType::Soft, |c| c.read_actions = !c.read_actions)
    }

    pub fn toggle_arm(&self, id: ChannelId) -> Result<(), HandlerError> {
        self.edit_channel(id, SwapType::Soft, |c| c.armed = !c.armed)
    }

    pub fn update_solo_count(&self) {
        self.model.mutate(SwapType::Soft, |m| m.update_solo_count());
    }

    pub fn set_in_to_out(&self, enabled: bool) {
        self.model.mutate(SwapType::Soft, |m| m.mixer.in_to_out = enabled);
    }

    pub fn set_limit_output(&self, enabled: bool) {
        self.model.mutate(SwapType::Soft, |m| m.mixer.limit_output = enabled);
    }

    pub fn set_input_enabled(&self, enabled: bool) {
        self.model.mutate(SwapType::Soft, |m| m.mixer.input_enabled = enabled);
    }

    pub fn set_rec_trigger_level(&self, db: f32) {
        self.model.mutate(SwapType::Soft, |m| m.mixer.rec_trigger_level = db);
    }

    /// Post a stop to every playing or waiting user channel
    pub fn stop_all_channels(&self) {
        for channel in self.model.peek().user_channels() {
            if channel.status() != ChannelStatus::Off {
                channel.shared.request(PlayRequest::Kill);
            }
        }
    }

    /// Write the recorded input into every armed channel: a new wave for
    /// empty channels, an overdub for channels that already hold one.
    /// Returns the channels that received audio.
    pub fn finalize_input_rec(&self, frames: Frame) -> Result<Vec<ChannelId>, HandlerError> {
        if frames == 0 {
            return Err(HandlerError::NothingToRecord);
        }
        let armed: Vec<(ChannelId, Option<Arc<Wave>>)> = self
            .model
            .peek()
            .user_channels()
            .filter(|c| c.armed)
            .map(|c| (c.id, c.wave.clone()))
            .collect();
        if armed.is_empty() {
            return Err(HandlerError::NothingToRecord);
        }

        let take = self.mixer.rec_buffer_copy(frames);
        let sample_rate = self.clock.sample_rate();

        let overdubs: Vec<&Arc<Wave>> = armed.iter().filter_map(|(_, w)| w.as_ref()).collect();
        if !overdubs.is_empty() {
            let _lock = self.model.data_lock();
            for wave in overdubs {
                match wave.write() {
                    Some(mut buffer) => {
                        buffer.sum_range(&take, 0, 0, frames, 1.0);
                        wave.set_edited(true);
                    }
                    None => warn!("[mixerHandler] wave '{}' is poisoned, skipping overdub", wave.name()),
                }
            }
        }

        let empties: Vec<ChannelId> = armed
            .iter()
            .filter(|(_, w)| w.is_none())
            .map(|(id, _)| *id)
            .collect();
        if !empties.is_empty() {
            let as_loop = self.treat_recs_as_loops;
            self.model.mutate(SwapType::Hard, |m| {
                for id in &empties {
                    if let Some(channel) = m.channel_mut(*id) {
                        let wave = Wave::new(format!("TAKE-{}", id), sample_rate, take.clone());
                        channel.wave = Some(Arc::new(wave));
                        if as_loop {
                            channel.mode = SamplePlayMode::Loop;
                        }
                    }
                }
            });
        }

        self.mixer.clear_rec_buffer();
        info!("[mixerHandler] finalized input take of {} frames into {} channel(s)", frames, armed.len());
        Ok(armed.into_iter().map(|(id, _)| id).collect())
    }

    pub fn has_channels(&self) -> bool {
        self.model.peek().user_channels().next().is_some()
    }

    pub fn has_audio_data(&self) -> bool {
        self.model.peek().user_channels().any(|c| c.has_wave())
    }

    pub fn has_actions(&self) -> bool {
        self.model.peek().user_channels().any(|c| c.has_actions)
    }

    pub fn has_input_recordable_channels(&self) -> bool {
        self.model.peek().has_input_recordable_channels()
    }

    pub fn has_solos(&self) -> bool {
        self.model.peek().mixer.has_solos
    }
}
