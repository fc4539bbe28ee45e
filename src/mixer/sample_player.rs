// Sample player - Renders one sample channel for one block
//
// The block is split at every sequencer event so that kick-ins, rewinds and
// recorded actions take effect on the exact frame they belong to.

use crate::actions::ActionMap;
use crate::audio::buffer::AudioBuffer;
use crate::audio::processor::process_chain;
use crate::model::Frame;
use crate::model::channel::{Channel, ChannelStatus, PlayRequest, SamplePlayMode};
use crate::sequencer::sequencer::{SequencerEvent, SequencerEventKind};

/// Render `channel` into `buf` (cleared first), then run its processors
pub(crate) fn render_sample_channel(
    channel: &Channel,
    actions: &ActionMap,
    events: &[SequencerEvent],
    clock_running: bool,
    buf: &mut AudioBuffer,
) {
    buf.clear();
    apply_request(channel, clock_running);

    let guard = channel.wave.as_ref().and_then(|w| w.try_read());
    let wave = guard.as_deref();
    let frames = buf.count_frames();

    let mut pos = 0;
    for event in events {
        let at = event.delta.min(frames);
        play(channel, wave, buf, pos, at);
        pos = at;
        on_sequencer_event(channel, actions, event);
    }
    play(channel, wave, buf, pos, frames);

    process_chain(&channel.processors, buf);
}

/// Consume the pending control request
fn apply_request(channel: &Channel, clock_running: bool) {
    let shared = &channel.shared;
    match shared.take_request() {
        PlayRequest::None => {}
        PlayRequest::Start => {
            if channel.mode.is_loop() && clock_running {
                shared.set_status(ChannelStatus::Wait);
            } else {
                shared.set_tracker(0);
                shared.set_status(ChannelStatus::Play);
            }
        }
        PlayRequest::Stop | PlayRequest::Kill => {
            shared.set_status(ChannelStatus::Off);
            shared.set_tracker(0);
        }
    }
}

fn on_sequencer_event(channel: &Channel, actions: &ActionMap, event: &SequencerEvent) {
    let shared = &channel.shared;
    match event.kind {
        SequencerEventKind::FirstBeat => match (shared.status(), channel.mode) {
            (ChannelStatus::Wait, _) => {
                shared.set_tracker(0);
                shared.set_status(ChannelStatus::Play);
            }
            (ChannelStatus::Play, SamplePlayMode::Loop) => shared.set_tracker(0),
            (ChannelStatus::Play, SamplePlayMode::LoopOnce) => {
                shared.set_status(ChannelStatus::Off);
                shared.set_tracker(0);
            }
            _ => {}
        },
        SequencerEventKind::Rewind => {
            if shared.is_playing() && channel.mode.is_loop() {
                shared.set_tracker(0);
            }
        }
        SequencerEventKind::Bar => {}
        SequencerEventKind::Actions => {
            if !channel.read_actions {
                return;
            }
            let Some(on_frame) = actions.on_frame(event.global_frame) else {
                return;
            };
            for action in on_frame.iter().filter(|a| a.channel_id == channel.id) {
                if action.event.is_note_on() {
                    shared.set_tracker(0);
                    shared.set_status(ChannelStatus::Play);
                } else if action.event.is_note_off() {
                    shared.set_status(ChannelStatus::Off);
                    shared.set_tracker(0);
                }
            }
        }
    }
}

/// Copy wave frames into `buf[from..to]` while playing
fn play(channel: &Channel, wave: Option<&AudioBuffer>, buf: &mut AudioBuffer, from: Frame, to: Frame) {
    let shared = &channel.shared;
    if from >= to || !shared.is_playing() {
        return;
    }
    let Some(wave) = wave else {
        return;
    };
    let len = wave.count_frames();
    if len == 0 {
        shared.set_status(ChannelStatus::Off);
        return;
    }

    let mut tracker = shared.tracker();
    let mut offset = from;
    while offset < to {
        if tracker >= len {
            if channel.mode != SamplePlayMode::Loop {
                break;
            }
            tracker = 0;
        }
        let count = (to - offset).min(len - tracker);
        buf.sum_range(wave, tracker, offset, count, 1.0);
        tracker += count;
        offset += count;
    }

    if tracker >= len && channel.mode != SamplePlayMode::Loop {
        shared.set_status(ChannelStatus::Off);
        tracker = 0;
    }
    shared.set_tracker(tracker);
}
